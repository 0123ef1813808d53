// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{
    borrow::Borrow,
    fmt::{self, Display},
    ops::Deref,
    str::FromStr,
};

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

pub use crate::engine::types::records::{
    ProjectQuota, ProjectQuotaEntry, QuotaUsage, Reservation, UsageSummary,
};
use crate::cinder::{QuotaError, QuotaResult};

mod records;

/// The limit value meaning "no limit".
pub const UNLIMITED: i64 = -1;

/// True if the limit does not constrain usage.
pub fn is_unlimited(limit: i64) -> bool {
    limit < 0
}

macro_rules! uuid {
    ($vis:vis $ident:ident) => {
        #[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Deserialize, Serialize)]
        $vis struct $ident(pub uuid::Uuid);

        impl $ident {
            pub fn new_v4() -> Self {
                $ident(uuid::Uuid::new_v4())
            }

            pub fn parse_str(s: &str) -> $crate::cinder::QuotaResult<Self> {
                Ok($ident(uuid::Uuid::parse_str(s)?))
            }

            pub fn nil() -> Self {
                $ident(uuid::Uuid::nil())
            }
        }

        impl std::ops::Deref for $ident {
            type Target = uuid::Uuid;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl std::fmt::Display for $ident {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Display::fmt(&self.0, f)
            }
        }
    }
}

uuid!(pub ReservationId);

uuid!(pub VolumeTypeId);

uuid!(pub QuotaId);

/// Identity-service project id. These are opaque strings, not necessarily
/// UUIDs.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn new(id: String) -> ProjectId {
        ProjectId(id)
    }
}

impl<'a> From<&'a str> for ProjectId {
    fn from(id: &'a str) -> ProjectId {
        ProjectId(id.to_owned())
    }
}

impl From<String> for ProjectId {
    fn from(id: String) -> ProjectId {
        ProjectId(id)
    }
}

impl AsRef<str> for ProjectId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for ProjectId {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ProjectId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named volume type. Per-type quotas are keyed by the type name.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct VolumeType {
    pub id: VolumeTypeId,
    pub name: String,
}

/// The identity of the caller on whose behalf an operation runs.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RequestContext {
    pub project_id: Option<ProjectId>,
    pub user_id: Option<String>,
    pub is_admin: bool,
    pub quota_class: Option<String>,
}

impl RequestContext {
    pub fn new<P>(project_id: P) -> RequestContext
    where
        P: Into<ProjectId>,
    {
        RequestContext {
            project_id: Some(project_id.into()),
            ..Default::default()
        }
    }

    /// An administrative context not scoped to any project.
    pub fn admin() -> RequestContext {
        RequestContext {
            is_admin: true,
            ..Default::default()
        }
    }

    pub fn with_quota_class(mut self, quota_class: &str) -> RequestContext {
        self.quota_class = Some(quota_class.to_owned());
        self
    }

    /// A copy of this context with administrative privileges.
    pub fn elevated(&self) -> RequestContext {
        RequestContext {
            is_admin: true,
            ..self.clone()
        }
    }

    /// The explicitly requested project, else the project of the context.
    pub fn resolve_project(&self, project_id: Option<&ProjectId>) -> QuotaResult<ProjectId> {
        project_id
            .or(self.project_id.as_ref())
            .cloned()
            .ok_or_else(|| {
                QuotaError::InvalidInput("no project given and context has no project".into())
            })
    }
}

/// When a reservation expires.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Expire {
    /// Seconds from now.
    Seconds(i64),
    /// A span from now.
    After(Duration),
    /// An absolute instant, used unchanged.
    At(DateTime<Utc>),
}

impl Expire {
    /// Compute the absolute expiry instant; no value means the configured
    /// default span.
    pub fn resolve(expire: Option<Expire>, now: DateTime<Utc>, default: Duration) -> DateTime<Utc> {
        match expire {
            None => now + default,
            Some(Expire::Seconds(secs)) => now + Duration::seconds(secs),
            Some(Expire::After(span)) => now + span,
            Some(Expire::At(at)) => at,
        }
    }

    /// Interpret an untyped expiry argument: null selects the default, an
    /// integer is a number of seconds, a string is either a number of
    /// seconds or an RFC 3339 timestamp.
    pub fn from_value(value: &Value) -> QuotaResult<Option<Expire>> {
        match value {
            Value::Null => Ok(None),
            Value::Number(n) => n.as_i64().map(|secs| Some(Expire::Seconds(secs))).ok_or_else(
                || QuotaError::InvalidReservationExpiration {
                    expire: n.to_string(),
                },
            ),
            Value::String(s) => Ok(Some(Expire::from_str(s)?)),
            other => Err(QuotaError::InvalidReservationExpiration {
                expire: other.to_string(),
            }),
        }
    }
}

impl FromStr for Expire {
    type Err = QuotaError;

    fn from_str(s: &str) -> QuotaResult<Expire> {
        if let Ok(secs) = s.parse::<i64>() {
            return Ok(Expire::Seconds(secs));
        }
        DateTime::parse_from_rfc3339(s)
            .map(|at| Expire::At(at.with_timezone(&Utc)))
            .map_err(|_| QuotaError::InvalidReservationExpiration {
                expire: s.to_owned(),
            })
    }
}
