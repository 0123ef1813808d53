// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{collections::BTreeMap, error::Error, fmt, io, sync};

use crate::engine::{ProjectId, UsageSummary};

pub type QuotaResult<T> = Result<T, QuotaError>;

/// Classification of failures reported by a usage store.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ErrorEnum {
    Error,

    AlreadyExists,
    Invalid,
    NotFound,
    /// The store could not be reached or the transaction was aborted by the
    /// backend; retrying later may succeed.
    Unavailable,
}

#[derive(Debug)]
pub enum QuotaError {
    Error(String),
    Store(ErrorEnum, String),

    ProjectQuotaNotFound {
        project_id: ProjectId,
        resource: String,
    },
    QuotaClassNotFound {
        class_name: String,
        resource: String,
    },
    QuotaResourceUnknown {
        unknown: Vec<String>,
    },
    InvalidQuotaValue {
        unders: Vec<String>,
    },
    InvalidReservationExpiration {
        expire: String,
    },
    OverQuota {
        overs: Vec<String>,
        quotas: BTreeMap<String, i64>,
        usages: BTreeMap<String, UsageSummary>,
    },
    InvalidNestedQuotaSetup(String),

    ProjectNotFound(ProjectId),
    HierarchyUnsupported(String),
    NotSupported(String),
    Forbidden(String),
    InvalidInput(String),

    VolumeSizeExceedsAvailableQuota {
        name: String,
        requested: i64,
        consumed: i64,
        quota: i64,
    },
    VolumeBackupSizeExceedsAvailableQuota {
        name: String,
        requested: i64,
        consumed: i64,
        quota: i64,
    },
    LimitExceeded {
        resource: String,
        name: String,
        allowed: i64,
    },
    UnexpectedOverQuota {
        names: Vec<String>,
    },

    Io(io::Error),
    Serde(serde_json::error::Error),
    Uuid(uuid::Error),
    Chrono(chrono::ParseError),
}

impl QuotaError {
    /// True if the error is a transient store failure, the only kind of
    /// failure that may be safely ignored when resolving reservations.
    pub fn is_transient(&self) -> bool {
        matches!(self, QuotaError::Store(ErrorEnum::Unavailable, _))
    }

    /// The resources named by an OverQuota error, empty for all other errors.
    pub fn overs(&self) -> &[String] {
        match self {
            QuotaError::OverQuota { overs, .. } => overs,
            _ => &[],
        }
    }
}

impl fmt::Display for QuotaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            QuotaError::Error(ref s) => write!(f, "Error: {}", s),
            QuotaError::Store(ref kind, ref msg) => {
                write!(f, "Usage store error ({:?}): {}", kind, msg)
            }
            QuotaError::ProjectQuotaNotFound {
                ref project_id,
                ref resource,
            } => write!(
                f,
                "Quota for project {} and resource {} could not be found",
                project_id, resource
            ),
            QuotaError::QuotaClassNotFound {
                ref class_name,
                ref resource,
            } => write!(
                f,
                "Quota class {} has no limit for resource {}",
                class_name, resource
            ),
            QuotaError::QuotaResourceUnknown { ref unknown } => {
                write!(f, "Unknown quota resources {}", unknown.join(", "))
            }
            QuotaError::InvalidQuotaValue { ref unders } => write!(
                f,
                "Change would make usage less than 0 for the following resources: {}",
                unders.join(", ")
            ),
            QuotaError::InvalidReservationExpiration { ref expire } => {
                write!(f, "Invalid reservation expiration {}", expire)
            }
            QuotaError::OverQuota { ref overs, .. } => {
                write!(f, "Quota exceeded for resources: {}", overs.join(", "))
            }
            QuotaError::InvalidNestedQuotaSetup(ref reason) => {
                write!(f, "Project quotas are not properly setup for nested quotas: {}", reason)
            }
            QuotaError::ProjectNotFound(ref project_id) => {
                write!(f, "Project {} could not be found", project_id)
            }
            QuotaError::HierarchyUnsupported(ref msg) => {
                write!(f, "Project hierarchy is not supported: {}", msg)
            }
            QuotaError::NotSupported(ref msg) => write!(f, "Operation not supported: {}", msg),
            QuotaError::Forbidden(ref msg) => write!(f, "Forbidden: {}", msg),
            QuotaError::InvalidInput(ref msg) => write!(f, "Invalid input received: {}", msg),
            QuotaError::VolumeSizeExceedsAvailableQuota {
                ref name,
                requested,
                consumed,
                quota,
            } => write!(
                f,
                "Requested volume or snapshot exceeds allowed {} quota. Requested {}G, quota is {}G and {}G has been consumed.",
                name, requested, quota, consumed
            ),
            QuotaError::VolumeBackupSizeExceedsAvailableQuota {
                requested,
                consumed,
                quota,
                ..
            } => write!(
                f,
                "Requested backup exceeds allowed Backup gigabytes quota. Requested {}G, quota is {}G and {}G has been consumed.",
                requested, quota, consumed
            ),
            QuotaError::LimitExceeded {
                ref resource,
                ref name,
                allowed,
            } => write!(
                f,
                "Maximum number of {} allowed ({}) exceeded for quota '{}'.",
                resource, allowed, name
            ),
            QuotaError::UnexpectedOverQuota { ref names } => {
                write!(f, "Unexpected over quota on {}.", names.join(", "))
            }
            QuotaError::Io(ref err) => write!(f, "IO error: {}", err),
            QuotaError::Serde(ref err) => write!(f, "Serde error: {}", err),
            QuotaError::Uuid(ref err) => write!(f, "Uuid error: {}", err),
            QuotaError::Chrono(ref err) => write!(f, "Timestamp parse error: {}", err),
        }
    }
}

impl Error for QuotaError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match *self {
            QuotaError::Io(ref err) => Some(err),
            QuotaError::Serde(ref err) => Some(err),
            QuotaError::Uuid(ref err) => Some(err),
            QuotaError::Chrono(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for QuotaError {
    fn from(err: io::Error) -> QuotaError {
        QuotaError::Io(err)
    }
}

impl From<serde_json::error::Error> for QuotaError {
    fn from(err: serde_json::error::Error) -> QuotaError {
        QuotaError::Serde(err)
    }
}

impl From<uuid::Error> for QuotaError {
    fn from(err: uuid::Error) -> QuotaError {
        QuotaError::Uuid(err)
    }
}

impl From<chrono::ParseError> for QuotaError {
    fn from(err: chrono::ParseError) -> QuotaError {
        QuotaError::Chrono(err)
    }
}

impl<T> From<sync::PoisonError<T>> for QuotaError {
    fn from(err: sync::PoisonError<T>) -> QuotaError {
        QuotaError::Store(ErrorEnum::Error, err.to_string())
    }
}
