// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Records held by a usage store. These are plain data; all of the rules
//! about how they change live in the store implementations and the drivers.

use chrono::{DateTime, Utc};

use crate::engine::types::{ProjectId, QuotaId, ReservationId};

/// An explicit limit for one project and resource. Absent rows mean the
/// project uses its quota class or the default.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ProjectQuota {
    pub id: QuotaId,
    pub project_id: ProjectId,
    pub resource: String,
    pub hard_limit: i64,
    /// Sum of the limits handed out to direct children of the project.
    pub allocated: i64,
}

/// Usage counters for one project and resource.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct QuotaUsage {
    pub project_id: ProjectId,
    pub resource: String,
    pub in_use: i64,
    pub reserved: i64,
    pub until_refresh: Option<u32>,
    pub updated_at: DateTime<Utc>,
}

impl QuotaUsage {
    pub fn total(&self) -> i64 {
        self.in_use + self.reserved
    }
}

/// An outstanding change against a usage or, when `allocated_id` is set,
/// against the allocated counter of a project quota.
///
/// Usage rows are keyed by project and resource, so `project_id` and
/// `resource` identify the usage a reservation belongs to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Reservation {
    pub id: ReservationId,
    pub project_id: ProjectId,
    pub resource: String,
    pub delta: i64,
    pub expire_at: DateTime<Utc>,
    pub allocated_id: Option<QuotaId>,
}

impl Reservation {
    pub fn is_allocation(&self) -> bool {
        self.allocated_id.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expire_at < now
    }
}

/// Usage figures reported alongside an over-quota failure.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub in_use: i64,
    pub reserved: i64,
    pub allocated: i64,
}

impl UsageSummary {
    pub fn consumed(&self) -> i64 {
        self.in_use + self.reserved
    }
}

/// The effective limit of a resource for a project, with usage figures when
/// they were requested.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ProjectQuotaEntry {
    pub limit: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_use: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reserved: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allocated: Option<i64>,
}

impl ProjectQuotaEntry {
    pub fn limit(limit: i64) -> ProjectQuotaEntry {
        ProjectQuotaEntry {
            limit,
            ..Default::default()
        }
    }

    pub fn in_use(&self) -> i64 {
        self.in_use.unwrap_or(0)
    }

    pub fn reserved(&self) -> i64 {
        self.reserved.unwrap_or(0)
    }

    pub fn allocated(&self) -> i64 {
        self.allocated.unwrap_or(0)
    }
}
