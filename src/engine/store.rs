// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The persistence interface consumed by the quota drivers.

use std::{collections::BTreeMap, fmt::Debug};

use chrono::{DateTime, Duration, Utc};

use crate::{
    cinder::QuotaResult,
    engine::{
        resources::{ResourceSet, UsageSync},
        types::{ProjectId, ProjectQuota, QuotaUsage, ReservationId, VolumeType},
    },
};

/// The quota class whose limits replace the configured defaults.
pub const DEFAULT_QUOTA_CLASS: &str = "default";

/// Everything `UsageStore::quota_reserve` needs to check and record one
/// set of deltas.
#[derive(Debug)]
pub struct ReserveRequest<'a> {
    pub project_id: &'a ProjectId,
    /// Must contain every resource named in `deltas`; used to find the sync
    /// routine of each resource.
    pub resources: &'a ResourceSet,
    /// Effective limit of every resource named in `deltas`.
    pub quotas: &'a BTreeMap<String, i64>,
    pub deltas: &'a BTreeMap<String, i64>,
    pub expire: DateTime<Utc>,
    pub until_refresh: Option<u32>,
    pub max_age: Option<Duration>,
    /// Record the deltas against the allocated counters of the project's
    /// quotas rather than against its usage.
    pub is_allocated_reserve: bool,
}

/// Authoritative usage, the source of truth for usage refreshes.
pub trait UsageSource: Debug + Send + Sync {
    /// Recompute in-use figures for one sync routine. The result is keyed by
    /// resource name: the routine name, suffixed with `_<type name>` when a
    /// volume type is given.
    fn sync(
        &self,
        project_id: &ProjectId,
        sync: UsageSync,
        volume_type: Option<&VolumeType>,
    ) -> QuotaResult<BTreeMap<String, i64>>;
}

/// Durable storage of limits, usages and reservations.
///
/// Implementations must make `quota_reserve`, `reservation_commit`,
/// `reservation_rollback` and `reservation_expire` each a single atomic
/// transaction, with row locking strong enough that two concurrent
/// reservations against one usage can not both be checked against the same
/// `reserved` value.
pub trait UsageStore: Debug + Send + Sync {
    /// The explicit limit of a project, or `ProjectQuotaNotFound`.
    fn quota_get(&self, project_id: &ProjectId, resource: &str) -> QuotaResult<ProjectQuota>;

    /// Explicit limits of a project by resource name.
    fn quota_get_all_by_project(&self, project_id: &ProjectId)
        -> QuotaResult<BTreeMap<String, i64>>;

    /// Allocated counters of a project by resource name.
    fn quota_allocated_get_all_by_project(
        &self,
        project_id: &ProjectId,
    ) -> QuotaResult<BTreeMap<String, i64>>;

    fn quota_create(
        &self,
        project_id: &ProjectId,
        resource: &str,
        limit: i64,
        allocated: i64,
    ) -> QuotaResult<ProjectQuota>;

    /// Change an explicit limit; `ProjectQuotaNotFound` if there is none.
    fn quota_update(&self, project_id: &ProjectId, resource: &str, limit: i64)
        -> QuotaResult<()>;

    /// Set an allocated counter; `ProjectQuotaNotFound` if the project has no
    /// explicit limit for the resource.
    fn quota_allocated_update(
        &self,
        project_id: &ProjectId,
        resource: &str,
        allocated: i64,
    ) -> QuotaResult<()>;

    /// Remove the explicit limits of a project, keeping usages and
    /// reservations.
    fn quota_destroy_by_project(&self, project_id: &ProjectId) -> QuotaResult<()>;

    /// Remove limits, usages and reservations of a project.
    fn quota_destroy_all_by_project(&self, project_id: &ProjectId) -> QuotaResult<()>;

    /// A quota class limit, or `QuotaClassNotFound`.
    fn quota_class_get(&self, class_name: &str, resource: &str) -> QuotaResult<i64>;

    fn quota_class_get_all_by_name(&self, class_name: &str) -> QuotaResult<BTreeMap<String, i64>>;

    fn quota_class_get_defaults(&self) -> QuotaResult<BTreeMap<String, i64>> {
        self.quota_class_get_all_by_name(DEFAULT_QUOTA_CLASS)
    }

    /// Create or replace a quota class limit.
    fn quota_class_create(&self, class_name: &str, resource: &str, limit: i64) -> QuotaResult<()>;

    fn quota_usage_get_all_by_project(
        &self,
        project_id: &ProjectId,
    ) -> QuotaResult<BTreeMap<String, QuotaUsage>>;

    /// Check the deltas against the limits and, if none is exceeded, record
    /// them as reservations. Either every delta is reserved or none is.
    fn quota_reserve(&self, request: &ReserveRequest<'_>) -> QuotaResult<Vec<ReservationId>>;

    /// Turn reservations into usage. Unknown ids are ignored.
    fn reservation_commit(&self, reservations: &[ReservationId]) -> QuotaResult<()>;

    /// Discard reservations. Unknown ids are ignored.
    fn reservation_rollback(&self, reservations: &[ReservationId]) -> QuotaResult<()>;

    /// Roll back every reservation which expired before `now`; returns the
    /// number removed.
    fn reservation_expire(&self, now: DateTime<Utc>) -> QuotaResult<usize>;
}
