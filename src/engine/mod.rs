// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

pub use self::{
    db_driver::DbQuotaDriver,
    driver::QuotaDriver,
    engine::{build_driver, QuotaEngine},
    hierarchy::{ProjectHierarchyResolver, ProjectNode, ProjectTree},
    nested_driver::NestedDbQuotaDriver,
    quota_set::{delete_project_quotas, update_project_quotas, MAX_LIMIT},
    resources::{
        CountFn, GroupResources, Resource, ResourceKind, ResourceSet, ResourceSource,
        StaticResources, UsageSync, VolumeTypeRegistry, VolumeTypeResources,
    },
    sim_engine::{
        LimitRecord, ProjectRecord, QuotaSnapshot, SimBackends, SimHierarchy, SimInventory,
        SimStore, SimVolumeTypes, UsageRecord,
    },
    store::{ReserveRequest, UsageSource, UsageStore, DEFAULT_QUOTA_CLASS},
    types::{
        is_unlimited, Expire, ProjectId, ProjectQuota, ProjectQuotaEntry, QuotaId, QuotaUsage,
        RequestContext, Reservation, ReservationId, UsageSummary, VolumeType, VolumeTypeId,
        UNLIMITED,
    },
};

#[macro_use]
mod macros;

mod db_driver;
mod driver;
#[allow(clippy::module_inception)]
mod engine;
mod hierarchy;
mod nested_driver;
mod quota_set;
mod resources;
mod sim_engine;
mod store;
mod types;
pub mod utils;
