// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! In-memory implementations of the storage and identity seams, for tests,
//! tools and experimentation.

pub use self::{
    hierarchy::SimHierarchy,
    inventory::SimInventory,
    snapshot::{LimitRecord, ProjectRecord, QuotaSnapshot, SimBackends, UsageRecord},
    store::SimStore,
    volume_types::SimVolumeTypes,
};

mod hierarchy;
mod inventory;
mod randomization;
mod snapshot;
mod store;
mod volume_types;
