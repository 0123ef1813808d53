// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

#![allow(dead_code)]

use std::{collections::BTreeMap, sync::Arc, sync::Once};

use cinder_quota::{
    cinder::{QuotaConfig, QuotaFlag},
    engine::{
        build_driver, QuotaEngine, Resource, SimHierarchy, SimInventory, SimStore, UsageSync,
    },
};

static INIT: Once = Once::new();

pub fn init_logger() {
    INIT.call_once(env_logger::init);
}

/// An engine over reservable volumes, gigabytes and snapshots with their
/// configured defaults, backed by the in-memory store.
pub struct Harness {
    pub store: Arc<SimStore>,
    pub inventory: Arc<SimInventory>,
    pub hierarchy: Arc<SimHierarchy>,
    pub engine: QuotaEngine,
}

pub fn harness(config: QuotaConfig, resources: Vec<Resource>) -> Harness {
    init_logger();
    let inventory = Arc::new(SimInventory::default());
    let store = Arc::new(SimStore::new(inventory.clone()));
    let hierarchy = Arc::new(SimHierarchy::new());
    let driver = build_driver(store.clone(), Arc::new(config), Some(hierarchy.clone()))
        .expect("driver construction succeeds with a hierarchy");
    let engine = QuotaEngine::with_driver(driver);
    engine
        .register_resources(resources)
        .expect("static resources accept registration");
    Harness {
        store,
        inventory,
        hierarchy,
        engine,
    }
}

pub fn volume_resources() -> Vec<Resource> {
    vec![
        Resource::reservable("volumes", UsageSync::Volumes, Some(QuotaFlag::QuotaVolumes)),
        Resource::reservable(
            "gigabytes",
            UsageSync::Gigabytes,
            Some(QuotaFlag::QuotaGigabytes),
        ),
        Resource::reservable(
            "snapshots",
            UsageSync::Snapshots,
            Some(QuotaFlag::QuotaSnapshots),
        ),
    ]
}

pub fn deltas(pairs: &[(&str, i64)]) -> BTreeMap<String, i64> {
    pairs.iter().map(|&(k, v)| (k.to_owned(), v)).collect()
}
