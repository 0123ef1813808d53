// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use cinder_quota::{
    cinder::{DriverKind, QuotaConfig},
    engine::{
        utils, GroupResources, NestedDbQuotaDriver, QuotaSnapshot, RequestContext, ResourceSet,
        ResourceSource, SimBackends, VolumeTypeResources,
    },
};

pub fn read_snapshot(infile: &Path) -> Result<QuotaSnapshot, String> {
    let snapshot_str = fs::read_to_string(infile)
        .map_err(|the_io_error| format!("Error opening file: {}", the_io_error))?;
    QuotaSnapshot::from_json(&snapshot_str)
        .map_err(|the_json_error| format!("Error parsing json into structs: {}", the_json_error))
}

pub fn read_config(config: Option<&PathBuf>) -> Result<QuotaConfig, String> {
    match config {
        Some(path) => QuotaConfig::from_file(path)
            .map_err(|the_error| format!("Error reading configuration: {}", the_error)),
        None => Ok(QuotaConfig::default()),
    }
}

/// The volume and group resources of the loaded volume types.
pub fn all_resources(backends: &SimBackends) -> Result<ResourceSet, String> {
    let mut resources = VolumeTypeResources::new(backends.volume_types.clone())
        .snapshot()
        .map_err(|the_error| format!("Error: {}", the_error))?;
    resources.extend(
        GroupResources
            .snapshot()
            .map_err(|the_error| format!("Error: {}", the_error))?,
    );
    Ok(resources)
}

pub fn run(infile: &Path, config: Option<&PathBuf>, fix: bool) -> Result<(), String> {
    let snapshot = read_snapshot(infile)?;
    let config = QuotaConfig {
        quota_driver: DriverKind::Nested,
        ..read_config(config)?
    };
    let backends = snapshot
        .load()
        .map_err(|the_error| format!("Error loading snapshot: {}", the_error))?;
    let resources = all_resources(&backends)?;
    let driver = NestedDbQuotaDriver::new(
        backends.store.clone(),
        Arc::new(config),
        backends.hierarchy.clone(),
    );

    utils::validate_setup_for_nested_quota_use(&RequestContext::admin(), &resources, &driver, fix)
        .map_err(|the_error| format!("{}", the_error))?;

    if fix {
        let fixed = snapshot
            .capture(&backends.store)
            .and_then(|fixed| fixed.to_json())
            .map_err(|the_error| format!("Error: {}", the_error))?;
        println!("{}", fixed);
    } else {
        println!("OK");
    }
    Ok(())
}
