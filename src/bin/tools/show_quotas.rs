// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use cinder_quota::{
    cinder::DriverKind,
    engine::{build_driver, ProjectId, QuotaEngine, RequestContext},
};

use crate::tools::check_quotas::{read_config, read_snapshot};

pub fn run(
    infile: &Path,
    project: &str,
    config: Option<&PathBuf>,
    nested: bool,
) -> Result<(), String> {
    let snapshot = read_snapshot(infile)?;
    let mut config = read_config(config)?;
    if nested {
        config.quota_driver = DriverKind::Nested;
    }
    let backends = snapshot
        .load()
        .map_err(|the_error| format!("Error loading snapshot: {}", the_error))?;

    let driver = build_driver(
        backends.store.clone(),
        Arc::new(config),
        Some(backends.hierarchy.clone()),
    )
    .map_err(|the_error| format!("Error: {}", the_error))?;
    let quotas = QuotaEngine::for_volume_types(backends.volume_types.clone(), driver.clone());
    let group_quotas = QuotaEngine::for_groups(driver);

    let ctx = RequestContext::admin();
    let project_id = ProjectId::from(project);
    let mut report = quotas
        .get_project_quotas(&ctx, &project_id, None, true, true)
        .map_err(|the_error| format!("Error: {}", the_error))?;
    report.extend(
        group_quotas
            .get_project_quotas(&ctx, &project_id, None, true, true)
            .map_err(|the_error| format!("Error: {}", the_error))?,
    );

    let report_str = serde_json::to_string_pretty(&report)
        .map_err(|the_json_error| format!("Error serializing report: {}", the_json_error))?;
    println!("{}", report_str);
    Ok(())
}
