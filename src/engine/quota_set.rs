// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Administrative changes to the explicit limits of a project. With nested
//! quotas, a change to a child's limit is also a change to what its
//! ancestors have handed down, and is recorded in their allocated counters.

use std::collections::BTreeMap;

use crate::{
    cinder::{QuotaError, QuotaResult},
    engine::{
        driver::QuotaDriver,
        engine::QuotaEngine,
        hierarchy::ProjectNode,
        nested_driver::NestedDbQuotaDriver,
        resources::ResourceSet,
        types::{ProjectId, ProjectQuotaEntry, RequestContext, ReservationId, UNLIMITED},
        utils,
    },
};

/// The largest limit a store can hold.
pub const MAX_LIMIT: i64 = i32::MAX as i64;

const PER_VOLUME_GIGABYTES: &str = "per_volume_gigabytes";

/// Explicit limits and usage of a project across both engines.
fn explicit_quotas(
    quotas: &QuotaEngine,
    group_quotas: &QuotaEngine,
    ctx: &RequestContext,
    project_id: &ProjectId,
) -> QuotaResult<BTreeMap<String, ProjectQuotaEntry>> {
    let mut values = quotas.get_project_quotas(ctx, project_id, None, false, true)?;
    values.extend(group_quotas.get_project_quotas(ctx, project_id, None, false, true)?);
    Ok(values)
}

/// A new limit may not be below what the project already consumes of the
/// resource.
fn validate_existing_resource(
    resource: &str,
    limit: i64,
    current: &BTreeMap<String, ProjectQuotaEntry>,
    nested: bool,
) -> QuotaResult<()> {
    if resource == PER_VOLUME_GIGABYTES || limit == UNLIMITED {
        return Ok(());
    }
    let used = current.get(resource).map_or(0, |entry| {
        let mut used = entry.in_use() + entry.reserved();
        if nested {
            used += entry.allocated();
        }
        used
    });
    if limit < used {
        return Err(QuotaError::InvalidInput(format!(
            "Quota {} limit must be equal or greater than existing resources. Current usage is {} and the requested limit is {}.",
            resource, used, limit
        )));
    }
    Ok(())
}

/// With hierarchical projects only an admin of the immediate parent, an
/// admin of a project above the target, or the cloud admin may change a
/// project's limits.
fn authorize_update_or_delete(
    context_project: &ProjectNode,
    target_project_id: &ProjectId,
    parent_id: &ProjectId,
) -> QuotaResult<()> {
    if context_project.is_admin_project {
        return Ok(());
    }
    if context_project.parent_id.is_some() && parent_id != &context_project.id {
        return Err(QuotaError::Forbidden(
            "Update and delete quota operations can only be made by an admin of immediate parent or by the CLOUD admin.".into(),
        ));
    }
    if &context_project.id == target_project_id {
        return Err(QuotaError::Forbidden(
            "Update and delete quota operations can only be made by an admin of immediate parent or by the CLOUD admin.".into(),
        ));
    }
    let subtree = context_project.subtree.as_deref().unwrap_or_default();
    if !utils::is_descendant(target_project_id, subtree) {
        return Err(QuotaError::Forbidden(
            "Update and delete quota operations can only be made to projects in the same hierarchy of the project in which users are scoped to.".into(),
        ));
    }
    Ok(())
}

/// Look up the target project and, if it has a parent, check that the
/// caller may change it.
fn authorized_target(
    driver: &NestedDbQuotaDriver,
    ctx: &RequestContext,
    target_project_id: &ProjectId,
) -> QuotaResult<ProjectNode> {
    let target = utils::get_project_hierarchy(
        driver.hierarchy(),
        ctx,
        target_project_id,
        false,
        true,
        false,
    )?;
    if let Some(ref parent_id) = target.parent_id {
        if ctx.is_admin {
            return Ok(target);
        }
        let context_project_id = ctx.project_id.as_ref().ok_or_else(|| {
            QuotaError::Forbidden("a project scoped context is required".into())
        })?;
        let context_project = utils::get_project_hierarchy(
            driver.hierarchy(),
            ctx,
            context_project_id,
            true,
            false,
            false,
        )?;
        authorize_update_or_delete(&context_project, &target.id, parent_id)?;
    }
    Ok(target)
}

/// Record in the ancestors of `target` the change in what the target holds
/// of `resource` when its limit becomes `new_limit`. A project with no limit
/// holds what it uses.
fn update_nested_quota_allocated(
    driver: &NestedDbQuotaDriver,
    ctx: &RequestContext,
    resources: &ResourceSet,
    target: &ProjectNode,
    current: &BTreeMap<String, ProjectQuotaEntry>,
    resource: &str,
    new_limit: i64,
) -> QuotaResult<Vec<ReservationId>> {
    if resource == PER_VOLUME_GIGABYTES {
        return Ok(Vec::new());
    }
    let entry = current.get(resource).copied().unwrap_or_default();
    let held = |limit: i64| if limit == UNLIMITED { entry.in_use() } else { limit };
    let change = held(new_limit) - held(entry.limit);
    if change == 0 {
        return Ok(Vec::new());
    }
    utils::update_alloc_to_next_hard_limit(driver, ctx, resources, resource, change, None, &target.id)
}

/// Set explicit limits of a project and return its resulting limits.
///
/// Every value is validated before anything is written. With nested quotas
/// the ancestors' allocated counters are adjusted as well; if any ancestor
/// can not give the quota, nothing is changed.
pub fn update_project_quotas(
    quotas: &QuotaEngine,
    group_quotas: &QuotaEngine,
    ctx: &RequestContext,
    target_project_id: &ProjectId,
    values: &BTreeMap<String, i64>,
) -> QuotaResult<BTreeMap<String, ProjectQuotaEntry>> {
    let mut resources = quotas.resources()?;
    resources.extend(group_quotas.resources()?);

    let bad_keys = values
        .keys()
        .filter(|key| !resources.contains(key))
        .cloned()
        .collect::<Vec<_>>();
    if !bad_keys.is_empty() {
        return Err(QuotaError::InvalidInput(format!(
            "Bad key(s) {} in quota_set",
            bad_keys.join(", ")
        )));
    }
    if let Some((key, value)) = values
        .iter()
        .find(|&(_, &value)| !(UNLIMITED..=MAX_LIMIT).contains(&value))
    {
        return Err(QuotaError::InvalidInput(format!(
            "{} must be between {} and {}, not {}",
            key, UNLIMITED, MAX_LIMIT, value
        )));
    }

    let nested = match quotas.driver().as_nested() {
        Some(driver) => Some((driver, authorized_target(driver, ctx, target_project_id)?)),
        None => None,
    };

    let current = explicit_quotas(quotas, group_quotas, ctx, target_project_id)?;
    let store = quotas.store();
    let mut reservations = Vec::new();
    for (key, &value) in values {
        let result = validate_existing_resource(key, value, &current, nested.is_some()).and_then(
            |_| match &nested {
                Some((driver, target)) => {
                    update_nested_quota_allocated(driver, ctx, &resources, target, &current, key, value)
                }
                None => Ok(Vec::new()),
            },
        );
        match result {
            Ok(ids) => reservations.extend(ids),
            Err(err) => {
                if !reservations.is_empty() {
                    store.reservation_rollback(&reservations)?;
                }
                return Err(err);
            }
        }
    }

    for (key, &value) in values {
        match store.quota_update(target_project_id, key, value) {
            Err(QuotaError::ProjectQuotaNotFound { .. }) => {
                store.quota_create(target_project_id, key, value, 0)?;
            }
            result => result?,
        }
    }
    if !reservations.is_empty() {
        store.reservation_commit(&reservations)?;
    }
    info!(
        "Updated quotas of project {}: {:?}",
        target_project_id, values
    );

    let mut report = quotas.get_project_quotas(ctx, target_project_id, None, true, false)?;
    report.extend(group_quotas.get_project_quotas(ctx, target_project_id, None, true, false)?);
    Ok(report)
}

/// Remove the explicit limits of a project, returning it to its defaults.
///
/// With nested quotas a project whose children still hold quota can not be
/// reset, and what the project held is handed back to its ancestors.
pub fn delete_project_quotas(
    quotas: &QuotaEngine,
    group_quotas: &QuotaEngine,
    ctx: &RequestContext,
    target_project_id: &ProjectId,
) -> QuotaResult<()> {
    let driver = match quotas.driver().as_nested() {
        Some(driver) => driver,
        None => {
            quotas.destroy_by_project(ctx, target_project_id)?;
            info!("Removed quotas of project {}", target_project_id);
            return Ok(());
        }
    };
    delete_nested_quotas(driver, quotas, group_quotas, ctx, target_project_id)
}

fn delete_nested_quotas(
    driver: &NestedDbQuotaDriver,
    quotas: &QuotaEngine,
    group_quotas: &QuotaEngine,
    ctx: &RequestContext,
    target_project_id: &ProjectId,
) -> QuotaResult<()> {
    let mut resources = quotas.resources()?;
    resources.extend(group_quotas.resources()?);
    let current = explicit_quotas(quotas, group_quotas, ctx, target_project_id)?;
    let target = authorized_target(driver, ctx, target_project_id)?;

    let mut defaults = quotas.get_defaults(ctx, Some(target_project_id))?;
    defaults.extend(group_quotas.get_defaults(ctx, Some(target_project_id))?);
    for (name, entry) in &current {
        if entry.allocated() != 0 {
            return Err(QuotaError::InvalidInput(
                "About to delete child projects having non-zero quota. This should not be performed".into(),
            ));
        }
        if let Some(&default) = defaults.get(name) {
            validate_existing_resource(name, default, &current, true)?;
        }
    }

    driver.destroy_by_project(ctx, &target.id)?;

    let store = quotas.store();
    let mut reservations = Vec::new();
    for name in current.keys() {
        match update_nested_quota_allocated(driver, ctx, &resources, &target, &current, name, 0) {
            Ok(ids) => reservations.extend(ids),
            Err(err) => {
                if !reservations.is_empty() {
                    store.reservation_rollback(&reservations)?;
                }
                return Err(err);
            }
        }
    }
    if !reservations.is_empty() {
        store.reservation_commit(&reservations)?;
    }
    info!("Removed quotas of project {}", target.id);
    Ok(())
}
