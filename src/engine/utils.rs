// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Helpers shared by the nested driver, the quota-set flow and callers that
//! reserve volumes.

use std::collections::BTreeMap;

use chrono::Utc;

use crate::{
    cinder::{QuotaError, QuotaResult},
    engine::{
        driver::QuotaDriver,
        engine::QuotaEngine,
        hierarchy::{ProjectHierarchyResolver, ProjectNode, ProjectTree},
        nested_driver::NestedDbQuotaDriver,
        resources::ResourceSet,
        store::ReserveRequest,
        types::{is_unlimited, Expire, ProjectId, RequestContext, ReservationId, VolumeTypeId},
    },
};

/// Resources whose over-quota failures have a dedicated error when they are
/// the resource being reserved.
const LIMITED_RESOURCES: [&str; 4] = ["volumes", "snapshots", "backups", "groups"];

/// Look up a project, hiding the identity service's domains: a root project
/// has no parent and domains do not appear among the parents. An identity
/// service without hierarchies reports every project as a root.
pub fn get_project_hierarchy(
    resolver: &dyn ProjectHierarchyResolver,
    ctx: &RequestContext,
    project_id: &ProjectId,
    subtree_as_ids: bool,
    parents_as_ids: bool,
    is_admin_project: bool,
) -> QuotaResult<ProjectNode> {
    let project = match resolver.get_project_hierarchy(ctx, project_id, subtree_as_ids, parents_as_ids)
    {
        Err(QuotaError::HierarchyUnsupported(_)) => {
            return Ok(ProjectNode {
                id: project_id.clone(),
                parent_id: None,
                domain_id: None,
                subtree: None,
                parents: None,
                is_admin_project,
            })
        }
        result => result?,
    };

    let domain_id = project.domain_id;
    let parent_id = project.parent_id.filter(|parent| Some(parent) != domain_id.as_ref());
    let parents = if parents_as_ids {
        project.parents.map(|parents| {
            parents
                .into_iter()
                .filter(|parent| Some(parent) != domain_id.as_ref())
                .collect()
        })
    } else {
        None
    };
    Ok(ProjectNode {
        id: project.id,
        parent_id,
        domain_id,
        subtree: if subtree_as_ids { project.subtree } else { None },
        parents,
        is_admin_project: is_admin_project || project.is_admin_project,
    })
}

pub fn get_parent_project_id(
    resolver: &dyn ProjectHierarchyResolver,
    ctx: &RequestContext,
    project_id: &ProjectId,
) -> QuotaResult<Option<ProjectId>> {
    Ok(get_project_hierarchy(resolver, ctx, project_id, false, false, false)?.parent_id)
}

pub fn get_all_root_project_ids(
    resolver: &dyn ProjectHierarchyResolver,
    ctx: &RequestContext,
) -> QuotaResult<Vec<ProjectId>> {
    resolver.get_all_root_project_ids(ctx)
}

/// True if `target` is anywhere in `subtree`.
pub fn is_descendant(target: &str, subtree: &[ProjectTree]) -> bool {
    subtree
        .iter()
        .any(|tree| &*tree.id == target || tree.has_descendant(target))
}

/// Record a change of `delta` in what `project_id` holds of `resource`
/// against the allocated counters of its ancestors, nearest first, up to and
/// including the first ancestor with a limit. On any failure everything
/// recorded so far is rolled back and the error returned.
pub fn update_alloc_to_next_hard_limit(
    driver: &NestedDbQuotaDriver,
    ctx: &RequestContext,
    resources: &ResourceSet,
    resource: &str,
    delta: i64,
    expire: Option<Expire>,
    project_id: &ProjectId,
) -> QuotaResult<Vec<ReservationId>> {
    let expire = Expire::resolve(expire, Utc::now(), driver.config().reservation_expire());
    let parents = get_project_hierarchy(driver.hierarchy(), ctx, project_id, false, true, false)?
        .parents
        .unwrap_or_default();
    let deltas = BTreeMap::from([(resource.to_owned(), delta)]);

    let mut reservations = Vec::new();
    for parent in parents {
        let result = driver
            .get_by_project_or_default(ctx, resources, &parent, resource)
            .and_then(|limit| {
                let ids = driver.store().quota_reserve(&ReserveRequest {
                    project_id: &parent,
                    resources,
                    quotas: &BTreeMap::from([(resource.to_owned(), limit)]),
                    deltas: &deltas,
                    expire,
                    until_refresh: None,
                    max_age: None,
                    is_allocated_reserve: true,
                })?;
                Ok((limit, ids))
            });
        match result {
            Ok((limit, ids)) => {
                reservations.extend(ids);
                if !is_unlimited(limit) {
                    break;
                }
            }
            Err(err) => {
                if let Err(rollback_err) = driver.store().reservation_rollback(&reservations) {
                    error!(
                        "Failed to roll back allocation reservations {:?}: {}",
                        reservations, rollback_err
                    );
                }
                return Err(err);
            }
        }
    }
    Ok(reservations)
}

/// Validate the tree below every root project.
pub fn validate_setup_for_nested_quota_use(
    ctx: &RequestContext,
    resources: &ResourceSet,
    driver: &NestedDbQuotaDriver,
    fix_allocated_quotas: bool,
) -> QuotaResult<()> {
    let roots = get_all_root_project_ids(driver.hierarchy(), ctx).map_err(|err| match err {
        QuotaError::HierarchyUnsupported(_) => QuotaError::HierarchyUnsupported(
            "an identity service with project hierarchies is required for nested quotas".into(),
        ),
        err => err,
    })?;
    for root in roots {
        let tree = get_project_hierarchy(driver.hierarchy(), ctx, &root, true, false, false)?.tree();
        driver.validate_nested_setup(ctx, resources, &tree, fix_allocated_quotas)?;
    }
    Ok(())
}

/// Turn an OverQuota error met while reserving `resource` into the error a
/// caller reports. `size` is the requested size in gigabytes, if any. Other
/// errors are returned unchanged.
pub fn process_reserve_over_quota(
    ctx: &RequestContext,
    err: QuotaError,
    resource: &str,
    size: Option<i64>,
) -> QuotaError {
    let (overs, quotas, usages) = match err {
        QuotaError::OverQuota {
            overs,
            quotas,
            usages,
        } => (overs, quotas, usages),
        err => return err,
    };
    let project = ctx
        .project_id
        .as_ref()
        .map(|p| p.to_string())
        .unwrap_or_default();
    let consumed = |name: &str| usages.get(name).map_or(0, |u| u.consumed());
    let quota = |name: &str| quotas.get(name).copied().unwrap_or(0);
    let singular = resource.strip_suffix('s').unwrap_or(resource);

    let mut unexpected = Vec::new();
    for over in overs {
        if over.contains("gigabytes") {
            let requested = size.unwrap_or(0);
            warn!(
                "Quota exceeded for {}, tried to create {}G {} ({}G of {}G already consumed)",
                project,
                requested,
                singular,
                consumed(&over),
                quota(&over)
            );
            let (consumed, quota) = (consumed(&over), quota(&over));
            return if resource == "backups" {
                QuotaError::VolumeBackupSizeExceedsAvailableQuota {
                    name: over,
                    requested,
                    consumed,
                    quota,
                }
            } else {
                QuotaError::VolumeSizeExceedsAvailableQuota {
                    name: over,
                    requested,
                    consumed,
                    quota,
                }
            };
        }
        if LIMITED_RESOURCES.contains(&resource) && over.contains(resource) {
            warn!(
                "Quota exceeded for {}, tried to create {} ({} {}s already consumed)",
                project,
                singular,
                consumed(&over),
                singular
            );
            return QuotaError::LimitExceeded {
                resource: resource.to_owned(),
                allowed: quota(&over),
                name: over,
            };
        }
        unexpected.push(over);
    }
    QuotaError::UnexpectedOverQuota { names: unexpected }
}

/// Reserve one volume of `size` gigabytes of the given type for the project
/// owning the volume, which need not be the caller's project. With
/// `reserve_vol_type_only` only the per-type resources are reserved.
pub fn get_volume_type_reservation(
    engine: &QuotaEngine,
    ctx: &RequestContext,
    project_id: &ProjectId,
    size: i64,
    volume_type_id: Option<VolumeTypeId>,
    reserve_vol_type_only: bool,
) -> QuotaResult<Vec<ReservationId>> {
    let mut deltas = quota_map!("volumes" => 1, "gigabytes" => size);
    engine.add_volume_type_opts(ctx, &mut deltas, volume_type_id)?;
    if reserve_vol_type_only {
        deltas.remove("volumes");
        deltas.remove("gigabytes");
    }
    engine
        .reserve(ctx, &deltas, None, Some(project_id))
        .map_err(|err| process_reserve_over_quota(ctx, err, "volumes", Some(size)))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::{
        cinder::QuotaConfig,
        engine::{
            sim_engine::{SimHierarchy, SimInventory, SimStore},
            store::UsageStore,
            types::UsageSummary,
        },
    };

    use super::*;

    /// A resolver that can not find one of the projects it otherwise knows.
    #[derive(Debug)]
    struct LosesProject {
        inner: SimHierarchy,
        lost: ProjectId,
    }

    impl ProjectHierarchyResolver for LosesProject {
        fn get_project_hierarchy(
            &self,
            ctx: &RequestContext,
            project_id: &ProjectId,
            subtree_as_ids: bool,
            parents_as_ids: bool,
        ) -> QuotaResult<ProjectNode> {
            if *project_id == self.lost {
                return Err(QuotaError::ProjectNotFound(project_id.clone()));
            }
            self.inner
                .get_project_hierarchy(ctx, project_id, subtree_as_ids, parents_as_ids)
        }

        fn get_all_root_project_ids(&self, ctx: &RequestContext) -> QuotaResult<Vec<ProjectId>> {
            self.inner.get_all_root_project_ids(ctx)
        }
    }

    fn over_quota(overs: &[&str]) -> QuotaError {
        QuotaError::OverQuota {
            overs: overs.iter().map(|s| s.to_string()).collect(),
            quotas: BTreeMap::from([
                ("gigabytes".to_string(), 100),
                ("volumes".to_string(), 5),
                ("snapshots".to_string(), 3),
            ]),
            usages: BTreeMap::from([
                (
                    "gigabytes".to_string(),
                    UsageSummary {
                        in_use: 90,
                        reserved: 5,
                        allocated: 0,
                    },
                ),
                (
                    "volumes".to_string(),
                    UsageSummary {
                        in_use: 5,
                        reserved: 0,
                        allocated: 0,
                    },
                ),
            ]),
        }
    }

    #[test]
    fn over_quota_translation() {
        let ctx = RequestContext::new("p");
        assert_matches!(
            process_reserve_over_quota(&ctx, over_quota(&["gigabytes", "volumes"]), "volumes", Some(10)),
            QuotaError::VolumeSizeExceedsAvailableQuota { name, requested: 10, consumed: 95, quota: 100 }
                if name == "gigabytes"
        );
        assert_matches!(
            process_reserve_over_quota(&ctx, over_quota(&["gigabytes"]), "backups", Some(10)),
            QuotaError::VolumeBackupSizeExceedsAvailableQuota { .. }
        );
        assert_matches!(
            process_reserve_over_quota(&ctx, over_quota(&["volumes"]), "volumes", None),
            QuotaError::LimitExceeded { resource, name, allowed: 5 }
                if resource == "volumes" && name == "volumes"
        );
        assert_matches!(
            process_reserve_over_quota(&ctx, over_quota(&["snapshots"]), "volumes", None),
            QuotaError::UnexpectedOverQuota { names } if names == vec!["snapshots"]
        );
        assert_matches!(
            process_reserve_over_quota(&ctx, over_quota(&["snapshots", "backups"]), "volumes", None),
            QuotaError::UnexpectedOverQuota { names } if names == vec!["snapshots", "backups"]
        );
        assert_matches!(
            process_reserve_over_quota(&ctx, QuotaError::Error("x".into()), "volumes", None),
            QuotaError::Error(_)
        );
    }

    #[test]
    fn descendants() {
        let subtree = vec![
            ProjectTree::new("B", vec![ProjectTree::leaf("D")]),
            ProjectTree::leaf("C"),
        ];
        assert!(is_descendant("B", &subtree));
        assert!(is_descendant("D", &subtree));
        assert!(!is_descendant("A", &subtree));
        assert!(!is_descendant("D", &[]));
    }

    #[test]
    /// Domains are hidden and unsupported hierarchies look flat.
    fn hierarchy_normalization() {
        let ctx = RequestContext::admin();
        let hierarchy = SimHierarchy::new();
        hierarchy.add_domain_project("A", "dom").unwrap();
        hierarchy.add_project("B", Some("A")).unwrap();

        let a = get_project_hierarchy(&hierarchy, &ctx, &"A".into(), true, true, false).unwrap();
        assert_eq!(a.parent_id, None);
        assert_eq!(a.parents, Some(vec![]));
        assert_eq!(a.subtree, Some(vec![ProjectTree::leaf("B")]));

        let b = get_project_hierarchy(&hierarchy, &ctx, &"B".into(), false, true, true).unwrap();
        assert_eq!(b.parent_id, Some("A".into()));
        assert_eq!(b.parents, Some(vec!["A".into()]));
        assert!(b.is_admin_project);
        assert_eq!(
            get_parent_project_id(&hierarchy, &ctx, &"B".into()).unwrap(),
            Some("A".into())
        );

        let flat = SimHierarchy::flat();
        let node = get_project_hierarchy(&flat, &ctx, &"B".into(), true, true, false).unwrap();
        assert_eq!(node.parent_id, None);
        assert_eq!(node.subtree, None);
    }

    struct Chain {
        store: Arc<SimStore>,
        driver: NestedDbQuotaDriver,
        resources: ResourceSet,
    }

    /// A -> B -> C -> D
    fn chain() -> Chain {
        let store = Arc::new(SimStore::new(Arc::new(SimInventory::default())));
        let hierarchy = Arc::new(SimHierarchy::new());
        hierarchy.add_project("A", None).unwrap();
        hierarchy.add_project("B", Some("A")).unwrap();
        hierarchy.add_project("C", Some("B")).unwrap();
        hierarchy.add_project("D", Some("C")).unwrap();
        let driver =
            NestedDbQuotaDriver::new(store.clone(), Arc::new(QuotaConfig::default()), hierarchy);
        Chain {
            store,
            driver,
            resources: crate::engine::resources::VolumeTypeResources::base(),
        }
    }

    impl Chain {
        fn allocated(&self, project: &str) -> i64 {
            self.store
                .quota_allocated_get_all_by_project(&project.into())
                .unwrap()
                .get("volumes")
                .copied()
                .unwrap_or(0)
        }
    }

    #[test]
    /// The walk stops at the first ancestor with a limit.
    fn allocation_walk() {
        let c = chain();
        let ctx = RequestContext::admin();
        c.store.quota_create(&"A".into(), "volumes", 10, 0).unwrap();
        c.store.quota_create(&"B".into(), "volumes", 4, 0).unwrap();
        c.store.quota_create(&"C".into(), "volumes", -1, 0).unwrap();

        let ids = update_alloc_to_next_hard_limit(
            &c.driver,
            &ctx,
            &c.resources,
            "volumes",
            3,
            None,
            &"D".into(),
        )
        .unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(
            (c.allocated("A"), c.allocated("B"), c.allocated("C")),
            (0, 3, 3)
        );
    }

    #[test]
    /// A failure part way up rolls back what was recorded below it.
    fn allocation_walk_rollback() {
        let c = chain();
        let ctx = RequestContext::admin();
        c.store.quota_create(&"B".into(), "volumes", 2, 0).unwrap();
        c.store.quota_create(&"C".into(), "volumes", -1, 0).unwrap();

        assert_matches!(
            update_alloc_to_next_hard_limit(
                &c.driver,
                &ctx,
                &c.resources,
                "volumes",
                3,
                None,
                &"D".into(),
            ),
            Err(QuotaError::OverQuota { .. })
        );
        assert_eq!((c.allocated("B"), c.allocated("C")), (0, 0));
        assert!(c.store.reservations().unwrap().is_empty());
    }

    #[test]
    /// A lookup failure part way up rolls back what was recorded below it.
    fn allocation_walk_lookup_failure() {
        let store = Arc::new(SimStore::new(Arc::new(SimInventory::default())));
        let hierarchy = SimHierarchy::new();
        hierarchy.add_project("A", None).unwrap();
        hierarchy.add_project("B", Some("A")).unwrap();
        hierarchy.add_project("C", Some("B")).unwrap();
        hierarchy.add_project("D", Some("C")).unwrap();
        let driver = NestedDbQuotaDriver::new(
            store.clone(),
            Arc::new(QuotaConfig::default()),
            Arc::new(LosesProject {
                inner: hierarchy,
                lost: "B".into(),
            }),
        );
        store.quota_create(&"C".into(), "volumes", -1, 0).unwrap();

        assert_matches!(
            update_alloc_to_next_hard_limit(
                &driver,
                &RequestContext::admin(),
                &crate::engine::resources::VolumeTypeResources::base(),
                "volumes",
                3,
                None,
                &"D".into(),
            ),
            Err(QuotaError::ProjectNotFound(ref id)) if id.as_ref() == "B"
        );
        assert_eq!(store.quota_get(&"C".into(), "volumes").unwrap().allocated, 0);
        assert!(store.reservations().unwrap().is_empty());
    }

    #[test]
    fn flat_hierarchy_not_supported_for_validation() {
        let store = Arc::new(SimStore::new(Arc::new(SimInventory::default())));
        let driver = NestedDbQuotaDriver::new(
            store,
            Arc::new(QuotaConfig::default()),
            Arc::new(SimHierarchy::flat()),
        );
        assert_matches!(
            validate_setup_for_nested_quota_use(
                &RequestContext::admin(),
                &ResourceSet::new(),
                &driver,
                false
            ),
            Err(QuotaError::HierarchyUnsupported(_))
        );
    }
}
