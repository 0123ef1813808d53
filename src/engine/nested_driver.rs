// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A quota driver for hierarchical projects. A child project has no quota
//! of its own until its parent hands some down; what a parent has handed
//! to its children is recorded in the parent's `allocated` counters.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use itertools::Itertools;

use crate::{
    cinder::{DriverKind, QuotaConfig, QuotaError, QuotaResult},
    engine::{
        driver::{class_defaults, project_quotas, QuotaDriver},
        hierarchy::{ProjectHierarchyResolver, ProjectTree},
        resources::{Resource, ResourceSet},
        store::{ReserveRequest, UsageStore},
        types::{
            is_unlimited, Expire, ProjectId, ProjectQuotaEntry, RequestContext, ReservationId,
        },
        utils,
    },
};

/// Allocated values already computed during one validation, by project and
/// resource.
type AllocatedCache = HashMap<(ProjectId, String), i64>;

#[derive(Debug)]
pub struct NestedDbQuotaDriver {
    store: Arc<dyn UsageStore>,
    config: Arc<QuotaConfig>,
    hierarchy: Arc<dyn ProjectHierarchyResolver>,
}

impl NestedDbQuotaDriver {
    pub fn new(
        store: Arc<dyn UsageStore>,
        config: Arc<QuotaConfig>,
        hierarchy: Arc<dyn ProjectHierarchyResolver>,
    ) -> NestedDbQuotaDriver {
        NestedDbQuotaDriver {
            store,
            config,
            hierarchy,
        }
    }

    pub fn hierarchy(&self) -> &dyn ProjectHierarchyResolver {
        self.hierarchy.as_ref()
    }

    fn has_parent(&self, ctx: &RequestContext, project_id: Option<&ProjectId>) -> QuotaResult<bool> {
        match project_id {
            Some(project_id) => {
                Ok(utils::get_parent_project_id(self.hierarchy(), ctx, project_id)?.is_some())
            }
            None => Ok(false),
        }
    }

    /// Check that every project in the tree that has children has enough
    /// free quota for what its children hold, and that its allocated
    /// counters match what its children hold. If `fix_allocated_quotas` is
    /// set, wrong allocated counters are corrected instead of reported.
    pub fn validate_nested_setup(
        &self,
        ctx: &RequestContext,
        resources: &ResourceSet,
        project_tree: &ProjectTree,
        fix_allocated_quotas: bool,
    ) -> QuotaResult<()> {
        let mut cache = AllocatedCache::new();
        let mut mismatches = Vec::new();
        let mut queue = VecDeque::from([project_tree]);
        while let Some(node) = queue.pop_front() {
            queue.extend(node.children.iter());
            if node.is_leaf() {
                continue;
            }

            let quotas = self.get_project_quotas(ctx, resources, &node.id, None, true, true)?;
            for (name, entry) in &quotas {
                let Some(resource) = resources.get(name) else {
                    continue;
                };
                let calculated = self.cur_project_allocated(ctx, resource, node, &mut cache)?;

                if !is_unlimited(entry.limit) {
                    if let Some((child, child_limit)) =
                        self.child_over_limit(ctx, resource, node, entry.limit)?
                    {
                        return Err(QuotaError::InvalidNestedQuotaSetup(format!(
                            "Quota limit of {} for project '{}' for resource '{}' is greater than the limit of {} of its parent '{}'",
                            child_limit, child, name, entry.limit, node.id,
                        )));
                    }
                    let free = entry.limit - (entry.in_use() + entry.reserved());
                    if free < calculated {
                        return Err(QuotaError::InvalidNestedQuotaSetup(format!(
                            "Sum of child usage '{}' is greater than free quota of '{}' for project '{}' for resource '{}'. Please lower the limit or usage for one or more of the following projects: '{}'",
                            calculated,
                            free,
                            node.id,
                            name,
                            node.children.iter().map(|c| &c.id).join(", "),
                        )));
                    }
                }

                if calculated != entry.allocated() {
                    if fix_allocated_quotas {
                        info!(
                            "Correcting allocated quota of project {} for {} from {} to {}",
                            node.id,
                            name,
                            entry.allocated(),
                            calculated
                        );
                        match self.store.quota_allocated_update(&node.id, name, calculated) {
                            Err(QuotaError::ProjectQuotaNotFound { .. }) => {
                                self.store
                                    .quota_create(&node.id, name, entry.limit, calculated)?;
                            }
                            result => result?,
                        }
                    } else {
                        mismatches.push(format!(
                            "{}/{}: stored {}, expected {}",
                            node.id,
                            name,
                            entry.allocated(),
                            calculated
                        ));
                    }
                }
            }
        }

        if mismatches.is_empty() {
            Ok(())
        } else {
            Err(QuotaError::InvalidNestedQuotaSetup(format!(
                "Invalid allocated quotas defined for the following project quotas: {}",
                mismatches.join("; ")
            )))
        }
    }

    /// The first child of the root of `tree` whose own limit for `resource`
    /// is greater than `limit`.
    fn child_over_limit(
        &self,
        ctx: &RequestContext,
        resource: &Resource,
        tree: &ProjectTree,
        limit: i64,
    ) -> QuotaResult<Option<(ProjectId, i64)>> {
        let single = std::iter::once(resource.clone()).collect::<ResourceSet>();
        for child in &tree.children {
            let child_limit = self
                .get_project_quotas(ctx, &single, &child.id, None, true, false)?
                .get(resource.name())
                .map_or(0, |entry| entry.limit);
            if !is_unlimited(child_limit) && child_limit > limit {
                return Ok(Some((child.id.clone(), child_limit)));
            }
        }
        Ok(None)
    }

    /// What the root of `tree` has given to its children for `resource`:
    /// the limit of each child with a limit, and for each unlimited child
    /// its usage plus what it has given to its own children.
    fn cur_project_allocated(
        &self,
        ctx: &RequestContext,
        resource: &Resource,
        tree: &ProjectTree,
        cache: &mut AllocatedCache,
    ) -> QuotaResult<i64> {
        let key = (tree.id.clone(), resource.name().to_owned());
        if let Some(allocated) = cache.get(&key) {
            return Ok(*allocated);
        }

        let single = std::iter::once(resource.clone()).collect::<ResourceSet>();
        let mut allocated = 0;
        for child in &tree.children {
            let quotas = self.get_project_quotas(ctx, &single, &child.id, None, true, true)?;
            let entry = quotas.get(resource.name()).copied().unwrap_or_default();
            if is_unlimited(entry.limit) {
                allocated +=
                    entry.in_use() + self.cur_project_allocated(ctx, resource, child, cache)?;
            } else {
                if entry.in_use() > entry.limit {
                    return Err(QuotaError::InvalidNestedQuotaSetup(format!(
                        "Quota limit invalid for project '{}' for resource '{}': limit of {} is less than in-use value of {}",
                        child.id,
                        resource.name(),
                        entry.limit,
                        entry.in_use()
                    )));
                }
                allocated += entry.limit;
            }
        }

        cache.insert(key, allocated);
        Ok(allocated)
    }
}

impl QuotaDriver for NestedDbQuotaDriver {
    fn store(&self) -> &Arc<dyn UsageStore> {
        &self.store
    }

    fn config(&self) -> &QuotaConfig {
        &self.config
    }

    fn kind(&self) -> DriverKind {
        DriverKind::Nested
    }

    fn as_nested(&self) -> Option<&NestedDbQuotaDriver> {
        Some(self)
    }

    /// 0 for a project with a parent.
    fn get_default(
        &self,
        ctx: &RequestContext,
        resource: &Resource,
        project_id: Option<&ProjectId>,
    ) -> QuotaResult<i64> {
        if self.has_parent(ctx, project_id)? {
            return Ok(0);
        }
        let single = std::iter::once(resource.clone()).collect::<ResourceSet>();
        Ok(class_defaults(self, &single)?
            .get(resource.name())
            .copied()
            .unwrap_or_else(|| resource.default(&self.config)))
    }

    fn get_defaults(
        &self,
        ctx: &RequestContext,
        resources: &ResourceSet,
        project_id: Option<&ProjectId>,
    ) -> QuotaResult<BTreeMap<String, i64>> {
        let mut defaults = class_defaults(self, resources)?;
        if self.has_parent(ctx, project_id)? {
            defaults.values_mut().for_each(|limit| *limit = 0);
        }
        Ok(defaults)
    }

    fn get_project_quotas(
        &self,
        ctx: &RequestContext,
        resources: &ResourceSet,
        project_id: &ProjectId,
        quota_class: Option<&str>,
        defaults: bool,
        usages: bool,
    ) -> QuotaResult<BTreeMap<String, ProjectQuotaEntry>> {
        let mut quotas = project_quotas(
            self,
            ctx,
            resources,
            project_id,
            quota_class,
            defaults,
            usages,
        )?;
        let allocated = self.store.quota_allocated_get_all_by_project(project_id)?;
        for (name, entry) in quotas.iter_mut() {
            entry.allocated = Some(allocated.get(name).copied().unwrap_or(0));
        }
        Ok(quotas)
    }

    /// Reserve each resource separately. For a resource on which the
    /// project has no limit the delta is also allocated from the ancestors
    /// up to the first one with a limit. Either every resource is reserved
    /// or none is.
    fn reserve_deltas(
        &self,
        ctx: &RequestContext,
        resources: &ResourceSet,
        quotas: &BTreeMap<String, i64>,
        deltas: &BTreeMap<String, i64>,
        expire: DateTime<Utc>,
        project_id: &ProjectId,
    ) -> QuotaResult<Vec<ReservationId>> {
        let mut reserved = Vec::new();
        let mut failed = Vec::new();
        let mut failed_usages = BTreeMap::new();

        for (name, &delta) in deltas {
            let limit = quotas.get(name).copied().ok_or_else(|| {
                QuotaError::QuotaResourceUnknown {
                    unknown: vec![name.clone()],
                }
            });
            let result = limit.and_then(|limit| {
                let ids = self.store.quota_reserve(&ReserveRequest {
                    project_id,
                    resources,
                    quotas: &BTreeMap::from([(name.clone(), limit)]),
                    deltas: &BTreeMap::from([(name.clone(), delta)]),
                    expire,
                    until_refresh: self.config.until_refresh(),
                    max_age: self.config.max_age(),
                    is_allocated_reserve: false,
                })?;
                reserved.extend(ids);
                if is_unlimited(limit) {
                    reserved.extend(utils::update_alloc_to_next_hard_limit(
                        self,
                        ctx,
                        resources,
                        name,
                        delta,
                        Some(Expire::At(expire)),
                        project_id,
                    )?);
                }
                Ok(())
            });
            match result {
                Ok(()) => (),
                Err(QuotaError::OverQuota { usages, .. }) => {
                    failed.push(name.clone());
                    failed_usages.extend(usages);
                }
                Err(err) => {
                    self.store.reservation_rollback(&reserved)?;
                    return Err(err);
                }
            }
        }

        if failed.is_empty() {
            Ok(reserved)
        } else {
            self.store.reservation_rollback(&reserved)?;
            Err(QuotaError::OverQuota {
                overs: failed,
                quotas: quotas.clone(),
                usages: failed_usages,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        cinder::QuotaFlag,
        engine::{
            resources::UsageSync,
            sim_engine::{SimHierarchy, SimInventory, SimStore},
            types::UNLIMITED,
        },
    };

    use super::*;

    struct Fixture {
        store: Arc<SimStore>,
        hierarchy: Arc<SimHierarchy>,
        driver: NestedDbQuotaDriver,
        resources: ResourceSet,
        ctx: RequestContext,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(SimStore::new(Arc::new(SimInventory::default())));
        let hierarchy = Arc::new(SimHierarchy::new());
        let driver = NestedDbQuotaDriver::new(
            store.clone(),
            Arc::new(QuotaConfig::default()),
            hierarchy.clone(),
        );
        let resources = std::iter::once(Resource::reservable(
            "volumes",
            UsageSync::Volumes,
            Some(QuotaFlag::QuotaVolumes),
        ))
        .collect();
        Fixture {
            store,
            hierarchy,
            driver,
            resources,
            ctx: RequestContext::admin(),
        }
    }

    impl Fixture {
        /// Give a project an explicit limit and usage.
        fn set(&self, project: &str, limit: i64, in_use: i64, allocated: i64) {
            let project = ProjectId::from(project);
            self.store
                .quota_create(&project, "volumes", limit, allocated)
                .unwrap();
            self.store
                .quota_usage_set(&project, "volumes", in_use, 0)
                .unwrap();
        }

        fn tree(&self, root: &str) -> ProjectTree {
            utils::get_project_hierarchy(
                self.driver.hierarchy(),
                &self.ctx,
                &root.into(),
                true,
                false,
                false,
            )
            .unwrap()
            .tree()
        }

        fn allocated(&self, project: &str) -> i64 {
            self.store.quota_get(&project.into(), "volumes").unwrap().allocated
        }
    }

    /// A -> (B -> D), C
    fn build_tree(f: &Fixture) {
        f.hierarchy.add_project("A", None).unwrap();
        f.hierarchy.add_project("B", Some("A")).unwrap();
        f.hierarchy.add_project("C", Some("A")).unwrap();
        f.hierarchy.add_project("D", Some("B")).unwrap();
    }

    #[test]
    fn child_defaults_are_zero() {
        let f = fixture();
        build_tree(&f);
        let resource = f.resources.get("volumes").unwrap();
        assert_eq!(
            f.driver
                .get_default(&f.ctx, resource, Some(&"B".into()))
                .unwrap(),
            0
        );
        assert_eq!(
            f.driver
                .get_default(&f.ctx, resource, Some(&"A".into()))
                .unwrap(),
            10
        );
        assert_eq!(
            f.driver
                .get_defaults(&f.ctx, &f.resources, Some(&"D".into()))
                .unwrap()["volumes"],
            0
        );
        let quotas = f
            .driver
            .get_project_quotas(&f.ctx, &f.resources, &"B".into(), None, true, true)
            .unwrap();
        assert_eq!(
            quotas["volumes"],
            ProjectQuotaEntry {
                limit: 0,
                in_use: Some(0),
                reserved: Some(0),
                allocated: Some(0),
            }
        );
    }

    #[test]
    fn valid_tree() {
        let f = fixture();
        build_tree(&f);
        f.set("A", 7, 1, 6);
        f.set("B", 3, 1, 2);
        f.set("C", 3, 3, 0);
        f.set("D", 2, 0, 0);
        f.driver
            .validate_nested_setup(&f.ctx, &f.resources, &f.tree("A"), false)
            .unwrap();

        f.store.quota_usage_set(&"A".into(), "volumes", 2, 0).unwrap();
        assert_matches!(
            f.driver
                .validate_nested_setup(&f.ctx, &f.resources, &f.tree("A"), false),
            Err(QuotaError::InvalidNestedQuotaSetup(_))
        );
    }

    #[test]
    /// Unlimited children contribute their usage and their own allocations.
    fn unlimited_children() {
        let f = fixture();
        build_tree(&f);
        f.set("A", 10, 0, 0);
        f.set("B", UNLIMITED, 2, 0);
        f.set("D", 3, 1, 0);
        f.set("C", UNLIMITED, 1, 0);
        assert_matches!(
            f.driver
                .validate_nested_setup(&f.ctx, &f.resources, &f.tree("A"), false),
            Err(QuotaError::InvalidNestedQuotaSetup(msg)) if msg.contains("A/volumes: stored 0, expected 6")
        );
        f.driver
            .validate_nested_setup(&f.ctx, &f.resources, &f.tree("A"), true)
            .unwrap();
        assert_eq!(f.allocated("A"), 6);
        assert_eq!(f.allocated("B"), 3);
        f.driver
            .validate_nested_setup(&f.ctx, &f.resources, &f.tree("A"), false)
            .unwrap();
    }

    #[test]
    /// Fixing a project with no explicit limit creates one.
    fn fix_creates_quota_row() {
        let f = fixture();
        f.hierarchy.add_project("A", None).unwrap();
        f.hierarchy.add_project("B", Some("A")).unwrap();
        f.set("B", 4, 0, 0);
        f.driver
            .validate_nested_setup(&f.ctx, &f.resources, &f.tree("A"), true)
            .unwrap();
        let quota = f.store.quota_get(&"A".into(), "volumes").unwrap();
        assert_eq!((quota.hard_limit, quota.allocated), (10, 4));
    }

    #[test]
    fn child_over_its_limit() {
        let f = fixture();
        f.hierarchy.add_project("A", None).unwrap();
        f.hierarchy.add_project("B", Some("A")).unwrap();
        f.set("A", UNLIMITED, 0, 2);
        f.set("B", 2, 3, 0);
        assert_matches!(
            f.driver
                .validate_nested_setup(&f.ctx, &f.resources, &f.tree("A"), true),
            Err(QuotaError::InvalidNestedQuotaSetup(msg)) if msg.contains("less than in-use")
        );
    }

    #[test]
    /// A parent without quota to spare can not give any to its children.
    fn child_limit_above_parent() {
        let f = fixture();
        f.hierarchy.add_project("A", None).unwrap();
        f.hierarchy.add_project("B", Some("A")).unwrap();
        f.set("A", 0, 0, 5);
        f.set("B", 5, 0, 0);
        assert_matches!(
            f.driver
                .validate_nested_setup(&f.ctx, &f.resources, &f.tree("A"), false),
            Err(QuotaError::InvalidNestedQuotaSetup(msg)) if msg.contains("greater than the limit of 0")
        );

        f.store.quota_update(&"A".into(), "volumes", 4).unwrap();
        assert_matches!(
            f.driver
                .validate_nested_setup(&f.ctx, &f.resources, &f.tree("A"), true),
            Err(QuotaError::InvalidNestedQuotaSetup(_))
        );

        f.store.quota_update(&"A".into(), "volumes", 5).unwrap();
        f.driver
            .validate_nested_setup(&f.ctx, &f.resources, &f.tree("A"), false)
            .unwrap();
    }

    #[test]
    /// Reserving in an unlimited child allocates from the parent.
    fn reserve_propagates() {
        crate::test_util::init_logger();
        let f = fixture();
        f.hierarchy.add_project("A", None).unwrap();
        f.hierarchy.add_project("B", Some("A")).unwrap();
        f.set("A", 5, 0, 0);
        f.set("B", UNLIMITED, 0, 0);
        let deltas = BTreeMap::from([("volumes".to_string(), 3)]);
        let ids = f
            .driver
            .reserve(&f.ctx, &f.resources, &deltas, None, Some(&"B".into()))
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(f.allocated("A"), 3);

        assert_matches!(
            f.driver
                .reserve(&f.ctx, &f.resources, &deltas, None, Some(&"B".into())),
            Err(QuotaError::OverQuota { overs, .. }) if overs == vec!["volumes"]
        );
        assert_eq!(f.allocated("A"), 3);
        let usage = f.store.quota_usage_get(&"B".into(), "volumes").unwrap().unwrap();
        assert_eq!(usage.reserved, 3);

        f.driver.rollback(&f.ctx, &ids, None).unwrap();
        assert_eq!(f.allocated("A"), 0);
    }
}
