// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{collections::BTreeMap, sync::Arc};

use crate::{
    cinder::{DriverKind, QuotaConfig, QuotaError, QuotaResult},
    engine::{
        db_driver::DbQuotaDriver,
        driver::QuotaDriver,
        hierarchy::ProjectHierarchyResolver,
        nested_driver::NestedDbQuotaDriver,
        resources::{
            GroupResources, Resource, ResourceSet, ResourceSource, StaticResources,
            VolumeTypeRegistry, VolumeTypeResources,
        },
        store::UsageStore,
        types::{Expire, ProjectId, ProjectQuotaEntry, RequestContext, ReservationId, VolumeTypeId},
    },
};

/// Resources which have per-volume-type variants.
const VOLUME_TYPE_RESOURCES: [&str; 3] = ["volumes", "gigabytes", "snapshots"];

/// Construct the driver named by the configuration. The nested driver needs
/// an identity service to resolve project hierarchies.
pub fn build_driver(
    store: Arc<dyn UsageStore>,
    config: Arc<QuotaConfig>,
    hierarchy: Option<Arc<dyn ProjectHierarchyResolver>>,
) -> QuotaResult<Arc<dyn QuotaDriver>> {
    match (config.quota_driver, hierarchy) {
        (DriverKind::Db, _) => Ok(Arc::new(DbQuotaDriver::new(store, config))),
        (DriverKind::Nested, Some(hierarchy)) => {
            Ok(Arc::new(NestedDbQuotaDriver::new(store, config, hierarchy)))
        }
        (DriverKind::Nested, None) => Err(QuotaError::InvalidInput(
            "the nested quota driver requires a project hierarchy resolver".into(),
        )),
    }
}

/// The quota interface used by the rest of the service: a set of resources
/// and the driver that enforces their limits.
#[derive(Debug, Clone)]
pub struct QuotaEngine {
    resources: Arc<dyn ResourceSource>,
    driver: Arc<dyn QuotaDriver>,
    volume_types: Option<Arc<dyn VolumeTypeRegistry>>,
}

impl QuotaEngine {
    pub fn new(resources: Arc<dyn ResourceSource>, driver: Arc<dyn QuotaDriver>) -> QuotaEngine {
        QuotaEngine {
            resources,
            driver,
            volume_types: None,
        }
    }

    /// An engine over `resources` with the driver named by `config`.
    pub fn from_config(
        resources: Arc<dyn ResourceSource>,
        store: Arc<dyn UsageStore>,
        config: Arc<QuotaConfig>,
        hierarchy: Option<Arc<dyn ProjectHierarchyResolver>>,
    ) -> QuotaResult<QuotaEngine> {
        Ok(QuotaEngine::new(resources, build_driver(store, config, hierarchy)?))
    }

    /// An engine with an initially empty, registrable resource set.
    pub fn with_driver(driver: Arc<dyn QuotaDriver>) -> QuotaEngine {
        QuotaEngine::new(Arc::new(StaticResources::default()), driver)
    }

    /// An engine over the volume resources, including the per-type
    /// variants of every active volume type.
    pub fn for_volume_types(
        volume_types: Arc<dyn VolumeTypeRegistry>,
        driver: Arc<dyn QuotaDriver>,
    ) -> QuotaEngine {
        QuotaEngine {
            resources: Arc::new(VolumeTypeResources::new(volume_types.clone())),
            driver,
            volume_types: Some(volume_types),
        }
    }

    /// An engine over the group resources.
    pub fn for_groups(driver: Arc<dyn QuotaDriver>) -> QuotaEngine {
        QuotaEngine::new(Arc::new(GroupResources), driver)
    }

    pub fn driver(&self) -> &Arc<dyn QuotaDriver> {
        &self.driver
    }

    pub fn store(&self) -> &Arc<dyn UsageStore> {
        self.driver.store()
    }

    pub fn config(&self) -> &QuotaConfig {
        self.driver.config()
    }

    /// The resources as they are now.
    pub fn resources(&self) -> QuotaResult<ResourceSet> {
        self.resources.snapshot()
    }

    /// Sorted resource names.
    pub fn resource_names(&self) -> QuotaResult<Vec<String>> {
        Ok(self.resources()?.names())
    }

    pub fn contains(&self, resource: &str) -> QuotaResult<bool> {
        Ok(self.resources()?.contains(resource))
    }

    pub fn register_resource(&self, resource: Resource) -> QuotaResult<()> {
        self.resources.register_resource(resource)
    }

    pub fn register_resources(&self, resources: Vec<Resource>) -> QuotaResult<()> {
        self.resources.register_resources(resources)
    }

    pub fn using_nested_quotas(&self) -> bool {
        self.driver.kind() == DriverKind::Nested
    }

    pub fn get_by_project(
        &self,
        ctx: &RequestContext,
        project_id: &ProjectId,
        resource: &str,
    ) -> QuotaResult<i64> {
        self.driver.get_by_project(ctx, project_id, resource)
    }

    pub fn get_by_project_or_default(
        &self,
        ctx: &RequestContext,
        project_id: &ProjectId,
        resource: &str,
    ) -> QuotaResult<i64> {
        self.driver
            .get_by_project_or_default(ctx, &self.resources()?, project_id, resource)
    }

    pub fn get_by_class(
        &self,
        ctx: &RequestContext,
        quota_class: &str,
        resource: &str,
    ) -> QuotaResult<i64> {
        self.driver.get_by_class(ctx, quota_class, resource)
    }

    pub fn get_default(
        &self,
        ctx: &RequestContext,
        resource: &str,
        project_id: Option<&ProjectId>,
    ) -> QuotaResult<i64> {
        let resources = self.resources()?;
        let resource = resources
            .get(resource)
            .ok_or_else(|| QuotaError::QuotaResourceUnknown {
                unknown: vec![resource.to_owned()],
            })?;
        self.driver.get_default(ctx, resource, project_id)
    }

    pub fn get_defaults(
        &self,
        ctx: &RequestContext,
        project_id: Option<&ProjectId>,
    ) -> QuotaResult<BTreeMap<String, i64>> {
        self.driver.get_defaults(ctx, &self.resources()?, project_id)
    }

    pub fn get_class_quotas(
        &self,
        ctx: &RequestContext,
        quota_class: &str,
        defaults: bool,
    ) -> QuotaResult<BTreeMap<String, i64>> {
        self.driver
            .get_class_quotas(ctx, &self.resources()?, quota_class, defaults)
    }

    pub fn get_project_quotas(
        &self,
        ctx: &RequestContext,
        project_id: &ProjectId,
        quota_class: Option<&str>,
        defaults: bool,
        usages: bool,
    ) -> QuotaResult<BTreeMap<String, ProjectQuotaEntry>> {
        self.driver.get_project_quotas(
            ctx,
            &self.resources()?,
            project_id,
            quota_class,
            defaults,
            usages,
        )
    }

    /// Count a countable resource.
    pub fn count(&self, ctx: &RequestContext, resource: &str, args: &[&str]) -> QuotaResult<i64> {
        match self.resources()?.get(resource) {
            Some(res) => res.count(ctx, args),
            None => Err(QuotaError::QuotaResourceUnknown {
                unknown: vec![resource.to_owned()],
            }),
        }
    }

    pub fn limit_check(
        &self,
        ctx: &RequestContext,
        values: &BTreeMap<String, i64>,
        project_id: Option<&ProjectId>,
    ) -> QuotaResult<()> {
        self.driver
            .limit_check(ctx, &self.resources()?, values, project_id)
    }

    pub fn reserve(
        &self,
        ctx: &RequestContext,
        deltas: &BTreeMap<String, i64>,
        expire: Option<Expire>,
        project_id: Option<&ProjectId>,
    ) -> QuotaResult<Vec<ReservationId>> {
        let reservations =
            self.driver
                .reserve(ctx, &self.resources()?, deltas, expire, project_id)?;
        debug!("Created reservations {:?}", reservations);
        Ok(reservations)
    }

    /// Commit reservations. A transient store failure is logged and
    /// otherwise ignored; the reservations then expire and the next usage
    /// refresh corrects the counters.
    pub fn commit(
        &self,
        ctx: &RequestContext,
        reservations: &[ReservationId],
        project_id: Option<&ProjectId>,
    ) -> QuotaResult<()> {
        match self.driver.commit(ctx, reservations, project_id) {
            Err(err) if err.is_transient() => {
                error!("Failed to commit reservations {:?}: {}", reservations, err);
                Ok(())
            }
            result => result,
        }
    }

    /// Roll back reservations, ignoring transient store failures like
    /// `commit`.
    pub fn rollback(
        &self,
        ctx: &RequestContext,
        reservations: &[ReservationId],
        project_id: Option<&ProjectId>,
    ) -> QuotaResult<()> {
        match self.driver.rollback(ctx, reservations, project_id) {
            Err(err) if err.is_transient() => {
                error!("Failed to roll back reservations {:?}: {}", reservations, err);
                Ok(())
            }
            result => result,
        }
    }

    pub fn destroy_by_project(&self, ctx: &RequestContext, project_id: &ProjectId) -> QuotaResult<()> {
        self.driver.destroy_by_project(ctx, project_id)
    }

    pub fn destroy_all_by_project(
        &self,
        ctx: &RequestContext,
        project_id: &ProjectId,
    ) -> QuotaResult<()> {
        self.driver.destroy_all_by_project(ctx, project_id)
    }

    /// Roll back expired reservations, returning how many there were.
    pub fn expire(&self, ctx: &RequestContext) -> QuotaResult<usize> {
        let expired = self.driver.expire(ctx)?;
        if expired > 0 {
            info!("Expired {} reservations", expired);
        }
        Ok(expired)
    }

    /// Copy the volume, gigabyte and snapshot entries of `opts` to the
    /// per-type resources of the volume type. Deleted types are still
    /// looked up so that reservations against them can be released.
    pub fn add_volume_type_opts(
        &self,
        _ctx: &RequestContext,
        opts: &mut BTreeMap<String, i64>,
        volume_type_id: Option<VolumeTypeId>,
    ) -> QuotaResult<()> {
        let Some(volume_type_id) = volume_type_id else {
            return Ok(());
        };
        let registry = self.volume_types.as_ref().ok_or_else(|| {
            QuotaError::NotSupported("engine has no volume type resources".into())
        })?;
        let volume_type = registry.get_volume_type(volume_type_id, true)?;
        for name in VOLUME_TYPE_RESOURCES {
            if let Some(&value) = opts.get(name) {
                opts.insert(format!("{}_{}", name, volume_type.name), value);
            }
        }
        Ok(())
    }
}
