// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The quota driver interface. The provided methods implement the behaviour
//! of a driver backed directly by a usage store; drivers with different
//! semantics override individual methods and reuse the free functions below
//! for the shared parts.

use std::{collections::BTreeMap, fmt::Debug, sync::Arc};

use chrono::{DateTime, Utc};

use crate::{
    cinder::{DriverKind, QuotaConfig, QuotaError, QuotaResult},
    engine::{
        nested_driver::NestedDbQuotaDriver,
        resources::{Resource, ResourceSet},
        store::{ReserveRequest, UsageStore, DEFAULT_QUOTA_CLASS},
        types::{Expire, ProjectId, ProjectQuotaEntry, RequestContext, ReservationId},
    },
};

pub trait QuotaDriver: Debug + Send + Sync {
    fn store(&self) -> &Arc<dyn UsageStore>;

    fn config(&self) -> &QuotaConfig;

    fn kind(&self) -> DriverKind;

    fn as_nested(&self) -> Option<&NestedDbQuotaDriver> {
        None
    }

    /// The explicit limit of a project, `ProjectQuotaNotFound` if none.
    fn get_by_project(
        &self,
        _ctx: &RequestContext,
        project_id: &ProjectId,
        resource: &str,
    ) -> QuotaResult<i64> {
        Ok(self.store().quota_get(project_id, resource)?.hard_limit)
    }

    /// The limit of a quota class, `QuotaClassNotFound` if none.
    fn get_by_class(
        &self,
        _ctx: &RequestContext,
        quota_class: &str,
        resource: &str,
    ) -> QuotaResult<i64> {
        self.store().quota_class_get(quota_class, resource)
    }

    fn get_default(
        &self,
        _ctx: &RequestContext,
        resource: &Resource,
        _project_id: Option<&ProjectId>,
    ) -> QuotaResult<i64> {
        Ok(default_class(self)?
            .get(resource.name())
            .copied()
            .unwrap_or_else(|| resource.default(self.config())))
    }

    /// The default limit of every resource: the limit of the default quota
    /// class if it has one, else the configured default.
    fn get_defaults(
        &self,
        _ctx: &RequestContext,
        resources: &ResourceSet,
        _project_id: Option<&ProjectId>,
    ) -> QuotaResult<BTreeMap<String, i64>> {
        class_defaults(self, resources)
    }

    /// The limits of a quota class. Resources the class does not mention get
    /// their default if `defaults` is set and are omitted otherwise.
    fn get_class_quotas(
        &self,
        ctx: &RequestContext,
        resources: &ResourceSet,
        quota_class: &str,
        defaults: bool,
    ) -> QuotaResult<BTreeMap<String, i64>> {
        let class_limits = self.store().quota_class_get_all_by_name(quota_class)?;
        let default_limits = if defaults {
            self.get_defaults(ctx, resources, None)?
        } else {
            BTreeMap::new()
        };
        Ok(resources
            .iter()
            .filter_map(|resource| {
                class_limits
                    .get(resource.name())
                    .or_else(|| default_limits.get(resource.name()))
                    .map(|limit| (resource.name().to_owned(), *limit))
            })
            .collect())
    }

    /// The effective limits of a project, optionally with its usage.
    fn get_project_quotas(
        &self,
        ctx: &RequestContext,
        resources: &ResourceSet,
        project_id: &ProjectId,
        quota_class: Option<&str>,
        defaults: bool,
        usages: bool,
    ) -> QuotaResult<BTreeMap<String, ProjectQuotaEntry>> {
        project_quotas(
            self,
            ctx,
            resources,
            project_id,
            quota_class,
            defaults,
            usages,
        )
    }

    /// The explicit limit of a project, else its default.
    fn get_by_project_or_default(
        &self,
        ctx: &RequestContext,
        resources: &ResourceSet,
        project_id: &ProjectId,
        resource: &str,
    ) -> QuotaResult<i64> {
        match self.get_by_project(ctx, project_id, resource) {
            Err(QuotaError::ProjectQuotaNotFound { .. }) => {
                let resource = resources.get(resource).ok_or_else(|| {
                    QuotaError::QuotaResourceUnknown {
                        unknown: vec![resource.to_owned()],
                    }
                })?;
                self.get_default(ctx, resource, Some(project_id))
            }
            result => result,
        }
    }

    /// Check proposed absolute values of non-reservable resources against
    /// their limits. No usage is consulted or recorded.
    fn limit_check(
        &self,
        ctx: &RequestContext,
        resources: &ResourceSet,
        values: &BTreeMap<String, i64>,
        project_id: Option<&ProjectId>,
    ) -> QuotaResult<()> {
        let unders = values
            .iter()
            .filter(|&(_, &value)| value < 0)
            .map(|(name, _)| name.clone())
            .collect::<Vec<_>>();
        if !unders.is_empty() {
            return Err(QuotaError::InvalidQuotaValue { unders });
        }

        let project_id = project_id.or(ctx.project_id.as_ref());
        let quotas = get_quotas(
            self,
            ctx,
            resources,
            values.keys().map(String::as_str),
            false,
            project_id,
        )?;
        let overs = values
            .iter()
            .filter(|&(name, &value)| quotas.get(name).is_some_and(|&q| q >= 0 && q < value))
            .map(|(name, _)| name.clone())
            .collect::<Vec<_>>();
        if overs.is_empty() {
            Ok(())
        } else {
            Err(QuotaError::OverQuota {
                overs,
                quotas,
                usages: BTreeMap::new(),
            })
        }
    }

    /// Check deltas of reservable resources against their limits and
    /// current usage and reserve them.
    fn reserve(
        &self,
        ctx: &RequestContext,
        resources: &ResourceSet,
        deltas: &BTreeMap<String, i64>,
        expire: Option<Expire>,
        project_id: Option<&ProjectId>,
    ) -> QuotaResult<Vec<ReservationId>> {
        let expire = Expire::resolve(expire, Utc::now(), self.config().reservation_expire());
        let project_id = ctx.resolve_project(project_id)?;
        let quotas = get_quotas(
            self,
            ctx,
            resources,
            deltas.keys().map(String::as_str),
            true,
            Some(&project_id),
        )?;
        self.reserve_deltas(ctx, resources, &quotas, deltas, expire, &project_id)
    }

    /// Reserve deltas against already resolved limits.
    fn reserve_deltas(
        &self,
        _ctx: &RequestContext,
        resources: &ResourceSet,
        quotas: &BTreeMap<String, i64>,
        deltas: &BTreeMap<String, i64>,
        expire: DateTime<Utc>,
        project_id: &ProjectId,
    ) -> QuotaResult<Vec<ReservationId>> {
        self.store().quota_reserve(&ReserveRequest {
            project_id,
            resources,
            quotas,
            deltas,
            expire,
            until_refresh: self.config().until_refresh(),
            max_age: self.config().max_age(),
            is_allocated_reserve: false,
        })
    }

    fn commit(
        &self,
        _ctx: &RequestContext,
        reservations: &[ReservationId],
        _project_id: Option<&ProjectId>,
    ) -> QuotaResult<()> {
        self.store().reservation_commit(reservations)
    }

    fn rollback(
        &self,
        _ctx: &RequestContext,
        reservations: &[ReservationId],
        _project_id: Option<&ProjectId>,
    ) -> QuotaResult<()> {
        self.store().reservation_rollback(reservations)
    }

    /// Remove the explicit limits of a project.
    fn destroy_by_project(&self, _ctx: &RequestContext, project_id: &ProjectId) -> QuotaResult<()> {
        self.store().quota_destroy_by_project(project_id)
    }

    /// Remove the limits, usages and reservations of a project.
    fn destroy_all_by_project(
        &self,
        _ctx: &RequestContext,
        project_id: &ProjectId,
    ) -> QuotaResult<()> {
        self.store().quota_destroy_all_by_project(project_id)
    }

    /// Roll back every expired reservation.
    fn expire(&self, _ctx: &RequestContext) -> QuotaResult<usize> {
        self.store().reservation_expire(Utc::now())
    }
}

/// The default quota class, or nothing if it is not in use.
fn default_class<D>(driver: &D) -> QuotaResult<BTreeMap<String, i64>>
where
    D: QuotaDriver + ?Sized,
{
    if driver.config().use_default_quota_class {
        driver.store().quota_class_get_defaults()
    } else {
        Ok(BTreeMap::new())
    }
}

/// Defaults of every resource, ignoring the project hierarchy.
pub fn class_defaults<D>(driver: &D, resources: &ResourceSet) -> QuotaResult<BTreeMap<String, i64>>
where
    D: QuotaDriver + ?Sized,
{
    let class_limits = default_class(driver)?;
    Ok(resources
        .iter()
        .map(|resource| {
            let limit = class_limits
                .get(resource.name())
                .copied()
                .unwrap_or_else(|| resource.default(driver.config()));
            (resource.name().to_owned(), limit)
        })
        .collect())
}

/// Resolve the limit of every resource for a project: the project's own
/// limit, else the limit of its quota class, else its default. The quota
/// class of the context replaces `quota_class` for the context's own project.
pub fn project_quotas<D>(
    driver: &D,
    ctx: &RequestContext,
    resources: &ResourceSet,
    project_id: &ProjectId,
    quota_class: Option<&str>,
    defaults: bool,
    usages: bool,
) -> QuotaResult<BTreeMap<String, ProjectQuotaEntry>>
where
    D: QuotaDriver + ?Sized,
{
    let store = driver.store();
    let project_limits = store.quota_get_all_by_project(project_id)?;
    let project_usages = if usages {
        Some(store.quota_usage_get_all_by_project(project_id)?)
    } else {
        None
    };
    let quota_class = if ctx.project_id.as_ref() == Some(project_id) {
        ctx.quota_class.as_deref()
    } else {
        quota_class
    };
    let class_limits = match quota_class {
        Some(quota_class) => store.quota_class_get_all_by_name(quota_class)?,
        None => BTreeMap::new(),
    };

    let mut default_limits = None;
    let mut quotas = BTreeMap::new();
    for resource in resources.iter() {
        let name = resource.name();
        let limit = match (project_limits.get(name), class_limits.get(name)) {
            (Some(&limit), _) => limit,
            (None, _) if !defaults => continue,
            (None, Some(&limit)) => limit,
            (None, None) => {
                if default_limits.is_none() {
                    default_limits = Some(driver.get_defaults(ctx, resources, Some(project_id))?);
                }
                default_limits
                    .as_ref()
                    .and_then(|limits| limits.get(name))
                    .copied()
                    .unwrap_or_else(|| resource.default(driver.config()))
            }
        };

        let mut entry = ProjectQuotaEntry::limit(limit);
        if let Some(ref project_usages) = project_usages {
            let usage = project_usages.get(name);
            entry.in_use = Some(usage.map_or(0, |u| u.in_use));
            entry.reserved = Some(usage.map_or(0, |u| u.reserved));
        }
        quotas.insert(name.to_owned(), entry);
    }
    Ok(quotas)
}

/// The limits of the named resources, which must all be reservable if
/// `has_sync` is set and must all be non-reservable otherwise. Without a
/// project the limits of the context's quota class are used.
pub fn get_quotas<'a, D, I>(
    driver: &D,
    ctx: &RequestContext,
    resources: &ResourceSet,
    names: I,
    has_sync: bool,
    project_id: Option<&ProjectId>,
) -> QuotaResult<BTreeMap<String, i64>>
where
    D: QuotaDriver + ?Sized,
    I: IntoIterator<Item = &'a str>,
{
    let selected = resources.select(names, |resource| resource.has_sync() == has_sync)?;
    match project_id {
        Some(project_id) => Ok(driver
            .get_project_quotas(
                ctx,
                &selected,
                project_id,
                ctx.quota_class.as_deref(),
                true,
                false,
            )?
            .into_iter()
            .map(|(name, entry)| (name, entry.limit))
            .collect()),
        None => driver.get_class_quotas(
            ctx,
            &selected,
            ctx.quota_class.as_deref().unwrap_or(DEFAULT_QUOTA_CLASS),
            true,
        ),
    }
}
