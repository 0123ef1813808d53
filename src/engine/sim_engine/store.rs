// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{
    collections::{btree_map::Entry, BTreeMap, BTreeSet},
    sync::{Arc, Mutex},
};

use chrono::{DateTime, Utc};

use crate::{
    cinder::{ErrorEnum, QuotaError, QuotaResult},
    engine::{
        sim_engine::randomization::Randomizer,
        store::{ReserveRequest, UsageSource, UsageStore},
        types::{
            ProjectId, ProjectQuota, QuotaId, QuotaUsage, Reservation, ReservationId,
            UsageSummary, UNLIMITED,
        },
    },
};

type Key = (ProjectId, String);

fn key(project_id: &ProjectId, resource: &str) -> Key {
    (project_id.clone(), resource.to_owned())
}

#[derive(Debug, Default)]
struct SimState {
    quotas: BTreeMap<Key, ProjectQuota>,
    classes: BTreeMap<(String, String), i64>,
    usages: BTreeMap<Key, QuotaUsage>,
    reservations: BTreeMap<ReservationId, Reservation>,
}

impl SimState {
    fn project_usages(&self, project_id: &ProjectId) -> BTreeMap<String, QuotaUsage> {
        self.usages
            .iter()
            .filter(|((p, _), _)| p == project_id)
            .map(|((_, r), usage)| (r.clone(), usage.clone()))
            .collect()
    }

    fn project_allocated(&self, project_id: &ProjectId) -> BTreeMap<String, i64> {
        self.quotas
            .iter()
            .filter(|((p, _), _)| p == project_id)
            .map(|((_, r), quota)| (r.clone(), quota.allocated))
            .collect()
    }

    /// Undo the effect of a reservation on its usage or allocated counter.
    fn release(&mut self, reservation: &Reservation, now: DateTime<Utc>) {
        let key = key(&reservation.project_id, &reservation.resource);
        match reservation.allocated_id {
            Some(quota_id) => {
                if let Some(quota) = self.quotas.get_mut(&key).filter(|q| q.id == quota_id) {
                    quota.allocated -= reservation.delta;
                }
            }
            None => {
                if let Some(usage) = self.usages.get_mut(&key) {
                    if reservation.delta >= 0 {
                        usage.reserved -= reservation.delta;
                    }
                    usage.updated_at = now;
                }
            }
        }
    }
}

/// An in-memory usage store. One mutex covers all of the state so that
/// every store operation is a single transaction.
#[derive(Debug)]
pub struct SimStore {
    state: Mutex<SimState>,
    source: Arc<dyn UsageSource>,
    rdm: Mutex<Randomizer>,
}

impl SimStore {
    pub fn new(source: Arc<dyn UsageSource>) -> SimStore {
        SimStore {
            state: Mutex::default(),
            source,
            rdm: Mutex::default(),
        }
    }

    /// Make commit, rollback and expire fail with a transient error once in
    /// `denominator` calls. 0 disables failures.
    pub fn configure_simulator(&self, denominator: u32) -> QuotaResult<()> {
        self.rdm.lock()?.set_probability(denominator);
        Ok(())
    }

    fn simulate_failure(&self, operation: &str) -> QuotaResult<()> {
        if self.rdm.lock()?.throw_die() {
            Err(QuotaError::Store(
                ErrorEnum::Unavailable,
                format!("{operation}: simulated store failure"),
            ))
        } else {
            Ok(())
        }
    }

    /// Set usage counters directly, creating the row if necessary.
    pub fn quota_usage_set(
        &self,
        project_id: &ProjectId,
        resource: &str,
        in_use: i64,
        reserved: i64,
    ) -> QuotaResult<()> {
        let now = Utc::now();
        let mut state = self.state.lock()?;
        let usage = state
            .usages
            .entry(key(project_id, resource))
            .or_insert_with(|| QuotaUsage {
                project_id: project_id.clone(),
                resource: resource.to_owned(),
                in_use: 0,
                reserved: 0,
                until_refresh: None,
                updated_at: now,
            });
        usage.in_use = in_use;
        usage.reserved = reserved;
        usage.updated_at = now;
        Ok(())
    }

    /// Backdate or postdate the last update of a usage row.
    pub fn quota_usage_touch(
        &self,
        project_id: &ProjectId,
        resource: &str,
        updated_at: DateTime<Utc>,
    ) -> QuotaResult<()> {
        if let Some(usage) = self.state.lock()?.usages.get_mut(&key(project_id, resource)) {
            usage.updated_at = updated_at;
        }
        Ok(())
    }

    pub fn quota_usage_get(
        &self,
        project_id: &ProjectId,
        resource: &str,
    ) -> QuotaResult<Option<QuotaUsage>> {
        Ok(self
            .state
            .lock()?
            .usages
            .get(&key(project_id, resource))
            .cloned())
    }

    pub fn reservation_get(&self, id: ReservationId) -> QuotaResult<Option<Reservation>> {
        Ok(self.state.lock()?.reservations.get(&id).cloned())
    }

    /// Every outstanding reservation.
    pub fn reservations(&self) -> QuotaResult<Vec<Reservation>> {
        Ok(self.state.lock()?.reservations.values().cloned().collect())
    }
}

impl UsageStore for SimStore {
    fn quota_get(&self, project_id: &ProjectId, resource: &str) -> QuotaResult<ProjectQuota> {
        self.state
            .lock()?
            .quotas
            .get(&key(project_id, resource))
            .cloned()
            .ok_or_else(|| QuotaError::ProjectQuotaNotFound {
                project_id: project_id.clone(),
                resource: resource.to_owned(),
            })
    }

    fn quota_get_all_by_project(
        &self,
        project_id: &ProjectId,
    ) -> QuotaResult<BTreeMap<String, i64>> {
        Ok(self
            .state
            .lock()?
            .quotas
            .iter()
            .filter(|((p, _), _)| p == project_id)
            .map(|((_, r), quota)| (r.clone(), quota.hard_limit))
            .collect())
    }

    fn quota_allocated_get_all_by_project(
        &self,
        project_id: &ProjectId,
    ) -> QuotaResult<BTreeMap<String, i64>> {
        Ok(self.state.lock()?.project_allocated(project_id))
    }

    fn quota_create(
        &self,
        project_id: &ProjectId,
        resource: &str,
        limit: i64,
        allocated: i64,
    ) -> QuotaResult<ProjectQuota> {
        match self.state.lock()?.quotas.entry(key(project_id, resource)) {
            Entry::Occupied(_) => Err(QuotaError::Store(
                ErrorEnum::AlreadyExists,
                format!("quota for {resource} of project {project_id} already exists"),
            )),
            Entry::Vacant(entry) => Ok(entry
                .insert(ProjectQuota {
                    id: QuotaId::new_v4(),
                    project_id: project_id.clone(),
                    resource: resource.to_owned(),
                    hard_limit: limit,
                    allocated,
                })
                .clone()),
        }
    }

    fn quota_update(&self, project_id: &ProjectId, resource: &str, limit: i64) -> QuotaResult<()> {
        self.state
            .lock()?
            .quotas
            .get_mut(&key(project_id, resource))
            .map(|quota| quota.hard_limit = limit)
            .ok_or_else(|| QuotaError::ProjectQuotaNotFound {
                project_id: project_id.clone(),
                resource: resource.to_owned(),
            })
    }

    fn quota_allocated_update(
        &self,
        project_id: &ProjectId,
        resource: &str,
        allocated: i64,
    ) -> QuotaResult<()> {
        self.state
            .lock()?
            .quotas
            .get_mut(&key(project_id, resource))
            .map(|quota| quota.allocated = allocated)
            .ok_or_else(|| QuotaError::ProjectQuotaNotFound {
                project_id: project_id.clone(),
                resource: resource.to_owned(),
            })
    }

    fn quota_destroy_by_project(&self, project_id: &ProjectId) -> QuotaResult<()> {
        self.state
            .lock()?
            .quotas
            .retain(|(p, _), _| p != project_id);
        Ok(())
    }

    fn quota_destroy_all_by_project(&self, project_id: &ProjectId) -> QuotaResult<()> {
        let mut state = self.state.lock()?;
        state.quotas.retain(|(p, _), _| p != project_id);
        state.usages.retain(|(p, _), _| p != project_id);
        state.reservations.retain(|_, r| &r.project_id != project_id);
        Ok(())
    }

    fn quota_class_get(&self, class_name: &str, resource: &str) -> QuotaResult<i64> {
        self.state
            .lock()?
            .classes
            .get(&(class_name.to_owned(), resource.to_owned()))
            .copied()
            .ok_or_else(|| QuotaError::QuotaClassNotFound {
                class_name: class_name.to_owned(),
                resource: resource.to_owned(),
            })
    }

    fn quota_class_get_all_by_name(&self, class_name: &str) -> QuotaResult<BTreeMap<String, i64>> {
        Ok(self
            .state
            .lock()?
            .classes
            .iter()
            .filter(|((c, _), _)| c == class_name)
            .map(|((_, r), limit)| (r.clone(), *limit))
            .collect())
    }

    fn quota_class_create(&self, class_name: &str, resource: &str, limit: i64) -> QuotaResult<()> {
        self.state
            .lock()?
            .classes
            .insert((class_name.to_owned(), resource.to_owned()), limit);
        Ok(())
    }

    fn quota_usage_get_all_by_project(
        &self,
        project_id: &ProjectId,
    ) -> QuotaResult<BTreeMap<String, QuotaUsage>> {
        Ok(self.state.lock()?.project_usages(project_id))
    }

    fn quota_reserve(&self, request: &ReserveRequest<'_>) -> QuotaResult<Vec<ReservationId>> {
        let project_id = request.project_id;
        for resource in request.deltas.keys() {
            if !request.quotas.contains_key(resource) || !request.resources.contains(resource) {
                return Err(QuotaError::QuotaResourceUnknown {
                    unknown: vec![resource.clone()],
                });
            }
        }

        let mut state = self.state.lock()?;
        let now = Utc::now();
        let new_usage = |resource: &str| QuotaUsage {
            project_id: project_id.clone(),
            resource: resource.to_owned(),
            in_use: 0,
            reserved: 0,
            until_refresh: request.until_refresh,
            updated_at: now,
        };

        // Usage rows are changed in this copy and written back once every
        // refresh has succeeded.
        let mut usages = state.project_usages(project_id);
        let mut pending = request
            .deltas
            .keys()
            .map(String::as_str)
            .collect::<BTreeSet<_>>();
        while let Some(resource) = pending.pop_first() {
            let refresh = match usages.entry(resource.to_owned()) {
                Entry::Vacant(entry) => {
                    entry.insert(new_usage(resource));
                    true
                }
                Entry::Occupied(mut entry) => {
                    let usage = entry.get_mut();
                    if usage.in_use < 0 {
                        true
                    } else if let Some(remaining) = usage.until_refresh {
                        let remaining = remaining.saturating_sub(1);
                        usage.until_refresh = Some(remaining);
                        remaining == 0
                    } else {
                        request
                            .max_age
                            .is_some_and(|max_age| now - usage.updated_at >= max_age)
                    }
                }
            };
            if !refresh {
                continue;
            }

            let Some((sync, volume_type)) = request
                .resources
                .get(resource)
                .and_then(|r| r.sync())
            else {
                return Err(QuotaError::QuotaResourceUnknown {
                    unknown: vec![resource.to_owned()],
                });
            };
            for (name, in_use) in self.source.sync(project_id, sync, volume_type)? {
                let usage = usages
                    .entry(name.clone())
                    .or_insert_with(|| new_usage(&name));
                usage.in_use = in_use;
                usage.until_refresh = request.until_refresh;
                usage.updated_at = now;
                pending.remove(name.as_str());
            }
        }

        let allocated = state.project_allocated(project_id);
        let allocated_of = |resource: &str| allocated.get(resource).copied().unwrap_or(0);
        let usage_of = |resource: &str| {
            usages
                .get(resource)
                .map(|u| (u.in_use, u.reserved))
                .unwrap_or((0, 0))
        };

        let unders = request
            .deltas
            .iter()
            .filter(|&(resource, &delta)| {
                let current = if request.is_allocated_reserve {
                    allocated_of(resource)
                } else {
                    usage_of(resource).0
                };
                delta < 0 && delta + current < 0
            })
            .map(|(resource, _)| resource.as_str())
            .collect::<Vec<_>>();
        let overs = request
            .deltas
            .iter()
            .filter(|&(resource, &delta)| {
                let quota = request.quotas.get(resource).copied().unwrap_or(UNLIMITED);
                let (in_use, reserved) = usage_of(resource);
                quota >= 0 && delta >= 0 && quota < delta + in_use + reserved + allocated_of(resource)
            })
            .map(|(resource, _)| resource.clone())
            .collect::<Vec<_>>();

        if !unders.is_empty() {
            warn!(
                "Change will make usage less than 0 for the following resources: {}",
                unders.join(", ")
            );
        }

        // Nothing is written back, not even refreshed usage.
        if !overs.is_empty() {
            let summaries = usages
                .iter()
                .map(|(resource, usage)| {
                    (
                        resource.clone(),
                        UsageSummary {
                            in_use: usage.in_use,
                            reserved: usage.reserved,
                            allocated: allocated_of(resource),
                        },
                    )
                })
                .collect();
            return Err(QuotaError::OverQuota {
                overs,
                quotas: request.quotas.clone(),
                usages: summaries,
            });
        }

        let mut reservations = Vec::new();
        for (resource, &delta) in request.deltas {
            let allocated_id = if request.is_allocated_reserve {
                let quota = state
                    .quotas
                    .entry(key(project_id, resource))
                    .or_insert_with(|| ProjectQuota {
                        id: QuotaId::new_v4(),
                        project_id: project_id.clone(),
                        resource: resource.clone(),
                        hard_limit: request.quotas.get(resource).copied().unwrap_or(UNLIMITED),
                        allocated: 0,
                    });
                quota.allocated += delta;
                Some(quota.id)
            } else {
                if delta > 0 {
                    if let Some(usage) = usages.get_mut(resource) {
                        usage.reserved += delta;
                        usage.updated_at = now;
                    }
                }
                None
            };
            let reservation = Reservation {
                id: ReservationId::new_v4(),
                project_id: project_id.clone(),
                resource: resource.clone(),
                delta,
                expire_at: request.expire,
                allocated_id,
            };
            reservations.push(reservation.id);
            state.reservations.insert(reservation.id, reservation);
        }

        for (resource, usage) in usages {
            state.usages.insert(key(project_id, &resource), usage);
        }
        Ok(reservations)
    }

    fn reservation_commit(&self, reservations: &[ReservationId]) -> QuotaResult<()> {
        self.simulate_failure("reservation_commit")?;
        let now = Utc::now();
        let mut state = self.state.lock()?;
        for id in reservations {
            let Some(reservation) = state.reservations.remove(id) else {
                continue;
            };
            if reservation.is_allocation() {
                continue;
            }
            if let Some(usage) = state
                .usages
                .get_mut(&key(&reservation.project_id, &reservation.resource))
            {
                if reservation.delta >= 0 {
                    usage.reserved -= reservation.delta;
                }
                usage.in_use += reservation.delta;
                usage.updated_at = now;
            }
        }
        Ok(())
    }

    fn reservation_rollback(&self, reservations: &[ReservationId]) -> QuotaResult<()> {
        self.simulate_failure("reservation_rollback")?;
        let now = Utc::now();
        let mut state = self.state.lock()?;
        for id in reservations {
            if let Some(reservation) = state.reservations.remove(id) {
                state.release(&reservation, now);
            }
        }
        Ok(())
    }

    fn reservation_expire(&self, now: DateTime<Utc>) -> QuotaResult<usize> {
        self.simulate_failure("reservation_expire")?;
        let mut state = self.state.lock()?;
        let expired = state
            .reservations
            .values()
            .filter(|r| r.is_expired(now))
            .map(|r| r.id)
            .collect::<Vec<_>>();
        for id in &expired {
            if let Some(reservation) = state.reservations.remove(id) {
                state.release(&reservation, now);
            }
        }
        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use crate::{
        cinder::QuotaFlag,
        engine::{
            resources::{Resource, ResourceSet, UsageSync},
            sim_engine::SimInventory,
        },
    };

    use super::*;

    struct Fixture {
        inventory: Arc<SimInventory>,
        store: SimStore,
        resources: ResourceSet,
        project: ProjectId,
    }

    fn fixture() -> Fixture {
        let inventory = Arc::new(SimInventory::default());
        let store = SimStore::new(inventory.clone());
        let resources = vec![
            Resource::reservable("volumes", UsageSync::Volumes, Some(QuotaFlag::QuotaVolumes)),
            Resource::reservable("gigabytes", UsageSync::Gigabytes, Some(QuotaFlag::QuotaGigabytes)),
        ]
        .into_iter()
        .collect();
        Fixture {
            inventory,
            store,
            resources,
            project: ProjectId::from("p"),
        }
    }

    impl Fixture {
        fn reserve_with(
            &self,
            quotas: &BTreeMap<String, i64>,
            deltas: &BTreeMap<String, i64>,
            expire: DateTime<Utc>,
            is_allocated_reserve: bool,
        ) -> QuotaResult<Vec<ReservationId>> {
            self.store.quota_reserve(&ReserveRequest {
                project_id: &self.project,
                resources: &self.resources,
                quotas,
                deltas,
                expire,
                until_refresh: None,
                max_age: None,
                is_allocated_reserve,
            })
        }

        fn reserve(&self, volumes: i64, limit: i64) -> QuotaResult<Vec<ReservationId>> {
            self.reserve_with(
                &BTreeMap::from([("volumes".to_string(), limit)]),
                &BTreeMap::from([("volumes".to_string(), volumes)]),
                Utc::now() + Duration::days(1),
                false,
            )
        }

        fn usage(&self, resource: &str) -> (i64, i64) {
            self.store
                .quota_usage_get(&self.project, resource)
                .unwrap()
                .map(|u| (u.in_use, u.reserved))
                .unwrap()
        }
    }

    #[test]
    /// A first reservation creates the usage row from the inventory.
    fn first_reservation_syncs() {
        crate::test_util::init_logger();
        let f = fixture();
        f.inventory.add_volume(&f.project, None, 1).unwrap();
        f.inventory.add_volume(&f.project, None, 1).unwrap();
        let ids = f.reserve(3, 10).unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(f.usage("volumes"), (2, 3));
    }

    #[test]
    fn commit_and_rollback() {
        let f = fixture();
        let first = f.reserve(4, 10).unwrap();
        let second = f.reserve(5, 10).unwrap();
        assert_eq!(f.usage("volumes"), (0, 9));

        f.store.reservation_commit(&first).unwrap();
        assert_eq!(f.usage("volumes"), (4, 5));
        f.store.reservation_rollback(&second).unwrap();
        assert_eq!(f.usage("volumes"), (4, 0));

        // Resolved reservations are gone.
        f.store.reservation_commit(&second).unwrap();
        f.store.reservation_rollback(&first).unwrap();
        assert_eq!(f.usage("volumes"), (4, 0));
        assert!(f.store.reservations().unwrap().is_empty());
    }

    #[test]
    /// Negative deltas are never over quota and commit into in_use only.
    fn negative_delta() {
        let f = fixture();
        f.store.quota_usage_set(&f.project, "volumes", 5, 0).unwrap();
        let ids = f.reserve(-2, 1).unwrap();
        assert_eq!(f.usage("volumes"), (5, 0));
        f.store.reservation_commit(&ids).unwrap();
        assert_eq!(f.usage("volumes"), (3, 0));
    }

    #[test]
    fn over_quota_reports_usage() {
        let f = fixture();
        f.store.quota_usage_set(&f.project, "volumes", 8, 1).unwrap();
        assert_matches!(
            f.reserve(2, 10),
            Err(QuotaError::OverQuota { overs, quotas, usages })
                if overs == vec!["volumes"]
                    && quotas["volumes"] == 10
                    && usages["volumes"] == UsageSummary { in_use: 8, reserved: 1, allocated: 0 }
        );
        assert_eq!(f.usage("volumes"), (8, 1));
        assert!(f.store.reservations().unwrap().is_empty());
    }

    #[test]
    /// A request over quota writes nothing: no usage row is created and
    /// the refresh countdown does not move.
    fn over_quota_writes_nothing() {
        let f = fixture();
        let quotas = BTreeMap::from([("volumes".to_string(), 1)]);
        let deltas = BTreeMap::from([("volumes".to_string(), 5)]);
        let request = ReserveRequest {
            project_id: &f.project,
            resources: &f.resources,
            quotas: &quotas,
            deltas: &deltas,
            expire: Utc::now() + Duration::days(1),
            until_refresh: Some(5),
            max_age: None,
            is_allocated_reserve: false,
        };
        assert_matches!(f.store.quota_reserve(&request), Err(QuotaError::OverQuota { .. }));
        assert_eq!(f.store.quota_usage_get(&f.project, "volumes").unwrap(), None);

        let fits = BTreeMap::from([("volumes".to_string(), 1)]);
        f.store
            .quota_reserve(&ReserveRequest {
                deltas: &fits,
                ..request
            })
            .unwrap();
        let before = f.store.quota_usage_get(&f.project, "volumes").unwrap();
        assert_eq!(before.as_ref().and_then(|u| u.until_refresh), Some(5));
        assert_matches!(f.store.quota_reserve(&request), Err(QuotaError::OverQuota { .. }));
        assert_matches!(f.store.quota_reserve(&request), Err(QuotaError::OverQuota { .. }));
        assert_eq!(f.store.quota_usage_get(&f.project, "volumes").unwrap(), before);
        assert_eq!(f.store.reservations().unwrap().len(), 1);
    }

    #[test]
    /// Stale usage is recounted before the check.
    fn max_age_refresh() {
        let f = fixture();
        f.store.quota_usage_set(&f.project, "volumes", 9, 0).unwrap();
        f.store
            .quota_usage_touch(&f.project, "volumes", Utc::now() - Duration::hours(2))
            .unwrap();
        let quotas = BTreeMap::from([("volumes".to_string(), 10)]);
        let deltas = BTreeMap::from([("volumes".to_string(), 5)]);
        let request = ReserveRequest {
            project_id: &f.project,
            resources: &f.resources,
            quotas: &quotas,
            deltas: &deltas,
            expire: Utc::now() + Duration::days(1),
            until_refresh: None,
            max_age: Some(Duration::hours(1)),
            is_allocated_reserve: false,
        };
        f.store.quota_reserve(&request).unwrap();
        assert_eq!(f.usage("volumes"), (0, 5));
    }

    #[test]
    /// The refresh countdown runs once per reservation.
    fn until_refresh_countdown() {
        let f = fixture();
        let quotas = BTreeMap::from([("volumes".to_string(), UNLIMITED)]);
        let deltas = BTreeMap::from([("volumes".to_string(), 1)]);
        let request = ReserveRequest {
            project_id: &f.project,
            resources: &f.resources,
            quotas: &quotas,
            deltas: &deltas,
            expire: Utc::now() + Duration::days(1),
            until_refresh: Some(2),
            max_age: None,
            is_allocated_reserve: false,
        };
        f.store.quota_reserve(&request).unwrap();
        f.store.quota_usage_set(&f.project, "volumes", 7, 1).unwrap();
        f.store.quota_reserve(&request).unwrap();
        assert_eq!(f.usage("volumes"), (7, 2));
        f.store.quota_reserve(&request).unwrap();
        assert_eq!(f.usage("volumes"), (0, 3));
    }

    #[test]
    fn allocation_reservations() {
        let f = fixture();
        let quotas = BTreeMap::from([("volumes".to_string(), 10)]);
        let deltas = BTreeMap::from([("volumes".to_string(), 4)]);
        let expire = Utc::now() + Duration::days(1);
        let ids = f.reserve_with(&quotas, &deltas, expire, true).unwrap();
        let quota = f.store.quota_get(&f.project, "volumes").unwrap();
        assert_eq!((quota.hard_limit, quota.allocated), (10, 4));
        assert_eq!(
            f.store.reservation_get(ids[0]).unwrap().unwrap().allocated_id,
            Some(quota.id)
        );
        assert_eq!(f.usage("volumes"), (0, 0));

        // Allocation counts against the limit.
        assert_matches!(
            f.reserve_with(&quotas, &BTreeMap::from([("volumes".to_string(), 7)]), expire, true),
            Err(QuotaError::OverQuota { .. })
        );

        f.store.reservation_rollback(&ids).unwrap();
        assert_eq!(f.store.quota_get(&f.project, "volumes").unwrap().allocated, 0);

        let ids = f.reserve_with(&quotas, &deltas, expire, true).unwrap();
        f.store.reservation_commit(&ids).unwrap();
        assert_eq!(f.store.quota_get(&f.project, "volumes").unwrap().allocated, 4);
        assert_eq!(f.usage("volumes"), (0, 0));
    }

    #[test]
    fn expiry() {
        let f = fixture();
        let past = f
            .reserve_with(
                &BTreeMap::from([("volumes".to_string(), 10)]),
                &BTreeMap::from([("volumes".to_string(), 3)]),
                Utc::now() - Duration::seconds(1),
                false,
            )
            .unwrap();
        let current = f.reserve(2, 10).unwrap();
        assert_eq!(f.store.reservation_expire(Utc::now()).unwrap(), 1);
        assert_eq!(f.usage("volumes"), (0, 2));
        assert_eq!(f.store.reservation_get(past[0]).unwrap(), None);
        assert!(f.store.reservation_get(current[0]).unwrap().is_some());
    }

    #[test]
    fn quota_rows() {
        let f = fixture();
        assert_matches!(
            f.store.quota_get(&f.project, "volumes"),
            Err(QuotaError::ProjectQuotaNotFound { .. })
        );
        assert_matches!(
            f.store.quota_update(&f.project, "volumes", 3),
            Err(QuotaError::ProjectQuotaNotFound { .. })
        );
        f.store.quota_create(&f.project, "volumes", 5, 0).unwrap();
        assert_matches!(
            f.store.quota_create(&f.project, "volumes", 5, 0),
            Err(QuotaError::Store(ErrorEnum::AlreadyExists, _))
        );
        f.store.quota_update(&f.project, "volumes", 3).unwrap();
        f.store.quota_allocated_update(&f.project, "volumes", 2).unwrap();
        assert_eq!(
            f.store.quota_get_all_by_project(&f.project).unwrap(),
            BTreeMap::from([("volumes".to_string(), 3)])
        );
        assert_eq!(
            f.store.quota_allocated_get_all_by_project(&f.project).unwrap(),
            BTreeMap::from([("volumes".to_string(), 2)])
        );

        f.reserve(1, 3).unwrap();
        f.store.quota_destroy_by_project(&f.project).unwrap();
        assert!(f.store.quota_get_all_by_project(&f.project).unwrap().is_empty());
        assert_eq!(f.store.reservations().unwrap().len(), 1);
        f.store.quota_destroy_all_by_project(&f.project).unwrap();
        assert!(f.store.reservations().unwrap().is_empty());
        assert!(f
            .store
            .quota_usage_get_all_by_project(&f.project)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn quota_classes() {
        let f = fixture();
        f.store.quota_class_create("default", "volumes", 20).unwrap();
        f.store.quota_class_create("gold", "volumes", 50).unwrap();
        assert_eq!(f.store.quota_class_get("gold", "volumes").unwrap(), 50);
        assert_matches!(
            f.store.quota_class_get("gold", "gigabytes"),
            Err(QuotaError::QuotaClassNotFound { .. })
        );
        assert_eq!(
            f.store.quota_class_get_defaults().unwrap(),
            BTreeMap::from([("volumes".to_string(), 20)])
        );
    }

    #[test]
    fn simulated_failures() {
        let f = fixture();
        let ids = f.reserve(1, 10).unwrap();
        f.store.configure_simulator(1).unwrap();
        assert_matches!(
            f.store.reservation_commit(&ids),
            Err(ref err) if err.is_transient()
        );
        f.store.configure_simulator(0).unwrap();
        f.store.reservation_commit(&ids).unwrap();
        assert_eq!(f.usage("volumes"), (1, 0));
    }
}
