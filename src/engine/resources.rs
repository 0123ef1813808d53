// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{
    collections::{btree_map, BTreeMap, BTreeSet},
    fmt::{self, Debug},
    sync::{Arc, RwLock},
};

use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

use crate::{
    cinder::{QuotaConfig, QuotaError, QuotaFlag, QuotaResult},
    engine::types::{RequestContext, VolumeType, VolumeTypeId, UNLIMITED},
};

/// The routine a store runs to recompute authoritative usage of a
/// reservable resource.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, AsRefStr, Display, EnumIter, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum UsageSync {
    Volumes,
    Snapshots,
    Gigabytes,
    Backups,
    BackupGigabytes,
    Groups,
}

/// Counts the current number of some countable resource.
pub type CountFn = Arc<dyn Fn(&RequestContext, &[&str]) -> QuotaResult<i64> + Send + Sync>;

#[derive(Clone)]
pub enum ResourceKind {
    /// A limit with no usage tracking at all.
    Absolute,
    /// A limit checked against a count computed on demand; never reserved.
    Countable(CountFn),
    /// A limit whose usage is tracked by the store and which participates in
    /// reserve, commit and rollback.
    Reservable {
        sync: UsageSync,
        volume_type: Option<VolumeType>,
    },
}

impl Debug for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Absolute => write!(f, "Absolute"),
            ResourceKind::Countable(_) => write!(f, "Countable"),
            ResourceKind::Reservable { sync, volume_type } => f
                .debug_struct("Reservable")
                .field("sync", sync)
                .field("volume_type", volume_type)
                .finish(),
        }
    }
}

/// A named quota-able dimension.
#[derive(Clone, Debug)]
pub struct Resource {
    name: String,
    kind: ResourceKind,
    flag: Option<QuotaFlag>,
}

impl Resource {
    pub fn absolute(name: &str, flag: Option<QuotaFlag>) -> Resource {
        Resource {
            name: name.to_owned(),
            kind: ResourceKind::Absolute,
            flag,
        }
    }

    pub fn countable(name: &str, count: CountFn, flag: Option<QuotaFlag>) -> Resource {
        Resource {
            name: name.to_owned(),
            kind: ResourceKind::Countable(count),
            flag,
        }
    }

    pub fn reservable(name: &str, sync: UsageSync, flag: Option<QuotaFlag>) -> Resource {
        Resource {
            name: name.to_owned(),
            kind: ResourceKind::Reservable {
                sync,
                volume_type: None,
            },
            flag,
        }
    }

    /// A per-volume-type variant of `part`, named `<part>_<type name>`.
    /// These have no configured default and so are unlimited unless a quota
    /// class or project limit says otherwise.
    pub fn for_volume_type(part: UsageSync, volume_type: &VolumeType) -> Resource {
        Resource {
            name: format!("{}_{}", part, volume_type.name),
            kind: ResourceKind::Reservable {
                sync: part,
                volume_type: Some(volume_type.clone()),
            },
            flag: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    pub fn flag(&self) -> Option<QuotaFlag> {
        self.flag
    }

    pub fn has_sync(&self) -> bool {
        matches!(self.kind, ResourceKind::Reservable { .. })
    }

    /// The sync routine and volume type of a reservable resource.
    pub fn sync(&self) -> Option<(UsageSync, Option<&VolumeType>)> {
        match self.kind {
            ResourceKind::Reservable {
                sync,
                ref volume_type,
            } => Some((sync, volume_type.as_ref())),
            _ => None,
        }
    }

    /// The configured default limit, UNLIMITED if the resource has no
    /// configuration option.
    pub fn default(&self, config: &QuotaConfig) -> i64 {
        self.flag
            .map(|flag| config.flag_value(flag))
            .unwrap_or(UNLIMITED)
    }

    pub fn count(&self, ctx: &RequestContext, args: &[&str]) -> QuotaResult<i64> {
        match self.kind {
            ResourceKind::Countable(ref count) => count(ctx, args),
            _ => Err(QuotaError::QuotaResourceUnknown {
                unknown: vec![self.name.clone()],
            }),
        }
    }
}

/// An immutable mapping of resource name to resource, ordered by name.
#[derive(Clone, Debug, Default)]
pub struct ResourceSet(BTreeMap<String, Resource>);

impl ResourceSet {
    pub fn new() -> ResourceSet {
        ResourceSet::default()
    }

    /// Insert a resource, replacing any resource of the same name.
    pub fn insert(&mut self, resource: Resource) -> Option<Resource> {
        self.0.insert(resource.name.clone(), resource)
    }

    pub fn get(&self, name: &str) -> Option<&Resource> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Values<'_, String, Resource> {
        self.0.values()
    }

    pub fn extend(&mut self, other: ResourceSet) {
        self.0.extend(other.0);
    }

    /// The subset consisting of only the resource named.
    pub fn only(&self, name: &str) -> QuotaResult<ResourceSet> {
        self.select(std::iter::once(name), |_| true)
    }

    /// Select the named resources, which must all exist and satisfy the
    /// predicate. Names which do not are reported in sorted order.
    pub fn select<'a, I, F>(&self, names: I, pred: F) -> QuotaResult<ResourceSet>
    where
        I: IntoIterator<Item = &'a str>,
        F: Fn(&Resource) -> bool,
    {
        let mut selected = ResourceSet::new();
        let mut unknown = BTreeSet::new();
        for name in names {
            match self.0.get(name) {
                Some(resource) if pred(resource) => {
                    selected.insert(resource.clone());
                }
                _ => {
                    unknown.insert(name.to_owned());
                }
            }
        }
        if unknown.is_empty() {
            Ok(selected)
        } else {
            Err(QuotaError::QuotaResourceUnknown {
                unknown: unknown.into_iter().collect(),
            })
        }
    }
}

impl FromIterator<Resource> for ResourceSet {
    fn from_iter<I>(iter: I) -> ResourceSet
    where
        I: IntoIterator<Item = Resource>,
    {
        let mut set = ResourceSet::new();
        for resource in iter {
            set.insert(resource);
        }
        set
    }
}

/// The set of quota-able resources known to an engine.
///
/// `snapshot` returns the set as it is at the moment of the call. Sources
/// derived from external configuration rebuild the set on every call, so
/// an operation which needs a stable view should snapshot once and pass the
/// result down.
pub trait ResourceSource: Debug + Send + Sync {
    fn snapshot(&self) -> QuotaResult<ResourceSet>;

    /// Register a resource, overwriting one of the same name.
    fn register_resource(&self, resource: Resource) -> QuotaResult<()>;

    fn register_resources(&self, resources: Vec<Resource>) -> QuotaResult<()> {
        for resource in resources {
            self.register_resource(resource)?;
        }
        Ok(())
    }
}

/// A set of resources declared by the caller.
#[derive(Debug, Default)]
pub struct StaticResources {
    resources: RwLock<ResourceSet>,
}

impl StaticResources {
    pub fn new(resources: Vec<Resource>) -> StaticResources {
        StaticResources {
            resources: RwLock::new(resources.into_iter().collect()),
        }
    }
}

impl ResourceSource for StaticResources {
    fn snapshot(&self) -> QuotaResult<ResourceSet> {
        Ok(self.resources.read()?.clone())
    }

    fn register_resource(&self, resource: Resource) -> QuotaResult<()> {
        self.resources.write()?.insert(resource);
        Ok(())
    }
}

/// Enumerates the volume types which exist.
pub trait VolumeTypeRegistry: Debug + Send + Sync {
    /// All active volume types.
    fn volume_types(&self) -> QuotaResult<Vec<VolumeType>>;

    /// Look up a volume type; `inactive` allows types which have been deleted.
    fn get_volume_type(&self, id: VolumeTypeId, inactive: bool) -> QuotaResult<VolumeType>;
}

/// The volume resources: a fixed base set plus volumes, gigabytes and
/// snapshots variants for every volume type currently defined.
#[derive(Debug)]
pub struct VolumeTypeResources {
    volume_types: Arc<dyn VolumeTypeRegistry>,
}

impl VolumeTypeResources {
    pub fn new(volume_types: Arc<dyn VolumeTypeRegistry>) -> VolumeTypeResources {
        VolumeTypeResources { volume_types }
    }

    pub fn base() -> ResourceSet {
        vec![
            Resource::reservable("volumes", UsageSync::Volumes, Some(QuotaFlag::QuotaVolumes)),
            Resource::absolute(
                "per_volume_gigabytes",
                Some(QuotaFlag::PerVolumeSizeLimit),
            ),
            Resource::reservable(
                "snapshots",
                UsageSync::Snapshots,
                Some(QuotaFlag::QuotaSnapshots),
            ),
            Resource::reservable(
                "gigabytes",
                UsageSync::Gigabytes,
                Some(QuotaFlag::QuotaGigabytes),
            ),
            Resource::reservable("backups", UsageSync::Backups, Some(QuotaFlag::QuotaBackups)),
            Resource::reservable(
                "backup_gigabytes",
                UsageSync::BackupGigabytes,
                Some(QuotaFlag::QuotaBackupGigabytes),
            ),
        ]
        .into_iter()
        .collect()
    }

    pub fn volume_types(&self) -> &Arc<dyn VolumeTypeRegistry> {
        &self.volume_types
    }
}

impl ResourceSource for VolumeTypeResources {
    fn snapshot(&self) -> QuotaResult<ResourceSet> {
        let mut resources = VolumeTypeResources::base();
        for volume_type in self.volume_types.volume_types()? {
            for part in [UsageSync::Volumes, UsageSync::Gigabytes, UsageSync::Snapshots] {
                resources.insert(Resource::for_volume_type(part, &volume_type));
            }
        }
        Ok(resources)
    }

    fn register_resource(&self, resource: Resource) -> QuotaResult<()> {
        Err(QuotaError::NotSupported(format!(
            "cannot register {}; volume resources are derived from volume types",
            resource.name()
        )))
    }
}

/// The group resources.
#[derive(Debug, Default)]
pub struct GroupResources;

impl ResourceSource for GroupResources {
    fn snapshot(&self) -> QuotaResult<ResourceSet> {
        Ok(vec![Resource::reservable(
            "groups",
            UsageSync::Groups,
            Some(QuotaFlag::QuotaGroups),
        )]
        .into_iter()
        .collect())
    }

    fn register_resource(&self, resource: Resource) -> QuotaResult<()> {
        Err(QuotaError::NotSupported(format!(
            "cannot register {}; group resources are fixed",
            resource.name()
        )))
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::sim_engine::SimVolumeTypes;

    use super::*;

    fn counter(value: i64) -> CountFn {
        Arc::new(move |_, _| Ok(value))
    }

    #[test]
    /// Names come back sorted and re-registration replaces.
    fn static_registration() {
        let source = StaticResources::default();
        source
            .register_resources(vec![
                Resource::reservable("volumes", UsageSync::Volumes, Some(QuotaFlag::QuotaVolumes)),
                Resource::absolute("backups", None),
            ])
            .unwrap();
        source
            .register_resource(Resource::absolute("volumes", None))
            .unwrap();
        let snapshot = source.snapshot().unwrap();
        assert_eq!(snapshot.names(), vec!["backups", "volumes"]);
        assert!(!snapshot.get("volumes").unwrap().has_sync());
    }

    #[test]
    /// Selection reports every missing or mismatched name, sorted.
    fn select_unknown() {
        let set: ResourceSet = vec![
            Resource::reservable("volumes", UsageSync::Volumes, None),
            Resource::countable("things", counter(3), None),
        ]
        .into_iter()
        .collect();
        assert_eq!(
            set.select(["volumes"], |r| r.has_sync()).unwrap().names(),
            vec!["volumes"]
        );
        assert_matches!(
            set.select(["zeta", "things", "alpha"], |r| r.has_sync()),
            Err(QuotaError::QuotaResourceUnknown { unknown }) if unknown == vec!["alpha", "things", "zeta"]
        );
    }

    #[test]
    fn defaults_from_flags() {
        let config = QuotaConfig {
            quota_volumes: 7,
            ..Default::default()
        };
        assert_eq!(
            Resource::reservable("volumes", UsageSync::Volumes, Some(QuotaFlag::QuotaVolumes))
                .default(&config),
            7
        );
        assert_eq!(Resource::absolute("unflagged", None).default(&config), UNLIMITED);
    }

    #[test]
    fn countable_count() {
        let ctx = RequestContext::new("p");
        assert_eq!(
            Resource::countable("things", counter(4), None)
                .count(&ctx, &[])
                .unwrap(),
            4
        );
        assert_matches!(
            Resource::absolute("things", None).count(&ctx, &[]),
            Err(QuotaError::QuotaResourceUnknown { .. })
        );
    }

    #[test]
    /// The volume resources track the volume types at each snapshot.
    fn volume_type_resources_are_live() {
        let volume_types = Arc::new(SimVolumeTypes::default());
        let source = VolumeTypeResources::new(volume_types.clone());
        assert_eq!(
            source.snapshot().unwrap().names(),
            vec![
                "backup_gigabytes",
                "backups",
                "gigabytes",
                "per_volume_gigabytes",
                "snapshots",
                "volumes"
            ]
        );

        let gold = volume_types.create("gold");
        let snapshot = source.snapshot().unwrap();
        assert_eq!(snapshot.len(), 9);
        let resource = snapshot.get("gigabytes_gold").unwrap();
        assert_eq!(resource.sync().map(|(s, _)| s), Some(UsageSync::Gigabytes));
        assert_eq!(resource.default(&QuotaConfig::default()), UNLIMITED);

        volume_types.deactivate(gold.id);
        assert!(!source.snapshot().unwrap().contains("volumes_gold"));
    }

    #[test]
    fn derived_sources_refuse_registration() {
        let source = VolumeTypeResources::new(Arc::new(SimVolumeTypes::default()));
        assert_matches!(
            source.register_resource(Resource::absolute("x", None)),
            Err(QuotaError::NotSupported(_))
        );
        assert_matches!(
            GroupResources.register_resource(Resource::absolute("x", None)),
            Err(QuotaError::NotSupported(_))
        );
        assert_eq!(GroupResources.snapshot().unwrap().names(), vec!["groups"]);
    }
}
