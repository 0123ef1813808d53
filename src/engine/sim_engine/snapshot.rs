// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A JSON description of projects, their limits and their usage, from which
//! the in-memory backends can be populated.

use std::{collections::BTreeMap, sync::Arc};

use crate::{
    cinder::{QuotaError, QuotaResult},
    engine::{
        sim_engine::{SimHierarchy, SimInventory, SimStore, SimVolumeTypes},
        store::UsageStore,
        types::ProjectId,
    },
};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct LimitRecord {
    pub limit: i64,
    #[serde(default)]
    pub allocated: i64,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub in_use: i64,
    #[serde(default)]
    pub reserved: i64,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: ProjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<ProjectId>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub quotas: BTreeMap<String, LimitRecord>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub usages: BTreeMap<String, UsageRecord>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_types: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub quota_classes: BTreeMap<String, BTreeMap<String, i64>>,
    #[serde(default)]
    pub projects: Vec<ProjectRecord>,
}

/// The backends a snapshot was loaded into.
#[derive(Debug)]
pub struct SimBackends {
    pub store: Arc<SimStore>,
    pub hierarchy: Arc<SimHierarchy>,
    pub volume_types: Arc<SimVolumeTypes>,
}

impl QuotaSnapshot {
    pub fn from_json(json: &str) -> QuotaResult<QuotaSnapshot> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> QuotaResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Populate fresh backends. Projects may be listed in any order but
    /// every parent must be listed.
    pub fn load(&self) -> QuotaResult<SimBackends> {
        let store = Arc::new(SimStore::new(Arc::new(SimInventory::default())));
        let hierarchy = Arc::new(SimHierarchy::new());
        let volume_types = Arc::new(SimVolumeTypes::default());

        for name in &self.volume_types {
            volume_types.create(name);
        }
        for (class_name, limits) in &self.quota_classes {
            for (resource, &limit) in limits {
                store.quota_class_create(class_name, resource, limit)?;
            }
        }

        let mut pending = self.projects.iter().collect::<Vec<_>>();
        while !pending.is_empty() {
            let before = pending.len();
            let mut deferred = Vec::new();
            for project in pending {
                match hierarchy.add_project(&project.id, project.parent_id.as_deref()) {
                    Ok(()) => (),
                    Err(QuotaError::ProjectNotFound(_)) => {
                        deferred.push(project);
                        continue;
                    }
                    Err(err) => return Err(err),
                }
                for (resource, record) in &project.quotas {
                    store.quota_create(&project.id, resource, record.limit, record.allocated)?;
                }
                for (resource, record) in &project.usages {
                    store.quota_usage_set(&project.id, resource, record.in_use, record.reserved)?;
                }
            }
            if deferred.len() == before {
                return Err(QuotaError::InvalidInput(format!(
                    "parents of projects {} are missing",
                    deferred.iter().map(|p| p.id.to_string()).collect::<Vec<_>>().join(", ")
                )));
            }
            pending = deferred;
        }

        Ok(SimBackends {
            store,
            hierarchy,
            volume_types,
        })
    }

    /// The same projects with limits and usage as they now are in `store`.
    pub fn capture(&self, store: &SimStore) -> QuotaResult<QuotaSnapshot> {
        let mut projects = Vec::with_capacity(self.projects.len());
        for project in &self.projects {
            let limits = store.quota_get_all_by_project(&project.id)?;
            let allocated = store.quota_allocated_get_all_by_project(&project.id)?;
            let quotas = limits
                .into_iter()
                .map(|(resource, limit)| {
                    let allocated = allocated.get(&resource).copied().unwrap_or(0);
                    (resource, LimitRecord { limit, allocated })
                })
                .collect();
            let usages = store
                .quota_usage_get_all_by_project(&project.id)?
                .into_iter()
                .map(|(resource, usage)| {
                    (
                        resource,
                        UsageRecord {
                            in_use: usage.in_use,
                            reserved: usage.reserved,
                        },
                    )
                })
                .collect();
            projects.push(ProjectRecord {
                id: project.id.clone(),
                parent_id: project.parent_id.clone(),
                quotas,
                usages,
            });
        }
        Ok(QuotaSnapshot {
            volume_types: self.volume_types.clone(),
            quota_classes: self.quota_classes.clone(),
            projects,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SNAPSHOT: &str = r#"{
        "quota_classes": {"default": {"volumes": 20}},
        "projects": [
            {"id": "B", "parent_id": "A", "quotas": {"volumes": {"limit": 3}},
             "usages": {"volumes": {"in_use": 1}}},
            {"id": "A", "quotas": {"volumes": {"limit": 10, "allocated": 3}}}
        ]
    }"#;

    #[test]
    /// Children may precede their parents.
    fn load_out_of_order() {
        let snapshot = QuotaSnapshot::from_json(SNAPSHOT).unwrap();
        let backends = snapshot.load().unwrap();
        let a = backends.store.quota_get(&"A".into(), "volumes").unwrap();
        assert_eq!((a.hard_limit, a.allocated), (10, 3));
        assert_eq!(
            backends.store.quota_class_get("default", "volumes").unwrap(),
            20
        );
        assert_eq!(snapshot.capture(&backends.store).unwrap(), snapshot);
    }

    #[test]
    fn missing_parent() {
        let snapshot = QuotaSnapshot::from_json(r#"{"projects": [{"id": "B", "parent_id": "A"}]}"#)
            .unwrap();
        assert_matches!(snapshot.load(), Err(QuotaError::InvalidInput(_)));
    }
}
