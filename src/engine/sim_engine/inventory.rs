// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{collections::BTreeMap, sync::Mutex};

use crate::{
    cinder::QuotaResult,
    engine::{
        resources::UsageSync,
        store::UsageSource,
        types::{ProjectId, VolumeType, VolumeTypeId},
    },
};

#[derive(Debug, Clone)]
struct SimVolume {
    project_id: ProjectId,
    volume_type: Option<VolumeTypeId>,
    size: i64,
}

#[derive(Debug, Clone)]
struct SimBackup {
    project_id: ProjectId,
    size: i64,
}

#[derive(Debug, Default)]
struct Inventory {
    volumes: Vec<SimVolume>,
    snapshots: Vec<SimVolume>,
    backups: Vec<SimBackup>,
    groups: Vec<ProjectId>,
}

impl Inventory {
    fn of_type<'a>(
        items: &'a [SimVolume],
        project_id: &'a ProjectId,
        volume_type: Option<&'a VolumeType>,
    ) -> impl Iterator<Item = &'a SimVolume> + 'a {
        items.iter().filter(move |item| {
            &item.project_id == project_id
                && volume_type.is_none_or(|vt| item.volume_type == Some(vt.id))
        })
    }
}

/// The volumes, snapshots, backups and groups that actually exist. Usage
/// refreshes recount from here.
#[derive(Debug, Default)]
pub struct SimInventory {
    inventory: Mutex<Inventory>,
    no_snapshot_gb_quota: bool,
}

impl SimInventory {
    /// If `no_snapshot_gb_quota` is set, snapshot sizes do not count
    /// towards gigabytes.
    pub fn new(no_snapshot_gb_quota: bool) -> SimInventory {
        SimInventory {
            inventory: Mutex::default(),
            no_snapshot_gb_quota,
        }
    }

    pub fn add_volume(
        &self,
        project_id: &ProjectId,
        volume_type: Option<VolumeTypeId>,
        size: i64,
    ) -> QuotaResult<()> {
        self.inventory.lock()?.volumes.push(SimVolume {
            project_id: project_id.clone(),
            volume_type,
            size,
        });
        Ok(())
    }

    pub fn add_snapshot(
        &self,
        project_id: &ProjectId,
        volume_type: Option<VolumeTypeId>,
        size: i64,
    ) -> QuotaResult<()> {
        self.inventory.lock()?.snapshots.push(SimVolume {
            project_id: project_id.clone(),
            volume_type,
            size,
        });
        Ok(())
    }

    pub fn add_backup(&self, project_id: &ProjectId, size: i64) -> QuotaResult<()> {
        self.inventory.lock()?.backups.push(SimBackup {
            project_id: project_id.clone(),
            size,
        });
        Ok(())
    }

    pub fn add_group(&self, project_id: &ProjectId) -> QuotaResult<()> {
        self.inventory.lock()?.groups.push(project_id.clone());
        Ok(())
    }

    /// Forget everything a project owns.
    pub fn remove_project(&self, project_id: &ProjectId) -> QuotaResult<()> {
        let mut inventory = self.inventory.lock()?;
        inventory.volumes.retain(|v| &v.project_id != project_id);
        inventory.snapshots.retain(|s| &s.project_id != project_id);
        inventory.backups.retain(|b| &b.project_id != project_id);
        inventory.groups.retain(|g| g != project_id);
        Ok(())
    }
}

fn count<I>(iter: I) -> i64
where
    I: Iterator,
{
    i64::try_from(iter.count()).unwrap_or(i64::MAX)
}

impl UsageSource for SimInventory {
    fn sync(
        &self,
        project_id: &ProjectId,
        sync: UsageSync,
        volume_type: Option<&VolumeType>,
    ) -> QuotaResult<BTreeMap<String, i64>> {
        let inventory = self.inventory.lock()?;
        let value = match sync {
            UsageSync::Volumes => count(Inventory::of_type(
                &inventory.volumes,
                project_id,
                volume_type,
            )),
            UsageSync::Snapshots => count(Inventory::of_type(
                &inventory.snapshots,
                project_id,
                volume_type,
            )),
            UsageSync::Gigabytes => {
                let volume_gb: i64 =
                    Inventory::of_type(&inventory.volumes, project_id, volume_type)
                        .map(|v| v.size)
                        .sum();
                if self.no_snapshot_gb_quota {
                    volume_gb
                } else {
                    volume_gb
                        + Inventory::of_type(&inventory.snapshots, project_id, volume_type)
                            .map(|s| s.size)
                            .sum::<i64>()
                }
            }
            UsageSync::Backups => count(
                inventory
                    .backups
                    .iter()
                    .filter(|b| &b.project_id == project_id),
            ),
            UsageSync::BackupGigabytes => inventory
                .backups
                .iter()
                .filter(|b| &b.project_id == project_id)
                .map(|b| b.size)
                .sum(),
            UsageSync::Groups => count(inventory.groups.iter().filter(|g| *g == project_id)),
        };
        let key = match volume_type {
            Some(vt) => format!("{}_{}", sync, vt.name),
            None => sync.to_string(),
        };
        Ok(BTreeMap::from([(key, value)]))
    }
}
