// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{fs, path::Path};

use chrono::Duration;
use strum_macros::{AsRefStr, Display, EnumString};

use crate::cinder::errors::QuotaResult;

/// Selects the quota driver used by an engine.
#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, AsRefStr, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    #[default]
    Db,
    #[strum(to_string = "nested", serialize = "nested_db")]
    #[serde(alias = "nested_db")]
    Nested,
}

/// A configuration option which may serve as the default limit of a
/// resource.
#[derive(Clone, Copy, Debug, Eq, PartialEq, AsRefStr, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum QuotaFlag {
    QuotaVolumes,
    QuotaSnapshots,
    QuotaConsistencygroups,
    QuotaGroups,
    QuotaGigabytes,
    QuotaBackups,
    QuotaBackupGigabytes,
    PerVolumeSizeLimit,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    pub quota_volumes: i64,
    pub quota_snapshots: i64,
    pub quota_consistencygroups: i64,
    pub quota_groups: i64,
    pub quota_gigabytes: i64,
    pub quota_backups: i64,
    pub quota_backup_gigabytes: i64,
    pub per_volume_size_limit: i64,
    /// Seconds until a reservation expires. This is also the longest an
    /// unresolved reservation survives a failed commit or rollback.
    pub reservation_expire: i64,
    /// Number of reservations until usage is refreshed; 0 disables.
    pub until_refresh: u32,
    /// Seconds between usage refreshes; 0 disables.
    pub max_age: i64,
    pub use_default_quota_class: bool,
    /// Do not count snapshots against the gigabytes quota.
    pub no_snapshot_gb_quota: bool,
    pub quota_driver: DriverKind,
}

impl Default for QuotaConfig {
    fn default() -> QuotaConfig {
        QuotaConfig {
            quota_volumes: 10,
            quota_snapshots: 10,
            quota_consistencygroups: 10,
            quota_groups: 10,
            quota_gigabytes: 1000,
            quota_backups: 10,
            quota_backup_gigabytes: 1000,
            per_volume_size_limit: -1,
            reservation_expire: 86400,
            until_refresh: 0,
            max_age: 0,
            use_default_quota_class: true,
            no_snapshot_gb_quota: false,
            quota_driver: DriverKind::Db,
        }
    }
}

impl QuotaConfig {
    pub fn from_json(json: &str) -> QuotaResult<QuotaConfig> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &Path) -> QuotaResult<QuotaConfig> {
        let contents = fs::read_to_string(path)?;
        let config = QuotaConfig::from_json(&contents)?;
        debug!("Loaded quota configuration from {}", path.display());
        Ok(config)
    }

    /// Resolve the value of a default-limit option.
    pub fn flag_value(&self, flag: QuotaFlag) -> i64 {
        match flag {
            QuotaFlag::QuotaVolumes => self.quota_volumes,
            QuotaFlag::QuotaSnapshots => self.quota_snapshots,
            QuotaFlag::QuotaConsistencygroups => self.quota_consistencygroups,
            QuotaFlag::QuotaGroups => self.quota_groups,
            QuotaFlag::QuotaGigabytes => self.quota_gigabytes,
            QuotaFlag::QuotaBackups => self.quota_backups,
            QuotaFlag::QuotaBackupGigabytes => self.quota_backup_gigabytes,
            QuotaFlag::PerVolumeSizeLimit => self.per_volume_size_limit,
        }
    }

    /// The until_refresh countdown to store with a usage row; None disables
    /// count-based refresh.
    pub fn until_refresh(&self) -> Option<u32> {
        if self.until_refresh > 0 {
            Some(self.until_refresh)
        } else {
            None
        }
    }

    /// The maximum age of a usage row before it is refreshed, if any.
    pub fn max_age(&self) -> Option<Duration> {
        if self.max_age > 0 {
            Some(Duration::seconds(self.max_age))
        } else {
            None
        }
    }

    pub fn reservation_expire(&self) -> Duration {
        Duration::seconds(self.reservation_expire)
    }
}
