// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::sync::{PoisonError, RwLock};

use crate::{
    cinder::{ErrorEnum, QuotaError, QuotaResult},
    engine::{
        resources::VolumeTypeRegistry,
        types::{VolumeType, VolumeTypeId},
    },
};

#[derive(Debug)]
struct SimVolumeType {
    volume_type: VolumeType,
    active: bool,
}

/// An in-memory volume type catalogue.
#[derive(Debug, Default)]
pub struct SimVolumeTypes {
    types: RwLock<Vec<SimVolumeType>>,
}

impl SimVolumeTypes {
    /// Add an active volume type with a fresh id.
    pub fn create(&self, name: &str) -> VolumeType {
        let volume_type = VolumeType {
            id: VolumeTypeId::new_v4(),
            name: name.to_owned(),
        };
        self.types
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SimVolumeType {
                volume_type: volume_type.clone(),
                active: true,
            });
        volume_type
    }

    /// Mark a type deleted; it stays visible to lookups that ask for
    /// inactive types. Returns false if the id is unknown.
    pub fn deactivate(&self, id: VolumeTypeId) -> bool {
        self.types
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .iter_mut()
            .find(|t| t.volume_type.id == id)
            .map(|t| t.active = false)
            .is_some()
    }
}

impl VolumeTypeRegistry for SimVolumeTypes {
    fn volume_types(&self) -> QuotaResult<Vec<VolumeType>> {
        Ok(self
            .types
            .read()?
            .iter()
            .filter(|t| t.active)
            .map(|t| t.volume_type.clone())
            .collect())
    }

    fn get_volume_type(&self, id: VolumeTypeId, inactive: bool) -> QuotaResult<VolumeType> {
        self.types
            .read()?
            .iter()
            .find(|t| t.volume_type.id == id && (inactive || t.active))
            .map(|t| t.volume_type.clone())
            .ok_or_else(|| {
                QuotaError::Store(ErrorEnum::NotFound, format!("volume type {id} not found"))
            })
    }
}
