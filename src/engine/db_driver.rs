// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use crate::{
    cinder::{DriverKind, QuotaConfig},
    engine::{driver::QuotaDriver, store::UsageStore},
};

/// A driver with flat projects, reading and writing a usage store directly.
#[derive(Debug)]
pub struct DbQuotaDriver {
    store: Arc<dyn UsageStore>,
    config: Arc<QuotaConfig>,
}

impl DbQuotaDriver {
    pub fn new(store: Arc<dyn UsageStore>, config: Arc<QuotaConfig>) -> DbQuotaDriver {
        DbQuotaDriver { store, config }
    }
}

impl QuotaDriver for DbQuotaDriver {
    fn store(&self) -> &Arc<dyn UsageStore> {
        &self.store
    }

    fn config(&self) -> &QuotaConfig {
        &self.config
    }

    fn kind(&self) -> DriverKind {
        DriverKind::Db
    }
}
