//! Shared server state: the storage lock, the ledger and the member registry.

use crate::config::StoreConfig;
use crate::error::RelayResult;
use crate::ledger::LedgerStore;
use crate::registry::MembershipRegistry;
use crate::storage::StorageLock;
use std::sync::Arc;
use tracing::info;

/// Everything a dispatcher needs, opened once per process
pub struct RelayState {
    ledger: Arc<LedgerStore>,
    registry: Arc<MembershipRegistry>,
    // Held for the lifetime of the state; dropped last
    _lock: StorageLock,
}

impl RelayState {
    /// Lock the data directory, recover the ledger and open the registry
    ///
    /// A corrupt ledger tail, or a broken chain when `verify_on_start` is set,
    /// is returned as an error and must stop the server.
    pub fn open(config: &StoreConfig) -> RelayResult<Self> {
        let lock = StorageLock::acquire(&config.data_dir)?;
        let ledger = LedgerStore::open(config.ledger_path())?;

        if config.verify_on_start {
            let report = ledger.verify_chain()?;
            info!(blocks = report.blocks, "Verified full chain");
        }

        let registry = MembershipRegistry::open(config.members_path())?;

        Ok(RelayState {
            ledger: Arc::new(ledger),
            registry: Arc::new(registry),
            _lock: lock,
        })
    }

    pub fn ledger(&self) -> &Arc<LedgerStore> {
        &self.ledger
    }

    pub fn registry(&self) -> &Arc<MembershipRegistry> {
        &self.registry
    }
}
