//! Long-lived state of the resource layer.
//!
//! Caches, the in-memory key store and lock tables used to be module globals. They now live in
//! one [`ResourceManager`] that is created on startup, initialised once and torn down on shutdown.
use std::{collections::HashMap,
          sync::{Arc, Mutex}};

use slog::Logger;

use crate::{kmip::{AlertSink, KeyCipher, KeyMemory, KmipClient, KmipResult, KmipStore, KmipSync, PeriodicSync,
                   SYNC_INTERVAL},
            zfs::{EncryptionManager, QueryEngine, SnapshotCountCache, ZfsEngine}};

/// Named exclusive locks. Callers using the same name run one after another.
#[derive(Default)]
pub struct LockTable {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LockTable {
    pub fn new() -> LockTable { LockTable::default() }

    /// Run `f` holding the lock called `name`.
    pub fn with_lock<T, F: FnOnce() -> T>(&self, name: &str, f: F) -> T {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(name.to_string()).or_default())
        };
        let result = {
            let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
            f()
        };
        // Clones are only handed out under the table lock, two references means nobody waits.
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if Arc::strong_count(&lock) == 2 {
            locks.remove(name);
        }
        result
    }

    /// Locks currently held or waited for.
    pub fn len(&self) -> usize { self.locks.lock().unwrap_or_else(|e| e.into_inner()).len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

/// Owner of the snapshot count cache, the key memory and the lock tables.
pub struct ResourceManager {
    engine:        Arc<dyn ZfsEngine>,
    counts:        Arc<SnapshotCountCache>,
    keys:          Arc<KeyMemory>,
    dataset_locks: Arc<LockTable>,
    job_locks:     Arc<LockTable>,
    kmip:          Option<Arc<KmipSync>>,
    periodic:      Mutex<Option<PeriodicSync>>,
    logger:        Logger,
}

impl ResourceManager {
    pub fn new(engine: Arc<dyn ZfsEngine>) -> ResourceManager {
        ResourceManager {
            engine,
            counts: Arc::new(SnapshotCountCache::new()),
            keys: Arc::new(KeyMemory::new()),
            dataset_locks: Arc::new(LockTable::new()),
            job_locks: Arc::new(LockTable::new()),
            kmip: None,
            periodic: Mutex::new(None),
            logger: crate::GlobalLogger::component("manager", "resources"),
        }
    }

    /// Attach a KMIP sync core sharing this manager's key memory and job locks.
    pub fn with_kmip(
        mut self,
        store: Arc<dyn KmipStore>,
        client: Arc<dyn KmipClient>,
        cipher: Arc<dyn KeyCipher>,
        alerts: Arc<dyn AlertSink>,
    ) -> ResourceManager {
        self.kmip = Some(Arc::new(KmipSync::new(
            store,
            client,
            cipher,
            Arc::clone(&self.engine),
            alerts,
            Arc::clone(&self.keys),
            Arc::clone(&self.job_locks),
        )));
        self
    }

    /// Load KMIP keys when the service is enabled and start the periodic sync. Calling it twice
    /// doesn't start a second thread.
    pub fn init(&self) -> KmipResult<()> {
        let kmip = match self.kmip {
            Some(ref kmip) => kmip,
            None => return Ok(()),
        };
        let mut periodic = self.periodic.lock().unwrap_or_else(|e| e.into_inner());
        if periodic.is_some() {
            return Ok(());
        }
        if *kmip.config()?.enabled() {
            kmip.initialize_keys()?;
        }
        *periodic = Some(kmip.spawn_periodic(SYNC_INTERVAL)?);
        info!(self.logger, "resource manager initialised");
        Ok(())
    }

    /// Stop the periodic sync, then drop every cached count and every key held in memory.
    pub fn teardown(&self) {
        if let Some(periodic) = self.periodic.lock().unwrap_or_else(|e| e.into_inner()).take() {
            periodic.stop();
        }
        self.counts.clear();
        self.keys.clear();
        info!(self.logger, "resource manager torn down");
    }

    pub fn engine(&self) -> &Arc<dyn ZfsEngine> { &self.engine }

    pub fn query_engine(&self) -> QueryEngine { QueryEngine::new(Arc::clone(&self.engine), Arc::clone(&self.counts)) }

    pub fn encryption(&self) -> EncryptionManager {
        EncryptionManager::new(Arc::clone(&self.engine), Arc::clone(&self.dataset_locks))
    }

    pub fn snapshot_counts(&self) -> &Arc<SnapshotCountCache> { &self.counts }

    pub fn key_memory(&self) -> &Arc<KeyMemory> { &self.keys }

    pub fn kmip(&self) -> Option<&Arc<KmipSync>> { self.kmip.as_ref() }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        if let Some(periodic) = self.periodic.get_mut().unwrap_or_else(|e| e.into_inner()).take() {
            periodic.stop();
        }
    }
}
