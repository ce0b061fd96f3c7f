use std::{collections::HashMap,
          sync::{mpsc, Arc},
          thread,
          time::Duration};

use secrecy::SecretString;
use serde::Deserialize;
use slog::Logger;

use crate::{manager::LockTable, zfs::ZfsEngine};

use super::{client::{revoke_and_destroy, KmipConnection},
            Alert, AlertSink, ConfigError, KeyCipher, KeyMemory, KmipClient, KmipConfig, KmipConfigUpdate, KmipError,
            KmipResult, KmipStore};

/// How often the background task reconciles keys.
pub const SYNC_INTERVAL: Duration = Duration::from_secs(86_400);

const SYNC_LOCK: &str = "sync_kmip_keys";
const INITIALIZE_LOCK: &str = "initialize_kmip_keys";

/// Snapshot of the SED keys held in memory.
#[derive(Debug, Clone, Default)]
pub struct SedKeys {
    pub global_password: Option<SecretString>,
    pub sed_disks_keys:  HashMap<String, SecretString>,
}

/// Replace what's in memory. Absent fields stay as they are.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct SedKeysUpdate {
    pub global_password: Option<SecretString>,
    pub sed_disks_keys:  Option<HashMap<String, SecretString>>,
}

/// Reconciles locally stored keys with the KMIP server.
///
/// Each sync runs in one direction: when the server manages a kind of key, keys are pushed to it
/// and removed from the local store; when it doesn't, they're pulled back and removed from the
/// server. Rows that fail are reported through the [`AlertSink`] and retried on the next sync.
pub struct KmipSync {
    pub(super) store:  Arc<dyn KmipStore>,
    pub(super) client: Arc<dyn KmipClient>,
    pub(super) cipher: Arc<dyn KeyCipher>,
    pub(super) engine: Arc<dyn ZfsEngine>,
    pub(super) alerts: Arc<dyn AlertSink>,
    pub(super) memory: Arc<KeyMemory>,
    pub(super) locks:  Arc<LockTable>,
    pub(super) logger: Logger,
}

impl KmipSync {
    pub fn new(
        store: Arc<dyn KmipStore>,
        client: Arc<dyn KmipClient>,
        cipher: Arc<dyn KeyCipher>,
        engine: Arc<dyn ZfsEngine>,
        alerts: Arc<dyn AlertSink>,
        memory: Arc<KeyMemory>,
        locks: Arc<LockTable>,
    ) -> KmipSync {
        KmipSync {
            store,
            client,
            cipher,
            engine,
            alerts,
            memory,
            locks,
            logger: crate::GlobalLogger::component("kmip", "sync"),
        }
    }

    pub fn config(&self) -> KmipResult<KmipConfig> { self.store.config() }

    pub fn memory(&self) -> &Arc<KeyMemory> { &self.memory }

    pub(super) fn connect(&self, config: &KmipConfig) -> KmipResult<Box<dyn KmipConnection>> {
        self.client.connect(config)
    }

    /// Probe the server described by `config`, or by the stored configuration.
    pub fn test_connection(&self, config: Option<&KmipConfig>) -> KmipResult<()> {
        match config {
            Some(config) => self.client.test_connection(config),
            None => self.client.test_connection(&self.store.config()?),
        }
    }

    /// Like [`test_connection`](#method.test_connection), raising `KMIPConnectionFailed` on failure.
    pub fn test_connection_and_alert(&self) -> KmipResult<bool> {
        let config = self.store.config()?;
        match self.client.test_connection(&config) {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!(self.logger, "KMIP server unreachable"; "server" => config.address(), "error" => %e);
                self.alerts.oneshot_create(Alert::ConnectionFailed {
                    server: config.server().clone().unwrap_or_default(),
                    error:  e.to_string(),
                });
                Ok(false)
            },
        }
    }

    /// Anything waiting to be pushed or pulled.
    pub fn sync_pending(&self) -> KmipResult<bool> {
        let config = self.store.config()?;
        Ok(self.zfs_keys_pending_sync(&config)? || self.sed_keys_pending_sync(&config)?)
    }

    /// Periodic entry point. Does nothing unless something is pending and the server answers.
    pub fn sync_keys(&self) -> KmipResult<()> {
        self.locks.with_lock(SYNC_LOCK, || {
            if !self.sync_pending()? || !self.test_connection_and_alert()? {
                return Ok(());
            }
            self.sync_zfs_keys(None)?;
            self.sync_sed_keys(None)?;
            Ok(())
        })
    }

    /// Push or pull dataset keys. Returns the datasets that failed.
    pub fn sync_zfs_keys(&self, ids: Option<&[u64]>) -> KmipResult<Vec<String>> {
        self.locks.with_lock(&format!("sync_zfs_keys_{:?}", ids), || {
            let config = self.store.config()?;
            if !self.zfs_keys_pending_sync(&config)? || !self.test_connection_and_alert()? {
                return Ok(Vec::new());
            }
            let failed = if config.pushes_zfs_keys() { self.push_zfs_keys(ids)? } else { self.pull_zfs_keys(ids)? };
            if !failed.is_empty() {
                warn!(self.logger, "dataset keys failed to sync"; "datasets" => failed.join(","));
                self.alerts.oneshot_create(Alert::ZfsDatasetsSyncFailure { datasets: failed.clone() });
            }
            Ok(failed)
        })
    }

    /// Push or pull SED keys. Returns the disks that failed, `Global SED Key` standing in for the
    /// global password.
    pub fn sync_sed_keys(&self, ids: Option<&[String]>) -> KmipResult<Vec<String>> {
        self.locks.with_lock(&format!("kmip_sync_sed_keys_{:?}", ids), || {
            let config = self.store.config()?;
            if !self.sed_keys_pending_sync(&config)? {
                return Ok(Vec::new());
            }
            let connected = self.test_connection_and_alert()?;
            let failed = if config.pushes_sed_keys() {
                if !connected {
                    return Ok(Vec::new());
                }
                self.push_sed_keys(ids)?
            } else {
                self.pull_sed_keys(connected)?
            };
            let disks: Vec<String> = failed.iter().filter(|name| *name != super::sed::GLOBAL_SED_LABEL).cloned().collect();
            if disks.len() != failed.len() {
                self.alerts.oneshot_create(Alert::SedGlobalPasswordSyncFailure);
            }
            if !disks.is_empty() {
                warn!(self.logger, "SED keys failed to sync"; "disks" => disks.join(","));
                self.alerts.oneshot_create(Alert::SedDisksSyncFailure { disks });
            }
            Ok(failed)
        })
    }

    /// Give up on keys that can only be pulled from a server that's gone for good.
    pub fn clear_sync_pending_keys(&self) -> KmipResult<()> {
        let config = self.store.config()?;
        self.clear_sync_pending_zfs_keys(&config)?;
        self.clear_sync_pending_sed_keys()
    }

    /// Fill memory with every key the server manages.
    pub fn initialize_keys(&self) -> KmipResult<()> {
        self.locks.with_lock(INITIALIZE_LOCK, || {
            let config = self.store.config()?;
            if *config.manage_zfs_keys() {
                self.initialize_zfs_keys(&config)?;
            }
            let connected = self.client.test_connection(&config).is_ok();
            self.initialize_sed_keys(&config, connected)
        })
    }

    pub fn retrieve_zfs_keys(&self) -> HashMap<String, SecretString> { self.memory.zfs_keys() }

    pub fn sed_keys(&self) -> SedKeys {
        SedKeys { global_password: self.memory.global_sed_key(), sed_disks_keys: self.memory.disk_keys() }
    }

    pub fn update_sed_keys(&self, update: SedKeysUpdate) {
        if let Some(global) = update.global_password {
            self.memory.set_global_sed_key(Some(global));
        }
        if let Some(disks) = update.sed_disks_keys {
            self.memory.set_disk_keys(disks);
        }
    }

    /// Forget the global SED password and, best effort, remove it from the server.
    pub fn reset_sed_global_password(&self, kmip_uid: Option<&str>) {
        self.memory.set_global_sed_key(None);
        if let Some(uid) = kmip_uid {
            if let Err(e) = self.delete_secret(uid, "SED Global Password") {
                debug!(self.logger, "failed to remove SED global password from KMIP server"; "error" => %e);
            }
        }
    }

    pub fn reset_sed_disk_password(&self, disk: &str, kmip_uid: Option<&str>) {
        self.memory.forget_disk_key(disk);
        if let Some(uid) = kmip_uid {
            if let Err(e) = self.delete_secret(uid, disk) {
                debug!(self.logger, "failed to remove SED password from KMIP server"; "disk" => disk, "error" => %e);
            }
        }
    }

    /// Revoke and destroy `uid` in a session of its own.
    pub fn delete_secret(&self, uid: &str, label: &str) -> KmipResult<bool> {
        let conn = self.connect(&self.store.config()?)?;
        Ok(revoke_and_destroy(conn.as_ref(), uid, label, &self.logger))
    }

    /// Validate and save `update`. Enabling the service loads keys, any toggle starts a sync.
    pub fn update_config(&self, update: &KmipConfigUpdate) -> KmipResult<KmipConfig> {
        let old = self.store.config()?;
        let new = old.merged(update);
        let mut errors = Vec::new();

        if new.server().as_deref().map_or(true, str::is_empty) {
            errors.push(ConfigError::new("server", "Please specify a valid hostname or an IPv4 address"));
        }
        if new.certificate().is_none() {
            errors.push(ConfigError::new("certificate", "Please specify a valid id."));
        }
        if new.certificate_authority().is_none() {
            errors.push(ConfigError::new("certificate_authority", "Please specify a valid id."));
        }
        if *update.validate() && *new.enabled() && errors.is_empty() {
            if let Err(e) = self.client.test_connection(&new) {
                errors.push(ConfigError::new("server", format!("Unable to connect to KMIP server: {}.", e)));
            }
        }
        let sync_error = "KMIP sync is pending, please make sure database and KMIP server are in sync before \
                          proceeding with this operation.";
        if old.enabled() != new.enabled() && self.sync_pending()? {
            errors.push(ConfigError::new("enabled", sync_error));
        } else if old.manage_zfs_keys() != new.manage_zfs_keys() && self.zfs_keys_pending_sync(&old)? {
            errors.push(ConfigError::new("manage_zfs_keys", sync_error));
        }
        if !errors.is_empty() {
            return Err(KmipError::InvalidConfig(errors));
        }

        self.store.save_config(&new)?;
        info!(self.logger, "KMIP configuration updated"; "server" => new.address(), "enabled" => *new.enabled());
        if *new.enabled() && !*old.enabled() {
            self.initialize_keys()?;
        }
        if old.enabled() != new.enabled()
            || old.manage_zfs_keys() != new.manage_zfs_keys()
            || old.manage_sed_disks() != new.manage_sed_disks()
        {
            self.sync_keys()?;
        }
        Ok(new)
    }

    /// Run [`sync_keys`](#method.sync_keys) every `interval` on a thread of its own until the
    /// returned handle is stopped or dropped.
    pub fn spawn_periodic(self: &Arc<Self>, interval: Duration) -> std::io::Result<PeriodicSync> {
        let (stop, stopped) = mpsc::channel::<()>();
        let sync = Arc::clone(self);
        let handle = thread::Builder::new().name(String::from("kmip-sync")).spawn(move || loop {
            match stopped.recv_timeout(interval) {
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if let Err(e) = sync.sync_keys() {
                        warn!(sync.logger, "periodic KMIP sync failed"; "error" => %e);
                    }
                },
                Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        })?;
        Ok(PeriodicSync { stop: Some(stop), handle: Some(handle) })
    }
}

/// Handle of the periodic sync thread.
pub struct PeriodicSync {
    stop:   Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl PeriodicSync {
    /// Stop and wait for a sync that's already running.
    pub fn stop(mut self) { self.shutdown(); }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PeriodicSync {
    fn drop(&mut self) { self.shutdown(); }
}
