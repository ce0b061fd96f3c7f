//! Dataset keys.
use std::collections::HashSet;

use secrecy::SecretString;

use crate::zfs::{DatasetRequest, KeySource, PropertySet};

use super::{client::{register_secret, retrieve_secret, revoke_and_destroy},
            KmipConfig, KmipError, KmipResult, KmipSync};

impl KmipSync {
    /// Push mode: some key is still stored locally. Pull mode: some key is still on the server.
    pub fn zfs_keys_pending_sync(&self, config: &KmipConfig) -> KmipResult<bool> {
        let push = config.pushes_zfs_keys();
        Ok(self.store.zfs_rows(None)?.iter().any(|row| {
            if push {
                row.encryption_key().is_some()
            } else {
                row.kmip_uid().is_some()
            }
        }))
    }

    fn existing_datasets(&self) -> KmipResult<HashSet<String>> {
        let request = DatasetRequest::builder()
            .recursive(true)
            .properties(PropertySet::none())
            .user_properties(false)
            .build()
            .map_err(|e| KmipError::Store(e.to_string()))?;
        Ok(self.engine.datasets(&request)?.into_iter().map(|ds| ds.name().clone()).collect())
    }

    /// Memory copy of the key of `dataset`, if ZFS still accepts it.
    fn verified_key(&self, dataset: &str) -> Option<SecretString> {
        let key = self.memory.zfs_key(dataset)?;
        match self.engine.check_key(dataset, KeySource::Secret(&key)) {
            Ok(true) => Some(key),
            Ok(false) => None,
            Err(e) => {
                debug!(self.logger, "failed to verify key in memory"; "dataset" => dataset, "error" => %e);
                None
            },
        }
    }

    /// Move locally stored keys to the server. Returns the datasets that failed.
    pub(super) fn push_zfs_keys(&self, ids: Option<&[u64]>) -> KmipResult<Vec<String>> {
        let config = self.store.config()?;
        let existing = self.existing_datasets()?;
        let conn = self.connect(&config)?;
        let mut failed = Vec::new();

        for mut row in self.store.zfs_rows(ids)?.into_iter().filter(|row| existing.contains(row.name())) {
            let blob = match row.encryption_key() {
                Some(blob) => blob.clone(),
                None => {
                    if let Some(uid) = row.kmip_uid() {
                        if self.verified_key(row.name()).is_none() {
                            match retrieve_secret(conn.as_ref(), uid) {
                                Ok(key) => self.memory.set_zfs_key(row.name(), key),
                                Err(e) => {
                                    debug!(self.logger, "failed to retrieve key"; "dataset" => row.name(), "error" => %e)
                                },
                            }
                        }
                    }
                    continue;
                },
            };

            let key = self.cipher.decrypt(&blob)?;
            self.memory.set_zfs_key(row.name(), key.clone());
            let stale_destroyed = match row.kmip_uid() {
                Some(uid) => revoke_and_destroy(conn.as_ref(), uid, row.name(), &self.logger),
                None => true,
            };
            match register_secret(conn.as_ref(), row.name(), &key) {
                Ok(uid) => {
                    row.set_encryption_key(None);
                    row.set_kmip_uid(Some(uid));
                    self.store.put_zfs_row(&row)?;
                },
                Err(e) => {
                    debug!(self.logger, "failed to push key"; "dataset" => row.name(), "error" => %e);
                    failed.push(row.name().clone());
                    if stale_destroyed && row.kmip_uid().is_some() {
                        row.set_kmip_uid(None);
                        self.store.put_zfs_row(&row)?;
                    }
                },
            }
        }
        Ok(failed)
    }

    /// Bring keys back from the server into the local store. Returns the datasets that failed.
    pub(super) fn pull_zfs_keys(&self, ids: Option<&[u64]>) -> KmipResult<Vec<String>> {
        let config = self.store.config()?;
        let existing = self.existing_datasets()?;
        let conn = self.connect(&config)?;
        let mut failed = Vec::new();

        let rows = self.store.zfs_rows(ids)?;
        for mut row in rows.into_iter().filter(|row| existing.contains(row.name())) {
            let uid = match row.kmip_uid() {
                Some(uid) => uid.clone(),
                None => continue,
            };
            let key = match self.verified_key(row.name()) {
                Some(key) => key,
                None => match retrieve_secret(conn.as_ref(), &uid) {
                    Ok(key) => key,
                    Err(e) => {
                        debug!(self.logger, "failed to pull key"; "dataset" => row.name(), "error" => %e);
                        failed.push(row.name().clone());
                        continue;
                    },
                },
            };
            row.set_encryption_key(Some(self.cipher.encrypt(&key)?));
            row.set_kmip_uid(None);
            self.store.put_zfs_row(&row)?;
            self.memory.forget_zfs_key(row.name());
            revoke_and_destroy(conn.as_ref(), &uid, row.name(), &self.logger);
        }
        self.memory.retain_zfs_keys(|name| existing.contains(name));
        Ok(failed)
    }

    pub(super) fn initialize_zfs_keys(&self, config: &KmipConfig) -> KmipResult<()> {
        let mut conn = None;
        for row in self.store.zfs_rows(None)? {
            if let Some(blob) = row.encryption_key() {
                self.memory.set_zfs_key(row.name(), self.cipher.decrypt(blob)?);
            } else if let Some(uid) = row.kmip_uid() {
                if conn.is_none() {
                    conn = match self.connect(config) {
                        Ok(conn) => Some(conn),
                        Err(e) => {
                            debug!(self.logger, "failed to retrieve key"; "dataset" => row.name(), "error" => %e);
                            continue;
                        },
                    };
                }
                if let Some(conn) = conn.as_ref() {
                    match retrieve_secret(conn.as_ref(), uid) {
                        Ok(key) => self.memory.set_zfs_key(row.name(), key),
                        Err(e) => debug!(self.logger, "failed to retrieve key"; "dataset" => row.name(), "error" => %e),
                    }
                }
            }
        }
        Ok(())
    }

    /// Drop rows whose key only the server has, in pull mode.
    pub(super) fn clear_sync_pending_zfs_keys(&self, config: &KmipConfig) -> KmipResult<()> {
        if config.pushes_zfs_keys() {
            return Ok(());
        }
        let ids: Vec<u64> =
            self.store.zfs_rows(None)?.iter().filter(|row| row.kmip_uid().is_some()).map(|row| *row.id()).collect();
        if !ids.is_empty() {
            info!(self.logger, "dropping dataset keys pending KMIP sync"; "count" => ids.len());
            self.store.delete_zfs_rows(&ids)?;
        }
        Ok(())
    }
}
