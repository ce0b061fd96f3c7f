//! SED disk passwords and the global SED password.
//!
//! The stored password always wins: when a disk row holds one, it replaces whatever the server
//! has for that disk. A row with only a uid is served from memory or fetched.
use super::{client::{register_secret, retrieve_secret, revoke_and_destroy, KmipConnection},
            KmipConfig, KmipResult, KmipSync};

/// Stands in for the global password in lists of failed disks.
pub const GLOBAL_SED_LABEL: &str = "Global SED Key";

impl KmipSync {
    /// Push mode: a password is still stored locally or a server-held one isn't in memory.
    /// Pull mode: anything still has a uid.
    pub fn sed_keys_pending_sync(&self, config: &KmipConfig) -> KmipResult<bool> {
        let push = config.pushes_sed_keys();
        for disk in self.store.disk_rows(None)? {
            if push {
                if disk.passwd().is_some()
                    || (disk.kmip_uid().is_some() && self.memory.disk_key(disk.identifier()).is_none())
                {
                    return Ok(true);
                }
            } else if disk.kmip_uid().is_some() {
                return Ok(true);
            }
        }
        let global = self.store.global_sed()?;
        Ok(if push {
            global.passwd().is_some() || (global.kmip_uid().is_some() && self.memory.global_sed_key().is_none())
        } else {
            global.kmip_uid().is_some()
        })
    }

    pub(super) fn push_sed_keys(&self, ids: Option<&[String]>) -> KmipResult<Vec<String>> {
        let config = self.store.config()?;
        let conn = self.connect(&config)?;
        let mut failed = Vec::new();

        for mut disk in self.store.disk_rows(ids)? {
            let passwd = match disk.passwd() {
                Some(passwd) => passwd.clone(),
                None => {
                    if let Some(uid) = disk.kmip_uid() {
                        match retrieve_secret(conn.as_ref(), uid) {
                            Ok(key) => self.memory.set_disk_key(disk.identifier(), key),
                            Err(e) => debug!(self.logger, "failed to retrieve SED key";
                                             "disk" => disk.identifier(), "error" => %e),
                        }
                    }
                    continue;
                },
            };

            self.memory.set_disk_key(disk.identifier(), passwd.clone());
            let stale_destroyed = match disk.kmip_uid() {
                Some(uid) => revoke_and_destroy(conn.as_ref(), uid, disk.identifier(), &self.logger),
                None => false,
            };
            match register_secret(conn.as_ref(), disk.identifier(), &passwd) {
                Ok(uid) => {
                    disk.set_passwd(None);
                    disk.set_kmip_uid(Some(uid));
                    self.store.put_disk_row(&disk)?;
                },
                Err(e) => {
                    debug!(self.logger, "failed to push SED key"; "disk" => disk.identifier(), "error" => %e);
                    failed.push(disk.identifier().clone());
                    if stale_destroyed {
                        disk.set_kmip_uid(None);
                        self.store.put_disk_row(&disk)?;
                    }
                },
            }
        }

        if let Err(e) = self.push_global_sed_key(conn.as_ref()) {
            debug!(self.logger, "failed to push global SED key"; "error" => %e);
            failed.push(String::from(GLOBAL_SED_LABEL));
        }
        Ok(failed)
    }

    fn push_global_sed_key(&self, conn: &dyn KmipConnection) -> KmipResult<()> {
        let mut global = self.store.global_sed()?;
        let passwd = match (global.passwd().clone(), global.kmip_uid().clone()) {
            (Some(passwd), _) => passwd,
            (None, Some(uid)) => {
                self.memory.set_global_sed_key(Some(retrieve_secret(conn, &uid)?));
                return Ok(());
            },
            (None, None) => return Ok(()),
        };
        if let Some(uid) = global.kmip_uid().clone() {
            revoke_and_destroy(conn, &uid, "SED Global Password", &self.logger);
            global.set_kmip_uid(None);
            self.store.put_global_sed(&global)?;
        }
        self.memory.set_global_sed_key(Some(passwd.clone()));
        let uid = register_secret(conn, "global_sed_key", &passwd)?;
        global.set_passwd(None);
        global.set_kmip_uid(Some(uid));
        self.store.put_global_sed(&global)
    }

    /// Stored password first, memory second, the server last. The server copy is removed once the
    /// password is back in the store, as long as the server can be reached.
    pub(super) fn pull_sed_keys(&self, connected: bool) -> KmipResult<Vec<String>> {
        let config = self.store.config()?;
        let conn = if connected { self.connect(&config).ok() } else { None };
        let mut failed = Vec::new();

        for mut disk in self.store.disk_rows(None)? {
            let uid = match disk.kmip_uid() {
                Some(uid) => uid.clone(),
                None => continue,
            };
            let key = match (disk.passwd(), self.memory.disk_key(disk.identifier()), conn.as_ref()) {
                (Some(passwd), ..) => Some(passwd.clone()),
                (None, Some(key), _) => Some(key),
                (None, None, Some(conn)) => retrieve_secret(conn.as_ref(), &uid).ok(),
                (None, None, None) => None,
            };
            let key = match key {
                Some(key) => key,
                None => {
                    failed.push(disk.identifier().clone());
                    continue;
                },
            };
            disk.set_passwd(Some(key));
            disk.set_kmip_uid(None);
            self.store.put_disk_row(&disk)?;
            self.memory.forget_disk_key(disk.identifier());
            if let Some(conn) = conn.as_ref() {
                revoke_and_destroy(conn.as_ref(), &uid, disk.identifier(), &self.logger);
            }
        }

        let mut global = self.store.global_sed()?;
        if let Some(uid) = global.kmip_uid().clone() {
            let key = match (global.passwd().clone(), self.memory.global_sed_key(), conn.as_ref()) {
                (Some(passwd), ..) => Some(passwd),
                (None, Some(key), _) => Some(key),
                (None, None, Some(conn)) => match retrieve_secret(conn.as_ref(), &uid) {
                    Ok(key) => Some(key),
                    Err(e) => {
                        debug!(self.logger, "failed to pull global SED key"; "error" => %e);
                        failed.push(String::from(GLOBAL_SED_LABEL));
                        None
                    },
                },
                (None, None, None) => None,
            };
            if let Some(key) = key {
                global.set_passwd(Some(key));
                global.set_kmip_uid(None);
                self.store.put_global_sed(&global)?;
                self.memory.set_global_sed_key(None);
                if let Some(conn) = conn.as_ref() {
                    revoke_and_destroy(conn.as_ref(), &uid, "SED Global Password", &self.logger);
                }
            }
        }
        Ok(failed)
    }

    pub(super) fn initialize_sed_keys(&self, config: &KmipConfig, connected: bool) -> KmipResult<()> {
        let conn = if connected { self.connect(config).ok() } else { None };
        for disk in self.store.disk_rows(None)? {
            match (disk.passwd(), disk.kmip_uid(), conn.as_ref()) {
                (Some(passwd), ..) => self.memory.set_disk_key(disk.identifier(), passwd.clone()),
                (None, Some(uid), Some(conn)) => match retrieve_secret(conn.as_ref(), uid) {
                    Ok(key) => self.memory.set_disk_key(disk.identifier(), key),
                    Err(e) => debug!(self.logger, "failed to retrieve SED disk key";
                                     "disk" => disk.identifier(), "error" => %e),
                },
                _ => {},
            }
        }
        let global = self.store.global_sed()?;
        match (global.passwd(), global.kmip_uid(), conn.as_ref()) {
            (Some(passwd), ..) => self.memory.set_global_sed_key(Some(passwd.clone())),
            (None, Some(uid), Some(conn)) => match retrieve_secret(conn.as_ref(), uid) {
                Ok(key) => self.memory.set_global_sed_key(Some(key)),
                Err(e) => debug!(self.logger, "failed to retrieve global SED key"; "error" => %e),
            },
            _ => {},
        }
        Ok(())
    }

    /// Forget every SED uid and every SED key in memory.
    pub(super) fn clear_sync_pending_sed_keys(&self) -> KmipResult<()> {
        for mut disk in self.store.disk_rows(None)? {
            if disk.kmip_uid().is_some() {
                disk.set_kmip_uid(None);
                self.store.put_disk_row(&disk)?;
            }
        }
        let mut global = self.store.global_sed()?;
        if global.kmip_uid().is_some() {
            global.set_kmip_uid(None);
            self.store.put_global_sed(&global)?;
        }
        self.memory.clear_sed();
        Ok(())
    }
}
