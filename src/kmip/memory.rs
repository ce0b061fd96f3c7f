//! Keys the appliance actually uses. The server is never asked at the moment a key is needed,
//! this cache is filled on boot and kept current by every sync.
use std::{collections::HashMap,
          sync::{RwLock, RwLockReadGuard, RwLockWriteGuard}};

use secrecy::SecretString;

#[derive(Default)]
struct Keys {
    zfs:        HashMap<String, SecretString>,
    disks:      HashMap<String, SecretString>,
    global_sed: Option<SecretString>,
}

#[derive(Default)]
pub struct KeyMemory {
    keys: RwLock<Keys>,
}

impl KeyMemory {
    pub fn new() -> KeyMemory { KeyMemory::default() }

    // Every update is a single insert or assignment, a poisoned lock still holds whole maps.
    fn read(&self) -> RwLockReadGuard<'_, Keys> { self.keys.read().unwrap_or_else(|e| e.into_inner()) }

    fn write(&self) -> RwLockWriteGuard<'_, Keys> { self.keys.write().unwrap_or_else(|e| e.into_inner()) }

    pub fn zfs_key(&self, dataset: &str) -> Option<SecretString> { self.read().zfs.get(dataset).cloned() }

    pub fn set_zfs_key(&self, dataset: &str, key: SecretString) { self.write().zfs.insert(dataset.to_string(), key); }

    pub fn forget_zfs_key(&self, dataset: &str) -> Option<SecretString> { self.write().zfs.remove(dataset) }

    /// Drop keys of datasets not in `existing`.
    pub fn retain_zfs_keys<F: Fn(&str) -> bool>(&self, existing: F) {
        self.write().zfs.retain(|name, _| existing(name));
    }

    pub fn zfs_keys(&self) -> HashMap<String, SecretString> { self.read().zfs.clone() }

    pub fn disk_key(&self, identifier: &str) -> Option<SecretString> { self.read().disks.get(identifier).cloned() }

    pub fn set_disk_key(&self, identifier: &str, key: SecretString) {
        self.write().disks.insert(identifier.to_string(), key);
    }

    pub fn forget_disk_key(&self, identifier: &str) -> Option<SecretString> { self.write().disks.remove(identifier) }

    pub fn disk_keys(&self) -> HashMap<String, SecretString> { self.read().disks.clone() }

    pub fn set_disk_keys(&self, keys: HashMap<String, SecretString>) { self.write().disks = keys; }

    pub fn global_sed_key(&self) -> Option<SecretString> { self.read().global_sed.clone() }

    pub fn set_global_sed_key(&self, key: Option<SecretString>) { self.write().global_sed = key; }

    /// Forget every SED key.
    pub fn clear_sed(&self) {
        let mut keys = self.write();
        keys.disks.clear();
        keys.global_sed = None;
    }

    pub fn clear(&self) { *self.write() = Keys::default(); }
}

#[cfg(test)]
mod test {
    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn prune_and_clear() {
        let memory = KeyMemory::new();
        memory.set_zfs_key("tank/a", SecretString::from("a"));
        memory.set_zfs_key("tank/b", SecretString::from("b"));
        memory.set_disk_key("{serial}1", SecretString::from("d"));
        memory.set_global_sed_key(Some(SecretString::from("g")));
        memory.retain_zfs_keys(|name| name == "tank/b");
        assert!(memory.zfs_key("tank/a").is_none());
        assert_eq!("b", memory.zfs_key("tank/b").unwrap().expose_secret());
        memory.clear_sed();
        assert!(memory.disk_keys().is_empty());
        assert!(memory.global_sed_key().is_none());
        assert_eq!(1, memory.zfs_keys().len());
        memory.clear();
        assert!(memory.zfs_keys().is_empty());
    }
}
