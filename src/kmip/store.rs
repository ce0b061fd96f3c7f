//! Persisted key rows and the cipher protecting locally stored dataset keys.
use std::{collections::BTreeMap, sync::Mutex};

use secrecy::SecretString;

use super::{KmipConfig, KmipError, KmipResult};

/// Key of one encrypted dataset. At rest exactly one of `encryption_key` and `kmip_uid` is set
/// once a sync went through.
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
#[get = "pub"]
pub struct ZfsKeyRow {
    id:             u64,
    name:           String,
    /// Key encrypted with the local [`KeyCipher`].
    encryption_key: Option<String>,
    kmip_uid:       Option<String>,
}

impl ZfsKeyRow {
    pub fn new<N: Into<String>>(id: u64, name: N, encryption_key: Option<String>, kmip_uid: Option<String>) -> Self {
        ZfsKeyRow { id, name: name.into(), encryption_key, kmip_uid }
    }

    pub(crate) fn set_encryption_key(&mut self, key: Option<String>) { self.encryption_key = key; }

    pub(crate) fn set_kmip_uid(&mut self, uid: Option<String>) { self.kmip_uid = uid; }
}

/// SED password of one disk.
#[derive(Debug, Clone, Getters)]
#[get = "pub"]
pub struct DiskKeyRow {
    identifier: String,
    passwd:     Option<SecretString>,
    kmip_uid:   Option<String>,
}

impl DiskKeyRow {
    pub fn new<I: Into<String>>(identifier: I, passwd: Option<SecretString>, kmip_uid: Option<String>) -> Self {
        DiskKeyRow { identifier: identifier.into(), passwd, kmip_uid }
    }

    pub(crate) fn set_passwd(&mut self, passwd: Option<SecretString>) { self.passwd = passwd; }

    pub(crate) fn set_kmip_uid(&mut self, uid: Option<String>) { self.kmip_uid = uid; }
}

/// The global SED password.
#[derive(Debug, Clone, Default, Getters)]
#[get = "pub"]
pub struct GlobalSedRow {
    passwd:   Option<SecretString>,
    kmip_uid: Option<String>,
}

impl GlobalSedRow {
    pub fn new(passwd: Option<SecretString>, kmip_uid: Option<String>) -> Self { GlobalSedRow { passwd, kmip_uid } }

    pub(crate) fn set_passwd(&mut self, passwd: Option<SecretString>) { self.passwd = passwd; }

    pub(crate) fn set_kmip_uid(&mut self, uid: Option<String>) { self.kmip_uid = uid; }
}

/// Wherever the appliance keeps its configuration database.
pub trait KmipStore: Send + Sync {
    fn config(&self) -> KmipResult<KmipConfig>;

    fn save_config(&self, config: &KmipConfig) -> KmipResult<()>;

    /// Rows with the given ids, every row for `None`.
    fn zfs_rows(&self, ids: Option<&[u64]>) -> KmipResult<Vec<ZfsKeyRow>>;

    fn put_zfs_row(&self, row: &ZfsKeyRow) -> KmipResult<()>;

    fn delete_zfs_rows(&self, ids: &[u64]) -> KmipResult<()>;

    fn disk_rows(&self, ids: Option<&[String]>) -> KmipResult<Vec<DiskKeyRow>>;

    fn put_disk_row(&self, row: &DiskKeyRow) -> KmipResult<()>;

    fn global_sed(&self) -> KmipResult<GlobalSedRow>;

    fn put_global_sed(&self, row: &GlobalSedRow) -> KmipResult<()>;
}

/// Encrypts dataset keys before they hit the store.
pub trait KeyCipher: Send + Sync {
    fn encrypt(&self, key: &SecretString) -> KmipResult<String>;

    fn decrypt(&self, blob: &str) -> KmipResult<SecretString>;
}

#[derive(Default)]
struct Tables {
    config: KmipConfig,
    zfs:    BTreeMap<u64, ZfsKeyRow>,
    disks:  BTreeMap<String, DiskKeyRow>,
    global: GlobalSedRow,
}

/// Store that lives and dies with the process. Ordered by id.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore { MemoryStore::default() }

    fn tables(&self) -> KmipResult<std::sync::MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(|_| KmipError::Store(String::from("store lock poisoned")))
    }
}

impl KmipStore for MemoryStore {
    fn config(&self) -> KmipResult<KmipConfig> { Ok(self.tables()?.config.clone()) }

    fn save_config(&self, config: &KmipConfig) -> KmipResult<()> {
        self.tables()?.config = config.clone();
        Ok(())
    }

    fn zfs_rows(&self, ids: Option<&[u64]>) -> KmipResult<Vec<ZfsKeyRow>> {
        Ok(self.tables()?.zfs.values().filter(|row| ids.map_or(true, |ids| ids.contains(&row.id))).cloned().collect())
    }

    fn put_zfs_row(&self, row: &ZfsKeyRow) -> KmipResult<()> {
        self.tables()?.zfs.insert(row.id, row.clone());
        Ok(())
    }

    fn delete_zfs_rows(&self, ids: &[u64]) -> KmipResult<()> {
        let mut tables = self.tables()?;
        for id in ids {
            tables.zfs.remove(id);
        }
        Ok(())
    }

    fn disk_rows(&self, ids: Option<&[String]>) -> KmipResult<Vec<DiskKeyRow>> {
        Ok(self
            .tables()?
            .disks
            .values()
            .filter(|row| ids.map_or(true, |ids| ids.contains(&row.identifier)))
            .cloned()
            .collect())
    }

    fn put_disk_row(&self, row: &DiskKeyRow) -> KmipResult<()> {
        self.tables()?.disks.insert(row.identifier.clone(), row.clone());
        Ok(())
    }

    fn global_sed(&self) -> KmipResult<GlobalSedRow> { Ok(self.tables()?.global.clone()) }

    fn put_global_sed(&self, row: &GlobalSedRow) -> KmipResult<()> {
        self.tables()?.global = row.clone();
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::{super::config::DEFAULT_PORT, *};

    #[test]
    fn memory_store_filters_by_id() {
        let store = MemoryStore::new();
        store.put_zfs_row(&ZfsKeyRow::new(2, "tank/b", None, Some("uid-b".into()))).unwrap();
        store.put_zfs_row(&ZfsKeyRow::new(1, "tank/a", Some("blob".into()), None)).unwrap();
        let all = store.zfs_rows(None).unwrap();
        assert_eq!(vec!["tank/a", "tank/b"], all.iter().map(|r| r.name().as_str()).collect::<Vec<_>>());
        assert_eq!(1, store.zfs_rows(Some(&[2])).unwrap().len());
        store.delete_zfs_rows(&[1, 3]).unwrap();
        assert_eq!(1, store.zfs_rows(None).unwrap().len());

        store.put_disk_row(&DiskKeyRow::new("{serial}A", None, Some("uid".into()))).unwrap();
        assert!(store.disk_rows(Some(&[String::from("{serial}B")])).unwrap().is_empty());
        assert_eq!(&DEFAULT_PORT, store.config().unwrap().port());
    }
}
