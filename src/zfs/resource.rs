//! Rows the query engine hands out.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use super::{pathext::PathExt,
            properties::{PropertyMap, PropertyValue}};

/// Kind of ZFS resource.
#[derive(AsRefStr, Display, EnumString, Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[serde(rename_all = "UPPERCASE")]
pub enum DatasetKind {
    Filesystem,
    Volume,
    Snapshot,
}

/// Filesystem or volume.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Getters)]
#[get = "pub"]
pub struct Dataset {
    id:         String,
    name:       String,
    pool:       String,
    #[serde(rename = "type")]
    kind:       DatasetKind,
    createtxg:  u64,
    guid:       u64,
    properties: PropertyMap,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    user_properties: Option<PropertyMap>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    children:   Option<Vec<Dataset>>,
    /// Keyed by full snapshot name.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    snapshots:  Option<BTreeMap<String, Snapshot>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    snapshot_count: Option<u64>,
}

impl Dataset {
    pub fn new<N: Into<String>>(
        name: N,
        kind: DatasetKind,
        createtxg: u64,
        guid: u64,
        properties: PropertyMap,
    ) -> Dataset {
        let name = name.into();
        let pool = name.get_pool().unwrap_or_default().to_string();
        Dataset {
            id: name.clone(),
            name,
            pool,
            kind,
            createtxg,
            guid,
            properties,
            user_properties: None,
            children: None,
            snapshots: None,
            snapshot_count: None,
        }
    }

    pub fn with_user_properties(mut self, user_properties: PropertyMap) -> Dataset {
        self.user_properties = Some(user_properties);
        self
    }

    pub fn property(&self, name: &str) -> Option<&PropertyValue> { self.properties.get(name) }

    pub fn properties_mut(&mut self) -> &mut PropertyMap { &mut self.properties }

    pub fn user_properties_mut(&mut self) -> &mut PropertyMap {
        self.user_properties.get_or_insert_with(PropertyMap::new)
    }

    /// Raw value of `snapshots_changed`, absent when ZFS doesn't track it.
    pub fn snapshots_changed(&self) -> Option<&str> {
        self.properties.get("snapshots_changed").map(|v| v.raw().as_str()).filter(|raw| *raw != "-")
    }

    pub fn set_snapshot_count(&mut self, count: u64) { self.snapshot_count = Some(count); }

    pub fn set_snapshots(&mut self, snapshots: BTreeMap<String, Snapshot>) {
        self.snapshots = Some(snapshots);
    }

    pub fn set_children(&mut self, children: Vec<Dataset>) { self.children = Some(children); }
}

/// `dataset@snapshot_name`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Getters)]
#[get = "pub"]
pub struct Snapshot {
    id:            String,
    name:          String,
    pool:          String,
    dataset:       String,
    snapshot_name: String,
    #[serde(rename = "type")]
    kind:          DatasetKind,
    createtxg:     u64,
    guid:          u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    properties:    Option<PropertyMap>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    user_properties: Option<PropertyMap>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    retention:     Option<serde_json::Value>,
    /// Hold tags.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    holds:         Option<Vec<String>>,
}

impl Snapshot {
    /// `None` when `name` isn't a snapshot name.
    pub fn new<N: Into<String>>(name: N, createtxg: u64, guid: u64) -> Option<Snapshot> {
        let name = name.into();
        let (dataset, snapshot_name) = {
            let snapshot_name = name.get_snapshot()?;
            (name.get_dataset().to_string(), snapshot_name.to_string())
        };
        if dataset.is_empty() || snapshot_name.is_empty() {
            return None;
        }
        Some(Snapshot {
            id: name.clone(),
            pool: name.get_pool().unwrap_or_default().to_string(),
            name,
            dataset,
            snapshot_name,
            kind: DatasetKind::Snapshot,
            createtxg,
            guid,
            properties: None,
            user_properties: None,
            retention: None,
            holds: None,
        })
    }

    pub fn with_properties(mut self, properties: PropertyMap) -> Snapshot {
        self.properties = Some(properties);
        self
    }

    pub fn with_user_properties(mut self, user_properties: PropertyMap) -> Snapshot {
        self.user_properties = Some(user_properties);
        self
    }

    pub fn set_retention(&mut self, retention: Option<serde_json::Value>) {
        self.retention = retention;
    }

    pub fn set_holds(&mut self, holds: Vec<String>) { self.holds = Some(holds); }
}

/// Row of `zfs list -p -H -t filesystem`.
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq, Getters)]
#[get = "pub"]
pub struct FilesystemEntry {
    name:       String,
    used:       u64,
    avail:      u64,
    refer:      u64,
    mountpoint: Option<String>,
}

impl FilesystemEntry {
    /// `name<TAB>used<TAB>avail<TAB>refer<TAB>mountpoint`.
    pub fn from_line(line: &str) -> Option<FilesystemEntry> {
        let mut columns = line.split('\t');
        let name = columns.next().filter(|name| !name.is_empty())?.to_string();
        let used = columns.next()?.parse().ok()?;
        let avail = columns.next()?.parse().ok()?;
        let refer = columns.next()?.parse().ok()?;
        let mountpoint = match columns.next() {
            Some("-") | Some("none") | Some("legacy") | None => None,
            Some(path) => Some(path.to_string()),
        };
        Some(FilesystemEntry { name, used, avail, refer, mountpoint })
    }
}

/// What ZFS reports about encryption of a dataset.
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq, Getters, Default)]
#[get = "pub"]
pub struct EncryptionState {
    encrypted:       bool,
    encryption_root: Option<String>,
    key_loaded:      bool,
    key_format:      Option<String>,
    key_location:    Option<String>,
}

impl EncryptionState {
    pub fn new(
        encrypted: bool,
        encryption_root: Option<String>,
        key_loaded: bool,
        key_format: Option<String>,
        key_location: Option<String>,
    ) -> EncryptionState {
        EncryptionState { encrypted, encryption_root, key_loaded, key_format, key_location }
    }

    /// From `zfs get -H -p -o property,value encryption,encryptionroot,keystatus,keyformat,keylocation`.
    pub fn from_stdout(stdout: &str) -> EncryptionState {
        let mut state = EncryptionState::default();
        for line in stdout.lines() {
            let mut columns = line.split('\t');
            let (key, value) = match (columns.next(), columns.next()) {
                (Some(key), Some(value)) => (key.trim(), value.trim()),
                _ => continue,
            };
            let value = Some(value.to_string()).filter(|v| v != "-" && v != "none");
            match key {
                "encryption" => state.encrypted = value.as_deref().map_or(false, |v| v != "off"),
                "encryptionroot" => state.encryption_root = value,
                "keystatus" => state.key_loaded = value.as_deref() == Some("available"),
                "keyformat" => state.key_format = value,
                "keylocation" => state.key_location = value,
                _ => {},
            }
        }
        state
    }

    /// Key not loaded on an encrypted dataset.
    pub fn locked(&self) -> bool { self.encrypted && !self.key_loaded }

    /// This dataset is its own encryption root.
    pub fn is_encryption_root(&self, name: &str) -> bool {
        self.encryption_root.as_deref() == Some(name)
    }
}
