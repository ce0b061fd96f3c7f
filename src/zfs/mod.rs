//! Datasets, volumes and snapshots.
//!
//! [`ZfsEngine`](trait.ZfsEngine.html) is the only thing that talks to ZFS. Everything else in
//! this module is built on top of it and can be driven by a fake engine in tests:
//!
//! - [`QueryEngine`](query/struct.QueryEngine.html) - dataset and snapshot queries with the
//!   [filter language](filters/index.html), plus `destroy`;
//! - [`SnapshotCountCache`](snapshot_count/struct.SnapshotCountCache.html) - snapshot counts keyed
//!   on dataset GUID and invalidated by `snapshots_changed`;
//! - [`EncryptionManager`](encryption/struct.EncryptionManager.html) - key load, unload, check
//!   and rotation under a per-dataset lock.
use std::{collections::{BTreeMap, HashMap},
          path::Path};

use secrecy::SecretString;
use slog::Logger;

pub mod destroy;
pub mod encryption;
pub mod filters;
pub mod open3;
pub mod properties;
pub mod query;
pub mod resource;
pub mod snapshot_count;

mod errors;
mod pathext;

pub use self::{destroy::DestroyOptions,
               encryption::{BulkResult, EncryptionManager, EncryptionSummary},
               errors::{Error, ErrorKind, Result, ValidationError, ValidationResult},
               filters::{Filter, Filters, QueryResult, Selector},
               open3::ZfsOpen3,
               pathext::PathExt,
               properties::{Parsed, PropertyMap, PropertySource, PropertyValue, SourceKind},
               query::{QueryEngine, QueryExtra, QueryOptions, RetentionSource},
               resource::{Dataset, DatasetKind, EncryptionState, FilesystemEntry, Snapshot},
               snapshot_count::SnapshotCountCache};

pub static DATASET_NAME_MAX_LENGTH: usize = 255;

/// Which native properties to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertySet {
    All,
    /// Only these. Empty means none.
    Named(Vec<String>),
}

impl Default for PropertySet {
    fn default() -> PropertySet { PropertySet::All }
}

impl PropertySet {
    pub fn none() -> PropertySet { PropertySet::Named(Vec::new()) }

    pub fn from_option(names: Option<&Vec<String>>) -> PropertySet {
        match names {
            None => PropertySet::All,
            Some(names) => PropertySet::Named(names.clone()),
        }
    }

    pub fn is_none(&self) -> bool {
        match self {
            PropertySet::All => false,
            PropertySet::Named(names) => names.is_empty(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        match self {
            PropertySet::All => true,
            PropertySet::Named(names) => names.iter().any(|n| n == name),
        }
    }
}

/// Filesystems and volumes to enumerate.
#[derive(Default, Builder, Debug, Clone, Getters, PartialEq, Eq)]
#[builder(setter(into), default)]
#[get = "pub"]
pub struct DatasetRequest {
    /// Start points. Empty means every pool.
    paths:           Vec<String>,
    /// Walk below `paths`.
    recursive:       bool,
    /// Levels below each path, only with `recursive`. `None` is unbounded.
    max_depth:       Option<usize>,
    properties:      PropertySet,
    user_properties: bool,
}

impl DatasetRequest {
    pub fn builder() -> DatasetRequestBuilder { DatasetRequestBuilder::default() }
}

/// Snapshots to enumerate.
#[derive(Default, Builder, Debug, Clone, Getters, PartialEq, Eq)]
#[builder(setter(into), default)]
#[get = "pub"]
pub struct SnapshotRequest {
    /// Datasets whose snapshots are wanted. Empty means every dataset.
    datasets:        Vec<String>,
    /// Also snapshots of descendants.
    recursive:       bool,
    properties:      PropertySet,
    user_properties: bool,
    /// Attach hold tags.
    holds:           bool,
}

impl SnapshotRequest {
    pub fn builder() -> SnapshotRequestBuilder { SnapshotRequestBuilder::default() }
}

/// Where `load-key` gets the key from.
#[derive(Debug, Clone, Copy)]
pub enum KeySource<'a> {
    /// Whatever `keylocation` says.
    Location,
    /// Key material, written to stdin.
    Secret(&'a SecretString),
    File(&'a Path),
}

/// Generic interface to ZFS. Using trait here, so it can be mocked in unit tests.
pub trait ZfsEngine: Send + Sync {
    fn logger(&self) -> &Logger;

    /// Filesystems and volumes in pre-order.
    #[cfg_attr(tarpaulin, skip)]
    fn datasets(&self, _request: &DatasetRequest) -> Result<Vec<Dataset>> { Err(Error::Unimplemented) }

    #[cfg_attr(tarpaulin, skip)]
    fn snapshots(&self, _request: &SnapshotRequest) -> Result<Vec<Snapshot>> {
        Err(Error::Unimplemented)
    }

    /// Number of snapshots per dataset name. Every requested dataset is in the result.
    #[cfg_attr(tarpaulin, skip)]
    fn snapshot_counts(&self, _datasets: &[String]) -> Result<HashMap<String, u64>> {
        Err(Error::Unimplemented)
    }

    /// `zfs list -p -H -t filesystem -s name [-r] [<path>]`.
    #[cfg_attr(tarpaulin, skip)]
    fn list_filesystems(&self, _path: Option<&str>, _recursive: bool) -> Result<Vec<FilesystemEntry>> {
        Err(Error::Unimplemented)
    }

    #[cfg_attr(tarpaulin, skip)]
    fn encryption(&self, _name: &str) -> Result<EncryptionState> { Err(Error::Unimplemented) }

    #[cfg_attr(tarpaulin, skip)]
    fn load_key(&self, _name: &str, _key: KeySource<'_>, _recursive: bool) -> Result<()> {
        Err(Error::Unimplemented)
    }

    /// Verify a key without loading it.
    #[cfg_attr(tarpaulin, skip)]
    fn check_key(&self, _name: &str, _key: KeySource<'_>) -> Result<bool> { Err(Error::Unimplemented) }

    #[cfg_attr(tarpaulin, skip)]
    fn unload_key(&self, _name: &str, _recursive: bool) -> Result<()> { Err(Error::Unimplemented) }

    /// `zfs change-key [-l] -o k=v ... <name>`.
    #[cfg_attr(tarpaulin, skip)]
    fn change_key(
        &self,
        _name: &str,
        _properties: &BTreeMap<String, String>,
        _key: Option<&SecretString>,
        _load_key: bool,
    ) -> Result<()> {
        Err(Error::Unimplemented)
    }

    /// Inherit the parent's encryption root: `zfs change-key -i [-l] <name>`.
    #[cfg_attr(tarpaulin, skip)]
    fn inherit_key(&self, _name: &str, _load_key: bool) -> Result<()> { Err(Error::Unimplemented) }

    #[cfg_attr(tarpaulin, skip)]
    fn mount(&self, _name: &str, _recursive: bool) -> Result<()> { Err(Error::Unimplemented) }

    #[cfg_attr(tarpaulin, skip)]
    fn umount(&self, _name: &str, _force: bool) -> Result<()> { Err(Error::Unimplemented) }

    /// `zfs destroy [-r] [-R] <name>`.
    #[cfg_attr(tarpaulin, skip)]
    fn destroy(&self, _name: &str, _recursive: bool, _remove_clones: bool) -> Result<()> {
        Err(Error::Unimplemented)
    }

    /// Hold tags per snapshot. Snapshots without holds may be missing from the result.
    #[cfg_attr(tarpaulin, skip)]
    fn holds(&self, _snapshots: &[String]) -> Result<BTreeMap<String, Vec<String>>> {
        Err(Error::Unimplemented)
    }

    #[cfg_attr(tarpaulin, skip)]
    fn release(&self, _snapshot: &str, _tag: &str, _recursive: bool) -> Result<()> {
        Err(Error::Unimplemented)
    }
}

pub(crate) mod validators {
    use crate::zfs::{errors::ValidationResult, ValidationError, DATASET_NAME_MAX_LENGTH};
    use std::path::PathBuf;

    fn allowed(c: char) -> bool {
        c.is_ascii_alphanumeric() || "_-.: +".contains(c)
    }

    /// `pool[/dataset...][@snapshot|#bookmark]`.
    pub fn validate_name(name: &str) -> ValidationResult {
        if name.is_empty() || name.ends_with('/') {
            return Err(ValidationError::MissingName(PathBuf::from(name)));
        }
        if name.starts_with('/') {
            return Err(ValidationError::MissingPool(PathBuf::from(name)));
        }
        if name.len() > DATASET_NAME_MAX_LENGTH {
            return Err(ValidationError::NameTooLong(PathBuf::from(name)));
        }
        let mut components = name.split('/').peekable();
        while let Some(component) = components.next() {
            let last = components.peek().is_none();
            if component.is_empty() {
                return Err(ValidationError::InvalidName(name.to_string(), "empty component"));
            }
            let mut separators = component.match_indices(|c: char| c == '@' || c == '#');
            match (separators.next(), separators.next()) {
                (None, _) => {},
                (Some(_), Some(_)) => {
                    return Err(ValidationError::InvalidName(name.to_string(), "more than one @ or #"));
                },
                (Some(_), None) if !last => {
                    return Err(ValidationError::InvalidName(
                        name.to_string(),
                        "@ and # are only allowed in the last component",
                    ));
                },
                (Some((idx, _)), None) => {
                    if idx == 0 || idx == component.len() - 1 {
                        return Err(ValidationError::InvalidName(name.to_string(), "empty snapshot or bookmark"));
                    }
                },
            }
            if component.chars().any(|c| !allowed(c) && c != '@' && c != '#') {
                return Err(ValidationError::InvalidName(name.to_string(), "invalid character"));
            }
        }
        Ok(())
    }
}
