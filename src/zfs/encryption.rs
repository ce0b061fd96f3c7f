//! Key management for encrypted datasets.
//!
//! Every operation takes the dataset's entry in the shared [`LockTable`](../../manager/struct.LockTable.html),
//! so two key operations on the same dataset never interleave.
use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use slog::Logger;

use crate::manager::LockTable;

use super::{pathext::PathExt, properties::Parsed, DatasetRequest, Error, KeySource, PropertySet, Result,
            ValidationError, ZfsEngine};

#[derive(Deserialize, Debug, Clone, Builder, Getters)]
#[serde(default)]
#[builder(default, setter(into))]
#[get = "pub"]
pub struct LoadKeyOptions {
    /// Key material. Takes precedence over `key_file`.
    key:       Option<SecretString>,
    key_file:  Option<PathBuf>,
    /// Mount after loading.
    mount:     bool,
    recursive: bool,
}

impl Default for LoadKeyOptions {
    fn default() -> LoadKeyOptions { LoadKeyOptions { key: None, key_file: None, mount: true, recursive: false } }
}

impl LoadKeyOptions {
    pub fn builder() -> LoadKeyOptionsBuilder { LoadKeyOptionsBuilder::default() }

    fn source(&self) -> KeySource<'_> {
        match (&self.key, &self.key_file) {
            (Some(key), _) => KeySource::Secret(key),
            (None, Some(file)) => KeySource::File(file),
            (None, None) => KeySource::Location,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default, Builder, Getters)]
#[serde(default)]
#[builder(default, setter(into))]
#[get = "pub"]
pub struct CheckKeyOptions {
    /// `None` checks whatever `keylocation` points to.
    key: Option<SecretString>,
}

#[derive(Deserialize, Debug, Clone, Builder, Getters)]
#[serde(default)]
#[builder(default, setter(into))]
#[get = "pub"]
pub struct UnloadKeyOptions {
    recursive:    bool,
    force_umount: bool,
    /// Unmount mounted datasets first. Without it a mounted dataset fails the call.
    umount:       bool,
}

impl Default for UnloadKeyOptions {
    fn default() -> UnloadKeyOptions { UnloadKeyOptions { recursive: false, force_umount: false, umount: true } }
}

#[derive(Deserialize, Debug, Clone, Default, Builder, Getters)]
#[serde(default)]
#[builder(default, setter(into))]
#[get = "pub"]
pub struct ChangeKeyOptions {
    /// `keyformat`, `keylocation`, `pbkdf2iters`.
    encryption_properties: BTreeMap<String, String>,
    /// Load the current key first if it isn't.
    load_key:              bool,
    /// New key material for `keylocation=prompt`.
    key:                   Option<SecretString>,
}

#[derive(Deserialize, Debug, Clone, Default, Builder, Getters)]
#[serde(default)]
#[builder(default, setter(into))]
#[get = "pub"]
pub struct ChangeEncryptionRootOptions {
    load_key: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq, Getters)]
#[get = "pub"]
pub struct EncryptionSummary {
    encrypted:       bool,
    encryption_root: Option<String>,
    key_loaded:      bool,
    key_format:      Option<String>,
    locked:          bool,
}

/// Outcome of one row of [`bulk_process`](struct.EncryptionManager.html#method.bulk_process).
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct BulkResult {
    pub result: Value,
    pub error:  Option<String>,
}

pub struct EncryptionManager {
    engine: Arc<dyn ZfsEngine>,
    locks:  Arc<LockTable>,
    logger: Logger,
}

impl EncryptionManager {
    pub fn new(engine: Arc<dyn ZfsEngine>, locks: Arc<LockTable>) -> EncryptionManager {
        EncryptionManager { engine, locks, logger: crate::GlobalLogger::component("zfs", "encryption") }
    }

    fn lock_name(id: &str) -> String { format!("dataset_key_{}", id) }

    fn encrypted_state(&self, id: &str) -> Result<super::EncryptionState> {
        let state = self.engine.encryption(id)?;
        if !*state.encrypted() {
            return Err(Error::NotEncrypted(id.to_string()));
        }
        Ok(state)
    }

    pub fn load_key(&self, id: &str, options: &LoadKeyOptions) -> Result<()> {
        self.locks.with_lock(&Self::lock_name(id), || {
            let state = self.encrypted_state(id)?;
            if *state.key_loaded() {
                return Err(Error::KeyAlreadyLoaded(id.to_string()));
            }
            self.engine.load_key(id, options.source(), options.recursive)?;
            info!(self.logger, "key loaded"; "dataset" => id, "recursive" => options.recursive);
            if options.mount {
                self.engine.mount(id, options.recursive)?;
            }
            Ok(())
        })
    }

    /// `Ok(false)` on a wrong key.
    pub fn check_key(&self, id: &str, options: &CheckKeyOptions) -> Result<bool> {
        self.locks.with_lock(&Self::lock_name(id), || {
            self.encrypted_state(id)?;
            let source = options.key.as_ref().map_or(KeySource::Location, KeySource::Secret);
            self.engine.check_key(id, source)
        })
    }

    pub fn unload_key(&self, id: &str, options: &UnloadKeyOptions) -> Result<()> {
        self.locks.with_lock(&Self::lock_name(id), || {
            let state = self.encrypted_state(id)?;
            if !*state.key_loaded() {
                return Err(Error::KeyNotLoaded(id.to_string()));
            }
            let mut mounted = self.mounted(id)?;
            if !mounted.is_empty() {
                if !options.umount {
                    return Err(Error::DatasetBusy(PathBuf::from(id)));
                }
                mounted.sort_by(|a, b| b.depth().cmp(&a.depth()).then_with(|| b.cmp(a)));
                for name in &mounted {
                    debug!(self.logger, "unmounting"; "dataset" => name, "force" => options.force_umount);
                    self.engine.umount(name, options.force_umount)?;
                }
            }
            self.engine.unload_key(id, options.recursive)?;
            info!(self.logger, "key unloaded"; "dataset" => id, "recursive" => options.recursive);
            Ok(())
        })
    }

    pub fn change_key(&self, id: &str, options: &ChangeKeyOptions) -> Result<()> {
        self.locks.with_lock(&Self::lock_name(id), || {
            self.encrypted_state(id)?;
            self.engine.change_key(id, &options.encryption_properties, options.key.as_ref(), options.load_key)?;
            info!(self.logger, "key changed"; "dataset" => id);
            Ok(())
        })
    }

    /// Make `id` inherit the key of its parent's encryption root.
    pub fn change_encryption_root(&self, id: &str, options: &ChangeEncryptionRootOptions) -> Result<()> {
        self.locks.with_lock(&Self::lock_name(id), || {
            self.encrypted_state(id)?;
            let parent = id
                .get_parent()
                .ok_or_else(|| ValidationError::BadArgument(format!("{} has no parent to inherit from", id)))?;
            self.encrypted_state(parent)?;
            self.engine.inherit_key(id, options.load_key)?;
            info!(self.logger, "encryption root changed"; "dataset" => id, "parent" => parent);
            Ok(())
        })
    }

    pub fn encryption_summary(&self, id: &str) -> Result<EncryptionSummary> {
        let state = self.engine.encryption(id)?;
        Ok(EncryptionSummary {
            encrypted:       *state.encrypted(),
            encryption_root: state.encryption_root().clone(),
            key_loaded:      *state.key_loaded(),
            key_format:      state.key_format().clone(),
            locked:          state.locked(),
        })
    }

    /// Run `method` once per row of `[id, options]` arguments. A failing row never stops the rest.
    pub fn bulk_process(&self, method: &str, rows: &[Value]) -> Result<Vec<BulkResult>> {
        match method {
            "load_key" | "check_key" | "unload_key" | "change_key" | "change_encryption_root" => {},
            _ => return Err(ValidationError::BadArgument(format!("{} can't be run in bulk", method)).into()),
        }
        Ok(rows
            .iter()
            .map(|args| match self.dispatch(method, args) {
                Ok(result) => BulkResult { result, error: None },
                Err(e) => {
                    debug!(self.logger, "bulk row failed"; "method" => method, "error" => %e);
                    BulkResult { result: Value::Null, error: Some(e.to_string()) }
                },
            })
            .collect())
    }

    fn dispatch(&self, method: &str, args: &Value) -> Result<Value> {
        let id = args
            .get(0)
            .and_then(Value::as_str)
            .ok_or_else(|| ValidationError::BadArgument(String::from("first argument must be a dataset name")))?;
        let options = args.get(1).cloned().unwrap_or(Value::Null);
        let options = if options.is_null() { Value::Object(Default::default()) } else { options };
        match method {
            "load_key" => self.load_key(id, &serde_json::from_value(options)?).map(|_| Value::Null),
            "check_key" => self.check_key(id, &serde_json::from_value(options)?).map(Value::Bool),
            "unload_key" => self.unload_key(id, &serde_json::from_value(options)?).map(|_| Value::Null),
            "change_key" => self.change_key(id, &serde_json::from_value(options)?).map(|_| Value::Null),
            _ => self.change_encryption_root(id, &serde_json::from_value(options)?).map(|_| Value::Null),
        }
    }

    /// Mounted datasets at or below `id`.
    fn mounted(&self, id: &str) -> Result<Vec<String>> {
        let request = DatasetRequest::builder()
            .paths(vec![id.to_string()])
            .recursive(true)
            .properties(PropertySet::Named(vec![String::from("mounted")]))
            .build()
            .map_err(|_| Error::Unknown)?;
        Ok(self
            .engine
            .datasets(&request)?
            .into_iter()
            .filter(|ds| ds.property("mounted").map_or(false, |p| *p.parsed() == Parsed::Bool(true)))
            .map(|ds| ds.name().clone())
            .collect())
    }
}
