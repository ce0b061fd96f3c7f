//! Fakes shared by integration tests.
#![allow(dead_code)]

use std::{collections::{BTreeMap, HashMap, HashSet},
          path::PathBuf,
          sync::{atomic::{AtomicBool, AtomicUsize, Ordering},
                 Mutex}};

use secrecy::{ExposeSecret, SecretString};

use zettaplane::{kmip::{Alert, AlertSink, KeyCipher, KmipClient, KmipConfig, KmipConnection, KmipError, KmipResult,
                        ManagedObject, RevocationReason},
                 slog::*,
                 zfs::{Dataset, DatasetKind, DatasetRequest, EncryptionState, Error, KeySource, PathExt, PropertyMap,
                       PropertySet, PropertySource, PropertyValue, Result, Snapshot, SnapshotRequest, SourceKind,
                       ZfsEngine}};

pub fn get_logger() -> Logger {
    let plain = slog_term::PlainSyncDecorator::new(std::io::stdout());
    Logger::root(slog_term::FullFormat::new(plain).build().fuse(), o!())
}

pub fn props(pairs: &[(&str, &str)]) -> PropertyMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), PropertyValue::new(k, v, PropertySource::new(SourceKind::Local, None))))
        .collect()
}

/// In-memory stand-in for `zfs(8)`.
pub struct FakeZfs {
    logger:          Logger,
    datasets:        Vec<Dataset>,
    keys:            HashMap<String, String>,
    loaded:          Mutex<HashSet<String>>,
    counts:          HashMap<String, u64>,
    user:            HashMap<String, PropertyMap>,
    snapshots:       Vec<Snapshot>,
    pub holds:       Mutex<BTreeMap<String, Vec<String>>>,
    pub count_calls: AtomicUsize,
    pub mounts:      Mutex<Vec<String>>,
    /// Mutating calls in the order they happened.
    pub calls:       Mutex<Vec<String>>,
    pub snapshot_requests: Mutex<Vec<SnapshotRequest>>,
}

impl FakeZfs {
    pub fn new() -> FakeZfs {
        FakeZfs {
            logger:      get_logger(),
            datasets:    Vec::new(),
            keys:        HashMap::new(),
            loaded:      Mutex::new(HashSet::new()),
            counts:      HashMap::new(),
            user:        HashMap::new(),
            snapshots:   Vec::new(),
            holds:       Mutex::new(BTreeMap::new()),
            count_calls: AtomicUsize::new(0),
            mounts:      Mutex::new(Vec::new()),
            calls:       Mutex::new(Vec::new()),
            snapshot_requests: Mutex::new(Vec::new()),
        }
    }

    pub fn filesystem(mut self, name: &str, guid: u64, properties: &[(&str, &str)]) -> FakeZfs {
        self.datasets.push(Dataset::new(name, DatasetKind::Filesystem, guid, guid, props(properties)));
        self
    }

    /// Encryption root with `key`, key not loaded.
    pub fn encrypted(mut self, name: &str, key: &str) -> FakeZfs {
        self.keys.insert(name.to_string(), key.to_string());
        self
    }

    pub fn with_snapshots(mut self, name: &str, count: u64) -> FakeZfs {
        self.counts.insert(name.to_string(), count);
        self
    }

    pub fn key_loaded(self, name: &str) -> FakeZfs {
        self.loaded.lock().unwrap().insert(name.to_string());
        self
    }

    pub fn user_property(mut self, name: &str, key: &str, value: &str) -> FakeZfs {
        self.user
            .entry(name.to_string())
            .or_default()
            .insert(key.to_string(), PropertyValue::user(value, PropertySource::new(SourceKind::Local, None)));
        self
    }

    /// `name` is `dataset@snap`, guid is the txg.
    pub fn snapshot(mut self, name: &str, createtxg: u64, holds: &[&str]) -> FakeZfs {
        self.snapshots.push(Snapshot::new(name, createtxg, createtxg).unwrap());
        if !holds.is_empty() {
            self.holds.lock().unwrap().insert(name.to_string(), holds.iter().map(|t| t.to_string()).collect());
        }
        self
    }

    pub fn is_loaded(&self, name: &str) -> bool { self.loaded.lock().unwrap().contains(name) }

    pub fn calls(&self) -> Vec<String> { self.calls.lock().unwrap().clone() }

    fn record(&self, call: String) { self.calls.lock().unwrap().push(call); }

    fn exists(&self, name: &str) -> Result<()> {
        if self.datasets.iter().any(|ds| ds.name() == name) {
            Ok(())
        } else {
            Err(Error::DatasetNotFound(PathBuf::from(name)))
        }
    }

    fn under(name: &str, path: &str, recursive: bool, max_depth: Option<usize>) -> bool {
        if name == path {
            return true;
        }
        recursive
            && name.is_descendant_of(path)
            && max_depth.map_or(true, |levels| name.depth() - path.depth() <= levels)
    }

    fn project(ds: &Dataset, set: &PropertySet) -> Dataset {
        let mut ds = ds.clone();
        if let PropertySet::Named(_) = set {
            ds.properties_mut().retain(|name, _| set.contains(name));
        }
        ds
    }
}

impl ZfsEngine for FakeZfs {
    fn logger(&self) -> &Logger { &self.logger }

    fn datasets(&self, request: &DatasetRequest) -> Result<Vec<Dataset>> {
        for path in request.paths() {
            self.exists(path)?;
        }
        Ok(self
            .datasets
            .iter()
            .filter(|ds| {
                request.paths().is_empty()
                    || request
                        .paths()
                        .iter()
                        .any(|path| FakeZfs::under(ds.name(), path, *request.recursive(), *request.max_depth()))
            })
            .map(|ds| {
                let ds = FakeZfs::project(ds, request.properties());
                if *request.user_properties() {
                    let user = self.user.get(ds.name()).cloned().unwrap_or_default();
                    ds.with_user_properties(user)
                } else {
                    ds
                }
            })
            .collect())
    }

    fn snapshots(&self, request: &SnapshotRequest) -> Result<Vec<Snapshot>> {
        self.snapshot_requests.lock().unwrap().push(request.clone());
        Ok(self
            .snapshots
            .iter()
            .filter(|s| {
                request.datasets().is_empty()
                    || request.datasets().iter().any(|ds| FakeZfs::under(s.dataset(), ds, *request.recursive(), None))
            })
            .cloned()
            .collect())
    }

    fn snapshot_counts(&self, datasets: &[String]) -> Result<HashMap<String, u64>> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        Ok(datasets.iter().map(|name| (name.clone(), self.counts.get(name).copied().unwrap_or(0))).collect())
    }

    fn encryption(&self, name: &str) -> Result<EncryptionState> {
        self.exists(name)?;
        Ok(match self.keys.get(name) {
            Some(_) => EncryptionState::new(
                true,
                Some(name.to_string()),
                self.is_loaded(name),
                Some(String::from("passphrase")),
                Some(String::from("prompt")),
            ),
            None => EncryptionState::new(false, None, false, None, None),
        })
    }

    fn load_key(&self, name: &str, key: KeySource<'_>, _recursive: bool) -> Result<()> {
        if !self.check_key(name, key)? {
            return Err(Error::BadKey(name.to_string()));
        }
        self.loaded.lock().unwrap().insert(name.to_string());
        Ok(())
    }

    fn check_key(&self, name: &str, key: KeySource<'_>) -> Result<bool> {
        let expected = self.keys.get(name).ok_or_else(|| Error::NotEncrypted(name.to_string()))?;
        match key {
            KeySource::Secret(secret) => Ok(secret.expose_secret() == expected),
            _ => Ok(false),
        }
    }

    fn mount(&self, name: &str, _recursive: bool) -> Result<()> {
        self.mounts.lock().unwrap().push(name.to_string());
        Ok(())
    }

    fn unload_key(&self, name: &str, _recursive: bool) -> Result<()> {
        self.loaded.lock().unwrap().remove(name);
        self.record(format!("unload-key {}", name));
        Ok(())
    }

    fn change_key(
        &self,
        name: &str,
        properties: &BTreeMap<String, String>,
        key: Option<&SecretString>,
        _load_key: bool,
    ) -> Result<()> {
        let props: Vec<String> = properties.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        let key = key.map_or("-", |key| key.expose_secret());
        self.record(format!("change-key {} {} {}", name, props.join(","), key));
        Ok(())
    }

    fn inherit_key(&self, name: &str, load_key: bool) -> Result<()> {
        self.record(format!("inherit-key {} {}", name, load_key));
        Ok(())
    }

    fn umount(&self, name: &str, force: bool) -> Result<()> {
        self.record(format!("umount {} {}", name, force));
        Ok(())
    }

    fn destroy(&self, name: &str, recursive: bool, remove_clones: bool) -> Result<()> {
        self.record(format!("destroy {} {} {}", name, recursive, remove_clones));
        Ok(())
    }

    fn holds(&self, snapshots: &[String]) -> Result<BTreeMap<String, Vec<String>>> {
        let holds = self.holds.lock().unwrap();
        Ok(snapshots.iter().filter_map(|name| holds.get(name).map(|tags| (name.clone(), tags.clone()))).collect())
    }

    fn release(&self, snapshot: &str, tag: &str, _recursive: bool) -> Result<()> {
        if let Some(tags) = self.holds.lock().unwrap().get_mut(snapshot) {
            tags.retain(|t| t != tag);
        }
        self.record(format!("release {} {}", snapshot, tag));
        Ok(())
    }
}

/// KMIP server living in a map. `down` makes every connection attempt fail.
#[derive(Default)]
pub struct FakeKmip {
    pub objects:  Mutex<BTreeMap<String, (String, bool)>>,
    pub revoked:  Mutex<Vec<String>>,
    pub down:     AtomicBool,
    pub connects: AtomicUsize,
    next_uid:     AtomicUsize,
}

impl FakeKmip {
    pub fn secret(&self, uid: &str) -> Option<String> {
        self.objects.lock().unwrap().get(uid).map(|(value, _)| value.clone())
    }

    pub fn len(&self) -> usize { self.objects.lock().unwrap().len() }
}

pub struct FakeSession<'a> {
    server: &'a FakeKmip,
}

impl<'a> KmipConnection for FakeSession<'a> {
    fn register(&self, _name: &str, secret: &SecretString) -> KmipResult<String> {
        let uid = format!("uid-{}", self.server.next_uid.fetch_add(1, Ordering::SeqCst));
        self.server.objects.lock().unwrap().insert(uid.clone(), (secret.expose_secret().to_string(), false));
        Ok(uid)
    }

    fn activate(&self, uid: &str) -> KmipResult<()> {
        match self.server.objects.lock().unwrap().get_mut(uid) {
            Some(object) => {
                object.1 = true;
                Ok(())
            },
            None => Err(KmipError::Operation("activate", String::from("item not found"))),
        }
    }

    fn get(&self, uid: &str) -> KmipResult<ManagedObject> {
        match self.server.objects.lock().unwrap().get(uid) {
            Some((value, _)) => Ok(ManagedObject::SecretData(SecretString::from(value.clone()))),
            None => Err(KmipError::Operation("retrieve", String::from("item not found"))),
        }
    }

    fn revoke(&self, uid: &str, reason: RevocationReason) -> KmipResult<()> {
        assert_eq!(RevocationReason::CessationOfOperation, reason);
        self.server.revoked.lock().unwrap().push(uid.to_string());
        Ok(())
    }

    fn destroy(&self, uid: &str) -> KmipResult<()> {
        match self.server.objects.lock().unwrap().remove(uid) {
            Some(_) => Ok(()),
            None => Err(KmipError::Operation("destroy", String::from("item not found"))),
        }
    }
}

/// Sessions borrow a leaked server.
pub struct FakeKmipClient {
    pub server: &'static FakeKmip,
}

impl FakeKmipClient {
    pub fn new() -> FakeKmipClient { FakeKmipClient { server: Box::leak(Box::new(FakeKmip::default())) } }
}

impl KmipClient for FakeKmipClient {
    fn connect(&self, config: &KmipConfig) -> KmipResult<Box<dyn KmipConnection>> {
        self.server.connects.fetch_add(1, Ordering::SeqCst);
        if self.server.down.load(Ordering::SeqCst) {
            return Err(KmipError::Transport(config.address(), String::from("connection refused")));
        }
        Ok(Box::new(FakeSession { server: self.server }))
    }
}

/// Reversible, not secure.
pub struct PrefixCipher;

impl KeyCipher for PrefixCipher {
    fn encrypt(&self, key: &SecretString) -> KmipResult<String> { Ok(format!("enc:{}", key.expose_secret())) }

    fn decrypt(&self, blob: &str) -> KmipResult<SecretString> {
        blob.strip_prefix("enc:")
            .map(|key| SecretString::from(key.to_string()))
            .ok_or_else(|| KmipError::Cipher(String::from("not a blob")))
    }
}

#[derive(Default)]
pub struct CollectingAlerts {
    pub alerts: Mutex<Vec<Alert>>,
}

impl CollectingAlerts {
    pub fn classes(&self) -> Vec<&'static str> { self.alerts.lock().unwrap().iter().map(Alert::klass).collect() }
}

impl AlertSink for CollectingAlerts {
    fn oneshot_create(&self, alert: Alert) { self.alerts.lock().unwrap().push(alert); }
}
