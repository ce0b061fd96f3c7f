//! Open3 implementation of [`ZfsEngine`](../trait.ZfsEngine.html).
//!
//! Easy way - [`ZfsOpen3::default()`](struct.ZfsOpen3.html#impl-Default). It goes through a
//! default [`Open3Gateway`](../../gateway/struct.Open3Gateway.html), which looks for `ZFS_CMD` in
//! current environment and falls back to `zfs` in `PATH`.
//!
//! Everything is read with `zfs get -H -p -o name,property,value,source`, so values are exact and
//! the source of every property is known. Key material only ever goes to `zfs` on stdin.
//!
//! ### Usage
//! ```rust,no_run
//! use zettaplane::zfs::{DatasetRequest, ZfsEngine, ZfsOpen3};
//! let engine = ZfsOpen3::default();
//!
//! let request = DatasetRequest::builder().paths(vec![String::from("tank")]).recursive(true).build().unwrap();
//! for ds in engine.datasets(&request).unwrap() {
//!     println!("{} {}", ds.name(), ds.kind());
//! }
//! ```
use std::{collections::{BTreeMap, HashMap},
          sync::Arc};

use secrecy::{ExposeSecret, SecretString};
use slog::Logger;

use crate::gateway::{CommandOutput, CommandRunner, Open3Gateway, Program};

use super::{pathext::PathExt,
            properties::{self, PropertyMap},
            DatasetRequest, Error, ErrorKind, KeySource, PropertySet, Result, SnapshotRequest, ZfsEngine};
use super::resource::{Dataset, DatasetKind, EncryptionState, FilesystemEntry, Snapshot};

/// Always fetched, they make up the identity of a row.
static IDENTITY: &[&str] = &["type", "createtxg", "guid"];

static ENCRYPTION_PROPERTIES: &str = "encryption,encryptionroot,keystatus,keyformat,keylocation";

pub struct ZfsOpen3 {
    gateway: Arc<dyn CommandRunner>,
    logger:  Logger,
}

impl Default for ZfsOpen3 {
    fn default() -> ZfsOpen3 { ZfsOpen3::with_gateway(Arc::new(Open3Gateway::default())) }
}

impl ZfsOpen3 {
    /// Run commands through supplied gateway.
    pub fn with_gateway(gateway: Arc<dyn CommandRunner>) -> ZfsOpen3 {
        ZfsOpen3 { gateway, logger: crate::GlobalLogger::component("zfs", "open3") }
    }

    fn zfs(&self, args: &[&str]) -> Result<CommandOutput> { self.zfs_with_input(args, None) }

    fn zfs_with_input(&self, args: &[&str], input: Option<&SecretString>) -> Result<CommandOutput> {
        let out = self.gateway.run_with_input(
            Program::Zfs,
            args,
            input.map(|secret| secret.expose_secret().as_bytes()),
        )?;
        if out.success() {
            Ok(out)
        } else {
            debug!(self.logger, "zfs failed"; "returncode" => out.returncode(), "stderr" => out.stderr());
            Err(Error::from_stderr(out.stderr()))
        }
    }

    /// `zfs get` over `-t <types>` and split the output into rows.
    fn get(
        &self,
        types: &str,
        depth: Depth,
        set: &PropertySet,
        user_properties: bool,
        names: &[String],
    ) -> Result<Vec<(String, PropertyMap, PropertyMap)>> {
        let (list, wanted) = property_list(set, user_properties);
        let depth_arg = depth.arg();
        let mut args: Vec<&str> = vec!["get", "-H", "-p", "-o", "name,property,value,source", "-t", types];
        if let Some(flag) = depth_arg.as_deref() {
            args.push(flag);
        }
        args.push(&list);
        args.extend(names.iter().map(String::as_str));

        let out = self.zfs(&args)?;
        let mut rows = properties::parse_get_output(out.stdout());
        for (_, native, user) in rows.iter_mut() {
            if let Some(wanted) = &wanted {
                native.retain(|key, _| IDENTITY.contains(&key.as_str()) || wanted.iter().any(|w| w == key));
            }
            if !user_properties {
                user.clear();
            }
        }
        Ok(rows)
    }
}

/// How far `zfs get` walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Depth {
    Exact,
    Levels(usize),
    Recursive,
}

impl Depth {
    fn arg(self) -> Option<String> {
        match self {
            Depth::Exact => None,
            Depth::Levels(levels) => Some(format!("-d{}", levels)),
            Depth::Recursive => Some(String::from("-r")),
        }
    }
}

/// Property list for `zfs get` and, for explicit lists, the published names to keep.
fn property_list(set: &PropertySet, user_properties: bool) -> (String, Option<Vec<String>>) {
    match set {
        PropertySet::All => (String::from("all"), None),
        PropertySet::Named(names) => {
            let wanted: Vec<String> = names.clone();
            if user_properties {
                return (String::from("all"), Some(wanted));
            }
            let mut native: Vec<&str> = IDENTITY.to_vec();
            for name in names {
                let name = properties::native_name(name);
                if !native.contains(&name) {
                    native.push(name);
                }
            }
            (native.join(","), Some(wanted))
        },
    }
}

/// `type`, `createtxg` and `guid` of a row.
fn identity(native: &PropertyMap) -> (Option<DatasetKind>, u64, u64) {
    let value = |key: &str| native.get(key).map(|v| v.raw().as_str());
    let kind = value("type").and_then(|raw| raw.parse::<DatasetKind>().ok());
    let createtxg = value("createtxg").and_then(|raw| raw.parse().ok()).unwrap_or(0);
    let guid = value("guid").and_then(|raw| raw.parse().ok()).unwrap_or(0);
    (kind, createtxg, guid)
}

/// Drop identity properties nobody asked for.
fn strip_identity(native: &mut PropertyMap, set: &PropertySet) {
    if let PropertySet::Named(names) = set {
        for key in IDENTITY {
            if !names.iter().any(|n| n == key) {
                native.remove(*key);
            }
        }
    }
}

fn user_map(user: PropertyMap, wanted: bool) -> Option<PropertyMap> {
    if wanted {
        Some(user)
    } else {
        None
    }
}

impl ZfsEngine for ZfsOpen3 {
    fn logger(&self) -> &Logger { &self.logger }

    fn datasets(&self, request: &DatasetRequest) -> Result<Vec<Dataset>> {
        let depth = match (request.recursive(), request.max_depth()) {
            (false, _) => Depth::Exact,
            (true, Some(levels)) => Depth::Levels(*levels),
            (true, None) => Depth::Recursive,
        };
        let depth = if request.paths().is_empty() { Depth::Exact } else { depth };
        let rows = self.get(
            "filesystem,volume",
            depth,
            request.properties(),
            *request.user_properties(),
            request.paths(),
        )?;
        let mut datasets = Vec::with_capacity(rows.len());
        for (name, mut native, user) in rows {
            let (kind, createtxg, guid) = match identity(&native) {
                (Some(kind), createtxg, guid) => (kind, createtxg, guid),
                (None, ..) => continue,
            };
            strip_identity(&mut native, request.properties());
            let mut ds = Dataset::new(name, kind, createtxg, guid, native);
            if let Some(user) = user_map(user, *request.user_properties()) {
                ds = ds.with_user_properties(user);
            }
            datasets.push(ds);
        }
        Ok(datasets)
    }

    fn snapshots(&self, request: &SnapshotRequest) -> Result<Vec<Snapshot>> {
        let depth = match (request.datasets().is_empty(), request.recursive()) {
            (true, _) => Depth::Exact,
            (false, true) => Depth::Recursive,
            (false, false) => Depth::Levels(1),
        };
        let rows = self.get("snapshot", depth, request.properties(), *request.user_properties(), request.datasets())?;
        let mut snapshots = Vec::with_capacity(rows.len());
        for (name, mut native, user) in rows {
            let (_, createtxg, guid) = identity(&native);
            strip_identity(&mut native, request.properties());
            let mut snapshot = match Snapshot::new(name, createtxg, guid) {
                Some(snapshot) => snapshot,
                None => continue,
            };
            if !request.properties().is_none() {
                snapshot = snapshot.with_properties(native);
            }
            if let Some(user) = user_map(user, *request.user_properties()) {
                snapshot = snapshot.with_user_properties(user);
            }
            snapshots.push(snapshot);
        }

        if *request.holds() && !snapshots.is_empty() {
            let names: Vec<String> = snapshots.iter().map(|s| s.name().clone()).collect();
            let mut holds = self.holds(&names)?;
            for snapshot in snapshots.iter_mut() {
                snapshot.set_holds(holds.remove(snapshot.name()).unwrap_or_default());
            }
        }
        Ok(snapshots)
    }

    fn snapshot_counts(&self, datasets: &[String]) -> Result<HashMap<String, u64>> {
        let mut counts: HashMap<String, u64> = datasets.iter().map(|name| (name.clone(), 0)).collect();
        if datasets.is_empty() {
            return Ok(counts);
        }
        let mut args = vec!["list", "-H", "-p", "-o", "name", "-t", "snapshot", "-d", "1"];
        args.extend(datasets.iter().map(String::as_str));
        let out = self.zfs(&args)?;
        for line in out.stdout().lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some(count) = counts.get_mut(line.get_dataset()) {
                *count += 1;
            }
        }
        Ok(counts)
    }

    fn list_filesystems(&self, path: Option<&str>, recursive: bool) -> Result<Vec<FilesystemEntry>> {
        let mut args = vec!["list", "-p", "-H", "-t", "filesystem", "-s", "name"];
        if recursive {
            args.push("-r");
        }
        if let Some(path) = path {
            args.push(path);
        }
        let out = self.zfs(&args)?;
        Ok(out.stdout().lines().filter_map(FilesystemEntry::from_line).collect())
    }

    fn encryption(&self, name: &str) -> Result<EncryptionState> {
        let out = self.zfs(&["get", "-H", "-p", "-o", "property,value", ENCRYPTION_PROPERTIES, name])?;
        Ok(EncryptionState::from_stdout(out.stdout()))
    }

    fn load_key(&self, name: &str, key: KeySource<'_>, recursive: bool) -> Result<()> {
        let location = key_location(&key);
        let mut args = vec!["load-key"];
        if recursive {
            args.push("-r");
        }
        if let Some(location) = location.as_deref() {
            args.push("-L");
            args.push(location);
        }
        args.push(name);
        self.zfs_with_input(&args, secret(&key)).map(|_| ())
    }

    fn check_key(&self, name: &str, key: KeySource<'_>) -> Result<bool> {
        let location = key_location(&key);
        let mut args = vec!["load-key", "-n"];
        if let Some(location) = location.as_deref() {
            args.push("-L");
            args.push(location);
        }
        args.push(name);
        match self.zfs_with_input(&args, secret(&key)) {
            Ok(_) => Ok(true),
            Err(ref e) if e.kind() == ErrorKind::BadKey => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn unload_key(&self, name: &str, recursive: bool) -> Result<()> {
        let mut args = vec!["unload-key"];
        if recursive {
            args.push("-r");
        }
        args.push(name);
        self.zfs(&args).map(|_| ())
    }

    fn change_key(
        &self,
        name: &str,
        properties: &BTreeMap<String, String>,
        key: Option<&SecretString>,
        load_key: bool,
    ) -> Result<()> {
        let pairs: Vec<String> = properties.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        let mut args = vec!["change-key"];
        if load_key {
            args.push("-l");
        }
        for pair in &pairs {
            args.push("-o");
            args.push(pair);
        }
        args.push(name);
        self.zfs_with_input(&args, key).map(|_| ())
    }

    fn inherit_key(&self, name: &str, load_key: bool) -> Result<()> {
        let mut args = vec!["change-key", "-i"];
        if load_key {
            args.push("-l");
        }
        args.push(name);
        self.zfs(&args).map(|_| ())
    }

    fn mount(&self, name: &str, recursive: bool) -> Result<()> {
        let mut args = vec!["mount"];
        if recursive {
            args.push("-R");
        }
        args.push(name);
        self.zfs(&args).map(|_| ())
    }

    fn umount(&self, name: &str, force: bool) -> Result<()> {
        let mut args = vec!["umount"];
        if force {
            args.push("-f");
        }
        args.push(name);
        self.zfs(&args).map(|_| ())
    }

    fn destroy(&self, name: &str, recursive: bool, remove_clones: bool) -> Result<()> {
        let mut args = vec!["destroy"];
        if recursive {
            args.push("-r");
        }
        if remove_clones {
            args.push("-R");
        }
        args.push(name);
        self.zfs(&args).map(|_| ())
    }

    fn holds(&self, snapshots: &[String]) -> Result<BTreeMap<String, Vec<String>>> {
        let mut holds: BTreeMap<String, Vec<String>> = BTreeMap::new();
        if snapshots.is_empty() {
            return Ok(holds);
        }
        let mut args = vec!["holds", "-H"];
        args.extend(snapshots.iter().map(String::as_str));
        let out = self.zfs(&args)?;
        for line in out.stdout().lines() {
            let mut columns = line.split('\t');
            if let (Some(snapshot), Some(tag)) = (columns.next(), columns.next()) {
                holds.entry(snapshot.trim().to_string()).or_default().push(tag.trim().to_string());
            }
        }
        Ok(holds)
    }

    fn release(&self, snapshot: &str, tag: &str, recursive: bool) -> Result<()> {
        let mut args = vec!["release"];
        if recursive {
            args.push("-r");
        }
        args.push(tag);
        args.push(snapshot);
        self.zfs(&args).map(|_| ())
    }
}

/// `-L` argument for anything other than the dataset's own `keylocation`.
fn key_location(key: &KeySource<'_>) -> Option<String> {
    match key {
        KeySource::Location => None,
        KeySource::Secret(_) => Some(String::from("prompt")),
        KeySource::File(path) => Some(format!("file://{}", path.display())),
    }
}

fn secret<'a>(key: &KeySource<'a>) -> Option<&'a SecretString> {
    match key {
        KeySource::Secret(secret) => Some(*secret),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use std::{io, path::Path, sync::Mutex, time::Duration};

    use super::*;
    use crate::zfs::{properties::Parsed, DatasetRequest, SnapshotRequest};

    /// Replays canned output and remembers argv and stdin.
    #[derive(Default)]
    struct Scripted {
        calls: Mutex<Vec<(Vec<String>, Option<String>)>>,
    }

    impl CommandRunner for Scripted {
        fn run_with_input(&self, program: Program, args: &[&str], input: Option<&[u8]>) -> io::Result<CommandOutput> {
            assert_eq!(Program::Zfs, program);
            let input = input.map(|bytes| String::from_utf8_lossy(bytes).into_owned());
            self.calls.lock().unwrap().push((args.iter().map(|a| a.to_string()).collect(), input.clone()));
            let (stdout, stderr, code) = match args[0] {
                "get" if args.contains(&"snapshot") => (
                    "tank/a@one\ttype\tsnapshot\t-\ntank/a@one\tcreatetxg\t10\t-\ntank/a@one\tguid\t11\t-\n\
                     tank/a@one\tused\t0\t-\n",
                    "",
                    0,
                ),
                "get" if args.contains(&"property,value") => (
                    "encryption\taes-256-gcm\nencryptionroot\ttank/a\nkeystatus\tavailable\n",
                    "",
                    0,
                ),
                "get" if args.last() == Some(&"missing") => {
                    ("", "cannot open 'missing': dataset does not exist\n", 1)
                },
                "get" => (
                    "tank\ttype\tfilesystem\t-\ntank\tcreatetxg\t1\t-\ntank\tguid\t100\t-\n\
                     tank\tused\t4096\t-\ntank\tdedup\toff\tdefault\n\
                     tank/vol\ttype\tvolume\t-\ntank/vol\tcreatetxg\t5\t-\ntank/vol\tguid\t200\t-\n\
                     tank/vol\tused\t1024\t-\ntank/vol\torg.freenas:description\tscratch\tlocal\n",
                    "",
                    0,
                ),
                "list" if args.contains(&"snapshot") => ("tank/a@one\ntank/a@two\ntank/b@x\n", "", 0),
                "holds" => ("tank/a@one\tkeep\tWed Jan 1 00:00 2025\n", "", 0),
                "load-key" if input.as_deref() == Some("wrong") => {
                    ("", "Key load error: Incorrect key provided for 'tank/a'.\n", 255)
                },
                _ => ("", "", 0),
            };
            Ok(CommandOutput::new(program, stdout, stderr, code, Duration::from_millis(1)))
        }
    }

    fn engine() -> (Arc<Scripted>, ZfsOpen3) {
        let scripted = Arc::new(Scripted::default());
        (scripted.clone(), ZfsOpen3::with_gateway(scripted))
    }

    fn argv(scripted: &Scripted, idx: usize) -> Vec<String> { scripted.calls.lock().unwrap()[idx].0.clone() }

    #[test]
    fn datasets_named_properties() {
        let (scripted, engine) = engine();
        let request = DatasetRequest::builder()
            .paths(vec![String::from("tank")])
            .recursive(true)
            .max_depth(Some(2))
            .properties(PropertySet::Named(vec![String::from("used"), String::from("deduplication")]))
            .build()
            .unwrap();
        let datasets = engine.datasets(&request).unwrap();
        assert_eq!(
            vec!["get", "-H", "-p", "-o", "name,property,value,source", "-t", "filesystem,volume", "-d2",
                 "type,createtxg,guid,used,dedup", "tank"],
            argv(&scripted, 0)
        );
        assert_eq!(2, datasets.len());
        assert_eq!(DatasetKind::Volume, *datasets[1].kind());
        assert_eq!(200, *datasets[1].guid());
        assert!(datasets[0].property("type").is_none());
        assert!(datasets[0].property("deduplication").is_some());
        assert_eq!(Parsed::Integer(4096), *datasets[0].property("used").unwrap().parsed());
        assert_eq!(&None, datasets[1].user_properties());
    }

    #[test]
    fn datasets_with_user_properties() {
        let (scripted, engine) = engine();
        let request = DatasetRequest::builder().user_properties(true).build().unwrap();
        let datasets = engine.datasets(&request).unwrap();
        assert_eq!("all", argv(&scripted, 0)[7]);
        let user = datasets[1].user_properties().as_ref().unwrap();
        assert_eq!("scratch", user["comments"].raw());
        assert!(datasets[0].property("type").is_some());
    }

    #[test]
    fn missing_dataset() {
        let (_, engine) = engine();
        let request = DatasetRequest::builder().paths(vec![String::from("missing")]).build().unwrap();
        assert_eq!(ErrorKind::DatasetNotFound, engine.datasets(&request).unwrap_err().kind());
    }

    #[test]
    fn snapshots_with_holds() {
        let (scripted, engine) = engine();
        let request = SnapshotRequest::builder()
            .datasets(vec![String::from("tank/a")])
            .properties(PropertySet::none())
            .holds(true)
            .build()
            .unwrap();
        let snapshots = engine.snapshots(&request).unwrap();
        assert_eq!("-d1", argv(&scripted, 0)[7]);
        assert_eq!(1, snapshots.len());
        assert_eq!(10, *snapshots[0].createtxg());
        assert_eq!(&None, snapshots[0].properties());
        assert_eq!(&Some(vec![String::from("keep")]), snapshots[0].holds());
        assert_eq!(vec!["holds", "-H", "tank/a@one"], argv(&scripted, 1));
    }

    #[test]
    fn counts() {
        let (_, engine) = engine();
        let counts = engine.snapshot_counts(&[String::from("tank/a"), String::from("tank/c")]).unwrap();
        assert_eq!(Some(&2), counts.get("tank/a"));
        assert_eq!(Some(&0), counts.get("tank/c"));
        assert!(!counts.contains_key("tank/b"));
    }

    #[test]
    fn keys_go_to_stdin() {
        let (scripted, engine) = engine();
        let key = SecretString::from(String::from("hunter22"));
        engine.load_key("tank/a", KeySource::Secret(&key), false).unwrap();
        let (args, input) = scripted.calls.lock().unwrap()[0].clone();
        assert_eq!(vec!["load-key", "-L", "prompt", "tank/a"], args);
        assert_eq!(Some(String::from("hunter22")), input);

        let wrong = SecretString::from(String::from("wrong"));
        assert!(!engine.check_key("tank/a", KeySource::Secret(&wrong)).unwrap());
        assert!(engine.check_key("tank/a", KeySource::File(Path::new("/data/key"))).unwrap());
        assert_eq!(vec!["load-key", "-n", "-L", "file:///data/key", "tank/a"], argv(&scripted, 2));
    }

    #[test]
    fn mutations_argv() {
        let (scripted, engine) = engine();
        engine.destroy("tank/a@%", true, true).unwrap();
        engine.release("tank/a@one", "keep", false).unwrap();
        let mut props = BTreeMap::new();
        props.insert(String::from("keyformat"), String::from("hex"));
        engine.change_key("tank/a", &props, None, true).unwrap();
        engine.inherit_key("tank/a/b", false).unwrap();
        engine.list_filesystems(Some("tank"), true).unwrap();
        assert_eq!(vec!["destroy", "-r", "-R", "tank/a@%"], argv(&scripted, 0));
        assert_eq!(vec!["release", "keep", "tank/a@one"], argv(&scripted, 1));
        assert_eq!(vec!["change-key", "-l", "-o", "keyformat=hex", "tank/a"], argv(&scripted, 2));
        assert_eq!(vec!["change-key", "-i", "tank/a/b"], argv(&scripted, 3));
        assert_eq!(vec!["list", "-p", "-H", "-t", "filesystem", "-s", "name", "-r", "tank"], argv(&scripted, 4));
        let state = engine.encryption("tank/a").unwrap();
        assert!(*state.key_loaded());
    }
}
