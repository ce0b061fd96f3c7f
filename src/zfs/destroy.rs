//! `destroy` for datasets, volumes and snapshots.
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::{pathext::PathExt,
            query::{is_internal_path, QueryEngine},
            Error, PropertySet, Result, SnapshotRequest, ValidationError, ValidationResult};

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq, Builder, Getters)]
#[serde(default)]
#[builder(default, setter(into))]
#[get = "pub"]
pub struct DestroyOptions {
    /// Children for datasets, same-named snapshots of descendants for snapshots.
    recursive:     bool,
    /// Dependent clones too (`-R`).
    remove_clones: bool,
    /// Release user holds first.
    remove_holds:  bool,
    /// Every snapshot of the dataset, the dataset itself stays.
    all_snapshots: bool,
}

impl DestroyOptions {
    pub fn builder() -> DestroyOptionsBuilder { DestroyOptionsBuilder::default() }
}

/// What a validated destroy request removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestroyTarget {
    Dataset(String),
    Snapshot { dataset: String, snapshot: String },
    AllSnapshots(String),
}

impl DestroyTarget {
    /// Argument for `zfs destroy`.
    pub fn zfs_name(&self) -> String {
        match self {
            DestroyTarget::Dataset(name) => name.clone(),
            DestroyTarget::Snapshot { dataset, snapshot } => format!("{}@{}", dataset, snapshot),
            DestroyTarget::AllSnapshots(dataset) => format!("{}@%", dataset),
        }
    }
}

pub fn validate_destroy(path: &str, options: &DestroyOptions) -> ValidationResult<DestroyTarget> {
    let invalid = |reason| ValidationError::InvalidName(path.to_string(), reason);
    if path.is_empty() {
        return Err(ValidationError::MissingName(PathBuf::from(path)));
    }
    if path.starts_with('/') || path.ends_with('/') {
        return Err(invalid("must not start or end with /"));
    }
    if path.contains('#') {
        return Err(invalid("bookmarks are not supported"));
    }
    let mut parts = path.splitn(2, '@');
    let dataset = parts.next().unwrap_or_default();
    let snapshot = parts.next();
    if snapshot.map_or(false, |s| s.contains('@')) {
        return Err(invalid("more than one @"));
    }
    if dataset.is_empty() {
        return Err(invalid("missing filesystem or volume name"));
    }
    if snapshot == Some("") {
        return Err(invalid("missing snapshot name"));
    }
    if is_internal_path(path) {
        return Err(ValidationError::Protected(path.to_string(), "internal datasets can't be destroyed"));
    }
    path.validate()?;

    let at_root = !dataset.contains('/');
    match snapshot {
        Some(_) if options.all_snapshots => Err(invalid("all_snapshots takes a dataset, not a snapshot")),
        Some(_) if at_root && options.recursive => {
            Err(invalid("recursive snapshot destroy at pool root is not allowed"))
        },
        Some(snapshot) => {
            Ok(DestroyTarget::Snapshot { dataset: dataset.to_string(), snapshot: snapshot.to_string() })
        },
        None if options.all_snapshots => Ok(DestroyTarget::AllSnapshots(dataset.to_string())),
        None if at_root => Err(ValidationError::Protected(path.to_string(), "destroying pools is not allowed")),
        None => Ok(DestroyTarget::Dataset(dataset.to_string())),
    }
}

impl QueryEngine {
    /// Holds are released first when asked to. The first failing step is returned, steps before
    /// it stay applied.
    pub fn destroy(&self, path: &str, options: &DestroyOptions) -> Result<()> {
        let target = validate_destroy(path, options)?;
        info!(self.logger(), "destroying"; "target" => target.zfs_name(), "recursive" => options.recursive);

        if options.remove_holds {
            let snapshots = self.affected_snapshots(&target, options.recursive)?;
            self.release_holds(&snapshots)?;
        }
        self.engine().destroy(&target.zfs_name(), options.recursive, options.remove_clones)
    }

    fn affected_snapshots(&self, target: &DestroyTarget, recursive: bool) -> Result<Vec<String>> {
        let (dataset, only) = match target {
            DestroyTarget::Snapshot { dataset, snapshot } if !recursive => {
                return Ok(vec![format!("{}@{}", dataset, snapshot)]);
            },
            DestroyTarget::Snapshot { dataset, snapshot } => (dataset, Some(snapshot)),
            DestroyTarget::Dataset(dataset) | DestroyTarget::AllSnapshots(dataset) => (dataset, None),
        };
        let request = SnapshotRequest::builder()
            .datasets(vec![dataset.clone()])
            .recursive(recursive)
            .properties(PropertySet::none())
            .build()
            .map_err(|_| Error::Unknown)?;
        Ok(self
            .engine()
            .snapshots(&request)?
            .into_iter()
            .filter(|s| only.map_or(true, |name| s.snapshot_name() == name))
            .map(|s| s.name().clone())
            .collect())
    }

    fn release_holds(&self, snapshots: &[String]) -> Result<()> {
        if snapshots.is_empty() {
            return Ok(());
        }
        for (snapshot, tags) in self.engine().holds(snapshots)? {
            for tag in tags {
                debug!(self.logger(), "releasing hold"; "snapshot" => &snapshot, "tag" => &tag);
                self.engine().release(&snapshot, &tag, false)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn check(path: &str, recursive: bool, all_snapshots: bool) -> ValidationResult<DestroyTarget> {
        let options = DestroyOptions::builder().recursive(recursive).all_snapshots(all_snapshots).build().unwrap();
        validate_destroy(path, &options)
    }

    #[test]
    fn rejects_bad_paths() {
        assert!(check("/tank/a", false, false).is_err());
        assert!(check("tank/a/", false, false).is_err());
        assert!(check("tank/a#mark", false, false).is_err());
        assert!(check("tank/a@b@c", false, false).is_err());
        assert!(check("@snap", false, false).is_err());
        assert!(check("tank/a@", false, false).is_err());
        assert!(check("tank/a@s", false, true).is_err());
    }

    #[test]
    fn pools_and_internal_datasets_are_protected() {
        let err = check("tank", true, false).unwrap_err();
        assert_eq!(libc::EPERM, err.errno());
        assert_eq!(libc::EPERM, check("tank/.system", false, false).unwrap_err().errno());
        assert_eq!(libc::EPERM, check("boot-pool/ROOT", false, false).unwrap_err().errno());
        assert_eq!(libc::EINVAL, check("tank@daily", true, false).unwrap_err().errno());
    }

    #[test]
    fn targets() {
        assert_eq!(Ok(DestroyTarget::Dataset("tank/a".into())), check("tank/a", true, false));
        assert_eq!(
            Ok(DestroyTarget::Snapshot { dataset: "tank".into(), snapshot: "daily".into() }),
            check("tank@daily", false, false)
        );
        let all = check("tank/a", false, true).unwrap();
        assert_eq!("tank/a@%", all.zfs_name());
        assert_eq!(Ok(DestroyTarget::AllSnapshots("tank".into())), check("tank", false, true));
    }
}
