//! Fast view of ZFS volumes straight from `/dev/zvol` and `/sys/block`, without running `zfs`.
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use zettaplane::zvol::{ZvolEnumerator, ZvolFields};
//!
//! let zvols = ZvolEnumerator::default().list(ZvolFields::all(), &HashMap::new()).unwrap();
//! for zvol in zvols {
//!     println!("{} -> {} ({:?} bytes)", zvol.name(), zvol.dev(), zvol.size());
//! }
//! ```
use std::{collections::HashMap,
          fs, io,
          path::{Path, PathBuf}};

use bitflags::bitflags;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use slog::Logger;

use crate::{utils::{zvol_path_to_name_in, ZVOL_DEV_ROOT},
            zfs::{filters::{filter_list, Filters, QueryResult},
                  QueryOptions, Selector}};

pub static SYS_BLOCK_ROOT: &str = "/sys/block";

lazy_static! {
    static ref RE_PARTITION: Regex = Regex::new(r"zd\d+p\d+$").expect("failed to compile RE_PARTITION");
}

bitflags! {
    /// Optional fields to read from `/sys/block`.
    pub struct ZvolFields: u8 {
        const SIZE       = 0b0001;
        const DEVID      = 0b0010;
        const RO         = 0b0100;
        const ATTACHMENT = 0b1000;
    }
}

impl ZvolFields {
    /// Only what `select` needs. Empty `select` needs everything.
    pub fn from_select(select: &[Selector]) -> ZvolFields { ZvolFields::for_query(select, &[]) }

    /// What `select` and `order_by` together need. Empty `select` needs everything.
    pub fn for_query(select: &[Selector], order_by: &[String]) -> ZvolFields {
        if select.is_empty() {
            return ZvolFields::all();
        }
        let selected = select.iter().map(|selector| match selector {
            Selector::Field(field) | Selector::Alias(field, _) => field.as_str(),
        });
        let ordered = order_by.iter().map(String::as_str).map(|raw| {
            let raw = raw.strip_prefix("nulls_first:").or_else(|| raw.strip_prefix("nulls_last:")).unwrap_or(raw);
            raw.strip_prefix('-').unwrap_or(raw)
        });
        selected.chain(ordered).fold(ZvolFields::empty(), |fields, field| {
            fields
                | match field.split('.').next().unwrap_or_default() {
                    "size" => ZvolFields::SIZE,
                    "devid" => ZvolFields::DEVID,
                    "ro" => ZvolFields::RO,
                    "attachment" => ZvolFields::ATTACHMENT,
                    _ => ZvolFields::empty(),
                }
        })
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Getters)]
#[get = "pub"]
pub struct Zvol {
    /// `pool/volume`, spaces restored.
    name:       String,
    path:       PathBuf,
    /// Block device name, `zd0`.
    dev:        String,
    /// Bytes.
    size:       Option<u64>,
    /// `major:minor`.
    devid:      Option<String>,
    ro:         Option<bool>,
    attachment: Option<Value>,
}

pub struct ZvolEnumerator {
    dev_root: PathBuf,
    sys_root: PathBuf,
    logger:   Logger,
}

impl Default for ZvolEnumerator {
    fn default() -> ZvolEnumerator { ZvolEnumerator::with_roots(ZVOL_DEV_ROOT, SYS_BLOCK_ROOT) }
}

impl ZvolEnumerator {
    /// Look somewhere else than `/dev/zvol` and `/sys/block`.
    pub fn with_roots<D: Into<PathBuf>, S: Into<PathBuf>>(dev_root: D, sys_root: S) -> ZvolEnumerator {
        ZvolEnumerator {
            dev_root: dev_root.into(),
            sys_root: sys_root.into(),
            logger:   crate::GlobalLogger::component("zvol", "enumerator"),
        }
    }

    /// Every volume, sorted by name. `attachments` maps volume names to whatever uses them.
    pub fn list(&self, fields: ZvolFields, attachments: &HashMap<String, Value>) -> io::Result<Vec<Zvol>> {
        let mut zvols = Vec::new();
        match self.walk(&self.dev_root, fields, attachments, &mut zvols) {
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(self.logger, "no zvol directory"; "root" => %self.dev_root.display());
            },
            other => other?,
        }
        zvols.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(zvols)
    }

    /// [`list`](#method.list) through the filter language.
    pub fn query(
        &self,
        filters: &Filters,
        options: &QueryOptions,
        attachments: &HashMap<String, Value>,
    ) -> crate::zfs::Result<QueryResult> {
        let fields = if filters.is_empty() {
            ZvolFields::for_query(options.select(), options.order_by())
        } else {
            ZvolFields::all()
        };
        let rows = self
            .list(fields, attachments)?
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        filter_list(rows, filters, options)
    }

    fn walk(
        &self,
        dir: &Path,
        fields: ZvolFields,
        attachments: &HashMap<String, Value>,
        out: &mut Vec<Zvol>,
    ) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                self.walk(&path, fields, attachments, out)?;
            } else if file_type.is_symlink() {
                if let Some(zvol) = self.zvol(&path, fields, attachments)? {
                    out.push(zvol);
                }
            }
        }
        Ok(())
    }

    fn zvol(&self, path: &Path, fields: ZvolFields, attachments: &HashMap<String, Value>) -> io::Result<Option<Zvol>> {
        let target = fs::read_link(path)?;
        let dev = match target.file_name().and_then(|name| name.to_str()) {
            Some(dev) => dev.to_string(),
            None => return Ok(None),
        };
        if RE_PARTITION.is_match(&dev) {
            return Ok(None);
        }
        let name = match zvol_path_to_name_in(&self.dev_root, path) {
            Some(name) => name,
            None => return Ok(None),
        };
        let sys = self.sys_root.join(&dev);
        let size = if fields.contains(ZvolFields::SIZE) {
            read_sys(&sys.join("size"))
                .and_then(|sectors| sectors.parse::<u64>().ok())
                .and_then(|sectors| sectors.checked_mul(512))
        } else {
            None
        };
        let devid = if fields.contains(ZvolFields::DEVID) { read_sys(&sys.join("dev")) } else { None };
        let ro = if fields.contains(ZvolFields::RO) { read_sys(&sys.join("ro")).map(|ro| ro == "1") } else { None };
        let attachment = if fields.contains(ZvolFields::ATTACHMENT) { attachments.get(&name).cloned() } else { None };
        Ok(Some(Zvol { name, path: path.to_path_buf(), dev, size, devid, ro, attachment }))
    }
}

/// Trimmed content of a sysfs attribute, `None` when it's missing.
fn read_sys(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|content| content.trim().to_string())
}
