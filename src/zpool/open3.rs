//! Open3 implementation of [`ZpoolEngine`](trait.ZpoolEngine.html).
//!
//! Easy way - [`ZpoolOpen3::default()`](struct.ZpoolOpen3.html#impl-Default). It goes through a
//! default [`Open3Gateway`](../gateway/struct.Open3Gateway.html), which looks for `ZPOOL_CMD` and
//! `ZDB_CMD` in current environment and falls back to `zpool` and `zdb` in `PATH`.
//!
//! ### Usage
//! ```rust,no_run
//! use zettaplane::zpool::{GeomMesh, ZpoolEngine, ZpoolOpen3};
//! let engine = ZpoolOpen3::default();
//!
//! let names = engine.list().unwrap();
//! let pool = engine.pool(&names[0], &GeomMesh::empty()).unwrap();
//! println!("{}", pool.dump());
//! ```
//!
//! It's called open 3 because it opens stdin, stdout, stderr.
use std::{path::PathBuf, sync::Arc};

use slog::Logger;

use crate::gateway::{CommandOutput, CommandRunner, Open3Gateway, Program};

use super::{PoolProperties, ZpoolEngine, ZpoolError, ZpoolResult};

pub struct ZpoolOpen3 {
    gateway:        Arc<dyn CommandRunner>,
    zdb_cache_file: Option<PathBuf>,
    logger:         Logger,
}

impl Default for ZpoolOpen3 {
    fn default() -> ZpoolOpen3 { ZpoolOpen3::with_gateway(Arc::new(Open3Gateway::default())) }
}

impl ZpoolOpen3 {
    /// Run commands through supplied gateway.
    pub fn with_gateway(gateway: Arc<dyn CommandRunner>) -> ZpoolOpen3 {
        ZpoolOpen3 {
            gateway,
            zdb_cache_file: None,
            logger: crate::GlobalLogger::component("zpool", "open3"),
        }
    }

    /// Pass `-U <path>` to `zdb`.
    pub fn with_zdb_cache_file<P: Into<PathBuf>>(mut self, path: P) -> ZpoolOpen3 {
        self.zdb_cache_file = Some(path.into());
        self
    }

    fn zpool(&self, args: &[&str]) -> ZpoolResult<CommandOutput> {
        let out = self.gateway.run(Program::Zpool, args)?;
        if out.success() {
            Ok(out)
        } else {
            Err(ZpoolError::from_stderr(out.stderr()))
        }
    }
}

impl ZpoolEngine for ZpoolOpen3 {
    fn logger(&self) -> &Logger { &self.logger }

    fn status(&self, name: &str) -> ZpoolResult<String> {
        self.zpool(&["status", name]).map(|out| out.stdout().clone())
    }

    fn properties(&self, name: &str) -> ZpoolResult<PoolProperties> {
        let out = self.zpool(&["get", "-H", "-o", "property,value", "all", name])?;
        Ok(PoolProperties::from_stdout(out.stdout()))
    }

    fn list(&self) -> ZpoolResult<Vec<String>> {
        let out = self.zpool(&["list", "-H", "-o", "name"])?;
        Ok(out.stdout().lines().map(str::trim).filter(|l| !l.is_empty()).map(String::from).collect())
    }

    fn set_property(&self, name: &str, key: &str, value: &str) -> ZpoolResult<()> {
        super::validators::validate_name(name)?;
        let pair = format!("{}={}", key, value);
        self.zpool(&["set", &pair, name]).map(|_| ())
    }

    fn zdb_config(&self, name: &str) -> ZpoolResult<String> {
        let cache_file = self.zdb_cache_file.as_ref().map(|p| p.to_string_lossy().into_owned());
        let mut args: Vec<&str> = Vec::with_capacity(4);
        if let Some(cache_file) = cache_file.as_deref() {
            args.push("-U");
            args.push(cache_file);
        }
        args.push("-C");
        args.push(name);
        let out = self.gateway.run(Program::Zdb, &args)?;
        if out.success() {
            Ok(out.stdout().clone())
        } else {
            Err(ZpoolError::from_stderr(out.stderr()))
        }
    }
}
