//! Everything you need to look at zpools. Since there is no stable public library to work with
//! zpool, the default impl calls `zpool(8)` and `zdb(8)`.
//!
//! The main product of this module is [`Pool`](struct.Pool.html): `zpool status` parsed into a
//! tree of roots (`data`, `cache`, `spares`, `logs`, `special`, `dedup`), vdevs and devices,
//! with every device resolved to its disk through the GEOM topology.
//!
//! ```text
//! Pool
//!  └── Root (tank | logs | cache | spares | special | dedup)
//!       └── Vdev (stripe | mirror | raidz | raidz2 | raidz3 | log mirror)
//!            └── Dev
//! ```
use slog::Logger;

pub mod errors;
pub mod geom;
pub mod open3;
pub mod properties;
pub mod resolve;
pub mod scan;
pub mod status;
pub mod topology;
pub mod validators;

pub use self::{errors::{ZpoolError, ZpoolErrorKind, ZpoolResult},
               geom::GeomMesh,
               open3::ZpoolOpen3,
               properties::{Health, PoolProperties},
               resolve::resolve_devices,
               scan::{ScanKind, ScanState, ScanStatus},
               status::parse_status,
               topology::{ErrorStatistics, Node, NodeId, NodeKind, Pool, RootSlot, VdevType}};

/// Generic interface to look at zpools. Using trait here, so it can be mocked in unit tests.
pub trait ZpoolEngine {
    fn logger(&self) -> &Logger;

    /// Raw `zpool status <name>`.
    #[cfg_attr(tarpaulin, skip)]
    fn status(&self, _name: &str) -> ZpoolResult<String> { Err(ZpoolError::Unimplemented) }

    /// `zpool get -H -o property,value all <name>`.
    #[cfg_attr(tarpaulin, skip)]
    fn properties(&self, _name: &str) -> ZpoolResult<PoolProperties> {
        Err(ZpoolError::Unimplemented)
    }

    /// Names of imported pools.
    #[cfg_attr(tarpaulin, skip)]
    fn list(&self) -> ZpoolResult<Vec<String>> { Err(ZpoolError::Unimplemented) }

    /// `zpool set <key>=<value> <name>`.
    #[cfg_attr(tarpaulin, skip)]
    fn set_property(&self, _name: &str, _key: &str, _value: &str) -> ZpoolResult<()> {
        Err(ZpoolError::Unimplemented)
    }

    /// Cached pool configuration from `zdb -C <name>`.
    #[cfg_attr(tarpaulin, skip)]
    fn zdb_config(&self, _name: &str) -> ZpoolResult<String> { Err(ZpoolError::Unimplemented) }

    /// Parsed, validated and resolved pool with its properties.
    fn pool(&self, name: &str, mesh: &GeomMesh) -> ZpoolResult<Pool> {
        validators::validate_name(name)?;
        let stdout = self.status(name)?;
        let mut pool = parse_status(name, &stdout)?;
        pool.set_properties(self.properties(name)?);
        let logger = self.logger().new(o!("pool" => name.to_string()));
        resolve_devices(&mut pool, mesh, &logger, |pool_name| match self.zdb_config(pool_name) {
            Ok(config) => Some(config),
            Err(e) => {
                debug!(logger, "zdb failed"; "error" => %e);
                None
            },
        });
        Ok(pool)
    }
}
