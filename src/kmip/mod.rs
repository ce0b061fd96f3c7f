//! Keep dataset keys and SED passwords in sync with a KMIP server.
//!
//! The appliance never asks the server for a key at the moment it needs one. Keys live in
//! [`KeyMemory`], filled by [`KmipSync::initialize_keys`] on boot and kept current by every sync.
//! Persisted rows hold either a locally encrypted key or the uid of the server object, never both
//! once a sync went through.
//!
//! ```rust,ignore
//! let sync = Arc::new(KmipSync::new(store, client, cipher, engine, alerts, memory, locks));
//! sync.initialize_keys()?;
//! let periodic = sync.spawn_periodic(SYNC_INTERVAL)?;
//! // ...
//! periodic.stop();
//! ```
pub mod alerts;
pub mod client;
pub mod config;
mod errors;
pub mod memory;
pub mod sed;
pub mod store;
pub mod sync;
pub mod zfs;

pub use self::{alerts::{Alert, AlertSink, LogAlertSink},
               client::{KmipClient, KmipConnection, ManagedObject, RevocationReason},
               config::{KmipConfig, KmipConfigUpdate, DEFAULT_PORT},
               errors::{ConfigError, KmipError, KmipErrorKind, KmipResult},
               memory::KeyMemory,
               store::{DiskKeyRow, GlobalSedRow, KeyCipher, KmipStore, MemoryStore, ZfsKeyRow},
               sync::{KmipSync, PeriodicSync, SedKeys, SedKeysUpdate, SYNC_INTERVAL}};
