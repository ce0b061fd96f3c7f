#![recursion_limit = "256"]
#![deny(nonstandard_style, future_incompatible)]
#![allow(clippy::module_name_repetitions, clippy::multiple_inherent_impl)]

//! ZFS resource layer of a storage appliance control plane.
//!
//! This library models pools, datasets, volumes and snapshots the way the rest of the appliance
//! consumes them. Everything that touches ZFS does so through `zpool(8)`, `zfs(8)` and `zdb(8)`,
//! there is no binding to `libzfs`.
//!
//! # Overview
//! ## zpool
//! Turns `zpool status` plus the GEOM topology document into a typed `Pool / Root / Vdev / Dev`
//! tree, including scrub and resilver progress.
//!
//! Refer to the [zpool module documentation](zpool/index.html) for more information.
//!
//! ## zfs
//! Dataset and snapshot query engine with a small filter language, snapshot count cache and the
//! encryption manager that loads, unloads and rotates dataset keys.
//!
//! ## kmip
//! Keeps locally stored ZFS and SED keys in sync with a KMIP server.
//!
//! # Usage
//! All long-lived state lives in [`ResourceManager`](manager/struct.ResourceManager.html). Logging
//! goes through `slog`, call `GlobalLogger::setup` once before creating engines if you don't want
//! `log` crate as drain.
//!
//! # Project Structure
//! ### parsers
//! Module for PEG parsers backed by [Pest](https://pest.rs/).
//!
//! ### gateway
//! The only place where child processes are spawned.

#[macro_use] extern crate derive_builder;
#[macro_use] extern crate getset;
#[macro_use] extern crate lazy_static;
#[macro_use] extern crate quick_error;
#[macro_use] pub extern crate slog;

// library modules
pub mod gateway;
pub mod kmip;
pub mod manager;
pub mod parsers;
pub mod utils;
pub mod zfs;
pub mod zpool;
pub mod zvol;

// internal modules
mod log;

pub use crate::log::GlobalLogger;

const VERSION: &str = env!("CARGO_PKG_VERSION");
