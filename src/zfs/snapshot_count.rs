//! Snapshot counts keyed on dataset GUID.
//!
//! Counting snapshots means listing them, which is slow on pools with a lot of them. ZFS bumps
//! `snapshots_changed` every time a snapshot is created or destroyed, so a count stays valid for
//! as long as that property doesn't change. Datasets that don't report `snapshots_changed` are
//! never cached.
use std::{collections::HashMap,
          sync::{Mutex, RwLock}};

use slog::Logger;

use super::{resource::Dataset, Result, ZfsEngine};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    snapshots_changed: String,
    count:             u64,
}

pub struct SnapshotCountCache {
    entries: RwLock<HashMap<u64, Entry>>,
    /// Serialises misses.
    fill:    Mutex<()>,
    logger:  Logger,
}

impl Default for SnapshotCountCache {
    fn default() -> SnapshotCountCache { SnapshotCountCache::new() }
}

impl SnapshotCountCache {
    pub fn new() -> SnapshotCountCache {
        SnapshotCountCache {
            entries: RwLock::new(HashMap::new()),
            fill:    Mutex::new(()),
            logger:  crate::GlobalLogger::component("zfs", "snapshot_count"),
        }
    }

    fn cached(&self, guid: u64, snapshots_changed: Option<&str>) -> Option<u64> {
        let snapshots_changed = snapshots_changed?;
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(&guid).filter(|e| e.snapshots_changed == snapshots_changed).map(|e| e.count)
    }

    /// Snapshot count of every dataset, keyed by GUID.
    ///
    /// With `prefetch` all misses are fetched in one call, otherwise one call per miss.
    /// `mutate_dataset` sets `snapshot_count` on each dataset, `pop_snapshots_changed` removes the
    /// `snapshots_changed` property from it afterwards.
    pub fn get_snapshot_count_cached(
        &self,
        engine: &dyn ZfsEngine,
        datasets: &mut [Dataset],
        prefetch: bool,
        mutate_dataset: bool,
        pop_snapshots_changed: bool,
    ) -> Result<HashMap<u64, u64>> {
        let mut counts = HashMap::with_capacity(datasets.len());
        let mut misses: Vec<usize> = Vec::new();
        for (idx, ds) in datasets.iter().enumerate() {
            match self.cached(*ds.guid(), ds.snapshots_changed()) {
                Some(count) => {
                    counts.insert(*ds.guid(), count);
                },
                None => misses.push(idx),
            }
        }

        if !misses.is_empty() {
            let _fill = self.fill.lock().unwrap_or_else(|e| e.into_inner());
            // Another caller may have filled some of them while we waited.
            misses.retain(|idx| {
                let ds = &datasets[*idx];
                match self.cached(*ds.guid(), ds.snapshots_changed()) {
                    Some(count) => {
                        counts.insert(*ds.guid(), count);
                        false
                    },
                    None => true,
                }
            });
            debug!(self.logger, "counting snapshots"; "misses" => misses.len(), "prefetch" => prefetch);

            let fetched = if prefetch {
                let names: Vec<String> = misses.iter().map(|idx| datasets[*idx].name().clone()).collect();
                engine.snapshot_counts(&names)?
            } else {
                let mut fetched = HashMap::with_capacity(misses.len());
                for idx in &misses {
                    let name = datasets[*idx].name().clone();
                    fetched.extend(engine.snapshot_counts(&[name])?);
                }
                fetched
            };

            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            for idx in &misses {
                let ds = &datasets[*idx];
                let count = fetched.get(ds.name()).copied().unwrap_or(0);
                counts.insert(*ds.guid(), count);
                match ds.snapshots_changed() {
                    Some(changed) => {
                        entries.insert(*ds.guid(), Entry { snapshots_changed: changed.to_string(), count });
                    },
                    None => {
                        entries.remove(ds.guid());
                    },
                }
            }
        }

        for ds in datasets.iter_mut() {
            if mutate_dataset {
                if let Some(count) = counts.get(ds.guid()) {
                    ds.set_snapshot_count(*count);
                }
            }
            if pop_snapshots_changed {
                ds.properties_mut().remove("snapshots_changed");
            }
        }
        Ok(counts)
    }

    pub fn invalidate(&self, guid: u64) {
        self.entries.write().unwrap_or_else(|e| e.into_inner()).remove(&guid);
    }

    pub fn clear(&self) { self.entries.write().unwrap_or_else(|e| e.into_inner()).clear(); }

    pub fn len(&self) -> usize { self.entries.read().unwrap_or_else(|e| e.into_inner()).len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}
