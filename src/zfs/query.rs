//! Dataset and snapshot queries.
//!
//! A query runs in this order: enumerate, attach snapshots and counts, flatten, filter, order,
//! select, then `get`/`count`/`offset`/`limit`, and finally nest rows under their parents when
//! `extra.flat` is off.
//!
//! Two shortcuts keep large pools cheap:
//!
//! - when every top-level filter is `name`/`id` with `=` or `in`, only those datasets are
//!   enumerated and the filters aren't evaluated again;
//! - filters that only look at fields known before snapshots and counts are attached run before
//!   attaching, so snapshots of rows that will be dropped are never listed.
use std::{collections::{BTreeMap, HashMap},
          sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use slog::Logger;

use super::{filters::{self, Filters, QueryResult, Selector},
            pathext::PathExt,
            resource::{Dataset, DatasetKind, Snapshot},
            snapshot_count::SnapshotCountCache,
            DatasetRequest, Error, ErrorKind, PropertySet, Result, SnapshotRequest, ValidationError,
            ValidationResult, ZfsEngine};

/// Pools the appliance boots from.
pub static BOOT_POOLS: &[&str] = &["boot-pool", "freenas-boot"];

/// Dataset components reserved for the appliance itself.
pub static INTERNAL_DATASETS: &[&str] = &[".system", "ix-applications", "ix-apps", ".ix-virt"];

/// Fields every row has before snapshots, counts and properties are looked at.
pub static SCALAR_FIELDS: &[&str] =
    &["id", "name", "pool", "type", "createtxg", "guid", "dataset", "snapshot_name"];

/// Boot pools and anything under an internal dataset.
pub fn is_internal_path(name: &str) -> bool {
    let dataset = name.get_dataset();
    match dataset.get_pool() {
        Some(pool) if BOOT_POOLS.contains(&pool) => true,
        _ => dataset.split('/').skip(1).any(|component| INTERNAL_DATASETS.contains(&component)),
    }
}

/// Options under `extra`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Builder, Getters)]
#[serde(default)]
#[builder(default, setter(into))]
#[get = "pub"]
pub struct QueryExtra {
    /// `None` is every property, empty is none.
    properties:           Option<Vec<String>>,
    flat:                 bool,
    user_properties:      bool,
    retrieve_properties:  bool,
    retrieve_children:    bool,
    snapshots:            bool,
    snapshots_recursive:  bool,
    snapshots_properties: Option<Vec<String>>,
    snapshots_count:      bool,
    retention:            bool,
    holds:                bool,
    /// Lower bound on snapshot `createtxg`. 0 is unbounded.
    min_txg:              u64,
    /// Upper bound on snapshot `createtxg`. 0 is unbounded.
    max_txg:              u64,
    /// Levels below each path. 0 is unbounded.
    max_depth:            usize,
}

impl Default for QueryExtra {
    fn default() -> QueryExtra {
        QueryExtra {
            properties:           None,
            flat:                 true,
            user_properties:      true,
            retrieve_properties:  true,
            retrieve_children:    true,
            snapshots:            false,
            snapshots_recursive:  false,
            snapshots_properties: Some(Vec::new()),
            snapshots_count:      false,
            retention:            false,
            holds:                false,
            min_txg:              0,
            max_txg:              0,
            max_depth:            0,
        }
    }
}

impl QueryExtra {
    /// `max_depth > 0` implies children.
    pub fn walks_children(&self) -> bool { self.retrieve_children || self.max_depth > 0 }

    fn txg_in_bounds(&self, txg: u64) -> bool {
        (self.min_txg == 0 || txg >= self.min_txg) && (self.max_txg == 0 || txg <= self.max_txg)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq, Builder, Getters)]
#[serde(default)]
#[builder(default, setter(into))]
#[get = "pub"]
pub struct QueryOptions {
    extra:    QueryExtra,
    order_by: Vec<String>,
    select:   Vec<Selector>,
    count:    bool,
    get:      bool,
    offset:   usize,
    /// 0 is unlimited.
    limit:    usize,
}

impl QueryOptions {
    pub fn builder() -> QueryOptionsBuilder { QueryOptionsBuilder::default() }

    /// `null` is the defaults.
    pub fn from_json(raw: &Value) -> Result<QueryOptions> {
        if raw.is_null() {
            return Ok(QueryOptions::default());
        }
        Ok(serde_json::from_value(raw.clone())?)
    }
}

/// Retention annotations for snapshots, provided by whatever owns snapshot tasks.
pub trait RetentionSource: Send + Sync {
    fn retention(&self, snapshot: &Snapshot) -> Option<Value>;
}

/// Where filters get evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPlan {
    /// Enumerate only these names.
    pub names:        Option<Vec<String>>,
    /// Filter before snapshots and counts are attached.
    pub early_filter: bool,
    /// Filter the final rows.
    pub post_filter:  bool,
}

impl QueryPlan {
    pub fn new(paths: &[String], filters: &Filters, options: &QueryOptions) -> QueryPlan {
        if filters.is_empty() {
            return QueryPlan { names: None, early_filter: false, post_filter: false };
        }
        if paths.is_empty() {
            if let Some(names) = filters.exact_names() {
                return QueryPlan { names: Some(names), early_filter: false, post_filter: false };
            }
        }
        let scalar_only = filters
            .fields()
            .iter()
            .all(|field| !field.is_nested() && SCALAR_FIELDS.contains(&field.head()));
        let nested_select = options.select().iter().any(Selector::is_nested);
        let post_filter = !scalar_only || nested_select;
        QueryPlan { names: None, early_filter: !post_filter, post_filter }
    }
}

/// What to ask the engine for, derived from `extra`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PropertyPlan {
    set:                   PropertySet,
    user_properties:       bool,
    pop_snapshots_changed: bool,
    /// Drop `mountpoint` from volumes.
    strip_mountpoint:      bool,
}

impl PropertyPlan {
    fn new(extra: &QueryExtra) -> PropertyPlan {
        let count = extra.snapshots_count;
        if !extra.retrieve_properties {
            let set = if count {
                PropertySet::Named(vec![String::from("snapshots_changed")])
            } else {
                PropertySet::none()
            };
            return PropertyPlan {
                set,
                user_properties: false,
                pop_snapshots_changed: count,
                strip_mountpoint: false,
            };
        }
        match &extra.properties {
            None => PropertyPlan {
                set:                   PropertySet::All,
                user_properties:       extra.user_properties,
                pop_snapshots_changed: count,
                strip_mountpoint:      false,
            },
            Some(names) => {
                let mut names = names.clone();
                let strip_mountpoint = !names.iter().any(|n| n == "mountpoint");
                if strip_mountpoint {
                    names.push(String::from("mountpoint"));
                }
                let pop_snapshots_changed = count && !names.iter().any(|n| n == "snapshots_changed");
                if pop_snapshots_changed {
                    names.push(String::from("snapshots_changed"));
                }
                PropertyPlan {
                    set: PropertySet::Named(names),
                    user_properties: extra.user_properties,
                    pop_snapshots_changed,
                    strip_mountpoint,
                }
            },
        }
    }
}

/// Query front end over a [`ZfsEngine`](../trait.ZfsEngine.html).
pub struct QueryEngine {
    engine:    Arc<dyn ZfsEngine>,
    counts:    Arc<SnapshotCountCache>,
    retention: Option<Arc<dyn RetentionSource>>,
    logger:    Logger,
}

impl QueryEngine {
    pub fn new(engine: Arc<dyn ZfsEngine>, counts: Arc<SnapshotCountCache>) -> QueryEngine {
        QueryEngine {
            engine,
            counts,
            retention: None,
            logger: crate::GlobalLogger::component("zfs", "query"),
        }
    }

    pub fn with_retention(mut self, retention: Arc<dyn RetentionSource>) -> QueryEngine {
        self.retention = Some(retention);
        self
    }

    pub fn engine(&self) -> &Arc<dyn ZfsEngine> { &self.engine }

    pub fn snapshot_counts(&self) -> &Arc<SnapshotCountCache> { &self.counts }

    pub(crate) fn logger(&self) -> &Logger { &self.logger }

    /// [`query`](#method.query) with filters and options as the RPC layer sends them.
    pub fn query_json(&self, paths: &[String], filters: &Value, options: &Value) -> Result<QueryResult> {
        let filters = Filters::from_json(filters)?;
        self.query(paths, &filters, &QueryOptions::from_json(options)?)
    }

    /// Filesystems and volumes.
    pub fn query(&self, paths: &[String], filters: &Filters, options: &QueryOptions) -> Result<QueryResult> {
        let extra = options.extra();
        validate_dataset_paths(paths, extra.walks_children())?;
        validate_retention(filters, options)?;

        let plan = QueryPlan::new(paths, filters, options);
        let properties = PropertyPlan::new(extra);
        debug!(self.logger, "dataset query"; "paths" => paths.len(), "plan" => ?plan);

        let mut datasets = match &plan.names {
            Some(names) => self.enumerate_names(names, &properties)?,
            None => {
                let request = DatasetRequest::builder()
                    .paths(paths.to_vec())
                    .recursive(extra.walks_children())
                    .max_depth(Some(extra.max_depth).filter(|depth| *depth > 0))
                    .properties(properties.set.clone())
                    .user_properties(properties.user_properties)
                    .build()
                    .map_err(|_| Error::Unknown)?;
                self.engine.datasets(&request)?
            },
        };
        datasets.retain(|ds| !is_internal_path(ds.name()));
        if properties.user_properties {
            for ds in datasets.iter_mut() {
                super::properties::fill_user_property_defaults(ds.user_properties_mut());
            }
        }
        datasets.sort_by(|a, b| a.name().split('/').cmp(b.name().split('/')));

        if properties.strip_mountpoint {
            for ds in datasets.iter_mut().filter(|ds| *ds.kind() == DatasetKind::Volume) {
                ds.properties_mut().remove("mountpoint");
            }
        }

        if plan.early_filter {
            let mut kept = Vec::with_capacity(datasets.len());
            for ds in datasets {
                if filters.matches(&serde_json::to_value(&ds)?) {
                    kept.push(ds);
                }
            }
            datasets = kept;
        }

        if extra.snapshots || extra.snapshots_recursive {
            self.attach_snapshots(&mut datasets, extra)?;
        }
        if extra.snapshots_count {
            let prefetch = datasets.len() > 1;
            self.counts.get_snapshot_count_cached(
                &*self.engine,
                &mut datasets,
                prefetch,
                true,
                properties.pop_snapshots_changed,
            )?;
        }

        let rows = datasets.iter().map(serde_json::to_value).collect::<std::result::Result<Vec<_>, _>>()?;
        let no_filters = Filters::default();
        let filters = if plan.post_filter { filters } else { &no_filters };

        if extra.flat || *options.count() || *options.get() {
            return filters::filter_list(rows, filters, options);
        }

        let mut rows: Vec<Value> = rows.into_iter().filter(|row| filters.matches(row)).collect();
        filters::do_order(&mut rows, options.order_by());
        let rows = filters::paginate(rows, *options.offset(), *options.limit());
        let names: Vec<String> =
            rows.iter().map(|row| row.get("name").and_then(Value::as_str).unwrap_or_default().to_string()).collect();
        let rows = rows.iter().map(|row| filters::do_select(row, options.select())).collect();
        Ok(QueryResult::Rows(nest(names, rows)))
    }

    /// Snapshots of the datasets in `paths`, or of every dataset.
    pub fn query_snapshots(&self, paths: &[String], filters: &Filters, options: &QueryOptions) -> Result<QueryResult> {
        let extra = options.extra();
        for path in paths {
            path.validate()?;
        }
        validate_retention(filters, options)?;

        let (datasets, recursive) = match (paths.is_empty(), filters.exact_names()) {
            (true, Some(names)) => {
                let mut datasets: Vec<String> = Vec::new();
                for name in names.iter().filter(|name| name.is_snapshot()) {
                    let dataset = name.get_dataset().to_string();
                    if !datasets.contains(&dataset) {
                        datasets.push(dataset);
                    }
                }
                if datasets.is_empty() {
                    return filters::filter_list(Vec::new(), filters, options);
                }
                (datasets, false)
            },
            _ => (paths.iter().map(|p| p.get_dataset().to_string()).collect(), extra.walks_children()),
        };

        let user_properties = extra.retrieve_properties && extra.user_properties;
        let properties = if extra.retrieve_properties {
            PropertySet::from_option(extra.properties.as_ref())
        } else {
            PropertySet::none()
        };
        let request = SnapshotRequest::builder()
            .datasets(datasets)
            .recursive(recursive)
            .properties(properties)
            .user_properties(user_properties)
            .holds(extra.holds)
            .build()
            .map_err(|_| Error::Unknown)?;
        let mut snapshots = self.engine.snapshots(&request)?;
        snapshots.retain(|s| !is_internal_path(s.dataset()) && extra.txg_in_bounds(*s.createtxg()));
        sort_snapshots(&mut snapshots);
        if extra.retention {
            self.annotate_retention(&mut snapshots);
        }
        debug!(self.logger, "snapshot query"; "snapshots" => snapshots.len());

        let rows = snapshots.iter().map(serde_json::to_value).collect::<std::result::Result<Vec<_>, _>>()?;
        filters::filter_list(rows, filters, options)
    }

    fn enumerate_names(&self, names: &[String], properties: &PropertyPlan) -> Result<Vec<Dataset>> {
        let mut datasets = Vec::with_capacity(names.len());
        for name in names {
            if name.validate().is_err() || !name.is_volume_or_dataset() {
                continue;
            }
            let request = DatasetRequest::builder()
                .paths(vec![name.clone()])
                .properties(properties.set.clone())
                .user_properties(properties.user_properties)
                .build()
                .map_err(|_| Error::Unknown)?;
            match self.engine.datasets(&request) {
                Ok(found) => datasets.extend(found),
                Err(ref e) if e.kind() == ErrorKind::DatasetNotFound => {
                    debug!(self.logger, "skipping missing dataset"; "name" => name);
                },
                Err(e) => return Err(e),
            }
        }
        Ok(datasets)
    }

    fn attach_snapshots(&self, datasets: &mut [Dataset], extra: &QueryExtra) -> Result<()> {
        if datasets.is_empty() {
            return Ok(());
        }
        let request = SnapshotRequest::builder()
            .datasets(datasets.iter().map(|ds| ds.name().clone()).collect::<Vec<_>>())
            .recursive(extra.snapshots_recursive)
            .properties(PropertySet::from_option(extra.snapshots_properties.as_ref()))
            .holds(extra.holds)
            .build()
            .map_err(|_| Error::Unknown)?;
        let mut snapshots = self.engine.snapshots(&request)?;
        snapshots.retain(|s| extra.txg_in_bounds(*s.createtxg()));
        if extra.retention {
            self.annotate_retention(&mut snapshots);
        }

        for ds in datasets.iter_mut() {
            let owned: BTreeMap<String, Snapshot> = snapshots
                .iter()
                .filter(|s| {
                    s.dataset() == ds.name() || (extra.snapshots_recursive && s.dataset().is_descendant_of(ds.name()))
                })
                .map(|s| (s.name().clone(), s.clone()))
                .collect();
            ds.set_snapshots(owned);
        }
        Ok(())
    }

    fn annotate_retention(&self, snapshots: &mut [Snapshot]) {
        if let Some(source) = &self.retention {
            for snapshot in snapshots.iter_mut() {
                let retention = source.retention(snapshot);
                snapshot.set_retention(retention);
            }
        }
    }
}

fn sort_snapshots(snapshots: &mut [Snapshot]) {
    snapshots.sort_by(|a, b| {
        a.dataset()
            .split('/')
            .cmp(b.dataset().split('/'))
            .then_with(|| a.createtxg().cmp(b.createtxg()))
            .then_with(|| a.snapshot_name().cmp(b.snapshot_name()))
    });
}

/// No snapshots, and no overlapping paths when walking children.
pub fn validate_dataset_paths(paths: &[String], walks_children: bool) -> ValidationResult {
    for path in paths {
        if path.contains('@') {
            return Err(ValidationError::InvalidName(path.clone(), "snapshots are not allowed here"));
        }
        path.validate()?;
    }
    if walks_children {
        for (idx, a) in paths.iter().enumerate() {
            for b in &paths[idx + 1..] {
                if a == b || a.is_descendant_of(b) || b.is_descendant_of(a) {
                    return Err(ValidationError::OverlappingPaths(a.clone(), b.clone()));
                }
            }
        }
    }
    Ok(())
}

/// Retention needs a bounded query.
fn validate_retention(filters: &Filters, options: &QueryOptions) -> ValidationResult {
    if options.extra().retention && !filters.has_top_level("id") && *options.limit() == 0 {
        return Err(ValidationError::RetentionUnbounded);
    }
    Ok(())
}

/// Hang every row under the nearest ancestor present in `names`. Rows are in pre-order.
fn nest(names: Vec<String>, rows: Vec<Value>) -> Vec<Value> {
    let index: HashMap<&str, usize> = names.iter().enumerate().map(|(i, n)| (n.as_str(), i)).collect();
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); rows.len()];
    let mut roots = Vec::new();
    for (idx, name) in names.iter().enumerate() {
        let mut parent = name.get_parent();
        let mut found = None;
        while let Some(candidate) = parent {
            if let Some(pidx) = index.get(candidate) {
                found = Some(*pidx);
                break;
            }
            parent = candidate.get_parent();
        }
        match found {
            Some(pidx) => children[pidx].push(idx),
            None => roots.push(idx),
        }
    }

    let mut rows: Vec<Option<Value>> = rows.into_iter().map(Some).collect();
    roots.into_iter().filter_map(|idx| build(idx, &mut rows, &children)).collect()
}

fn build(idx: usize, rows: &mut [Option<Value>], children: &[Vec<usize>]) -> Option<Value> {
    let row = rows[idx].take()?;
    let nested: Vec<Value> = children[idx].iter().filter_map(|child| build(*child, rows, children)).collect();
    let mut map = match row {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert(String::from("value"), other);
            map
        },
    };
    map.insert(String::from("children"), Value::Array(nested));
    Some(Value::Object(map))
}
