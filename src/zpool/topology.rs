//! Arena backed `Pool / Root / Vdev / Dev` tree.
//!
//! Nodes live in a single `Vec` owned by the pool, parent and children are indices into it. Each
//! root slot of a pool holds at most one `Root`, a `Root` only holds `Vdev`s and a `Vdev` only
//! holds `Dev`s.
use std::collections::BTreeMap;

use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};
use strum_macros::{AsRefStr, Display, EnumString};

use super::{properties::{Health, PoolProperties},
            scan::ScanState};

lazy_static! {
    static ref RE_VDEV: Regex =
        Regex::new(r"^(mirror|raidz|raidz1|raidz2|raidz3)(-\d+)?$").expect("RE_VDEV");
}

/// Index of a node inside its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(usize);

/// Level of a node in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeKind {
    Root,
    Vdev,
    Dev,
}

/// Places where a pool can keep its roots. Data root is named after the pool itself.
#[derive(
    AsRefStr, Display, EnumString, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RootSlot {
    Data,
    Cache,
    Spares,
    Logs,
    Special,
    Dedup,
}

impl RootSlot {
    /// Slot for a level 0 row. `None` if name is neither pool name nor one of known headings.
    pub fn for_heading(pool_name: &str, heading: &str) -> Option<RootSlot> {
        if heading == pool_name {
            return Some(RootSlot::Data);
        }
        match heading.parse() {
            Ok(RootSlot::Data) | Err(_) => None,
            Ok(slot) => Some(slot),
        }
    }
}

/// Layout of a vdev.
#[derive(AsRefStr, Display, EnumString, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VdevType {
    #[strum(serialize = "stripe")]
    #[serde(rename = "stripe")]
    Stripe,
    #[strum(serialize = "mirror")]
    #[serde(rename = "mirror")]
    Mirror,
    #[strum(serialize = "raidz")]
    #[serde(rename = "raidz")]
    RaidZ,
    #[strum(serialize = "raidz2")]
    #[serde(rename = "raidz2")]
    RaidZ2,
    #[strum(serialize = "raidz3")]
    #[serde(rename = "raidz3")]
    RaidZ3,
    /// Log root made of a single mirror.
    #[strum(serialize = "log mirror")]
    #[serde(rename = "log mirror")]
    LogMirror,
}

impl VdevType {
    /// Type by name prefix. `raidz` is checked after `raidz3` and `raidz2`.
    pub fn from_name(name: &str) -> Option<VdevType> {
        [
            ("stripe", VdevType::Stripe),
            ("mirror", VdevType::Mirror),
            ("raidz3", VdevType::RaidZ3),
            ("raidz2", VdevType::RaidZ2),
            ("raidz", VdevType::RaidZ),
        ]
        .iter()
        .find(|(prefix, _)| name.starts_with(prefix))
        .map(|(_, vdev_type)| *vdev_type)
    }
}

/// Whether a name is a word ZFS reserves for vdevs.
pub fn is_vdev(name: &str) -> bool {
    matches!(name, "stripe" | "mirror" | "raidz" | "raidz1" | "raidz2" | "raidz3")
        || RE_VDEV.is_match(name)
}

/// Errors reported by each device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ErrorStatistics {
    /// I/O errors that occurred while issuing a read request
    pub read:     u64,
    /// I/O errors that occurred while issuing a write request
    pub write:    u64,
    /// Checksum errors, meaning the device returned corrupted data as the result of a read request
    pub checksum: u64,
}

#[derive(Debug, Clone, PartialEq, Getters, Serialize)]
#[get = "pub"]
pub struct Node {
    kind:             NodeKind,
    name:             String,
    status:           Option<Health>,
    error_statistics: ErrorStatistics,
    /// Free text after the counters, e.g. `was /dev/ada0p2`.
    note:             Option<String>,
    parent:           Option<NodeId>,
    children:         Vec<NodeId>,
    /// Only vdevs have a type and only after validation.
    vdev_type:        Option<VdevType>,
    devname:          Option<String>,
    disk:             Option<String>,
    path:             Option<String>,
    replacing:        bool,
}

impl Node {
    pub(crate) fn new<N: Into<String>>(
        kind: NodeKind,
        name: N,
        status: Option<Health>,
        error_statistics: ErrorStatistics,
    ) -> Node {
        Node {
            kind,
            name: name.into(),
            status,
            error_statistics,
            note: None,
            parent: None,
            children: Vec::new(),
            vdev_type: None,
            devname: None,
            disk: None,
            path: None,
            replacing: false,
        }
    }

    pub(crate) fn with_note(mut self, note: Option<String>) -> Node {
        self.note = note;
        self
    }

    pub(crate) fn with_replacing(mut self, replacing: bool) -> Node {
        self.replacing = replacing;
        self
    }

    pub(crate) fn set_kind(&mut self, kind: NodeKind) { self.kind = kind; }

    pub(crate) fn set_vdev_type(&mut self, vdev_type: Option<VdevType>) {
        self.vdev_type = vdev_type;
    }

    pub(crate) fn set_devname(&mut self, devname: Option<String>) { self.devname = devname; }

    pub(crate) fn set_disk(&mut self, disk: Option<String>) { self.disk = disk; }

    pub(crate) fn set_path(&mut self, path: Option<String>) { self.path = path; }

    pub fn is_leaf(&self) -> bool { self.children.is_empty() }

    pub fn is_online(&self) -> bool { self.status == Some(Health::Online) }
}

/// Pool as described by `zpool status`. Immutable once parsed and resolved.
#[derive(Debug, Clone, Getters)]
pub struct Pool {
    #[get = "pub"]
    id:         Option<String>,
    #[get = "pub"]
    name:       String,
    #[get = "pub"]
    scrub:      ScanState,
    #[get = "pub"]
    resilver:   ScanState,
    #[get = "pub"]
    properties: PoolProperties,
    nodes:      Vec<Node>,
    roots:      BTreeMap<RootSlot, NodeId>,
}

impl Pool {
    pub(crate) fn new<N: Into<String>>(
        id: Option<String>,
        name: N,
        scrub: ScanState,
        resilver: ScanState,
    ) -> Pool {
        Pool {
            id,
            name: name.into(),
            scrub,
            resilver,
            properties: PoolProperties::default(),
            nodes: Vec::new(),
            roots: BTreeMap::new(),
        }
    }

    pub(crate) fn set_properties(&mut self, properties: PoolProperties) {
        self.properties = properties;
    }

    /// Node by id. Ids are only meaningful for the pool that handed them out.
    pub fn node(&self, id: NodeId) -> &Node { &self.nodes[id.0] }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node { &mut self.nodes[id.0] }

    pub fn root(&self, slot: RootSlot) -> Option<&Node> { self.root_id(slot).map(|id| self.node(id)) }

    pub fn root_id(&self, slot: RootSlot) -> Option<NodeId> { self.roots.get(&slot).copied() }

    /// Roots in slot order.
    pub fn roots(&self) -> impl Iterator<Item = (RootSlot, NodeId)> + '_ {
        self.roots.iter().map(|(slot, id)| (*slot, *id))
    }

    pub fn children(&self, id: NodeId) -> impl Iterator<Item = (NodeId, &Node)> {
        self.node(id).children.iter().map(move |child| (*child, self.node(*child)))
    }

    pub fn parent(&self, id: NodeId) -> Option<&Node> { self.node(id).parent.map(|p| self.node(p)) }

    pub fn child_by_name(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.children(id).find(|(_, node)| node.name == name).map(|(child, _)| child)
    }

    /// Every device, roots in slot order, vdevs and devs in output order.
    pub fn devs(&self) -> Vec<NodeId> {
        let mut devs = Vec::new();
        for (_, root) in self.roots() {
            for (vdev, _) in self.children(root) {
                devs.extend(self.children(vdev).map(|(dev, _)| dev));
            }
        }
        devs
    }

    pub fn dev_by_name(&self, name: &str) -> Option<&Node> {
        self.devs().into_iter().map(|id| self.node(id)).find(|dev| dev.name == name)
    }

    /// Disk names of all resolved devices.
    pub fn disks(&self) -> Vec<&str> {
        self.devs().into_iter().filter_map(|id| self.node(id).disk.as_deref()).collect()
    }

    /// Leaves that are neither `ONLINE` nor `AVAIL`.
    pub fn find_not_online(&self) -> Vec<NodeId> {
        let mut found = Vec::new();
        for (_, root) in self.roots() {
            self.collect_not_online(root, &mut found);
        }
        found
    }

    fn collect_not_online(&self, id: NodeId, found: &mut Vec<NodeId>) {
        let node = self.node(id);
        if node.is_leaf() {
            if !node.status.as_ref().map_or(false, Health::is_healthy) {
                found.push(id);
            }
            return;
        }
        for child in &node.children {
            self.collect_not_online(*child, found);
        }
    }

    pub(crate) fn add_root(&mut self, slot: RootSlot, node: Node) -> NodeId {
        let id = self.push(node);
        self.roots.insert(slot, id);
        id
    }

    pub(crate) fn append(&mut self, parent: NodeId, mut node: Node) -> NodeId {
        node.parent = Some(parent);
        let id = self.push(node);
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Move `id` from its current parent to the end of `new_parent` children.
    pub(crate) fn reparent(&mut self, id: NodeId, new_parent: NodeId) {
        if let Some(old) = self.nodes[id.0].parent {
            self.nodes[old.0].children.retain(|child| *child != id);
        }
        self.nodes[id.0].parent = Some(new_parent);
        self.nodes[new_parent.0].children.push(id);
    }

    fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    /// Nested view used by the API layer.
    pub fn dump(&self) -> Value {
        let roots: Vec<Value> = self
            .roots()
            .map(|(_, root)| {
                let root_node = self.node(root);
                let vdevs: Vec<Value> = self
                    .children(root)
                    .map(|(vdev, vdev_node)| {
                        let disks: Vec<Value> = self
                            .children(vdev)
                            .map(|(_, dev)| {
                                json!({
                                    "name": dev.devname,
                                    "disk": dev.disk,
                                    "path": dev.path,
                                    "status": dev.status,
                                    "replacing": dev.replacing,
                                })
                            })
                            .collect();
                        json!({
                            "name": vdev_node.name,
                            "type": vdev_node.vdev_type,
                            "status": vdev_node.status,
                            "numDisks": disks.len(),
                            "disks": disks,
                        })
                    })
                    .collect();
                json!({
                    "name": root_node.name,
                    "status": root_node.status.as_ref().map_or("", Health::as_str),
                    "numVdevs": vdevs.len(),
                    "vdevs": vdevs,
                })
            })
            .collect();
        Value::Array(roots)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn vdev_words() {
        assert!(is_vdev("mirror-0"));
        assert!(is_vdev("raidz1-3"));
        assert!(is_vdev("raidz3"));
        assert!(is_vdev("stripe"));
        assert!(!is_vdev("mirrored"));
        assert!(!is_vdev("ada0p2"));
        assert!(!is_vdev("replacing-0"));
    }

    #[test]
    fn vdev_type_by_prefix() {
        assert_eq!(Some(VdevType::RaidZ), VdevType::from_name("raidz1-0"));
        assert_eq!(Some(VdevType::RaidZ2), VdevType::from_name("raidz2-1"));
        assert_eq!(Some(VdevType::RaidZ3), VdevType::from_name("raidz3-2"));
        assert_eq!(Some(VdevType::Mirror), VdevType::from_name("mirror-0"));
        assert_eq!(None, VdevType::from_name("ada0"));
        assert_eq!("log mirror", VdevType::LogMirror.as_ref());
    }

    #[test]
    fn slots() {
        assert_eq!(Some(RootSlot::Data), RootSlot::for_heading("tank", "tank"));
        assert_eq!(Some(RootSlot::Logs), RootSlot::for_heading("tank", "logs"));
        assert_eq!(Some(RootSlot::Special), RootSlot::for_heading("tank", "special"));
        assert_eq!(None, RootSlot::for_heading("tank", "data"));
        assert_eq!(None, RootSlot::for_heading("tank", "errors"));
    }

    #[test]
    fn reparent_moves_child() {
        let mut pool = Pool::new(None, "tank", ScanState::default(), ScanState::default());
        let root = pool.add_root(
            RootSlot::Data,
            Node::new(NodeKind::Root, "tank", None, ErrorStatistics::default()),
        );
        let a = pool.append(root, Node::new(NodeKind::Vdev, "a", None, ErrorStatistics::default()));
        let b = pool.append(root, Node::new(NodeKind::Vdev, "b", None, ErrorStatistics::default()));
        pool.reparent(a, b);
        assert_eq!(vec![b], pool.node(root).children().clone());
        assert_eq!(&Some(b), pool.node(a).parent());
        assert_eq!(Some(a), pool.child_by_name(b, "a"));
    }
}
