//! `zpool status <pool>` to [`Pool`](../topology/struct.Pool.html).
use pest::Parser;
use regex::Regex;

use crate::{parsers::{Rule, StatusParser},
            utils::parse_size};

use super::{properties::Health,
            scan::{ScanKind, ScanState},
            topology::{is_vdev, ErrorStatistics, Node, NodeId, NodeKind, Pool, RootSlot, VdevType},
            ZpoolError, ZpoolResult};

lazy_static! {
    static ref RE_POOL_ID: Regex = Regex::new(r"id: (?P<id>\d+)").expect("RE_POOL_ID");
}

/// One tokenised row of the `config:` section.
#[derive(Debug, Clone, PartialEq)]
struct Row {
    spaces:   usize,
    name:     String,
    state:    Option<String>,
    counters: ErrorStatistics,
    note:     Option<String>,
}

impl Row {
    fn parse(line: &str) -> Option<Row> {
        let pairs = StatusParser::parse(Rule::device_row, line).ok()?;
        let mut row = Row {
            spaces:   0,
            name:     String::new(),
            state:    None,
            counters: ErrorStatistics::default(),
            note:     None,
        };
        for pair in pairs {
            match pair.as_rule() {
                Rule::indent => row.spaces = pair.as_str().len(),
                Rule::name => row.name = pair.as_str().to_string(),
                Rule::state => row.state = Some(pair.as_str().to_string()),
                Rule::counters => {
                    let parsed: Vec<Option<u64>> =
                        pair.into_inner().map(|counter| parse_size(counter.as_str())).collect();
                    if let [Some(read), Some(write), Some(checksum)] = parsed[..] {
                        row.counters = ErrorStatistics { read, write, checksum };
                    }
                },
                Rule::note => row.note = Some(pair.as_str().trim().to_string()),
                _ => {},
            }
        }
        Some(row)
    }

    fn health(&self) -> Option<Health> { self.state.as_deref().map(Health::from) }

    fn node(&self, kind: NodeKind) -> Node {
        Node::new(kind, self.name.as_str(), self.health(), self.counters).with_note(self.note.clone())
    }

    fn is_replacing(&self) -> bool { self.name.starts_with("replacing") }
}

/// Cursor over the tree while rows come in.
struct TreeBuilder {
    pool:      Pool,
    root:      Option<NodeId>,
    vdev:      Option<NodeId>,
    /// Level of the `replacing-N` container rows are currently under.
    replacing: Option<usize>,
}

impl TreeBuilder {
    fn stripe(&mut self, root: NodeId, row: &Row) -> NodeId {
        match self.pool.child_by_name(root, "stripe") {
            Some(stripe) => stripe,
            None => {
                let stripe = Node::new(NodeKind::Vdev, "stripe", row.health(), row.counters);
                self.pool.append(root, stripe)
            },
        }
    }

    fn push(&mut self, line_no: usize, line: &str, row: Row) -> ZpoolResult<()> {
        if row.spaces % 2 != 0 {
            return Err(ZpoolError::status_line(line_no, line));
        }
        let level = row.spaces / 2;
        if let Some(container) = self.replacing {
            if level <= container {
                self.replacing = None;
            }
        }

        match level {
            0 => {
                if row.name == "NAME" {
                    return Ok(());
                }
                let slot = RootSlot::for_heading(self.pool.name(), &row.name)
                    .filter(|slot| self.pool.root_id(*slot).is_none())
                    .ok_or_else(|| ZpoolError::status_line(line_no, line))?;
                self.root = Some(self.pool.add_root(slot, row.node(NodeKind::Root)));
                self.vdev = None;
            },
            1 => {
                let root = self.root.ok_or_else(|| ZpoolError::status_line(line_no, line))?;
                if row.is_replacing() {
                    self.vdev = Some(self.stripe(root, &row));
                    self.replacing = Some(level);
                } else if is_vdev(&row.name) {
                    self.vdev = Some(self.pool.append(root, row.node(NodeKind::Vdev)));
                } else {
                    let stripe = self.stripe(root, &row);
                    self.pool.append(stripe, row.node(NodeKind::Dev));
                    self.vdev = Some(stripe);
                }
            },
            _ => {
                let vdev = self.vdev.ok_or_else(|| ZpoolError::status_line(line_no, line))?;
                if row.is_replacing() {
                    self.replacing = Some(level);
                } else {
                    let replacing = level == 3 || self.replacing.is_some();
                    self.pool.append(vdev, row.node(NodeKind::Dev).with_replacing(replacing));
                }
            },
        }
        Ok(())
    }

    /// Leaf-less vdevs go under the `stripe` of their root, everything else gets a type.
    fn validate(&mut self) {
        let roots: Vec<(RootSlot, NodeId)> = self.pool.roots().collect();
        for (slot, root) in roots {
            let vdevs: Vec<NodeId> = self.pool.children(root).map(|(id, _)| id).collect();
            for vdev in vdevs {
                debug_assert!(self
                    .pool
                    .children(vdev)
                    .all(|(_, dev)| dev.kind() == &NodeKind::Dev));
                if self.pool.node(vdev).is_leaf() {
                    let stripe = match self.pool.child_by_name(root, "stripe") {
                        Some(stripe) => stripe,
                        None => {
                            let node = Node::new(
                                NodeKind::Vdev,
                                "stripe",
                                None,
                                ErrorStatistics::default(),
                            );
                            let stripe = self.pool.append(root, node);
                            self.pool.node_mut(stripe).set_vdev_type(Some(VdevType::Stripe));
                            stripe
                        },
                    };
                    self.pool.reparent(vdev, stripe);
                    self.pool.node_mut(vdev).set_kind(NodeKind::Dev);
                } else {
                    let vdev_type = VdevType::from_name(self.pool.node(vdev).name());
                    self.pool.node_mut(vdev).set_vdev_type(vdev_type);
                }
            }

            if slot == RootSlot::Logs {
                let children: Vec<NodeId> = self.pool.children(root).map(|(id, _)| id).collect();
                if let [only] = children[..] {
                    if self.pool.node(only).vdev_type() == &Some(VdevType::Mirror) {
                        self.pool.node_mut(only).set_vdev_type(Some(VdevType::LogMirror));
                    }
                }
            }
        }
    }
}

/// Parse `zpool status <name>` into a validated pool. Devices are not resolved yet and pool
/// properties are empty.
pub fn parse_status(name: &str, stdout: &str) -> ZpoolResult<Pool> {
    let scrub = ScanState::parse(ScanKind::Scrub, stdout);
    let resilver = ScanState::parse(ScanKind::Resilver, stdout);
    let id = RE_POOL_ID.captures(stdout).map(|caps| caps["id"].to_string());

    let mut builder =
        TreeBuilder { pool: Pool::new(id, name, scrub, resilver), root: None, vdev: None, replacing: None };

    let mut in_config = false;
    let mut seen_config = false;
    for (idx, line) in stdout.lines().enumerate() {
        let line_no = idx + 1;
        let heading = line.trim_start();
        if heading.starts_with("config:") {
            in_config = true;
            seen_config = true;
            continue;
        }
        if heading.starts_with("errors:") {
            in_config = false;
            continue;
        }
        if !in_config {
            continue;
        }
        let body = match line.strip_prefix('\t') {
            Some(body) => body,
            None => continue,
        };
        if body.trim().is_empty() {
            continue;
        }
        let row = Row::parse(body).ok_or_else(|| ZpoolError::status_line(line_no, line))?;
        builder.push(line_no, line, row)?;
    }

    if !seen_config {
        return Err(ZpoolError::PoolNotFound(name.to_string()));
    }
    builder.validate();
    Ok(builder.pool)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::zpool::{scan::ScanStatus, ZpoolErrorKind};

    fn devs_of<'a>(pool: &'a Pool, vdev: NodeId) -> Vec<&'a str> {
        pool.children(vdev).map(|(_, dev)| dev.name().as_str()).collect()
    }

    #[test]
    fn row_tokens() {
        let row = Row::parse("    ada1p2  ONLINE       0     1     2").unwrap();
        assert_eq!(4, row.spaces);
        assert_eq!("ada1p2", row.name);
        assert_eq!(Some(String::from("ONLINE")), row.state);
        assert_eq!(ErrorStatistics { read: 0, write: 1, checksum: 2 }, row.counters);
        assert_eq!(None, row.note);

        let row = Row::parse("logs").unwrap();
        assert_eq!(None, row.state);
        assert_eq!(ErrorStatistics::default(), row.counters);
    }

    #[test]
    fn mirror_and_stripe() {
        let stdout = "  pool: tank\n id: 1234\n state: ONLINE\n  scan: none requested\nconfig:\n\n\
                      \tNAME        STATE     READ WRITE CKSUM\n\
                      \ttank        ONLINE       0     0     0\n\
                      \t  mirror-0  ONLINE       0     0     0\n\
                      \t    ada0p2  ONLINE       0     0     0\n\
                      \t    ada1p2  ONLINE       0     0     0\n\
                      \t  ada2p2    ONLINE       0     0     0\n\
                      \t  ada3p2    ONLINE       0     0     0\n\
                      \nerrors: No known data errors\n";
        let pool = parse_status("tank", stdout).unwrap();
        assert_eq!(&Some(String::from("1234")), pool.id());
        assert_eq!(&ScanStatus::None, pool.scrub().status());

        let data = pool.root_id(RootSlot::Data).unwrap();
        let vdevs: Vec<_> = pool.children(data).map(|(id, node)| (id, node.clone())).collect();
        assert_eq!(2, vdevs.len());
        assert_eq!(&Some(VdevType::Mirror), vdevs[0].1.vdev_type());
        assert_eq!(vec!["ada0p2", "ada1p2"], devs_of(&pool, vdevs[0].0));
        assert_eq!("stripe", vdevs[1].1.name());
        assert_eq!(&Some(VdevType::Stripe), vdevs[1].1.vdev_type());
        assert_eq!(vec!["ada2p2", "ada3p2"], devs_of(&pool, vdevs[1].0));
    }

    #[test]
    fn logs_cache_spares() {
        let stdout = "config:\n\n\
                      \tNAME        STATE     READ WRITE CKSUM\n\
                      \ttank        ONLINE       0     0     0\n\
                      \t  raidz1-0  ONLINE       0     0     0\n\
                      \t    da0     ONLINE       0     0     0\n\
                      \t    da1     ONLINE       0     0     0\n\
                      \t    da2     ONLINE       0     0     0\n\
                      \tlogs\n\
                      \t  mirror-1  ONLINE       0     0     0\n\
                      \t    da3     ONLINE       0     0     0\n\
                      \t    da4     ONLINE       0     0     0\n\
                      \tcache\n\
                      \t  da5       ONLINE       0     0     0\n\
                      \tspares\n\
                      \t  da6       AVAIL\n\
                      \nerrors: No known data errors\n";
        let pool = parse_status("tank", stdout).unwrap();
        let data = pool.root_id(RootSlot::Data).unwrap();
        let (raidz, raidz_node) = pool.children(data).next().unwrap();
        assert_eq!(&Some(VdevType::RaidZ), raidz_node.vdev_type());
        assert_eq!(3, devs_of(&pool, raidz).len());

        let logs = pool.root_id(RootSlot::Logs).unwrap();
        let (_, mirror) = pool.children(logs).next().unwrap();
        assert_eq!(&Some(VdevType::LogMirror), mirror.vdev_type());

        let cache = pool.root_id(RootSlot::Cache).unwrap();
        let (stripe, _) = pool.children(cache).next().unwrap();
        assert_eq!(vec!["da5"], devs_of(&pool, stripe));

        let spare = pool.dev_by_name("da6").unwrap();
        assert_eq!(&Some(Health::Available), spare.status());
        assert!(pool.find_not_online().is_empty());
    }

    #[test]
    fn replacing_block() {
        let stdout = "config:\n\n\
                      \tNAME                        STATE     READ WRITE CKSUM\n\
                      \ttank                        DEGRADED     0     0     0\n\
                      \t  mirror-0                  DEGRADED     0     0     0\n\
                      \t    ada0p2                  ONLINE       0     0     0\n\
                      \t    replacing-1             DEGRADED     0     0     0\n\
                      \t      1234567890123456789   UNAVAIL      0     0     0  was /dev/ada1p2\n\
                      \t      ada4p2                ONLINE       0     0     0\n\
                      \nerrors: No known data errors\n";
        let pool = parse_status("tank", stdout).unwrap();
        let data = pool.root_id(RootSlot::Data).unwrap();
        let (mirror, _) = pool.children(data).next().unwrap();
        let devs: Vec<(String, bool)> =
            pool.children(mirror).map(|(_, d)| (d.name().clone(), *d.replacing())).collect();
        assert_eq!(
            vec![
                (String::from("ada0p2"), false),
                (String::from("1234567890123456789"), true),
                (String::from("ada4p2"), true),
            ],
            devs
        );
        let missing = pool.dev_by_name("1234567890123456789").unwrap();
        assert_eq!(&Some(String::from("was /dev/ada1p2")), missing.note());
        assert_eq!(1, pool.find_not_online().len());
    }

    #[test]
    fn replacing_single_disk() {
        let stdout = "config:\n\
                      \ttank             ONLINE       0     0     0\n\
                      \t  replacing-0    ONLINE       0     0     0\n\
                      \t    ada0p2       ONLINE       0     0     0\n\
                      \t    ada1p2       ONLINE       0     0     0\n\
                      \t  ada2p2         ONLINE       0     0     0\n\
                      errors: No known data errors\n";
        let pool = parse_status("tank", stdout).unwrap();
        let data = pool.root_id(RootSlot::Data).unwrap();
        let vdevs: Vec<_> = pool.children(data).collect();
        assert_eq!(1, vdevs.len());
        let devs: Vec<(String, bool)> =
            pool.children(vdevs[0].0).map(|(_, d)| (d.name().clone(), *d.replacing())).collect();
        assert_eq!(
            vec![
                (String::from("ada0p2"), true),
                (String::from("ada1p2"), true),
                (String::from("ada2p2"), false),
            ],
            devs
        );
    }

    #[test]
    fn odd_indentation_names_line() {
        let stdout = "  pool: tank\nconfig:\n\
                      \ttank        ONLINE       0     0     0\n\
                      \t   ada0     ONLINE       0     0     0\n";
        let err = parse_status("tank", stdout).unwrap_err();
        assert_eq!(ZpoolErrorKind::StatusParseError, err.kind());
        match err {
            ZpoolError::StatusParseError(line, text) => {
                assert_eq!(4, line);
                assert!(text.contains("ada0"));
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn dev_without_parent() {
        let stdout = "config:\n\t    ada0     ONLINE       0     0     0\n";
        let err = parse_status("tank", stdout).unwrap_err();
        assert_eq!(ZpoolErrorKind::StatusParseError, err.kind());
    }

    #[test]
    fn leafless_vdev_becomes_dev() {
        let stdout = "config:\n\
                      \ttank        ONLINE       0     0     0\n\
                      \t  mirror-0  ONLINE       0     0     0\n";
        let pool = parse_status("tank", stdout).unwrap();
        let data = pool.root_id(RootSlot::Data).unwrap();
        let (stripe, stripe_node) = pool.children(data).next().unwrap();
        assert_eq!("stripe", stripe_node.name());
        assert_eq!(&Some(VdevType::Stripe), stripe_node.vdev_type());
        let (_, dev) = pool.children(stripe).next().unwrap();
        assert_eq!("mirror-0", dev.name());
        assert_eq!(&NodeKind::Dev, dev.kind());
    }

    #[test]
    fn bad_counters_become_zero() {
        let row = Row::parse("  ada0  ONLINE  1 2 lots").unwrap();
        assert_eq!(ErrorStatistics::default(), row.counters);
    }

    #[test]
    fn missing_config() {
        let err = parse_status("tank", "cannot open 'tank': no such pool\n").unwrap_err();
        assert_eq!(ZpoolErrorKind::PoolNotFound, err.kind());
    }
}
