use std::{io, sync::Arc, time::Duration};

use slog::{o, Discard, Logger};
use zettaplane::{gateway::{CommandOutput, CommandRunner, Program},
                 zpool::{resolve::resolve_devices,
                         scan::{ScanKind, ScanState},
                         status::parse_status,
                         GeomMesh, Health, RootSlot, ScanStatus, VdevType, ZpoolEngine, ZpoolErrorKind, ZpoolOpen3}};

static STATUS: &str = "  pool: tank
 id: 4242424242
 state: ONLINE
  scan: scrub in progress since Mon Jan  1 10:00:00 2024
        100M scanned out of 200M at 1.50M/s, 00:01:02 to go
        1K repaired, 42.00% done
config:

\tNAME          STATE     READ WRITE CKSUM
\ttank          ONLINE       0     0     0
\t  mirror-0    ONLINE       0     0     0
\t    ada0p2    ONLINE       0     0     0
\t    zd15.nop  ONLINE       0     0     3
\tcache
\t  ada1        ONLINE       0     0     0

errors: No known data errors
";

static MESH: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<mesh>
  <class id="0x10">
    <name>DISK</name>
    <geom id="0x11">
      <class ref="0x10"/>
      <name>ada0</name>
      <provider id="0x12"><geom ref="0x11"/><name>ada0</name></provider>
    </geom>
    <geom id="0x13">
      <class ref="0x10"/>
      <name>zd15</name>
      <provider id="0x14"><geom ref="0x13"/><name>zd15</name></provider>
    </geom>
    <geom id="0x15">
      <class ref="0x10"/>
      <name>ada1</name>
      <provider id="0x16"><geom ref="0x15"/><name>ada1</name></provider>
    </geom>
  </class>
  <class id="0x20">
    <name>PART</name>
    <geom id="0x21">
      <class ref="0x20"/>
      <name>ada0</name>
      <consumer id="0x22"><geom ref="0x21"/><provider ref="0x12"/></consumer>
      <provider id="0x23"><geom ref="0x21"/><name>ada0p2</name></provider>
    </geom>
  </class>
  <class id="0x50">
    <name>DEV</name>
    <geom id="0x51">
      <class ref="0x50"/>
      <name>ada0p2</name>
      <consumer id="0x52"><geom ref="0x51"/><provider ref="0x23"/></consumer>
    </geom>
    <geom id="0x53">
      <class ref="0x50"/>
      <name>zd15</name>
      <consumer id="0x54"><geom ref="0x53"/><provider ref="0x14"/></consumer>
    </geom>
    <geom id="0x55">
      <class ref="0x50"/>
      <name>ada1</name>
      <consumer id="0x56"><geom ref="0x55"/><provider ref="0x16"/></consumer>
    </geom>
  </class>
</mesh>
"#;

/// Plays back `zpool` output for a pool called tank.
struct Canned;

impl CommandRunner for Canned {
    fn run_with_input(&self, program: Program, args: &[&str], _input: Option<&[u8]>) -> io::Result<CommandOutput> {
        let (stdout, stderr, code) = match (program, args.first().copied(), args.last().copied()) {
            (Program::Zpool, Some("status"), Some("tank")) => (STATUS, "", 0),
            (Program::Zpool, Some("get"), Some("tank")) => ("health\tONLINE\nguid\t4242424242\nautoexpand\ton\n", "", 0),
            (Program::Zpool, _, Some(pool)) if pool != "tank" => ("", "cannot open 'gone': no such pool\n", 1),
            (Program::Zdb, ..) => ("", "zdb: can't open 'tank': No such file or directory\n", 2),
            _ => ("", "unexpected", 2),
        };
        Ok(CommandOutput::new(program, stdout, stderr, code, Duration::from_millis(1)))
    }
}

fn engine() -> ZpoolOpen3 { ZpoolOpen3::with_gateway(Arc::new(Canned)) }

#[test]
fn scrub_in_progress() {
    let pool = engine().pool("tank", &GeomMesh::empty()).unwrap();
    let scrub = pool.scrub();
    assert_eq!(&ScanStatus::InProgress, scrub.status());
    assert_eq!(&Some(42.0), scrub.progress());
    assert_eq!(&Some(String::from("1K")), scrub.repaired());
    assert_eq!(&Some(String::from("100M")), scrub.scanned());
    assert_eq!(&Some(String::from("200M")), scrub.total());
    assert_eq!(&Some(String::from("00:01:02")), scrub.togo());
    assert_eq!(&ScanStatus::None, pool.resilver().status());
    assert_eq!(serde_json::json!(42), serde_json::to_value(scrub).unwrap()["progress"]);
}

#[test]
fn pool_with_nop_device() {
    let mesh = GeomMesh::from_xml(MESH).unwrap();
    let pool = engine().pool("tank", &mesh).unwrap();
    assert_eq!(&Some(String::from("4242424242")), pool.id());
    assert_eq!(Some(Health::Online), pool.properties().health());
    assert_eq!(Some("on"), pool.properties().get("autoexpand"));

    let data = pool.root_id(RootSlot::Data).unwrap();
    let (_, mirror) = pool.children(data).next().unwrap();
    assert_eq!(&Some(VdevType::Mirror), mirror.vdev_type());

    let nop = pool.dev_by_name("zd15.nop").unwrap();
    assert_eq!(&Some(String::from("zd15")), nop.devname());
    assert_eq!(&Some(String::from("zd15")), nop.disk());
    assert_eq!(3, nop.error_statistics().checksum);

    assert_eq!(&Some(String::from("ada0")), pool.dev_by_name("ada0p2").unwrap().disk());
    assert!(pool.root(RootSlot::Cache).is_some());

    let mut disks = pool.disks();
    disks.sort_unstable();
    assert_eq!(vec!["ada0", "ada1", "zd15"], disks);
    assert!(pool.find_not_online().is_empty());
}

#[test]
fn dump_carries_disks() {
    let mesh = GeomMesh::from_xml(MESH).unwrap();
    let dump = engine().pool("tank", &mesh).unwrap().dump();
    assert!(dump.to_string().contains("\"zd15\""));
}

#[test]
fn parsing_is_repeatable() {
    let mesh = GeomMesh::from_xml(MESH).unwrap();
    assert_eq!(engine().pool("tank", &mesh).unwrap().dump(), engine().pool("tank", &mesh).unwrap().dump());
    assert_eq!(ScanState::parse(ScanKind::Scrub, STATUS), ScanState::parse(ScanKind::Scrub, STATUS));

    let logger = Logger::root(Discard, o!());
    let mut pool = parse_status("tank", STATUS).unwrap();
    assert_eq!(pool.dump(), parse_status("tank", STATUS).unwrap().dump());
    resolve_devices(&mut pool, &mesh, &logger, |_| None);
    let once = pool.dump();
    resolve_devices(&mut pool, &mesh, &logger, |_| None);
    assert_eq!(once, pool.dump());
}

#[test]
fn missing_pool() {
    let err = engine().pool("gone", &GeomMesh::empty()).unwrap_err();
    assert_eq!(ZpoolErrorKind::PoolNotFound, err.kind());
}
