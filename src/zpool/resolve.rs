//! Attach `devname`, `disk` and `path` to every device of a parsed pool.
use regex::Regex;
use slog::Logger;

use super::{geom::GeomMesh,
            topology::{NodeId, Pool}};

/// Look up `path` of a vdev by its guid in `zdb -C` output.
pub fn path_from_zdb(zdb: &str, guid: &str) -> Option<String> {
    let pattern = format!(r"(?ms)\bguid[:=]\s?{}.*?path[:=]\s?'(?P<path>.*?)'$", regex::escape(guid));
    let re = Regex::new(&pattern).ok()?;
    re.captures(zdb).map(|caps| caps["path"].to_string())
}

/// Resolve every device of `pool` against `mesh`.
///
/// Order of lookups for a device:
/// 1. an ELI provider is replaced by the provider it encrypts;
/// 2. a LABEL provider gives `devname` (label geom) and the underlying provider;
/// 3. otherwise `devname` is the name without `.nop` and a DEV geom of that name gives the
///    provider;
/// 4. unresolved `ONLINE` devices use their name as disk; all-digit names are guids and get
///    `path` from `zdb_config`, which is called at most once.
///
/// `disk` is the geom owning the provider found in 2 or 3.
pub fn resolve_devices<F>(pool: &mut Pool, mesh: &GeomMesh, logger: &Logger, mut zdb_config: F)
where
    F: FnMut(&str) -> Option<String>,
{
    let mut zdb: Option<Option<String>> = None;
    let pool_name = pool.name().clone();
    let devs: Vec<NodeId> = pool.devs();
    for id in devs {
        let node = pool.node(id);
        let mut name = node.name().clone();
        if let Some(backing) = mesh.eli_backing_provider(&name) {
            name = backing.to_string();
        }

        let mut disk = None;
        let mut path = None;
        let (devname, provider) = match mesh.label_source(&name) {
            Some((label_geom, provider)) => (label_geom.to_string(), Some(provider)),
            None => {
                let bare = name.strip_suffix(".nop").unwrap_or(&name).to_string();
                let provider = mesh.dev_source(&bare);
                if provider.is_none() {
                    if node.is_online() {
                        warn!(logger, "It should be a valid device"; "dev" => node.name().as_str());
                        disk = Some(node.name().clone());
                    } else if !node.name().is_empty() && node.name().chars().all(|c| c.is_ascii_digit()) {
                        let config = zdb.get_or_insert_with(|| zdb_config(&pool_name));
                        path = config.as_deref().and_then(|text| path_from_zdb(text, node.name()));
                    }
                }
                (bare, provider)
            },
        };
        if let Some(provider) = provider {
            disk = mesh.provider_owner(provider).map(String::from);
        }

        let node = pool.node_mut(id);
        node.set_devname(Some(devname));
        node.set_disk(disk);
        node.set_path(path);
    }
}

#[cfg(test)]
mod test {
    use slog::{o, Discard};

    use super::*;
    use crate::zpool::{geom::test::MESH, status::parse_status};

    fn logger() -> Logger { Logger::root(Discard, o!()) }

    static ZDB: &str = "tank:
    version: 5000
    name: 'tank'
    vdev_tree:
        type: 'root'
        children[0]:
            type: 'mirror'
            children[0]:
                type: 'disk'
                id: 0
                guid: 1234567890123456789
                path: '/dev/ada1p2'
                whole_disk: 1
            children[1]:
                type: 'disk'
                id: 1
                guid: 42
                path: '/dev/ada4p2'
";

    #[test]
    fn zdb_guid_path() {
        assert_eq!(Some(String::from("/dev/ada1p2")), path_from_zdb(ZDB, "1234567890123456789"));
        assert_eq!(Some(String::from("/dev/ada4p2")), path_from_zdb(ZDB, "42"));
        assert_eq!(None, path_from_zdb(ZDB, "7"));
    }

    #[test]
    fn nop_dev_resolves_to_disk() {
        let stdout = "config:\n\
                      \ttank         ONLINE       0     0     0\n\
                      \t  zd15.nop   ONLINE       0     0     0\n";
        let mut pool = parse_status("tank", stdout).unwrap();
        let mesh = GeomMesh::from_xml(MESH).unwrap();
        resolve_devices(&mut pool, &mesh, &logger(), |_| None);
        let dev = pool.dev_by_name("zd15.nop").unwrap();
        assert_eq!(&Some(String::from("zd15")), dev.devname());
        assert_eq!(&Some(String::from("zd15")), dev.disk());
    }

    #[test]
    fn eli_and_label() {
        let stdout = "config:\n\
                      \ttank                  ONLINE       0     0     0\n\
                      \t  mirror-0            ONLINE       0     0     0\n\
                      \t    gptid/abc.eli     ONLINE       0     0     0\n\
                      \t    ada0p2            ONLINE       0     0     0\n\
                      \t    ada7              ONLINE       0     0     0\n\
                      \t    1234567890123456789  UNAVAIL   0     0     0  was /dev/ada1p2\n\
                      \t    ada8              OFFLINE      0     0     0\n";
        let mut pool = parse_status("tank", stdout).unwrap();
        let mesh = GeomMesh::from_xml(MESH).unwrap();
        let mut zdb_calls = 0;
        resolve_devices(&mut pool, &mesh, &logger(), |name| {
            zdb_calls += 1;
            assert_eq!("tank", name);
            Some(ZDB.to_string())
        });
        assert_eq!(1, zdb_calls);

        let eli = pool.dev_by_name("gptid/abc.eli").unwrap();
        assert_eq!(&Some(String::from("ada0p2")), eli.devname());
        assert_eq!(&Some(String::from("ada0")), eli.disk());

        let part = pool.dev_by_name("ada0p2").unwrap();
        assert_eq!(&Some(String::from("ada0p2")), part.devname());
        assert_eq!(&Some(String::from("ada0")), part.disk());

        let unknown_online = pool.dev_by_name("ada7").unwrap();
        assert_eq!(&Some(String::from("ada7")), unknown_online.disk());

        let guid = pool.dev_by_name("1234567890123456789").unwrap();
        assert_eq!(&None, guid.disk());
        assert_eq!(&Some(String::from("/dev/ada1p2")), guid.path());

        let offline = pool.dev_by_name("ada8").unwrap();
        assert_eq!(&None, offline.disk());
        assert_eq!(&None, offline.path());

        assert_eq!(vec!["ada0", "ada0", "ada7"], pool.disks());
    }
}
