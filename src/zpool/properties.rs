//! Pool health and the raw property map returned by `zpool get`.
use std::collections::BTreeMap;

use serde::{Serialize, Serializer};

/// Represent state of zpool or vdev. Read
/// [more](https://docs.oracle.com/cd/E19253-01/819-5461/gamno/index.html).
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Health {
    /// Healthy and operational
    Online,
    /// Unhealthy, but operational,
    Degraded,
    /// Not operational
    Faulted,
    /// Taken offline by admin
    Offline,
    /// Can't open device.
    Unavailable,
    /// Physically removed while the system was running.
    Removed,
    /// Hot spare ready to be used.
    Available,
    /// Hot spare currently in use.
    InUse,
    /// Whatever else `zpool status` decided to print.
    Other(String),
}

impl Health {
    pub fn as_str(&self) -> &str {
        match self {
            Health::Online => "ONLINE",
            Health::Degraded => "DEGRADED",
            Health::Faulted => "FAULTED",
            Health::Offline => "OFFLINE",
            Health::Unavailable => "UNAVAIL",
            Health::Removed => "REMOVED",
            Health::Available => "AVAIL",
            Health::InUse => "INUSE",
            Health::Other(other) => other,
        }
    }

    /// Anything but `ONLINE` or `AVAIL` counts as trouble for a leaf.
    pub fn is_healthy(&self) -> bool { matches!(self, Health::Online | Health::Available) }
}

impl From<&str> for Health {
    fn from(val: &str) -> Health {
        match val {
            "ONLINE" => Health::Online,
            "DEGRADED" => Health::Degraded,
            "FAULTED" => Health::Faulted,
            "OFFLINE" => Health::Offline,
            "UNAVAIL" => Health::Unavailable,
            "REMOVED" => Health::Removed,
            "AVAIL" => Health::Available,
            "INUSE" => Health::InUse,
            other => Health::Other(other.to_string()),
        }
    }
}

impl Serialize for Health {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Output of `zpool get -H -o property,value all <pool>`, values untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolProperties {
    inner: BTreeMap<String, String>,
}

impl PoolProperties {
    pub fn from_stdout(stdout: &str) -> PoolProperties {
        let inner = stdout
            .lines()
            .filter_map(|line| {
                let mut split = line.splitn(2, '\t');
                match (split.next(), split.next()) {
                    (Some(key), Some(value)) if !key.is_empty() => {
                        Some((key.to_string(), value.to_string()))
                    },
                    _ => None,
                }
            })
            .collect();
        PoolProperties { inner }
    }

    pub fn get(&self, key: &str) -> Option<&str> { self.inner.get(key).map(String::as_str) }

    pub fn health(&self) -> Option<Health> { self.get("health").map(Health::from) }

    pub fn guid(&self) -> Option<&str> { self.get("guid") }

    pub fn len(&self) -> usize { self.inner.len() }

    pub fn is_empty(&self) -> bool { self.inner.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
