//! Property maps as `zfs get -H -p` reports them.
//!
//! Every property is kept as `{raw, parsed, source}`. `parsed` is the typed view of `raw`:
//! `on`/`off` become booleans, numbers become numbers and `-` becomes `null`.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::utils::{parse_bool, parse_float};

/// Where the value of a property comes from.
#[derive(AsRefStr, Display, EnumString, Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum SourceKind {
    None,
    Default,
    Temporary,
    Local,
    Inherited,
    Received,
}

#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq, Getters)]
#[get = "pub"]
pub struct PropertySource {
    #[serde(rename = "type")]
    kind:  SourceKind,
    /// Dataset the value is inherited from.
    value: Option<String>,
}

impl PropertySource {
    pub fn new(kind: SourceKind, value: Option<String>) -> PropertySource {
        PropertySource { kind, value }
    }

    /// Source column of `zfs get`.
    pub fn from_column(column: &str) -> PropertySource {
        let column = column.trim();
        if let Some(parent) = column.strip_prefix("inherited from ") {
            return PropertySource::new(SourceKind::Inherited, Some(parent.to_string()));
        }
        let kind = match column {
            "default" => SourceKind::Default,
            "temporary" => SourceKind::Temporary,
            "local" => SourceKind::Local,
            "received" => SourceKind::Received,
            _ => SourceKind::None,
        };
        PropertySource::new(kind, None)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Parsed {
    Null,
    Bool(bool),
    Integer(i64),
    Unsigned(u64),
    Float(f64),
    Text(String),
}

/// Properties whose `on`/`off` (or `yes`/`no`) value is a boolean.
static BOOLEAN_PROPERTIES: &[&str] = &[
    "atime",
    "defer_destroy",
    "devices",
    "exec",
    "jailed",
    "mounted",
    "nbmand",
    "overlay",
    "readonly",
    "relatime",
    "setuid",
    "utf8only",
    "vscan",
    "xattr",
    "zoned",
];

/// Sizes where `0` means "not set".
static NULLABLE_SIZES: &[&str] = &["quota", "refquota", "reservation", "refreservation"];

impl Parsed {
    pub fn infer(property: &str, raw: &str) -> Parsed {
        if raw == "-" || raw.is_empty() {
            return Parsed::Null;
        }
        if BOOLEAN_PROPERTIES.contains(&property) {
            if let Some(flag) = parse_bool(raw) {
                return Parsed::Bool(flag);
            }
        }
        if NULLABLE_SIZES.contains(&property) && (raw == "0" || raw == "none") {
            return Parsed::Null;
        }
        if let Ok(int) = raw.parse::<i64>() {
            return Parsed::Integer(int);
        }
        if let Ok(unsigned) = raw.parse::<u64>() {
            return Parsed::Unsigned(unsigned);
        }
        if raw.bytes().any(|b| b.is_ascii_digit()) {
            if let Ok(float) = parse_float(raw.trim_end_matches('x')) {
                return Parsed::Float(float);
            }
        }
        Parsed::Text(raw.to_string())
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Parsed::Integer(int) if *int >= 0 => Some(*int as u64),
            Parsed::Unsigned(unsigned) => Some(*unsigned),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Getters)]
#[get = "pub"]
pub struct PropertyValue {
    raw:    String,
    parsed: Parsed,
    source: PropertySource,
}

impl PropertyValue {
    pub fn new(property: &str, raw: &str, source: PropertySource) -> PropertyValue {
        PropertyValue { raw: raw.to_string(), parsed: Parsed::infer(property, raw), source }
    }

    /// User properties are never parsed.
    pub fn user(raw: &str, source: PropertySource) -> PropertyValue {
        PropertyValue { raw: raw.to_string(), parsed: Parsed::Text(raw.to_string()), source }
    }
}

pub type PropertyMap = BTreeMap<String, PropertyValue>;

/// Native properties that are published under a different name.
static RENAMED_PROPERTIES: &[(&str, &str)] = &[
    ("dedup", "deduplication"),
    ("encryption", "encryption_algorithm"),
    ("encryptionroot", "encryption_root"),
    ("keyformat", "key_format"),
    ("special_small_blocks", "special_small_block_size"),
];

/// `(key, alias, default)` of user properties the appliance manages.
pub static USER_PROPERTIES: &[(&str, &str, Option<u64>)] = &[
    ("org.freenas:description", "comments", None),
    ("org.freenas:quota_warning", "quota_warning", Some(75)),
    ("org.freenas:quota_critical", "quota_critical", Some(95)),
    ("org.freenas:refquota_warning", "refquota_warning", Some(75)),
    ("org.freenas:refquota_critical", "refquota_critical", Some(95)),
    ("org.truenas:managedby", "managedby", None),
];

/// Name a native property is published under.
pub fn published_name(property: &str) -> &str {
    RENAMED_PROPERTIES
        .iter()
        .find(|(native, _)| *native == property)
        .map_or(property, |(_, renamed)| *renamed)
}

/// Native name of a published property. Reverse of [`published_name`].
pub fn native_name(property: &str) -> &str {
    RENAMED_PROPERTIES
        .iter()
        .find(|(_, renamed)| *renamed == property)
        .map_or(property, |(native, _)| *native)
}

/// Alias of a managed user property.
pub fn user_property_alias(key: &str) -> Option<&'static str> {
    USER_PROPERTIES.iter().find(|(k, ..)| *k == key).map(|(_, alias, _)| *alias)
}

/// Default of a managed user property, looked up by key or alias.
pub fn user_property_default(name: &str) -> Option<u64> {
    USER_PROPERTIES
        .iter()
        .find(|(key, alias, _)| *key == name || *alias == name)
        .and_then(|(.., default)| *default)
}

/// Managed user properties missing from `user` get their default, sourced `DEFAULT`.
pub fn fill_user_property_defaults(user: &mut PropertyMap) {
    for (_, alias, default) in USER_PROPERTIES.iter() {
        if let Some(default) = default {
            user.entry(alias.to_string()).or_insert_with(|| {
                PropertyValue::user(&default.to_string(), PropertySource::new(SourceKind::Default, None))
            });
        }
    }
}

/// User properties have a colon in their name.
pub fn is_user_property(property: &str) -> bool { property.contains(':') }

/// Split `zfs get -H -p -o name,property,value,source` output into per-dataset maps, keeping the
/// order datasets appear in. Native properties are renamed, user properties aliased.
pub fn parse_get_output(stdout: &str) -> Vec<(String, PropertyMap, PropertyMap)> {
    let mut out: Vec<(String, PropertyMap, PropertyMap)> = Vec::new();
    for line in stdout.lines() {
        let mut columns = line.split('\t');
        let (name, property, value, source) =
            match (columns.next(), columns.next(), columns.next(), columns.next()) {
                (Some(name), Some(property), Some(value), source) if !name.is_empty() => {
                    (name, property, value, source.unwrap_or("-"))
                },
                _ => continue,
            };
        if out.last().map_or(true, |(last, ..)| last != name) {
            out.push((name.to_string(), PropertyMap::new(), PropertyMap::new()));
        }
        let source = PropertySource::from_column(source);
        if let Some((_, native, user)) = out.last_mut() {
            if is_user_property(property) {
                let key = user_property_alias(property).unwrap_or(property);
                user.insert(key.to_string(), PropertyValue::user(value, source));
            } else {
                native.insert(
                    published_name(property).to_string(),
                    PropertyValue::new(property, value, source),
                );
            }
        }
    }
    out
}
