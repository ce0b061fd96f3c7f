//! Pool name rules of `zpool create`.
use super::{ZpoolError, ZpoolResult};

/// Words that name vdev types and can't start a pool name.
static RESERVED_PREFIXES: &[&str] = &["mirror", "raidz", "draid", "spare"];

/// Names `zpool` keeps for itself.
static RESERVED_NAMES: &[&str] = &["cache", "dedup", "special", "log", "logs", "spare", "spares"];

pub static POOL_NAME_MAX_LENGTH: usize = 255;

pub fn validate_name(name: &str) -> ZpoolResult<()> {
    let invalid = |reason| Err(ZpoolError::InvalidName(name.to_string(), reason));
    match name.chars().next() {
        None => return invalid("empty name"),
        Some(c) if !c.is_ascii_alphabetic() => return invalid("must begin with a letter"),
        _ => {},
    }
    if name.len() > POOL_NAME_MAX_LENGTH {
        return invalid("name is too long");
    }
    if let Some(c) = name.chars().find(|c| !c.is_ascii_alphanumeric() && !"_-.: ".contains(*c)) {
        return Err(ZpoolError::InvalidName(
            name.to_string(),
            if c == '/' { "nested names are datasets, not pools" } else { "invalid character" },
        ));
    }
    if RESERVED_NAMES.contains(&name) {
        return invalid("name is reserved");
    }
    if RESERVED_PREFIXES.iter().any(|prefix| name.starts_with(prefix)) {
        return invalid("name begins with a reserved vdev type");
    }
    // c0, c1d2... look like Solaris device names.
    let mut chars = name.chars();
    if chars.next() == Some('c') && chars.next().map_or(false, |c| c.is_ascii_digit()) {
        return invalid("name looks like a device");
    }
    Ok(())
}
