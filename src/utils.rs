//! Small parsing helpers shared by the zpool, zfs and zvol modules.
use std::path::{Path, PathBuf};

/// Where ZFS publishes volume device links.
pub static ZVOL_DEV_ROOT: &str = "/dev/zvol";

/// Very pricey way of parsing strings. Used because some ratios have `x` character, and some don't.
#[inline(always)]
pub fn parse_float(input: &str) -> Result<f64, std::num::ParseFloatError> {
    input.strip_suffix('x').unwrap_or(input).parse()
}

/// Parse human sizes as printed by `zpool status` and `zfs list` without `-p`: `512`, `1K`,
/// `1.50M`, `200G`, `3T`. Suffixes are powers of 1024 and an optional trailing `B` is accepted.
pub fn parse_size(input: &str) -> Option<u64> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    let without_b = match trimmed.strip_suffix('B') {
        Some(rest) if !rest.is_empty() => rest,
        _ => trimmed,
    };
    let (number, multiplier) = match without_b.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => {
            let exp = match c.to_ascii_uppercase() {
                'K' => 1,
                'M' => 2,
                'G' => 3,
                'T' => 4,
                'P' => 5,
                'E' => 6,
                _ => return None,
            };
            (&without_b[..without_b.len() - 1], 1024_u64.pow(exp))
        },
        _ => (without_b, 1),
    };
    if let Ok(whole) = number.parse::<u64>() {
        return whole.checked_mul(multiplier);
    }
    let value: f64 = number.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some((value * multiplier as f64).round() as u64)
}

/// `on`/`off` style booleans. Anything else is not a boolean.
pub fn parse_bool(input: &str) -> Option<bool> {
    match input {
        "on" | "yes" | "true" | "1" => Some(true),
        "off" | "no" | "false" | "0" => Some(false),
        _ => None,
    }
}

/// `tank/my vol` -> `/dev/zvol/tank/my+vol`.
pub fn zvol_name_to_path(name: &str) -> PathBuf {
    Path::new(ZVOL_DEV_ROOT).join(name.replace(' ', "+"))
}

/// Inverse of [`zvol_name_to_path`]. Returns `None` for paths outside of `/dev/zvol`.
pub fn zvol_path_to_name<P: AsRef<Path>>(path: P) -> Option<String> {
    zvol_path_to_name_in(Path::new(ZVOL_DEV_ROOT), path.as_ref())
}

pub(crate) fn zvol_path_to_name_in(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let name = relative.to_str()?;
    if name.is_empty() {
        return None;
    }
    Some(name.replace('+', " "))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sizes_with_suffixes() {
        assert_eq!(Some(512), parse_size("512"));
        assert_eq!(Some(1024), parse_size("1K"));
        assert_eq!(Some(1024), parse_size("1KB"));
        assert_eq!(Some(200 * 1024 * 1024), parse_size("200M"));
        assert_eq!(Some(1536 * 1024), parse_size("1.50M"));
        assert_eq!(Some(3 * 1024_u64.pow(4)), parse_size("3T"));
        assert_eq!(Some(0), parse_size("0B"));
    }

    #[test]
    fn sizes_garbage() {
        assert_eq!(None, parse_size(""));
        assert_eq!(None, parse_size("-"));
        assert_eq!(None, parse_size("12Q"));
        assert_eq!(None, parse_size("lots"));
    }

    #[test]
    fn ratio_with_x() {
        assert_eq!(Ok(1.5), parse_float("1.50x"));
        assert_eq!(Ok(2.0), parse_float("2.00"));
    }

    #[test]
    fn zvol_path_spaces() {
        let path = zvol_name_to_path("tank/vms/my disk");
        assert_eq!(PathBuf::from("/dev/zvol/tank/vms/my+disk"), path);
        assert_eq!(Some(String::from("tank/vms/my disk")), zvol_path_to_name(&path));
        assert_eq!(None, zvol_path_to_name("/dev/sda"));
        assert_eq!(None, zvol_path_to_name("/dev/zvol"));
    }

    #[test]
    fn booleans() {
        assert_eq!(Some(true), parse_bool("on"));
        assert_eq!(Some(false), parse_bool("off"));
        assert_eq!(None, parse_bool("sa"));
    }
}
