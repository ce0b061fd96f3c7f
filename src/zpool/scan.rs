//! Scrub and resilver sub-states of `zpool status`.
use regex::Regex;
use serde::{Serialize, Serializer};
use strum_macros::{AsRefStr, Display, EnumString};

lazy_static! {
    static ref RE_SCRUB: Regex = Regex::new(r"(?ms)scan: (scrub.+?)\b[a-z]+:").expect("RE_SCRUB");
    static ref RE_RESILVER: Regex =
        Regex::new(r"(?ms)scan: (resilver.+?)\b[a-z]+:").expect("RE_RESILVER");
    static ref RE_PROGRESS: Regex = Regex::new(r"(\S+)% done").expect("RE_PROGRESS");
    static ref RE_REPAIRED_SO_FAR: Regex = Regex::new(r"(\S+) repaired,").expect("RE_REPAIRED_SO_FAR");
    static ref RE_SCANNED: Regex = Regex::new(r"(\S+) scanned out of (\S+)").expect("RE_SCANNED");
    static ref RE_TOGO: Regex = Regex::new(r"(\S+) to go").expect("RE_TOGO");
    static ref RE_ERRORS: Regex = Regex::new(r"with (\S+) errors").expect("RE_ERRORS");
    static ref RE_REPAIRED: Regex = Regex::new(r"repaired (\S+) in").expect("RE_REPAIRED");
    static ref RE_DATE: Regex = Regex::new(r"on (.+\d{2} \d{4})").expect("RE_DATE");
}

#[derive(AsRefStr, Display, EnumString, Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub enum ScanStatus {
    #[strum(serialize = "NONE")]
    #[serde(rename = "NONE")]
    None,
    #[strum(serialize = "IN_PROGRESS")]
    #[serde(rename = "IN_PROGRESS")]
    InProgress,
    #[strum(serialize = "COMPLETED")]
    #[serde(rename = "COMPLETED")]
    Completed,
    #[strum(serialize = "CANCELED")]
    #[serde(rename = "CANCELED")]
    Canceled,
    #[strum(serialize = "UNKNOWN")]
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl ScanStatus {
    /// Human readable label.
    pub fn verbose(self) -> &'static str {
        match self {
            ScanStatus::None => "None requested",
            ScanStatus::InProgress => "In Progress",
            ScanStatus::Completed => "Completed",
            ScanStatus::Canceled => "Canceled",
            ScanStatus::Unknown => "Unknown",
        }
    }
}

/// Which kind of scan to look for.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ScanKind {
    Scrub,
    Resilver,
}

/// State of one scan. Fields that don't apply to the state are `None`, sizes are kept as printed.
#[derive(Debug, Clone, PartialEq, Getters, Serialize)]
#[get = "pub"]
pub struct ScanState {
    status:   ScanStatus,
    /// Percent done. Whole numbers serialize as integers.
    #[serde(serialize_with = "serialize_progress")]
    progress: Option<f64>,
    repaired: Option<String>,
    scanned:  Option<String>,
    total:    Option<String>,
    togo:     Option<String>,
    errors:   Option<String>,
    date:     Option<String>,
}

impl Default for ScanState {
    fn default() -> ScanState { ScanState::with_status(ScanStatus::None) }
}

fn serialize_progress<S: Serializer>(progress: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
    match progress {
        Some(p) if p.fract() == 0.0 && *p >= 0.0 && *p <= u64::MAX as f64 => serializer.serialize_u64(*p as u64),
        Some(p) => serializer.serialize_f64(*p),
        None => serializer.serialize_none(),
    }
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text).and_then(|caps| caps.get(1)).map(|m| m.as_str().to_string())
}

impl ScanState {
    fn with_status(status: ScanStatus) -> ScanState {
        ScanState {
            status,
            progress: None,
            repaired: None,
            scanned: None,
            total: None,
            togo: None,
            errors: None,
            date: None,
        }
    }

    pub fn status_verbose(&self) -> &'static str { self.status.verbose() }

    /// Extract scan sub-state from full `zpool status` output.
    pub fn parse(kind: ScanKind, stdout: &str) -> ScanState {
        let re = match kind {
            ScanKind::Scrub => &*RE_SCRUB,
            ScanKind::Resilver => &*RE_RESILVER,
        };
        let scan = match re.captures(stdout).and_then(|caps| caps.get(1)) {
            Some(m) => m.as_str(),
            None => return ScanState::default(),
        };

        if scan.contains("in progress") {
            let mut state = ScanState::with_status(ScanStatus::InProgress);
            state.progress = capture(&RE_PROGRESS, scan).and_then(|p| p.parse().ok());
            if kind == ScanKind::Scrub {
                state.repaired = capture(&RE_REPAIRED_SO_FAR, scan);
            }
            if let Some(caps) = RE_SCANNED.captures(scan) {
                state.scanned = Some(caps[1].trim_end_matches(',').to_string());
                state.total = Some(caps[2].trim_end_matches(',').to_string());
            }
            state.togo = capture(&RE_TOGO, scan);
            return state;
        }

        let completed = match kind {
            ScanKind::Scrub => scan.contains("scrub repaired"),
            ScanKind::Resilver => scan.contains("resilvered"),
        };
        if completed {
            let mut state = ScanState::with_status(ScanStatus::Completed);
            state.errors = capture(&RE_ERRORS, scan);
            if kind == ScanKind::Scrub {
                state.repaired = capture(&RE_REPAIRED, scan);
            }
            state.date = capture(&RE_DATE, scan);
            return state;
        }

        let canceled = match kind {
            ScanKind::Scrub => "scrub canceled",
            ScanKind::Resilver => "resilver canceled",
        };
        if scan.contains(canceled) {
            ScanState::with_status(ScanStatus::Canceled)
        } else {
            ScanState::with_status(ScanStatus::Unknown)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    static SCRUB_IN_PROGRESS: &str = "  pool: tank
 state: ONLINE
  scan: scrub in progress since Mon Jan  1 10:00:00 2024
        100M scanned out of 200M at 1.50M/s, 00:01:02 to go
        1K repaired, 42.00% done
config:

        NAME        STATE     READ WRITE CKSUM
";

    #[test]
    fn scrub_in_progress() {
        let scrub = ScanState::parse(ScanKind::Scrub, SCRUB_IN_PROGRESS);
        assert_eq!(&ScanStatus::InProgress, scrub.status());
        assert_eq!(&Some(42.0), scrub.progress());
        assert_eq!(&Some(String::from("1K")), scrub.repaired());
        assert_eq!(&Some(String::from("100M")), scrub.scanned());
        assert_eq!(&Some(String::from("200M")), scrub.total());
        assert_eq!(&Some(String::from("00:01:02")), scrub.togo());
        assert_eq!("In Progress", scrub.status_verbose());
        assert_eq!(serde_json::json!(42), serde_json::to_value(&scrub).unwrap()["progress"]);

        let resilver = ScanState::parse(ScanKind::Resilver, SCRUB_IN_PROGRESS);
        assert_eq!(&ScanStatus::None, resilver.status());
        assert_eq!("None requested", resilver.status_verbose());
    }

    #[test]
    fn total_with_trailing_comma() {
        let stdout = "  scan: scrub in progress since Sun Jul 25 16:07:49 2021\n\t\
                      3.51G scanned out of 200M, 1.2G/s, 0h0m to go\n\t0 repaired, 12.5% done\nconfig:\n";
        let scrub = ScanState::parse(ScanKind::Scrub, stdout);
        assert_eq!(&Some(String::from("200M")), scrub.total());
        assert_eq!(&Some(12.5), scrub.progress());
        assert_eq!(serde_json::json!(12.5), serde_json::to_value(&scrub).unwrap()["progress"]);
    }

    #[test]
    fn scrub_completed() {
        let stdout = "  scan: scrub repaired 0 in 0 days 00:01:54 with 0 errors on Tue Nov 28 11:32:55 2017\nconfig:\n";
        let scrub = ScanState::parse(ScanKind::Scrub, stdout);
        assert_eq!(&ScanStatus::Completed, scrub.status());
        assert_eq!(&Some(String::from("0")), scrub.repaired());
        assert_eq!(&Some(String::from("0")), scrub.errors());
        assert_eq!(&Some(String::from("Tue Nov 28 11:32:55 2017")), scrub.date());
        assert_eq!(&None, scrub.progress());
    }

    #[test]
    fn resilver_completed() {
        let stdout = "  scan: resilvered 1.21G in 0 days 00:00:26 with 0 errors on Thu Apr  2 14:00:26 2020\nconfig:\n";
        let resilver = ScanState::parse(ScanKind::Resilver, stdout);
        assert_eq!(&ScanStatus::Completed, resilver.status());
        assert_eq!(&Some(String::from("0")), resilver.errors());
        assert_eq!(&Some(String::from("Thu Apr  2 14:00:26 2020")), resilver.date());
        assert_eq!(&None, resilver.repaired());
    }

    #[test]
    fn canceled_and_unknown() {
        let canceled = "  scan: scrub canceled on Fri Mar  3 10:00:00 2023\nconfig:\n";
        assert_eq!(&ScanStatus::Canceled, ScanState::parse(ScanKind::Scrub, canceled).status());

        let paused = "  scan: scrub paused since Fri Mar  3 10:00:00 2023\nconfig:\n";
        assert_eq!(&ScanStatus::Unknown, ScanState::parse(ScanKind::Scrub, paused).status());
    }

    #[test]
    fn no_scan() {
        let stdout = "  scan: none requested\nconfig:\n";
        assert_eq!(ScanState::default(), ScanState::parse(ScanKind::Scrub, stdout));
    }
}
