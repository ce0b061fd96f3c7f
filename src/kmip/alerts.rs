use serde_json::{json, Value};
use slog::Logger;
use strum_macros::IntoStaticStr;

/// One-shot alerts raised by the sync core.
#[derive(IntoStaticStr, Debug, Clone, PartialEq, Eq)]
pub enum Alert {
    #[strum(serialize = "KMIPConnectionFailed")]
    ConnectionFailed { server: String, error: String },
    #[strum(serialize = "KMIPZFSDatasetsSyncFailure")]
    ZfsDatasetsSyncFailure { datasets: Vec<String> },
    #[strum(serialize = "KMIPSEDDisksSyncFailure")]
    SedDisksSyncFailure { disks: Vec<String> },
    #[strum(serialize = "KMIPSEDGlobalPasswordSyncFailure")]
    SedGlobalPasswordSyncFailure,
}

impl Alert {
    /// Alert class name.
    pub fn klass(&self) -> &'static str { self.into() }

    /// Alert arguments, lists joined with commas.
    pub fn args(&self) -> Value {
        match self {
            Alert::ConnectionFailed { server, error } => json!({"server": server, "error": error}),
            Alert::ZfsDatasetsSyncFailure { datasets } => json!({"datasets": datasets.join(",")}),
            Alert::SedDisksSyncFailure { disks } => json!({"disks": disks.join(",")}),
            Alert::SedGlobalPasswordSyncFailure => Value::Null,
        }
    }
}

pub trait AlertSink: Send + Sync {
    fn oneshot_create(&self, alert: Alert);
}

/// Sink for when nothing upstream collects alerts. Writes them to the log.
pub struct LogAlertSink {
    logger: Logger,
}

impl Default for LogAlertSink {
    fn default() -> LogAlertSink { LogAlertSink { logger: crate::GlobalLogger::component("kmip", "alerts") } }
}

impl AlertSink for LogAlertSink {
    fn oneshot_create(&self, alert: Alert) {
        warn!(self.logger, "alert"; "class" => alert.klass(), "args" => %alert.args());
    }
}
