use std::io;

use regex::Regex;

use crate::parsers::geom::DocumentError;

quick_error! {
    #[derive(Debug)]
    /// Error kinds. This type will be used across zpool module.
    pub enum ZpoolError {
        /// `zpool` or `zdb` not found in the PATH.
        CmdNotFound {}
        Io(err: io::Error) {
            cause(err)
        }
        /// Trying to look at non-existent pool.
        PoolNotFound(name: String) {
            display("pool {} does not exist", name)
        }
        /// A row of the `config:` section could not be placed in the tree. Line number is
        /// 1-based and relative to the whole output.
        StatusParseError(line: usize, text: String) {
            display("failed to parse zpool status line {}: {:?}", line, text)
        }
        /// Topology document is not well-formed.
        Topology(err: DocumentError) {
            cause(err)
            from()
        }
        /// Name `zpool create` would refuse.
        InvalidName(name: String, reason: &'static str) {
            display("invalid pool name {:?}: {}", name, reason)
        }
        /// Don't know (yet) how to categorize this error. If you see this error - open an issue.
        UnknownSoFar(err: String) {}
        Unimplemented {}
    }
}

/// Type alias to `Result<T, ZpoolError>`.
pub type ZpoolResult<T, E = ZpoolError> = Result<T, E>;

lazy_static! {
    static ref RE_NO_SUCH_POOL: Regex =
        Regex::new(r"cannot open '(?P<pool>[^']+)': no such pool").expect("failed to compile RE_NO_SUCH_POOL");
}

impl From<io::Error> for ZpoolError {
    fn from(err: io::Error) -> ZpoolError {
        match err.kind() {
            io::ErrorKind::NotFound => ZpoolError::CmdNotFound,
            _ => ZpoolError::Io(err),
        }
    }
}

impl ZpoolError {
    pub fn kind(&self) -> ZpoolErrorKind {
        match self {
            ZpoolError::CmdNotFound => ZpoolErrorKind::CmdNotFound,
            ZpoolError::Io(_) => ZpoolErrorKind::Io,
            ZpoolError::PoolNotFound(_) => ZpoolErrorKind::PoolNotFound,
            ZpoolError::StatusParseError(..) => ZpoolErrorKind::StatusParseError,
            ZpoolError::Topology(_) => ZpoolErrorKind::Topology,
            ZpoolError::InvalidName(..) => ZpoolErrorKind::InvalidName,
            ZpoolError::UnknownSoFar(_) => ZpoolErrorKind::Unknown,
            ZpoolError::Unimplemented => ZpoolErrorKind::Unimplemented,
        }
    }

    pub(crate) fn from_stderr(stderr: &str) -> ZpoolError {
        match RE_NO_SUCH_POOL.captures(stderr) {
            Some(caps) => ZpoolError::PoolNotFound(caps["pool"].to_string()),
            None => ZpoolError::UnknownSoFar(stderr.trim().to_string()),
        }
    }

    pub(crate) fn status_line<S: Into<String>>(line: usize, text: S) -> ZpoolError {
        ZpoolError::StatusParseError(line, text.into())
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ZpoolErrorKind {
    CmdNotFound,
    Io,
    PoolNotFound,
    StatusParseError,
    Topology,
    InvalidName,
    Unknown,
    Unimplemented,
}

impl PartialEq for ZpoolError {
    fn eq(&self, other: &Self) -> bool { self.kind() == other.kind() }
}
