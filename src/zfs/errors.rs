use std::{borrow::Cow, io, path::PathBuf};

use pest::Parser;

use crate::parsers::zfs::{Rule, ZfsParser};

quick_error! {
    #[derive(Debug)]
    pub enum Error {
        /// `zfs` not found in the PATH.
        CmdNotFound {}
        Io(err: io::Error) {
            cause(err)
        }
        Unknown {}
        UnknownSoFar(err: String) {
            display("unclassified zfs failure: {}", err)
        }
        DatasetNotFound(dataset: PathBuf) {
            display("dataset does not exist: {}", dataset.display())
        }
        DatasetBusy(dataset: PathBuf) {
            display("dataset is busy: {}", dataset.display())
        }
        /// Dataset has no encryption root.
        NotEncrypted(dataset: String) {
            display("{} is not encrypted", dataset)
        }
        KeyAlreadyLoaded(dataset: String) {
            display("key already loaded for {}", dataset)
        }
        KeyNotLoaded(dataset: String) {
            display("key is not loaded for {}", dataset)
        }
        /// Supplied key failed verification.
        BadKey(dataset: String) {
            display("incorrect key provided for {}", dataset)
        }
        ValidationErrors(errors: Vec<ValidationError>) {
            display("validation failed: {:?}", errors)
            from()
        }
        /// `get` found nothing.
        MatchNotFound {}
        /// `get` found more than one row.
        TooManyMatches(count: usize) {
            display("expected one row, found {}", count)
        }
        Json(err: serde_json::Error) {
            cause(err)
            from()
        }
        Unimplemented {}
    }
}

quick_error! {
    /// Problems with user input. Every variant maps to an errno.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum ValidationError {
        MissingName(name: PathBuf) {}
        MissingPool(name: PathBuf) {}
        NameTooLong(name: PathBuf) {}
        InvalidName(name: String, reason: &'static str) {
            display("{}: {}", name, reason)
        }
        /// Filter or option that doesn't follow the query grammar.
        BadFilter(reason: String) {
            display("invalid query filter: {}", reason)
        }
        OverlappingPaths(first: String, second: String) {
            display("{} overlaps with {}", first, second)
        }
        /// Retention lookup without `id` filter or `limit`.
        RetentionUnbounded {}
        /// Path that can't be destroyed.
        Protected(path: String, reason: &'static str) {
            display("{}: {}", path, reason)
        }
        /// Call arguments that don't fit the operation.
        BadArgument(reason: String) {
            display("invalid argument: {}", reason)
        }
    }
}

impl ValidationError {
    pub fn errno(&self) -> i32 {
        match self {
            ValidationError::NameTooLong(_) => libc::ENAMETOOLONG,
            ValidationError::Protected(..) => libc::EPERM,
            _ => libc::EINVAL,
        }
    }
}

pub type ValidationResult<T = (), E = ValidationError> = std::result::Result<T, E>;

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Error { Error::ValidationErrors(vec![err]) }
}

impl From<io::Error> for Error {
    #[allow(clippy::wildcard_enum_match_arm)]
    fn from(err: io::Error) -> Error {
        match err.kind() {
            io::ErrorKind::NotFound => Error::CmdNotFound,
            _ => Error::Io(err),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::CmdNotFound => ErrorKind::CmdNotFound,
            Error::Io(_) => ErrorKind::Io,
            Error::DatasetNotFound(_) => ErrorKind::DatasetNotFound,
            Error::DatasetBusy(_) => ErrorKind::DatasetBusy,
            Error::NotEncrypted(_) => ErrorKind::NotEncrypted,
            Error::KeyAlreadyLoaded(_) => ErrorKind::KeyAlreadyLoaded,
            Error::KeyNotLoaded(_) => ErrorKind::KeyNotLoaded,
            Error::BadKey(_) => ErrorKind::BadKey,
            Error::ValidationErrors(_) => ErrorKind::ValidationError,
            Error::MatchNotFound => ErrorKind::MatchNotFound,
            Error::TooManyMatches(_) => ErrorKind::TooManyMatches,
            Error::Json(_) => ErrorKind::Json,
            Error::Unimplemented => ErrorKind::Unimplemented,
            Error::Unknown | Error::UnknownSoFar(_) => ErrorKind::Unknown,
        }
    }

    /// Errno of the first validation failure, if this is one.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Error::ValidationErrors(errors) => errors.first().map(ValidationError::errno),
            _ => None,
        }
    }

    fn unknown_so_far(stderr: Cow<'_, str>) -> Self { Error::UnknownSoFar(stderr.into()) }

    pub(crate) fn from_stderr(stderr: &str) -> Self {
        let pair = match ZfsParser::parse(Rule::error, stderr) {
            // error > dataset_not_found > dataset_name: "s/asd/asd"
            Ok(mut pairs) => pairs.next().and_then(|error| error.into_inner().next()),
            Err(_) => None,
        };
        let pair = match pair {
            Some(pair) => pair,
            None => return Self::unknown_so_far(Cow::Borrowed(stderr)),
        };
        let rule = pair.as_rule();
        let name = match pair.into_inner().next() {
            Some(name) => name.as_str().to_string(),
            None => return Self::unknown_so_far(Cow::Borrowed(stderr)),
        };
        match rule {
            Rule::dataset_not_found => Error::DatasetNotFound(PathBuf::from(name)),
            Rule::dataset_busy => Error::DatasetBusy(PathBuf::from(name)),
            Rule::key_already_loaded => Error::KeyAlreadyLoaded(name),
            Rule::incorrect_key => Error::BadKey(name),
            Rule::key_not_loaded => Error::KeyNotLoaded(name),
            _ => Self::unknown_so_far(Cow::Borrowed(stderr)),
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ErrorKind {
    CmdNotFound,
    Io,
    Unknown,
    DatasetNotFound,
    DatasetBusy,
    NotEncrypted,
    KeyAlreadyLoaded,
    KeyNotLoaded,
    BadKey,
    ValidationError,
    MatchNotFound,
    TooManyMatches,
    Json,
    Unimplemented,
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool { self.kind() == other.kind() }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_error_ds_not_found() {
        let err = Error::from_stderr("cannot open 's/asd/asd': dataset does not exist");
        assert_eq!(Error::DatasetNotFound(PathBuf::from("s/asd/asd")), err);
        assert_eq!(ErrorKind::DatasetNotFound, err.kind());
    }

    #[test]
    fn test_error_keys() {
        let err = Error::from_stderr("Key load error: Incorrect key provided for 'tank/enc'.\n");
        match err {
            Error::BadKey(ref name) => assert_eq!("tank/enc", name),
            ref other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            ErrorKind::KeyAlreadyLoaded,
            Error::from_stderr("Key load error: Key already loaded for 'tank/enc'.").kind()
        );
        assert_eq!(
            ErrorKind::KeyNotLoaded,
            Error::from_stderr("Key unload error: Key already unloaded for 'tank/enc'.").kind()
        );
        assert_eq!(
            ErrorKind::DatasetBusy,
            Error::from_stderr("cannot unmount 'tank/enc': pool or dataset is busy").kind()
        );
    }

    #[test]
    fn test_error_rubbish() {
        let stderr = "there is no way there is an error like this";
        let err = Error::from_stderr(stderr);
        assert_eq!(Error::UnknownSoFar(stderr.to_string()), err);
        assert_eq!(ErrorKind::Unknown, err.kind());
    }

    #[test]
    fn validation_errno() {
        let err = Error::from(ValidationError::RetentionUnbounded);
        assert_eq!(ErrorKind::ValidationError, err.kind());
        assert_eq!(Some(libc::EINVAL), err.errno());
        assert_eq!(libc::ENAMETOOLONG, ValidationError::NameTooLong(PathBuf::from("a")).errno());
        assert_eq!(None, Error::MatchNotFound.errno());
    }
}
