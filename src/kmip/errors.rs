quick_error! {
    #[derive(Debug)]
    pub enum KmipError {
        /// Server can't be reached or refused the TLS session.
        Transport(server: String, reason: String) {
            display("failed to connect to {}: {}", server, reason)
        }
        /// Server answered with a failure.
        Operation(operation: &'static str, reason: String) {
            display("failed to {} key: {}", operation, reason)
        }
        /// `Get` returned something other than secret data.
        NotSecretData(uid: String) {
            display("managed object {} is not secret data", uid)
        }
        InvalidConfig(errors: Vec<ConfigError>) {
            display("invalid KMIP configuration: {:?}", errors)
        }
        /// Persisted key rows couldn't be read or written.
        Store(reason: String) {
            display("key store failure: {}", reason)
        }
        Cipher(reason: String) {
            display("local key encryption failure: {}", reason)
        }
        /// Couldn't start the periodic sync thread.
        Io(err: std::io::Error) {
            cause(err)
            display("{}", err)
            from()
        }
        Zfs(err: crate::zfs::Error) {
            cause(err)
            display("zfs: {}", err)
            from()
        }
        Unimplemented {}
    }
}

/// One rejected field of a configuration update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub field:  &'static str,
    pub reason: String,
}

impl ConfigError {
    pub fn new<S: Into<String>>(field: &'static str, reason: S) -> ConfigError {
        ConfigError { field, reason: reason.into() }
    }
}

pub type KmipResult<T, E = KmipError> = std::result::Result<T, E>;

impl KmipError {
    pub fn kind(&self) -> KmipErrorKind {
        match self {
            KmipError::Transport(..) => KmipErrorKind::KmipTransport,
            KmipError::Operation(..) | KmipError::NotSecretData(_) => KmipErrorKind::KmipOperation,
            KmipError::InvalidConfig(_) => KmipErrorKind::InvalidConfig,
            KmipError::Store(_) => KmipErrorKind::Store,
            KmipError::Cipher(_) => KmipErrorKind::Cipher,
            KmipError::Io(_) => KmipErrorKind::Io,
            KmipError::Zfs(_) => KmipErrorKind::Zfs,
            KmipError::Unimplemented => KmipErrorKind::Unimplemented,
        }
    }

    pub(crate) fn operation<S: ToString>(operation: &'static str, reason: S) -> KmipError {
        KmipError::Operation(operation, reason.to_string())
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum KmipErrorKind {
    KmipTransport,
    KmipOperation,
    InvalidConfig,
    Store,
    Cipher,
    Io,
    Zfs,
    Unimplemented,
}

impl PartialEq for KmipError {
    fn eq(&self, other: &Self) -> bool { self.kind() == other.kind() }
}
