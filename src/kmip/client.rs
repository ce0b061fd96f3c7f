//! Seam between the sync core and an actual KMIP implementation.
//!
//! A [`KmipClient`] opens sessions, a [`KmipConnection`] is one session. The sync core only ever
//! stores passwords as `SecretData` objects, so that's the only object type modeled here.
use secrecy::{ExposeSecret, SecretString};
use slog::Logger;
use strum_macros::{AsRefStr, Display};

use super::{KmipConfig, KmipError, KmipResult};

/// KMIP revocation reason codes. Only the ones worth sending.
#[derive(AsRefStr, Display, Debug, Clone, Copy, PartialEq, Eq)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RevocationReason {
    Unspecified,
    KeyCompromise,
    Superseded,
    CessationOfOperation,
}

/// What `Get` hands back.
#[derive(Debug)]
pub enum ManagedObject {
    SecretData(SecretString),
    /// Any other object type, by its KMIP name.
    Other(String),
}

/// One open session with a KMIP server.
pub trait KmipConnection {
    /// Register `secret` as password secret data named `name`. Returns its uid.
    #[cfg_attr(tarpaulin, skip)]
    fn register(&self, _name: &str, _secret: &SecretString) -> KmipResult<String> { Err(KmipError::Unimplemented) }

    #[cfg_attr(tarpaulin, skip)]
    fn activate(&self, _uid: &str) -> KmipResult<()> { Err(KmipError::Unimplemented) }

    #[cfg_attr(tarpaulin, skip)]
    fn get(&self, _uid: &str) -> KmipResult<ManagedObject> { Err(KmipError::Unimplemented) }

    #[cfg_attr(tarpaulin, skip)]
    fn revoke(&self, _uid: &str, _reason: RevocationReason) -> KmipResult<()> { Err(KmipError::Unimplemented) }

    #[cfg_attr(tarpaulin, skip)]
    fn destroy(&self, _uid: &str) -> KmipResult<()> { Err(KmipError::Unimplemented) }
}

pub trait KmipClient: Send + Sync {
    /// Open a session using `config`. Fails with `KmipError::Transport` when the server can't be reached.
    fn connect(&self, config: &KmipConfig) -> KmipResult<Box<dyn KmipConnection>>;

    /// Connection probe.
    fn test_connection(&self, config: &KmipConfig) -> KmipResult<()> { self.connect(config).map(|_| ()) }
}

/// Register and activate. If activation fails the fresh object is destroyed and both failures
/// are reported together.
pub fn register_secret(conn: &dyn KmipConnection, name: &str, secret: &SecretString) -> KmipResult<String> {
    let uid = conn.register(name, secret).map_err(|e| KmipError::operation("register", e))?;
    if let Err(e) = conn.activate(&uid) {
        let mut reason = e.to_string();
        if let Err(destroy) = conn.destroy(&uid) {
            reason.push_str(&format!("; failed to destroy created key: {}", destroy));
        }
        return Err(KmipError::Operation("activate", reason));
    }
    Ok(uid)
}

pub fn retrieve_secret(conn: &dyn KmipConnection, uid: &str) -> KmipResult<SecretString> {
    match conn.get(uid).map_err(|e| KmipError::operation("retrieve", e))? {
        ManagedObject::SecretData(secret) => Ok(secret),
        ManagedObject::Other(_) => Err(KmipError::NotSecretData(uid.to_string())),
    }
}

/// Revoke then destroy `uid`. A failed revoke is only logged. Returns whether the object is gone.
pub fn revoke_and_destroy(conn: &dyn KmipConnection, uid: &str, label: &str, logger: &Logger) -> bool {
    if let Err(e) = conn.revoke(uid, RevocationReason::CessationOfOperation) {
        debug!(logger, "failed to revoke old KMIP key"; "for" => label, "uid" => uid, "error" => %e);
    }
    match conn.destroy(uid) {
        Ok(()) => true,
        Err(e) => {
            debug!(logger, "failed to destroy old KMIP key"; "for" => label, "uid" => uid, "error" => %e);
            false
        },
    }
}

/// Same secret, byte for byte.
pub(crate) fn same_secret(a: &SecretString, b: &SecretString) -> bool { a.expose_secret() == b.expose_secret() }
