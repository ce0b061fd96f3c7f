use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 5696;

/// Where the KMIP server is and what it manages.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Builder, Getters)]
#[serde(default)]
#[builder(default, setter(into))]
#[get = "pub"]
pub struct KmipConfig {
    enabled:               bool,
    /// Dataset keys live on the server instead of the local store.
    manage_zfs_keys:       bool,
    /// Same for SED disk passwords and the global SED password.
    manage_sed_disks:      bool,
    server:                Option<String>,
    port:                  u16,
    /// Id of the client certificate.
    certificate:           Option<u64>,
    certificate_authority: Option<u64>,
}

impl Default for KmipConfig {
    fn default() -> KmipConfig {
        KmipConfig {
            enabled:               false,
            manage_zfs_keys:       false,
            manage_sed_disks:      false,
            server:                None,
            port:                  DEFAULT_PORT,
            certificate:           None,
            certificate_authority: None,
        }
    }
}

impl KmipConfig {
    pub fn builder() -> KmipConfigBuilder { KmipConfigBuilder::default() }

    /// Dataset keys get pushed to the server. Otherwise they get pulled back.
    pub fn pushes_zfs_keys(&self) -> bool { self.enabled && self.manage_zfs_keys }

    pub fn pushes_sed_keys(&self) -> bool { self.enabled && self.manage_sed_disks }

    /// `server:port`, for logs and alerts.
    pub fn address(&self) -> String {
        format!("{}:{}", self.server.as_deref().unwrap_or_default(), self.port)
    }

    /// `self` with every field `update` sets.
    pub fn merged(&self, update: &KmipConfigUpdate) -> KmipConfig {
        let mut new = self.clone();
        if let Some(enabled) = update.enabled {
            new.enabled = enabled;
        }
        if let Some(manage) = update.manage_zfs_keys {
            new.manage_zfs_keys = manage;
        }
        if let Some(manage) = update.manage_sed_disks {
            new.manage_sed_disks = manage;
        }
        if let Some(ref server) = update.server {
            new.server = Some(server.clone());
        }
        if let Some(port) = update.port {
            new.port = port;
        }
        if let Some(certificate) = update.certificate {
            new.certificate = certificate;
        }
        if let Some(ca) = update.certificate_authority {
            new.certificate_authority = ca;
        }
        new
    }
}

/// Partial update. Absent fields keep their current value.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq, Builder, Getters)]
#[serde(default)]
#[builder(default, setter(into, strip_option))]
#[get = "pub"]
pub struct KmipConfigUpdate {
    enabled:               Option<bool>,
    manage_zfs_keys:       Option<bool>,
    manage_sed_disks:      Option<bool>,
    server:                Option<String>,
    port:                  Option<u16>,
    certificate:           Option<Option<u64>>,
    certificate_authority: Option<Option<u64>>,
    /// Try to connect with the new settings before saving them.
    validate:              bool,
}

impl Default for KmipConfigUpdate {
    fn default() -> KmipConfigUpdate {
        KmipConfigUpdate {
            enabled:               None,
            manage_zfs_keys:       None,
            manage_sed_disks:      None,
            server:                None,
            port:                  None,
            certificate:           None,
            certificate_authority: None,
            validate:              true,
        }
    }
}

impl KmipConfigUpdate {
    pub fn builder() -> KmipConfigUpdateBuilder { KmipConfigUpdateBuilder::default() }
}
