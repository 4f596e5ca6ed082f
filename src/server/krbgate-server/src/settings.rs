//! TOML settings file.
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:8200"
//!
//! [kerberos]
//! keytab = "BQIAAA..."
//! service_account = "HTTP/gate.example.com"
//! token_policies = ["default"]
//!
//! [ldap]
//! url = "ldaps://dc1.example.com, ldaps://dc2.example.com"
//! binddn = "cn=krbgate,ou=services,dc=example,dc=com"
//! bindpass = "..."
//! userdn = "ou=users,dc=example,dc=com"
//!
//! [groups.Admins]
//! policies = ["admin"]
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use krbgate_auth::config::{CONFIG_PATH, GROUPS_PREFIX, LDAP_CONFIG_PATH};
use krbgate_auth::{GroupEntry, KerberosConfig, LdapConfig};
use krbgate_storage::{StorageBackend, StorageExt};
use serde::Deserialize;

/// Listener settings.
#[derive(Debug, Default, Deserialize)]
pub struct ServerSettings {
    /// Listen address.
    pub bind: Option<String>,
}

/// Contents of the settings file.
#[derive(Debug, Deserialize)]
pub struct Settings {
    /// Listener settings.
    #[serde(default)]
    pub server: ServerSettings,
    /// Kerberos record.
    pub kerberos: KerberosConfig,
    /// Directory record.
    pub ldap: LdapConfig,
    /// Group records keyed by group name.
    #[serde(default)]
    pub groups: BTreeMap<String, GroupEntry>,
}

impl Settings {
    /// Reads and parses a settings file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Parses settings from TOML text.
    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Writes the records into storage, removing groups no longer listed.
    pub async fn seed(&self, storage: &dyn StorageBackend) -> Result<()> {
        storage.put_json(CONFIG_PATH, &self.kerberos).await?;
        storage.put_json(LDAP_CONFIG_PATH, &self.ldap).await?;

        for stale in storage.list(GROUPS_PREFIX).await? {
            if !self.groups.contains_key(&stale) {
                storage.delete(&format!("{GROUPS_PREFIX}{stale}")).await?;
            }
        }
        for (name, entry) in &self.groups {
            storage.put_json(&format!("{GROUPS_PREFIX}{name}"), entry).await?;
        }
        Ok(())
    }
}
