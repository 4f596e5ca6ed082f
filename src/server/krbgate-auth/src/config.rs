//! Backend configuration records and the published snapshot.
//!
//! Records live in the host's [`StorageBackend`]. A [`ConfigSnapshot`] is
//! built from all of them at once and published through [`ConfigStore`];
//! each login loads one snapshot and keeps it for its whole lifetime, so an
//! admin update never mixes old and new key material within a request.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use arc_swap::ArcSwapOption;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Duration;
use krbgate_crypto::Keytab;
use krbgate_spnego::ServiceIdentity;
use krbgate_storage::{StorageBackend, StorageExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::ConfigError;
use crate::groups::GroupMapping;
use crate::ttl::TtlPolicy;

/// Storage key of [`KerberosConfig`].
pub const CONFIG_PATH: &str = "config";

/// Storage key of [`LdapConfig`].
pub const LDAP_CONFIG_PATH: &str = "ldap_config";

/// Storage prefix of [`GroupEntry`] records.
pub const GROUPS_PREFIX: &str = "groups/";

/// Default directory request timeout, in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 90;

/// Kerberos service settings.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct KerberosConfig {
    /// Base64 encoded MIT keytab.
    pub keytab: String,
    /// Account whose keys verify tickets.
    pub service_account: String,
    /// Drop the instance part (`user/instance` becomes `user`).
    #[serde(default)]
    pub remove_instance_name: bool,
    /// Return directory groups as group aliases.
    #[serde(default)]
    pub add_group_aliases: bool,
    /// Default TTL in seconds, 0 for the system default.
    #[serde(default)]
    pub token_ttl: u64,
    /// Maximum TTL in seconds, 0 for the system maximum.
    #[serde(default)]
    pub token_max_ttl: u64,
    /// Policies granted to every authenticated principal.
    #[serde(default)]
    pub token_policies: Vec<String>,
}

impl std::fmt::Debug for KerberosConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KerberosConfig")
            .field("keytab", &"[REDACTED]")
            .field("service_account", &self.service_account)
            .field("remove_instance_name", &self.remove_instance_name)
            .field("add_group_aliases", &self.add_group_aliases)
            .field("token_ttl", &self.token_ttl)
            .field("token_max_ttl", &self.token_max_ttl)
            .field("token_policies", &self.token_policies)
            .finish()
    }
}

/// Directory connection settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct LdapConfig {
    /// Comma separated server URLs, tried in order.
    pub url: String,
    /// DN used for the service bind, empty for anonymous.
    #[serde(default)]
    pub binddn: String,
    /// Password for `binddn`.
    #[serde(default)]
    pub bindpass: String,
    /// Base DN of user entries.
    #[serde(default)]
    pub userdn: String,
    /// Attribute holding the username.
    #[serde(default = "default_userattr")]
    pub userattr: String,
    /// Attribute holding group membership.
    #[serde(default = "default_groupattr")]
    pub groupattr: String,
    /// Upgrade plain connections with StartTLS.
    #[serde(default)]
    pub starttls: bool,
    /// Skip TLS certificate verification.
    #[serde(default)]
    pub insecure_tls: bool,
    /// Timeout for the whole directory exchange, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
}

fn default_userattr() -> String {
    "samaccountname".to_string()
}

fn default_groupattr() -> String {
    "memberOf".to_string()
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl Default for LdapConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            binddn: String::new(),
            bindpass: String::new(),
            userdn: String::new(),
            userattr: default_userattr(),
            groupattr: default_groupattr(),
            starttls: false,
            insecure_tls: false,
            request_timeout: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl LdapConfig {
    /// Server URLs in failover order.
    pub fn urls(&self) -> Vec<&str> {
        self.url
            .split(',')
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .collect()
    }

    /// Directory exchange timeout.
    pub fn timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.request_timeout)
    }
}

impl std::fmt::Debug for LdapConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapConfig")
            .field("url", &self.url)
            .field("binddn", &self.binddn)
            .field("bindpass", &"[REDACTED]")
            .field("userdn", &self.userdn)
            .field("userattr", &self.userattr)
            .field("groupattr", &self.groupattr)
            .field("starttls", &self.starttls)
            .field("insecure_tls", &self.insecure_tls)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Policies mapped to one directory group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupEntry {
    /// Policy names.
    #[serde(default)]
    pub policies: Vec<String>,
}

/// Validated configuration used by one request.
#[derive(Debug)]
pub struct ConfigSnapshot {
    kerberos: KerberosConfig,
    identity: ServiceIdentity,
    ttl: TtlPolicy,
    ldap: LdapConfig,
    groups: GroupMapping,
}

impl ConfigSnapshot {
    /// Validates records and builds a snapshot.
    ///
    /// # Errors
    ///
    /// Fails when the keytab does not decode, the service account has no key
    /// in it, or the directory URL is empty.
    pub fn build(
        kerberos: KerberosConfig,
        ldap: LdapConfig,
        groups: BTreeMap<String, GroupEntry>,
    ) -> Result<Self, ConfigError> {
        if kerberos.service_account.trim().is_empty() {
            return Err(ConfigError::invalid("service_account", "must not be empty"));
        }
        let keytab_bytes = BASE64
            .decode(kerberos.keytab.trim())
            .map_err(|e| ConfigError::invalid("keytab", e))?;
        let keytab =
            Keytab::parse(&keytab_bytes).map_err(|e| ConfigError::invalid("keytab", e))?;
        let identity = ServiceIdentity::from_parts(keytab, &kerberos.service_account)
            .map_err(|e| ConfigError::invalid("service_account", e))?;

        if ldap.urls().is_empty() {
            return Err(ConfigError::invalid("url", "at least one LDAP URL is required"));
        }
        if ldap.groupattr.trim().is_empty() || ldap.userattr.trim().is_empty() {
            return Err(ConfigError::invalid("userattr", "attributes must not be empty"));
        }

        let ttl = TtlPolicy::new(
            Duration::seconds(to_secs(kerberos.token_ttl, "token_ttl")?),
            Duration::seconds(to_secs(kerberos.token_max_ttl, "token_max_ttl")?),
        );
        if kerberos.token_ttl > kerberos.token_max_ttl && kerberos.token_max_ttl > 0 {
            warn!(
                token_ttl = kerberos.token_ttl,
                token_max_ttl = kerberos.token_max_ttl,
                "token_ttl exceeds token_max_ttl, default lowered to the maximum"
            );
        }

        Ok(Self {
            kerberos,
            identity,
            ttl,
            ldap,
            groups: GroupMapping::new(groups),
        })
    }

    /// Kerberos settings.
    pub fn kerberos(&self) -> &KerberosConfig {
        &self.kerberos
    }

    /// Service identity derived from the keytab.
    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    /// TTL bounds.
    pub fn ttl(&self) -> &TtlPolicy {
        &self.ttl
    }

    /// Directory settings.
    pub fn ldap(&self) -> &LdapConfig {
        &self.ldap
    }

    /// Group to policy mapping.
    pub fn groups(&self) -> &GroupMapping {
        &self.groups
    }
}

fn to_secs(value: u64, field: &'static str) -> Result<i64, ConfigError> {
    // chrono durations hold up to i64::MAX milliseconds
    i64::try_from(value)
        .ok()
        .filter(|v| *v <= i64::MAX / 1000)
        .ok_or_else(|| ConfigError::invalid(field, "duration out of range"))
}

/// Holder of the currently published snapshot.
#[derive(Debug, Default)]
pub struct ConfigStore {
    current: ArcSwapOption<ConfigSnapshot>,
}

impl ConfigStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a snapshot, replacing the previous one atomically.
    pub fn publish(&self, snapshot: ConfigSnapshot) -> Arc<ConfigSnapshot> {
        let snapshot = Arc::new(snapshot);
        self.current.store(Some(Arc::clone(&snapshot)));
        snapshot
    }

    /// Loads the current snapshot, if any.
    pub fn snapshot(&self) -> Option<Arc<ConfigSnapshot>> {
        self.current.load_full()
    }

    /// Returns true when a snapshot is published.
    pub fn is_configured(&self) -> bool {
        self.current.load().is_some()
    }

    /// Withdraws the current snapshot.
    pub fn clear(&self) {
        self.current.store(None);
    }

    /// Reads every record from storage and publishes a fresh snapshot.
    ///
    /// On error the previous snapshot stays in place.
    pub async fn reload(
        &self,
        storage: &dyn StorageBackend,
    ) -> Result<Arc<ConfigSnapshot>, ConfigError> {
        let kerberos: KerberosConfig = storage
            .get_json(CONFIG_PATH)
            .await?
            .ok_or(ConfigError::Missing(CONFIG_PATH))?;
        let ldap: LdapConfig = storage
            .get_json(LDAP_CONFIG_PATH)
            .await?
            .ok_or(ConfigError::Missing(LDAP_CONFIG_PATH))?;

        let mut groups = BTreeMap::new();
        for name in storage.list(GROUPS_PREFIX).await? {
            let key = format!("{GROUPS_PREFIX}{name}");
            match storage.get_json::<GroupEntry>(&key).await? {
                Some(entry) => {
                    groups.insert(name, entry);
                },
                None => debug!(group = %name, "group removed during reload"),
            }
        }

        let snapshot = ConfigSnapshot::build(kerberos, ldap, groups)?;
        info!(
            service_account = %snapshot.kerberos.service_account,
            groups = snapshot.groups.len(),
            "kerberos configuration loaded"
        );
        Ok(self.publish(snapshot))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use krbgate_spnego::testing::{service_keytab, SERVICE_ACCOUNT};
    use krbgate_storage::MemoryBackend;

    fn kerberos_config() -> KerberosConfig {
        KerberosConfig {
            keytab: BASE64.encode(service_keytab().to_bytes()),
            service_account: SERVICE_ACCOUNT.to_string(),
            ..Default::default()
        }
    }

    fn ldap_config() -> LdapConfig {
        LdapConfig {
            url: "ldap://dc1.example.com, ldap://dc2.example.com".to_string(),
            ..Default::default()
        }
    }

    async fn seeded_storage() -> MemoryBackend {
        let storage = MemoryBackend::new();
        storage.put_json(CONFIG_PATH, &kerberos_config()).await.unwrap();
        storage.put_json(LDAP_CONFIG_PATH, &ldap_config()).await.unwrap();
        storage
            .put_json(
                "groups/Admins",
                &GroupEntry {
                    policies: vec!["admin".into()],
                },
            )
            .await
            .unwrap();
        storage
    }

    #[test]
    fn test_ldap_defaults_from_json() {
        let ldap: LdapConfig = serde_json::from_str(r#"{"url":"ldap://dc"}"#).unwrap();
        assert_eq!(ldap.groupattr, "memberOf");
        assert_eq!(ldap.request_timeout, 90);
        assert_eq!(ldap.urls(), vec!["ldap://dc"]);
    }

    #[test]
    fn test_url_list() {
        assert_eq!(
            ldap_config().urls(),
            vec!["ldap://dc1.example.com", "ldap://dc2.example.com"]
        );
    }

    #[test]
    fn test_build_rejects_bad_records() {
        let mut bad_keytab = kerberos_config();
        bad_keytab.keytab = "not base64!".to_string();
        assert!(matches!(
            ConfigSnapshot::build(bad_keytab, ldap_config(), BTreeMap::new()),
            Err(ConfigError::Invalid { field: "keytab", .. })
        ));

        let mut wrong_account = kerberos_config();
        wrong_account.service_account = "nobody".to_string();
        assert!(matches!(
            ConfigSnapshot::build(wrong_account, ldap_config(), BTreeMap::new()),
            Err(ConfigError::Invalid { field: "service_account", .. })
        ));

        assert!(matches!(
            ConfigSnapshot::build(kerberos_config(), LdapConfig::default(), BTreeMap::new()),
            Err(ConfigError::Invalid { field: "url", .. })
        ));
    }

    #[test]
    fn test_secrets_redacted() {
        let mut ldap = ldap_config();
        ldap.bindpass = "hunter2".to_string();
        assert!(!format!("{ldap:?}").contains("hunter2"));
        assert!(!format!("{:?}", kerberos_config()).contains(&kerberos_config().keytab));
    }

    #[tokio::test]
    async fn test_reload_publishes() {
        let storage = seeded_storage().await;
        let store = ConfigStore::new();
        assert!(!store.is_configured());

        store.reload(&storage).await.unwrap();
        let snapshot = store.snapshot().unwrap();
        assert_eq!(snapshot.kerberos().service_account, SERVICE_ACCOUNT);
        assert_eq!(snapshot.groups().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_previous_snapshot() {
        let storage = seeded_storage().await;
        let store = ConfigStore::new();
        let first = store.reload(&storage).await.unwrap();

        storage.delete(LDAP_CONFIG_PATH).await.unwrap();
        assert!(matches!(
            store.reload(&storage).await,
            Err(ConfigError::Missing(LDAP_CONFIG_PATH))
        ));
        assert!(Arc::ptr_eq(&first, &store.snapshot().unwrap()));
    }

    #[tokio::test]
    async fn test_in_flight_snapshot_survives_publish() {
        let storage = seeded_storage().await;
        let store = ConfigStore::new();
        let held = store.reload(&storage).await.unwrap();

        let mut updated = kerberos_config();
        updated.token_policies = vec!["extra".into()];
        storage.put_json(CONFIG_PATH, &updated).await.unwrap();
        store.reload(&storage).await.unwrap();

        assert!(held.kerberos().token_policies.is_empty());
        assert_eq!(
            store.snapshot().unwrap().kerberos().token_policies,
            vec!["extra".to_string()]
        );
    }
}
