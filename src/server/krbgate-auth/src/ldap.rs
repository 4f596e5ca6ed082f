//! LDAP implementation of the directory capability, built on `ldap3`.

use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use tracing::{debug, warn};

use crate::config::LdapConfig;
use crate::directory::{Directory, DirectoryEntry, DirectorySession};
use crate::error::DirectoryError;

/// Connects to LDAP servers with `ldap3`.
#[derive(Debug, Clone, Default)]
pub struct LdapDirectory;

impl LdapDirectory {
    /// Creates the directory client.
    pub fn new() -> Self {
        Self
    }

    fn settings(config: &LdapConfig) -> LdapConnSettings {
        LdapConnSettings::new()
            .set_conn_timeout(config.timeout())
            .set_starttls(config.starttls)
            .set_no_tls_verify(config.insecure_tls)
    }
}

#[async_trait]
impl Directory for LdapDirectory {
    async fn connect(&self, config: &LdapConfig) -> Result<Box<dyn DirectorySession>, DirectoryError> {
        let mut last_error = String::from("no LDAP URL configured");

        for url in config.urls() {
            match LdapConnAsync::with_settings(Self::settings(config), url).await {
                Ok((conn, ldap)) => {
                    tokio::spawn(async move {
                        if let Err(e) = conn.drive().await {
                            warn!(error = %e, "directory connection error");
                        }
                    });
                    debug!(url = %url, "connected to directory");
                    return Ok(Box::new(LdapSession { ldap }));
                },
                Err(e) => {
                    warn!(url = %url, error = %e, "directory server unreachable, trying next");
                    last_error = format!("{url}: {e}");
                },
            }
        }

        Err(DirectoryError::Connect(last_error))
    }
}

/// One `ldap3` connection.
///
/// The connection task ends once the last `Ldap` handle is dropped, so a
/// dropped session releases its socket even without [`DirectorySession::close`].
struct LdapSession {
    ldap: Ldap,
}

#[async_trait]
impl DirectorySession for LdapSession {
    async fn bind(&mut self, dn: &str, password: &str) -> Result<(), DirectoryError> {
        self.ldap
            .simple_bind(dn, password)
            .await
            .and_then(|res| res.success())
            .map(|_| ())
            .map_err(|e| DirectoryError::Bind(e.to_string()))
    }

    async fn search(
        &mut self,
        base: &str,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        let (entries, _) = self
            .ldap
            .search(base, Scope::Subtree, filter, attrs.to_vec())
            .await
            .and_then(|res| res.success())
            .map_err(|e| DirectoryError::Search(e.to_string()))?;

        Ok(entries
            .into_iter()
            .map(SearchEntry::construct)
            .map(|entry| DirectoryEntry {
                dn: entry.dn,
                attrs: entry.attrs,
            })
            .collect())
    }

    async fn close(mut self: Box<Self>) -> Result<(), DirectoryError> {
        self.ldap
            .unbind()
            .await
            .map_err(|e| DirectoryError::Connect(format!("unbind: {e}")))
    }
}
