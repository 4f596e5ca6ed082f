//! Group resolution: principal → directory groups → policies.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::{GroupEntry, LdapConfig};
use crate::directory::{escape_filter_value, group_name, Directory, DirectorySession};
use crate::error::DirectoryError;

/// Case-insensitive mapping from group names to policies.
#[derive(Debug, Clone, Default)]
pub struct GroupMapping {
    entries: BTreeMap<String, (String, GroupEntry)>,
}

impl GroupMapping {
    /// Builds the mapping from stored group records.
    pub fn new(groups: BTreeMap<String, GroupEntry>) -> Self {
        let entries = groups
            .into_iter()
            .map(|(name, entry)| (name.to_lowercase(), (name, entry)))
            .collect();
        Self { entries }
    }

    /// Number of mapped groups.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when no group is mapped.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Policies of one group.
    pub fn policies(&self, group: &str) -> Option<&[String]> {
        self.entries
            .get(&group.to_lowercase())
            .map(|(_, entry)| entry.policies.as_slice())
    }
}

/// Groups found for a principal and the policies they map to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedGroups {
    /// Group names returned by the directory.
    pub groups: Vec<String>,
    /// Union of the mapped policies, sorted.
    pub policies: BTreeSet<String>,
}

impl ResolvedGroups {
    /// Applies `mapping` to directory group names. Unmapped groups add no
    /// policies.
    pub fn map(groups: Vec<String>, mapping: &GroupMapping) -> Self {
        let mut policies = BTreeSet::new();
        for group in &groups {
            match mapping.policies(group) {
                Some(mapped) => policies.extend(mapped.iter().cloned()),
                None => debug!(group = %group, "no policies mapped for group"),
            }
        }
        Self { groups, policies }
    }
}

/// Looks up a principal's groups in the directory.
#[derive(Clone)]
pub struct GroupResolver {
    directory: Arc<dyn Directory>,
}

impl std::fmt::Debug for GroupResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupResolver").finish_non_exhaustive()
    }
}

impl GroupResolver {
    /// Creates a resolver over a directory capability.
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self { directory }
    }

    /// Resolves `username` to groups and policies.
    ///
    /// Runs one connect, bind and search under the configured timeout. The
    /// session is closed on every path; if this future is dropped first,
    /// dropping the session releases the connection.
    pub async fn resolve(
        &self,
        username: &str,
        config: &LdapConfig,
        mapping: &GroupMapping,
    ) -> Result<ResolvedGroups, DirectoryError> {
        let groups = tokio::time::timeout(config.timeout(), self.lookup(username, config))
            .await
            .map_err(|_| DirectoryError::Timeout(config.request_timeout))??;

        Ok(ResolvedGroups::map(groups, mapping))
    }

    async fn lookup(&self, username: &str, config: &LdapConfig) -> Result<Vec<String>, DirectoryError> {
        let mut session = self.directory.connect(config).await?;
        let result = search_groups(session.as_mut(), username, config).await;

        if let Err(e) = session.close().await {
            debug!(error = %e, "closing directory session failed");
        }
        result
    }
}

async fn search_groups(
    session: &mut dyn DirectorySession,
    username: &str,
    config: &LdapConfig,
) -> Result<Vec<String>, DirectoryError> {
    if !config.binddn.is_empty() {
        session.bind(&config.binddn, &config.bindpass).await?;
    }

    let filter = format!(
        "({}={})",
        config.userattr,
        escape_filter_value(username)
    );
    let entries = session
        .search(&config.userdn, &filter, &[config.groupattr.as_str()])
        .await?;

    let entry = match entries.as_slice() {
        [] => {
            warn!(user = %username, "user not found in directory, no groups resolved");
            return Ok(Vec::new());
        },
        [entry] => entry,
        _ => {
            return Err(DirectoryError::Search(format!(
                "{} entries match {filter}",
                entries.len()
            )))
        },
    };

    let mut seen = BTreeSet::new();
    let groups = entry
        .values(&config.groupattr)
        .iter()
        .map(String::as_str)
        .map(group_name)
        .filter(|name| seen.insert(name.to_lowercase()))
        .collect();
    debug!(user = %username, dn = %entry.dn, "resolved directory groups");
    Ok(groups)
}
