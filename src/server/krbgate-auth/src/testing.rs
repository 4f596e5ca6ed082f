//! Test support: an in-memory directory that counts calls.

#![allow(clippy::disallowed_methods)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::config::LdapConfig;
use crate::directory::{Directory, DirectoryEntry, DirectorySession};
use crate::error::DirectoryError;

/// How the fake directory misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FakeBehavior {
    /// Answers normally.
    #[default]
    Normal,
    /// Every connect fails.
    Unreachable,
    /// Binds are refused.
    BindFails,
    /// Searches fail.
    SearchFails,
    /// Searches never complete.
    Hang,
    /// Searches return every user twice.
    Duplicate,
}

/// Call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectoryStats {
    /// Connect attempts.
    pub connects: usize,
    /// Bind calls.
    pub binds: usize,
    /// Search calls.
    pub searches: usize,
    /// Graceful closes.
    pub closes: usize,
    /// Sessions currently alive.
    pub open: usize,
}

#[derive(Debug, Default)]
struct State {
    users: HashMap<String, Vec<String>>,
    behavior: FakeBehavior,
    stats: DirectoryStats,
    last_filter: Option<String>,
}

/// Directory fake keyed by username.
#[derive(Debug, Default)]
pub struct FakeDirectory {
    state: Arc<Mutex<State>>,
}

impl FakeDirectory {
    /// Directory with one user and its membership values.
    pub fn with_groups(user: &str, groups: &[&str]) -> Arc<Self> {
        let directory = Self::default();
        directory.add_user(user, groups);
        Arc::new(directory)
    }

    /// Directory where every connect fails.
    pub fn unreachable() -> Arc<Self> {
        Arc::new(Self::default()).behave(FakeBehavior::Unreachable)
    }

    /// Adds or replaces a user.
    pub fn add_user(&self, user: &str, groups: &[&str]) {
        self.state.lock().unwrap().users.insert(
            user.to_lowercase(),
            groups.iter().map(|g| g.to_string()).collect(),
        );
    }

    /// Switches behaviour.
    pub fn behave(self: Arc<Self>, behavior: FakeBehavior) -> Arc<Self> {
        self.state.lock().unwrap().behavior = behavior;
        self
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> DirectoryStats {
        self.state.lock().unwrap().stats
    }

    /// Filter of the most recent search.
    pub fn last_filter(&self) -> Option<String> {
        self.state.lock().unwrap().last_filter.clone()
    }
}

#[async_trait]
impl Directory for FakeDirectory {
    async fn connect(&self, _config: &LdapConfig) -> Result<Box<dyn DirectorySession>, DirectoryError> {
        let mut state = self.state.lock().unwrap();
        state.stats.connects += 1;
        if state.behavior == FakeBehavior::Unreachable {
            return Err(DirectoryError::Connect("connection refused".into()));
        }
        state.stats.open += 1;
        Ok(Box::new(FakeSession {
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeSession {
    state: Arc<Mutex<State>>,
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.stats.open -= 1;
        }
    }
}

#[async_trait]
impl DirectorySession for FakeSession {
    async fn bind(&mut self, _dn: &str, _password: &str) -> Result<(), DirectoryError> {
        let mut state = self.state.lock().unwrap();
        state.stats.binds += 1;
        if state.behavior == FakeBehavior::BindFails {
            return Err(DirectoryError::Bind("invalid credentials".into()));
        }
        Ok(())
    }

    async fn search(
        &mut self,
        base: &str,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        let behavior = {
            let mut state = self.state.lock().unwrap();
            state.stats.searches += 1;
            state.last_filter = Some(filter.to_string());
            state.behavior
        };

        match behavior {
            FakeBehavior::SearchFails => {
                return Err(DirectoryError::Search("operations error".into()))
            },
            FakeBehavior::Hang => std::future::pending::<()>().await,
            _ => {},
        }

        let user = filter
            .trim_start_matches('(')
            .trim_end_matches(')')
            .split_once('=')
            .map(|(_, value)| value.to_lowercase())
            .unwrap_or_default();

        let state = self.state.lock().unwrap();
        let Some(groups) = state.users.get(&user) else {
            return Ok(Vec::new());
        };

        let mut attr_map = HashMap::new();
        if let Some(attr) = attrs.first() {
            attr_map.insert(attr.to_string(), groups.clone());
        }
        let entry = DirectoryEntry {
            dn: format!("CN={user},{base}"),
            attrs: attr_map,
        };

        if behavior == FakeBehavior::Duplicate {
            Ok(vec![entry.clone(), entry])
        } else {
            Ok(vec![entry])
        }
    }

    async fn close(self: Box<Self>) -> Result<(), DirectoryError> {
        self.state.lock().unwrap().stats.closes += 1;
        Ok(())
    }
}
