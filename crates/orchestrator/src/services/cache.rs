//! Cache service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use regex::Regex;

use super::{read, write};
use crate::error::ServiceError;

/// Key/value cache in front of the read paths.
#[async_trait]
pub trait CacheService: Send + Sync {
    /// Removes one key. Returns true if it was present.
    async fn remove(&self, key: &str) -> Result<bool, ServiceError>;

    /// Removes every key matching a glob pattern where `*` matches any run
    /// of characters. Returns how many keys were removed.
    async fn remove_by_pattern(&self, pattern: &str) -> Result<u64, ServiceError>;
}

/// Compiles a `*` glob into an anchored regex.
pub(crate) fn glob_to_regex(pattern: &str) -> Result<Regex, ServiceError> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{}$", body)).map_err(|e| ServiceError::Cache(e.to_string()))
}

#[derive(Debug, Default)]
struct InMemoryCacheState {
    entries: HashMap<String, String>,
    fail: bool,
}

/// In-memory cache for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCache {
    state: Arc<RwLock<InMemoryCacheState>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        write(&self.state).entries.insert(key.into(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        read(&self.state).entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        read(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configures every call to fail.
    pub fn set_fail(&self, fail: bool) {
        write(&self.state).fail = fail;
    }
}

#[async_trait]
impl CacheService for InMemoryCache {
    async fn remove(&self, key: &str) -> Result<bool, ServiceError> {
        let mut state = write(&self.state);
        if state.fail {
            return Err(ServiceError::Cache("Cache unavailable".to_string()));
        }
        Ok(state.entries.remove(key).is_some())
    }

    async fn remove_by_pattern(&self, pattern: &str) -> Result<u64, ServiceError> {
        let matcher = glob_to_regex(pattern)?;
        let mut state = write(&self.state);
        if state.fail {
            return Err(ServiceError::Cache("Cache unavailable".to_string()));
        }
        let before = state.entries.len();
        state.entries.retain(|key, _| !matcher.is_match(key));
        Ok((before - state.entries.len()) as u64)
    }
}
