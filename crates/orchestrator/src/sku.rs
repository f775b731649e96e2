//! Collision-avoiding resolution of variant SKUs.

use std::collections::HashSet;

use async_trait::async_trait;
use store::StoreError;
use thiserror::Error;

/// Answers whether a key is already taken in the store.
#[async_trait]
pub trait KeyProbe: Send {
    async fn is_taken(&mut self, key: &str) -> Result<bool, StoreError>;
}

/// Keys finalized earlier in the same write.
#[derive(Debug, Clone, Default)]
pub struct ClaimedKeys {
    keys: HashSet<String>,
}

impl ClaimedKeys {
    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn claim(&mut self, key: String) {
        self.keys.insert(key);
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    /// Every suffix up to the attempt limit collided.
    #[error("No free key for '{candidate}' after {attempts} attempts")]
    Exhausted { candidate: String, attempts: u32 },

    /// The probe itself failed.
    #[error(transparent)]
    Probe(#[from] StoreError),
}

/// Finds a free SKU by appending `-1`, `-2`, ... to a candidate.
///
/// The probe is a check-then-use and does not lock anything. Two concurrent
/// writers can still pick the same key; the store's unique constraint is
/// what finally rejects one of them.
#[derive(Debug, Clone, Copy)]
pub struct SkuResolver {
    max_attempts: Option<u32>,
}

impl SkuResolver {
    /// `max_attempts` bounds the number of suffixes tried; `None` is
    /// unbounded.
    pub fn new(max_attempts: Option<u32>) -> Self {
        Self { max_attempts }
    }

    /// The key tried first: the requested SKU, or `{parent}-VAR-{n}` for a
    /// blank request where `n` is the one-based position.
    pub fn candidate(requested: &str, parent_sku: &str, index: usize) -> String {
        let requested = requested.trim();
        if requested.is_empty() {
            format!("{}-VAR-{}", parent_sku, index + 1)
        } else {
            requested.to_string()
        }
    }

    pub async fn resolve<P>(
        &self,
        requested: &str,
        parent_sku: &str,
        index: usize,
        claimed: &mut ClaimedKeys,
        probe: &mut P,
    ) -> Result<String, ResolveError>
    where
        P: KeyProbe + ?Sized,
    {
        let candidate = Self::candidate(requested, parent_sku, index);
        let mut key = candidate.clone();
        let mut attempt: u32 = 0;

        loop {
            if !claimed.contains(&key) && !probe.is_taken(&key).await? {
                if attempt > 0 {
                    tracing::debug!(%candidate, %key, attempt, "sku suffixed to avoid collision");
                }
                claimed.claim(key.clone());
                return Ok(key);
            }

            attempt += 1;
            if let Some(max) = self.max_attempts
                && attempt > max
            {
                return Err(ResolveError::Exhausted {
                    candidate,
                    attempts: max,
                });
            }
            key = format!("{}-{}", candidate, attempt);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Taken {
        keys: HashSet<String>,
        probes: u32,
        fail: bool,
    }

    impl Taken {
        fn with(keys: &[&str]) -> Self {
            Self {
                keys: keys.iter().map(|k| k.to_string()).collect(),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl KeyProbe for Taken {
        async fn is_taken(&mut self, key: &str) -> Result<bool, StoreError> {
            self.probes += 1;
            if self.fail {
                return Err(StoreError::Unavailable("probe failed".into()));
            }
            Ok(self.keys.contains(key))
        }
    }

    #[tokio::test]
    async fn test_free_candidate_is_kept() {
        let resolver = SkuResolver::new(Some(10));
        let mut probe = Taken::default();
        let mut claimed = ClaimedKeys::default();

        let key = resolver
            .resolve(" SKU1 ", "P", 0, &mut claimed, &mut probe)
            .await
            .unwrap();

        assert_eq!(key, "SKU1");
        assert_eq!(probe.probes, 1);
    }

    #[tokio::test]
    async fn test_suffix_skips_existing_keys() {
        let resolver = SkuResolver::new(Some(10));
        let mut probe = Taken::with(&["SKU1", "SKU1-1"]);
        let mut claimed = ClaimedKeys::default();

        let key = resolver
            .resolve("SKU1", "P", 0, &mut claimed, &mut probe)
            .await
            .unwrap();

        assert_eq!(key, "SKU1-2");
    }

    #[tokio::test]
    async fn test_blank_request_derives_from_parent() {
        let resolver = SkuResolver::new(None);
        let mut probe = Taken::default();
        let mut claimed = ClaimedKeys::default();

        let key = resolver
            .resolve("", "TSHIRT", 2, &mut claimed, &mut probe)
            .await
            .unwrap();

        assert_eq!(key, "TSHIRT-VAR-3");
    }

    #[tokio::test]
    async fn test_never_returns_the_same_key_twice_in_one_run() {
        let resolver = SkuResolver::new(None);
        let mut probe = Taken::with(&["DUP"]);
        let mut claimed = ClaimedKeys::default();

        let mut keys = Vec::new();
        for index in 0..5 {
            keys.push(
                resolver
                    .resolve("DUP", "P", index, &mut claimed, &mut probe)
                    .await
                    .unwrap(),
            );
        }

        assert_eq!(keys, ["DUP-1", "DUP-2", "DUP-3", "DUP-4", "DUP-5"]);
        assert_eq!(claimed.len(), 5);
    }

    #[tokio::test]
    async fn test_bounded_attempts_exhaust() {
        let resolver = SkuResolver::new(Some(2));
        let mut probe = Taken::with(&["X", "X-1", "X-2"]);
        let mut claimed = ClaimedKeys::default();

        let err = resolver
            .resolve("X", "P", 0, &mut claimed, &mut probe)
            .await
            .unwrap_err();

        match err {
            ResolveError::Exhausted {
                candidate,
                attempts,
            } => {
                assert_eq!(candidate, "X");
                assert_eq!(attempts, 2);
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn test_probe_failure_propagates() {
        let resolver = SkuResolver::new(None);
        let mut probe = Taken {
            fail: true,
            ..Taken::default()
        };
        let mut claimed = ClaimedKeys::default();

        let err = resolver
            .resolve("X", "P", 0, &mut claimed, &mut probe)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Probe(_)));
    }
}
