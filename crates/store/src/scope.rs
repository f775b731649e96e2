//! Depth-counted transaction scope over a single connection.

use futures_util::future::BoxFuture;

use crate::{Result, StoreError, Transactional};

/// Owns a connection and tracks how deeply `begin` has been nested.
///
/// Only the outermost `begin` opens a physical transaction and only the
/// matching outermost `commit` commits it. `rollback` is unconditional:
/// from any depth it discards the physical transaction and resets the
/// depth to zero, after which further commits are no-ops.
///
/// Dropping a scope while a transaction is open aborts it, so a panic or a
/// cancelled future never leaves a transaction dangling on the connection.
pub struct TransactionScope<C: Transactional> {
    conn: C,
    depth: u32,
}

impl<C: Transactional> TransactionScope<C> {
    pub fn new(conn: C) -> Self {
        Self { conn, depth: 0 }
    }

    /// Current nesting depth. Zero means no transaction is open.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// The underlying connection, for reads and writes inside or outside a
    /// transaction.
    pub fn connection(&mut self) -> &mut C {
        &mut self.conn
    }

    pub async fn begin(&mut self) -> Result<()> {
        if self.depth == 0 {
            self.conn.begin().await?;
        }
        self.depth += 1;
        tracing::trace!(depth = self.depth, "transaction begin");
        Ok(())
    }

    /// Decrements the depth, committing physically when it reaches zero.
    ///
    /// At depth zero this is a no-op, including after a rollback.
    pub async fn commit(&mut self) -> Result<()> {
        match self.depth {
            0 => Ok(()),
            1 => {
                self.depth = 0;
                tracing::trace!("transaction commit");
                let result = self.conn.commit().await;
                let outcome = if result.is_ok() { "commit" } else { "commit_failed" };
                metrics::counter!("store_transactions_total", "outcome" => outcome).increment(1);
                result
            }
            _ => {
                self.depth -= 1;
                tracing::trace!(depth = self.depth, "nested commit deferred");
                Ok(())
            }
        }
    }

    /// Discards the transaction regardless of depth.
    pub async fn rollback(&mut self) -> Result<()> {
        let depth = std::mem::take(&mut self.depth);
        if !self.conn.in_transaction() {
            return Ok(());
        }
        tracing::trace!(depth, "transaction rollback");
        metrics::counter!("store_transactions_total", "outcome" => "rollback").increment(1);
        self.conn.rollback().await
    }

    /// Runs `work` inside a transaction.
    ///
    /// Commits if `work` succeeds and rolls back if it fails or if the commit
    /// itself fails. The original error is returned; a failed rollback is
    /// only logged.
    pub async fn run_in_transaction<T, E, F>(&mut self, work: F) -> std::result::Result<T, E>
    where
        F: for<'c> FnOnce(&'c mut C) -> BoxFuture<'c, std::result::Result<T, E>> + Send,
        E: From<StoreError> + Send,
        T: Send,
    {
        self.begin().await?;
        match work(&mut self.conn).await {
            Ok(value) => match self.commit().await {
                Ok(()) => Ok(value),
                Err(err) => {
                    self.rollback_quietly().await;
                    Err(err.into())
                }
            },
            Err(err) => {
                self.rollback_quietly().await;
                Err(err)
            }
        }
    }

    async fn rollback_quietly(&mut self) {
        if let Err(e) = self.rollback().await {
            tracing::warn!(error = %e, "rollback failed");
        }
    }

    fn abort_open(&mut self) {
        if self.depth > 0 || self.conn.in_transaction() {
            tracing::warn!(
                depth = self.depth,
                "transaction scope released while open, aborting"
            );
            metrics::counter!("store_transactions_total", "outcome" => "aborted").increment(1);
            self.depth = 0;
            self.conn.abort();
        }
    }
}

impl<C: Transactional> Drop for TransactionScope<C> {
    fn drop(&mut self) {
        self.abort_open();
    }
}
