use domain::DomainError;
use thiserror::Error;

/// Errors that can occur when interacting with the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique constraint rejected the write.
    #[error("Unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    /// A referenced parent row does not exist.
    #[error("Foreign key constraint violated: {constraint}")]
    ForeignKeyViolation { constraint: String },

    /// A check or not-null constraint rejected the row.
    #[error("Check constraint violated: {constraint}")]
    CheckViolation { constraint: String },

    /// `begin` was called while a physical transaction was already open.
    #[error("A transaction is already open on this connection")]
    TransactionAlreadyOpen,

    /// `commit` or `rollback` was called with no open physical transaction.
    #[error("No transaction is open on this connection")]
    NoTransaction,

    /// The backend could not be reached or failed mid-operation.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be mapped back to a record.
    #[error("Corrupt row: {0}")]
    Decode(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    /// Returns true for errors confined to a single record.
    ///
    /// Integrity violations leave the connection and any open transaction
    /// usable, so a caller may skip the offending record and carry on.
    /// Everything else must abort the unit of work.
    pub fn is_item_level(&self) -> bool {
        matches!(
            self,
            StoreError::UniqueViolation { .. }
                | StoreError::ForeignKeyViolation { .. }
                | StoreError::CheckViolation { .. }
        )
    }

    /// Returns true if a unique constraint fired.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation { .. })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = e {
            let constraint = db_err.constraint().unwrap_or("unknown").to_string();
            match db_err.code().as_deref() {
                Some("23505") => return StoreError::UniqueViolation { constraint },
                Some("23503") => return StoreError::ForeignKeyViolation { constraint },
                Some("23502") | Some("23514") => return StoreError::CheckViolation { constraint },
                _ => {}
            }
        }
        StoreError::Database(e)
    }
}

impl From<DomainError> for StoreError {
    fn from(e: DomainError) -> Self {
        StoreError::Decode(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
