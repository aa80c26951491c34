use thiserror::Error;

/// Failures coming out of a persistence substrate.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("lock poisoned")]
    Poisoned,
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        StoreError::Poisoned
    }
}

/// Business-rule violations, user-facing and recoverable. Each variant carries
/// enough context to render a message naming the attribute and, where one
/// exists, the conflicting owner.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Violation {
    #[error("attribute {attr} is read-only")]
    ReadOnly { attr: String },

    #[error("attribute {attr} is mandatory and must not become empty")]
    MandatoryEmpty { attr: String },

    #[error("attribute {attr} already contains {value}")]
    Duplicate { attr: String, value: String },

    #[error("{value} is no member of attribute {attr}")]
    NotAMember { attr: String, value: String },

    #[error("attribute {attr} is single-valued and already holds a value")]
    AlreadyOccupied { attr: String },

    #[error("target {target} of attribute {attr} is already owned by {current_owner}")]
    OwnershipConflict {
        attr: String,
        target: String,
        current_owner: String,
    },
}

/// The three error kinds of the storage layer: argument errors detected before
/// any write, business-rule violations, and integrity failures that indicate
/// corrupted persisted state rather than user mistakes.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    #[error(transparent)]
    Violation(#[from] Violation),

    #[error("integrity failure: {0}")]
    Integrity(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("serde error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StorageError {
    /// True for recoverable, user-facing violations.
    pub fn is_violation(&self) -> bool {
        matches!(self, StorageError::Violation(_))
    }

    pub fn violation(&self) -> Option<&Violation> {
        match self {
            StorageError::Violation(v) => Some(v),
            _ => None,
        }
    }
}
