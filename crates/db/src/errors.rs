use thiserror::Error;

pub type DbResult<T> = Result<T, DbError>;

/// Storage engine errors.
///
/// `NotFound` is a legal outcome surfaced as `Ok(None)` by getters; it
/// only appears as an error where presence is a precondition. `Conflict`
/// is retryable by re-driving the block. `Corruption` is fatal and the
/// caller must halt.
#[derive(Debug, Clone, Error)]
pub enum DbError {
    /// A row that must exist is missing.
    #[error("missing row: {0}")]
    NotFound(String),

    /// Another writer holds or advanced past this snapshot.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Snapshot requested for a height whose parent is not committed.
    #[error("snapshot at {requested} requires committed tip {required}, tip is {tip:?}")]
    PreconditionViolation {
        requested: u64,
        required: u64,
        tip: Option<u64>,
    },

    /// Two pointer writes share `(contract, pointer, last_seen_at)` within
    /// one height.
    #[error("duplicate pointer write at height {height}: {key}")]
    DuplicatePointerWrite { height: u64, key: String },

    /// On-disk state violates an invariant. Fatal.
    #[error("corruption: {0}")]
    Corruption(String),

    /// Backend failure.
    #[error("sled: {0}")]
    Sled(String),

    /// Row failed to decode. Fatal: treated as corruption by callers.
    #[error("codec: {0}")]
    Codec(String),
}

impl From<sled::Error> for DbError {
    fn from(err: sled::Error) -> Self {
        DbError::Sled(err.to_string())
    }
}

impl From<std::io::Error> for DbError {
    fn from(err: std::io::Error) -> Self {
        DbError::Codec(err.to_string())
    }
}

impl DbError {
    /// True when the caller must halt rather than retry.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DbError::Corruption(_) | DbError::Codec(_))
    }
}
