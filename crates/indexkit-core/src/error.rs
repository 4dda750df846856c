//! Error taxonomy for the indexing core.
//!
//! Validation problems ([`Error::InvalidQuery`], [`Error::Configuration`])
//! and consistency violations ([`Error::Consistency`]) propagate to the
//! caller. Storage failures are wrapped in [`Error::Storage`] /
//! [`Error::Backend`]; the tracker converts them into boolean status
//! results at its boundary (see [`crate::tracker::Tracker`]).

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A query was built with an illegal field, sort, or filter combination.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Index, processor or plugin configuration is unusable.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An operation would have left tracking or index state inconsistent.
    #[error("consistency error: {0}")]
    Consistency(String),

    /// Persistence failure below the tracker or a backend.
    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),

    /// The search backend rejected an operation.
    #[error("backend error: {0}")]
    Backend(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn invalid_query(msg: impl Into<String>) -> Self {
        Error::InvalidQuery(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    pub fn consistency(msg: impl Into<String>) -> Self {
        Error::Consistency(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Error::Backend(msg.into())
    }

    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            name: name.into(),
        }
    }
}
