use thiserror::Error;

use crate::cache::CacheError;
use crate::db::DbError;

/// Top-level error for every public engine operation.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Neither the cache nor the database had a matching row.
    ///
    /// Cache misses are recovered internally by falling back to the
    /// database; a `NotFound` that reaches the caller means the database
    /// itself returned no rows.
    #[error("no rows found")]
    NotFound,

    /// A single-row query returned more than one row.
    #[error("query `{query}` returned {count} rows where exactly one was expected")]
    MultipleRows { query: String, count: usize },

    /// The table/query declarations handed to [`Storage::new`] are invalid.
    ///
    /// [`Storage::new`]: crate::Storage::new
    #[error("invalid storage configuration: {message}")]
    Config { message: String },

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Db(#[from] DbError),

    /// The caller broke an engine contract: missing type tag, unknown
    /// query name, malformed runtime value.
    #[error("storage contract violated: {message}")]
    Contract { message: String },
}

impl StorageError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn contract(message: impl Into<String>) -> Self {
        Self::Contract {
            message: message.into(),
        }
    }

    /// True when the error is the distinguished no-rows kind.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}
