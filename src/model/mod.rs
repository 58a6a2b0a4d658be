//! Declarative query and table model.
//!
//! Applications describe their schema as [`Table`] and [`Query`] values;
//! the engine validates and expands them once at construction into the
//! parsed forms the hot paths run on.

mod action;
mod key;
mod query;
mod table;

pub use action::CacheAction;
pub use query::Query;
pub use table::Table;

pub(crate) use action::{classify_actions, DataStructure};
pub(crate) use key::KeyTemplate;
pub(crate) use query::ParsedQuery;
pub(crate) use table::ParsedTable;

use crate::error::StorageError;

/// Paging options for list selects.
///
/// `limit == 0` means no limit. `fetch_all_data` expands the cached
/// id-list into full rows; without it a list select yields skeleton
/// entities carrying only the primary key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectOptions {
    pub offset: i64,
    pub limit: i64,
    pub fetch_all_data: bool,
}

impl SelectOptions {
    pub(crate) fn validate(&self) -> Result<(), StorageError> {
        if self.offset < 0 {
            return Err(StorageError::contract("offset must be >= 0"));
        }
        if self.limit < 0 {
            return Err(StorageError::contract("limit must be >= 0"));
        }
        Ok(())
    }

    /// Inclusive end index for list-cache slicing; `limit == 0` maps to
    /// `-1`, which LRANGE reads as "through the tail".
    pub(crate) fn lrange_stop(&self) -> i64 {
        if self.limit > 0 {
            self.offset + self.limit - 1
        } else {
            -1
        }
    }
}
