//! Engine configuration.

use std::sync::Arc;

use crate::cache::KvCache;
use crate::db::{SqlHandle, SqlWriteHandle};
use crate::model::Table;

/// Default TTL applied when a query declares `ttl: 0`: seven days.
pub const DEFAULT_TTL_SECONDS: i64 = 7 * 24 * 3600;

/// Everything [`Storage::new`] needs: the external collaborators, the
/// declarative schema, and the engine options.
///
/// [`Storage::new`]: crate::Storage::new
pub struct Config {
    /// Handle for selects.
    pub read_handle: Arc<dyn SqlHandle>,

    /// Handle for inserts, updates, and transactions.
    pub write_handle: Arc<dyn SqlWriteHandle>,

    /// Key-value cache backend.
    pub cache: Arc<dyn KvCache>,

    /// Table declarations.
    pub tables: Vec<Table>,

    /// Required. Prefixes every cache key as `service:<name>|`.
    pub service_name: String,

    /// Seconds; `0` falls back to [`DEFAULT_TTL_SECONDS`].
    pub default_ttl: i64,

    /// Emit verbose per-action logging.
    pub debug: bool,

    /// Bypass the cache entirely; every read goes to the database and
    /// writes take no cache actions.
    pub disable_cache: bool,

    /// Fetch list rows serially instead of concurrently. Intended for
    /// deterministic tests.
    pub disable_concurrency: bool,
}

impl Config {
    pub fn new(
        read_handle: Arc<dyn SqlHandle>,
        write_handle: Arc<dyn SqlWriteHandle>,
        cache: Arc<dyn KvCache>,
        service_name: impl Into<String>,
        tables: Vec<Table>,
    ) -> Self {
        Self {
            read_handle,
            write_handle,
            cache,
            tables,
            service_name: service_name.into(),
            default_ttl: 0,
            debug: false,
            disable_cache: false,
            disable_concurrency: false,
        }
    }
}
