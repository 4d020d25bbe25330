// src/codec/cache.rs

//! The query cache: maps a prepared query's identity to the codec pair the
//! server assigned it, so repeated executions skip the `Parse` round trip.
//!
//! When the server signals a descriptor mismatch (the schema changed under
//! a cached entry), the entry is invalidated and the caller re-parses
//! exactly once.

use dashmap::DashMap;
use uuid::Uuid;

use crate::protocol::{Capabilities, Cardinality, OutputFormat};

/// Everything that distinguishes one prepared query from another.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryCacheKey {
    pub text: String,
    pub cardinality: Cardinality,
    pub format: OutputFormat,
    pub capabilities: u64,
    /// Caller-pinned descriptor ids, when a query is executed against
    /// explicitly supplied codecs instead of parsed ones.
    pub explicit_typeids: Option<(Uuid, Uuid)>,
}

impl QueryCacheKey {
    pub fn new(
        text: &str,
        cardinality: Cardinality,
        format: OutputFormat,
        capabilities: Capabilities,
    ) -> Self {
        QueryCacheKey {
            text: text.to_string(),
            cardinality,
            format,
            capabilities: capabilities.bits(),
            explicit_typeids: None,
        }
    }
}

/// The cached outcome of a `Parse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedQuery {
    pub input_id: Uuid,
    pub output_id: Uuid,
    /// Capabilities the server determined the query actually needs.
    pub capabilities: Capabilities,
    pub result_cardinality: Cardinality,
}

/// Concurrent map shared by every connection of a pool.
#[derive(Debug, Default)]
pub struct QueryCache {
    entries: DashMap<QueryCacheKey, CachedQuery>,
}

impl QueryCache {
    pub fn new() -> Self {
        QueryCache {
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, key: &QueryCacheKey) -> Option<CachedQuery> {
        self.entries.get(key).map(|e| *e.value())
    }

    pub fn insert(&self, key: QueryCacheKey, cached: CachedQuery) {
        self.entries.insert(key, cached);
    }

    pub fn invalidate(&self, key: &QueryCacheKey) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
