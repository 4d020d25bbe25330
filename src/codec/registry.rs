// src/codec/registry.rs

//! The process-wide codec registry: a concurrent map from 128-bit type id
//! to codec. Scalars are seeded at construction under their well-known
//! ids; composite codecs are inserted on first sight of their descriptor
//! and then shared. Entries are insert-only, so the read path takes a
//! reader-preferred lock and never blocks on other readers.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use uuid::Uuid;

use super::composite::TupleCodec;
use super::scalar::*;
use super::{ids, Codec};

pub struct CodecRegistry {
    codecs: RwLock<HashMap<Uuid, Arc<dyn Codec>>>,
}

impl CodecRegistry {
    /// A registry with every well-known scalar pre-registered.
    pub fn with_scalars() -> Self {
        let mut codecs: HashMap<Uuid, Arc<dyn Codec>> = HashMap::new();
        codecs.insert(ids::BOOL, Arc::new(BoolCodec));
        codecs.insert(ids::INT16, Arc::new(Int16Codec));
        codecs.insert(ids::INT32, Arc::new(Int32Codec));
        codecs.insert(ids::INT64, Arc::new(Int64Codec));
        codecs.insert(ids::FLOAT32, Arc::new(Float32Codec));
        codecs.insert(ids::FLOAT64, Arc::new(Float64Codec));
        codecs.insert(ids::STR, Arc::new(StrCodec));
        codecs.insert(ids::BYTES, Arc::new(BytesCodec));
        codecs.insert(ids::UUID, Arc::new(UuidCodec));
        codecs.insert(ids::JSON, Arc::new(JsonCodec));
        codecs.insert(ids::DATETIME, Arc::new(DatetimeCodec));
        codecs.insert(ids::LOCAL_DATETIME, Arc::new(LocalDatetimeCodec));
        codecs.insert(ids::LOCAL_DATE, Arc::new(LocalDateCodec));
        codecs.insert(ids::LOCAL_TIME, Arc::new(LocalTimeCodec));
        codecs.insert(ids::DURATION, Arc::new(DurationCodec));
        codecs.insert(ids::RELATIVE_DURATION, Arc::new(RelativeDurationCodec));
        codecs.insert(ids::DATE_DURATION, Arc::new(DateDurationCodec));
        codecs.insert(ids::BIGINT, Arc::new(BigIntCodec));
        codecs.insert(ids::DECIMAL, Arc::new(DecimalCodec));
        codecs.insert(ids::CONFIG_MEMORY, Arc::new(ConfigMemoryCodec));
        codecs.insert(ids::EMPTY_TUPLE, Arc::new(TupleCodec::empty()));
        CodecRegistry {
            codecs: RwLock::new(codecs),
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<dyn Codec>> {
        self.codecs.read().get(id).cloned()
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.codecs.read().contains_key(id)
    }

    /// Inserts a codec for `id` and returns the registered codec. A codec
    /// id uniquely identifies its shape, so if another task won the race
    /// the existing entry is kept and returned.
    pub fn insert(&self, id: Uuid, codec: Arc<dyn Codec>) -> Arc<dyn Codec> {
        let mut codecs = self.codecs.write();
        codecs.entry(id).or_insert(codec).clone()
    }

    pub fn len(&self) -> usize {
        self.codecs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.read().is_empty()
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_scalars()
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("codecs", &self.len())
            .finish()
    }
}

static GLOBAL: OnceLock<CodecRegistry> = OnceLock::new();

/// The shared registry used by every connection in the process.
pub fn global() -> &'static CodecRegistry {
    GLOBAL.get_or_init(CodecRegistry::with_scalars)
}
