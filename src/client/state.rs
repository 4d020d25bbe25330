// src/client/state.rs

//! Immutable per-client session state: module, aliases, config, and
//! globals. Every `with_*` operation returns a new value by structural
//! copy; states never share mutable storage, which is what makes facade
//! derivation safe under concurrency.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use crate::codec::{SparseObject, Value};

/// The session context shipped to the server alongside commands.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionState {
    module: Option<String>,
    aliases: BTreeMap<String, String>,
    config: BTreeMap<String, Value>,
    globals: BTreeMap<String, Value>,
}

impl SessionState {
    pub fn new() -> Self {
        SessionState::default()
    }

    /// The default module for unqualified names, or `None` for the
    /// server-side default.
    pub fn module(&self) -> Option<&str> {
        self.module.as_deref()
    }

    pub fn aliases(&self) -> &BTreeMap<String, String> {
        &self.aliases
    }

    pub fn config(&self) -> &BTreeMap<String, Value> {
        &self.config
    }

    pub fn globals(&self) -> &BTreeMap<String, Value> {
        &self.globals
    }

    /// True for a state the server would apply by default anyway; such a
    /// state never needs to travel.
    pub fn is_default(&self) -> bool {
        self.module.is_none()
            && self.aliases.is_empty()
            && self.config.is_empty()
            && self.globals.is_empty()
    }

    pub fn with_module(&self, module: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.module = Some(module.into());
        next
    }

    pub fn without_module(&self) -> Self {
        let mut next = self.clone();
        next.module = None;
        next
    }

    pub fn with_aliases<I, K, V>(&self, aliases: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut next = self.clone();
        next.aliases
            .extend(aliases.into_iter().map(|(k, v)| (k.into(), v.into())));
        next
    }

    pub fn with_config<I, K>(&self, config: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut next = self.clone();
        next.config
            .extend(config.into_iter().map(|(k, v)| (k.into(), v)));
        next
    }

    /// Globals are addressed by fully qualified name.
    pub fn with_globals<I, K>(&self, globals: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut next = self.clone();
        next.globals
            .extend(globals.into_iter().map(|(k, v)| (k.into(), v)));
        next
    }

    /// The sparse-object rendition the state codec encodes: only the
    /// components that deviate from the default are present.
    pub(crate) fn to_sparse(&self) -> SparseObject {
        let mut sparse = SparseObject::new();
        if let Some(module) = &self.module {
            sparse.set("module", Value::Str(module.clone()));
        }
        if !self.aliases.is_empty() {
            let pairs = self
                .aliases
                .iter()
                .map(|(alias, target)| {
                    Value::Tuple(vec![
                        Value::Str(alias.clone()),
                        Value::Str(target.clone()),
                    ])
                })
                .collect();
            sparse.set("aliases", Value::Array(pairs));
        }
        if !self.config.is_empty() {
            let mut config = SparseObject::new();
            for (name, value) in &self.config {
                config.set(name.clone(), value.clone());
            }
            sparse.set("config", Value::SparseObject(config));
        }
        if !self.globals.is_empty() {
            let mut globals = SparseObject::new();
            for (name, value) in &self.globals {
                globals.set(name.clone(), value.clone());
            }
            sparse.set("globals", Value::SparseObject(globals));
        }
        sparse
    }
}

/// Content hash of an encoded state, used to suppress redundant
/// `StateData` transmission per connection.
pub(crate) fn state_hash(encoded: &[u8]) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    encoded.hash(&mut hasher);
    hasher.finish()
}
