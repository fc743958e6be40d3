//! The shared, typed key-value store that is the sole cross-component channel.
//!
//! Every initialization step, engine, and background task reads and writes through a
//! [`SharedBag`] rather than holding direct references to one another. This keeps the
//! set of allowed communications observable (the bag's key set) at the cost of static
//! typing at the exchange point — [`SharedBag::get_as`] recovers that typing at the
//! call site with a downcast.
//!
//! # Example
//!
//! ```rust
//! use analysis_engine::engine::bag::{Key, SharedBag};
//!
//! let bag = SharedBag::new();
//! bag.set(Key::LastFetched, "2024-01-01".to_string());
//! let fetched: Option<String> = bag.get_as(&Key::LastFetched);
//! assert_eq!(fetched.as_deref(), Some("2024-01-01"));
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::engine::error::BagError;

/// A statically-declared identifier naming a slot in the [`SharedBag`].
///
/// The value type stored under a given key is determined by convention (documented on
/// the variant), not enforced by the bag itself — see invariant (iii) in the module
/// docs. New categories of artifact should extend this enum rather than encoding a
/// dynamic string key, so the full set of cross-component channels stays grep-able.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    /// The user's portfolio as loaded from the external collaborator. Holds `Portfolio`.
    Portfolio,
    /// A normalized, LLM-friendly projection of the portfolio. Holds `serde_json::Value`.
    NormalizedForAI,
    /// RFC3339 timestamp of the last successful portfolio fetch. Holds `String`.
    LastFetched,
    /// User-facing display/locale preferences. Holds an application-defined profile type.
    Profile,
    /// Regional/currency settings resolved during initialization.
    RegionalSettings,
    /// Whether the current run operates in batch mode. Holds `bool`.
    BatchMode,
    /// Composite system health snapshot. Holds `ApplicationHealth`.
    Health,
    /// The primary artifact produced by an engine, namespaced by engine name.
    EngineResult(String),
    /// A tool-specific result cached for reuse across engines, namespaced by tool name.
    ToolResult(String),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Portfolio => write!(f, "portfolio"),
            Key::NormalizedForAI => write!(f, "normalized_for_ai"),
            Key::LastFetched => write!(f, "last_fetched"),
            Key::Profile => write!(f, "profile"),
            Key::RegionalSettings => write!(f, "regional_settings"),
            Key::BatchMode => write!(f, "batch_mode"),
            Key::Health => write!(f, "health"),
            Key::EngineResult(name) => write!(f, "engine_result:{name}"),
            Key::ToolResult(name) => write!(f, "tool_result:{name}"),
        }
    }
}

/// Documentation-only grouping of [`Key`] variants, used for debug output and logging.
/// Never consulted at runtime to decide how a value is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCategory {
    /// Portfolio/profile/regional inputs.
    PortfolioState,
    /// Artifacts produced by engines.
    EngineResult,
    /// Health and metrics snapshots.
    Health,
    /// Cached tool outputs.
    ToolResult,
}

impl Key {
    /// Documentation-only category, used for logging and debug tooling.
    pub fn category(&self) -> KeyCategory {
        match self {
            Key::Portfolio | Key::NormalizedForAI | Key::LastFetched | Key::Profile
            | Key::RegionalSettings | Key::BatchMode => KeyCategory::PortfolioState,
            Key::Health => KeyCategory::Health,
            Key::EngineResult(_) => KeyCategory::EngineResult,
            Key::ToolResult(_) => KeyCategory::ToolResult,
        }
    }
}

type BoxedValue = Arc<RwLock<Box<dyn Any + Send + Sync>>>;

/// An immutable point-in-time copy of a [`SharedBag`], safe for concurrent readers.
///
/// `Snapshot` shares the underlying `Arc<RwLock<_>>` cells with the bag it was taken
/// from rather than deep-copying every value, so taking one is cheap; what it freezes
/// is the *set of keys and cell identities* present at the moment of the call, per the
/// linearization guarantee in the module docs.
pub struct Snapshot {
    entries: HashMap<Key, BoxedValue>,
}

impl Snapshot {
    /// Look up a value by key, downcasting to `V`.
    pub fn get_as<V: 'static + Clone>(&self, key: &Key) -> Option<V> {
        let cell = self.entries.get(key)?;
        let guard = cell.read().expect("shared bag lock poisoned");
        guard.downcast_ref::<V>().cloned()
    }

    /// True if the key was present when this snapshot was taken.
    pub fn contains(&self, key: &Key) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of keys present in the snapshot.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the snapshot has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Process-wide, concurrent key→value store used as the sole medium of communication
/// between initialization steps, engines, and background tasks.
///
/// Writes to distinct keys never block one another (each key owns its own inner
/// `RwLock`); writes to the *same* key are serialized by that cell's lock, giving
/// last-writer-wins semantics with no cross-key ordering guarantee, matching §5 of the
/// design.
#[derive(Default)]
pub struct SharedBag {
    entries: RwLock<HashMap<Key, BoxedValue>>,
}

impl SharedBag {
    /// Create an empty bag.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Store `value` under `key`, creating the slot lazily on first write.
    ///
    /// Subsequent calls to `set` for the same key are serialized against one another
    /// by the cell's own lock; they do not block `set` calls for other keys.
    pub fn set<V: 'static + Send + Sync>(&self, key: Key, value: V) {
        let boxed: Box<dyn Any + Send + Sync> = Box::new(value);
        let existing = {
            let entries = self.entries.read().expect("shared bag lock poisoned");
            entries.get(&key).cloned()
        };
        match existing {
            Some(cell) => {
                let mut guard = cell.write().expect("shared bag lock poisoned");
                *guard = boxed;
            }
            None => {
                let mut entries = self.entries.write().expect("shared bag lock poisoned");
                entries
                    .entry(key)
                    .or_insert_with(|| Arc::new(RwLock::new(boxed)));
            }
        }
    }

    /// Look up a value by key, downcasting to `V`. Returns `None` if absent or if the
    /// stored value is not of type `V`.
    pub fn get_as<V: 'static + Clone>(&self, key: &Key) -> Option<V> {
        let cell = {
            let entries = self.entries.read().expect("shared bag lock poisoned");
            entries.get(key).cloned()
        }?;
        let guard = cell.read().expect("shared bag lock poisoned");
        guard.downcast_ref::<V>().cloned()
    }

    /// Look up a value by key, returning a [`BagError::TypeMismatch`] if present under
    /// the wrong type rather than silently treating it as absent.
    pub fn try_get_as<V: 'static + Clone>(&self, key: &Key) -> Result<Option<V>, BagError> {
        let cell = {
            let entries = self.entries.read().expect("shared bag lock poisoned");
            entries.get(key).cloned()
        };
        let Some(cell) = cell else {
            return Ok(None);
        };
        let guard = cell.read().expect("shared bag lock poisoned");
        match guard.downcast_ref::<V>() {
            Some(v) => Ok(Some(v.clone())),
            None => Err(BagError::TypeMismatch {
                key: key.to_string(),
                expected: std::any::type_name::<V>(),
            }),
        }
    }

    /// Look up a value that must have been written during initialization. Logs at
    /// `error` and returns [`BagError::MissingKey`] rather than panicking, so callers at
    /// the edge of the process (the CLI, tests) can decide how fatal that really is —
    /// but per spec this is reserved for invariants that must hold post-init, and
    /// callers are expected to `expect()`/abort on it in practice.
    pub fn must_get_as<V: 'static + Clone>(&self, key: &Key) -> Result<V, BagError> {
        match self.get_as(key) {
            Some(v) => Ok(v),
            None => {
                log::error!("SharedBag::must_get_as({key}): required key absent");
                Err(BagError::MissingKey(key.to_string()))
            }
        }
    }

    /// True if `key` currently has a value.
    pub fn contains(&self, key: &Key) -> bool {
        let entries = self.entries.read().expect("shared bag lock poisoned");
        entries.contains_key(key)
    }

    /// Take an immutable, linearizable snapshot of every entry currently in the bag.
    pub fn snapshot(&self) -> Snapshot {
        let entries = self.entries.read().expect("shared bag lock poisoned");
        Snapshot {
            entries: entries.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let bag = SharedBag::new();
        bag.set(Key::LastFetched, "today".to_string());
        assert_eq!(bag.get_as::<String>(&Key::LastFetched), Some("today".to_string()));
    }

    #[test]
    fn get_as_wrong_type_is_none() {
        let bag = SharedBag::new();
        bag.set(Key::LastFetched, 42u32);
        assert_eq!(bag.get_as::<String>(&Key::LastFetched), None);
    }

    #[test]
    fn try_get_as_wrong_type_is_error() {
        let bag = SharedBag::new();
        bag.set(Key::LastFetched, 42u32);
        assert!(matches!(
            bag.try_get_as::<String>(&Key::LastFetched),
            Err(BagError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn must_get_absent_key_errors() {
        let bag = SharedBag::new();
        assert!(matches!(
            bag.must_get_as::<String>(&Key::Profile),
            Err(BagError::MissingKey(_))
        ));
    }

    #[test]
    fn last_write_wins_for_same_key() {
        let bag = SharedBag::new();
        bag.set(Key::LastFetched, "first".to_string());
        bag.set(Key::LastFetched, "second".to_string());
        assert_eq!(bag.get_as::<String>(&Key::LastFetched), Some("second".to_string()));
    }

    #[test]
    fn snapshot_sees_writes_before_it_not_after() {
        let bag = SharedBag::new();
        bag.set(Key::LastFetched, "before".to_string());
        let snap = bag.snapshot();
        bag.set(Key::Profile, "after".to_string());
        assert_eq!(snap.get_as::<String>(&Key::LastFetched), Some("before".to_string()));
        assert!(!snap.contains(&Key::Profile));
    }

    #[test]
    fn engine_result_keys_are_namespaced() {
        let bag = SharedBag::new();
        bag.set(Key::EngineResult("risk".into()), 1u8);
        bag.set(Key::EngineResult("tax".into()), 2u8);
        assert_eq!(bag.get_as::<u8>(&Key::EngineResult("risk".into())), Some(1));
        assert_eq!(bag.get_as::<u8>(&Key::EngineResult("tax".into())), Some(2));
    }
}
