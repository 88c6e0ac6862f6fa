//! Persisted reader state: saved articles and search history.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::error::StoreError;
use super::types::SavedArticle;

pub const SAVED_KEY: &str = "grokipedia-saved";
pub const HISTORY_KEY: &str = "grokipedia-history";
pub const STATE_FILE_NAME: &str = "state.json";
pub const MAX_HISTORY_ITEMS: usize = 15;

pub type Listener = Box<dyn Fn(&str, &Value) + Send>;

/// Key-value persistence with change notification.
pub trait StateStore {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&mut self, key: &str, value: Value) -> Result<(), StoreError>;
    fn subscribe(&mut self, listener: Listener);
}

#[derive(Default)]
pub struct MemoryStore {
    values: BTreeMap<String, Value>,
    listeners: Vec<Listener>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), StoreError> {
        self.values.insert(key.to_string(), value);
        notify(&self.listeners, key, &self.values[key]);
        Ok(())
    }

    fn subscribe(&mut self, listener: Listener) {
        self.listeners.push(listener);
    }
}

/// A single JSON object file, loaded once and rewritten on every `set`.
pub struct JsonFileStore {
    path: PathBuf,
    values: BTreeMap<String, Value>,
    listeners: Vec<Listener>,
}

impl JsonFileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let values = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(values) => values,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "state file is corrupt, starting empty");
                    BTreeMap::new()
                }
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };
        debug!(path = %path.display(), keys = values.len(), "state loaded");
        Ok(Self {
            path,
            values,
            listeners: Vec::new(),
        })
    }

    pub fn in_dir(dir: &Path) -> Result<Self, StoreError> {
        Self::open(dir.join(STATE_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&self.values)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl StateStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), StoreError> {
        self.values.insert(key.to_string(), value);
        self.flush()?;
        notify(&self.listeners, key, &self.values[key]);
        Ok(())
    }

    fn subscribe(&mut self, listener: Listener) {
        self.listeners.push(listener);
    }
}

fn notify(listeners: &[Listener], key: &str, value: &Value) {
    for listener in listeners {
        listener(key, value);
    }
}

/// Typed access to the two persisted collections.
pub struct Library<S> {
    store: S,
}

impl<S: StateStore> Library<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn saved(&self) -> Vec<SavedArticle> {
        self.load(SAVED_KEY)
    }

    pub fn history(&self) -> Vec<String> {
        let mut history: Vec<String> = self.load(HISTORY_KEY);
        history.truncate(MAX_HISTORY_ITEMS);
        history
    }

    pub fn persist_saved(&mut self, saved: &[SavedArticle]) -> Result<(), StoreError> {
        self.persist(SAVED_KEY, saved)
    }

    pub fn persist_history(&mut self, history: &[String]) -> Result<(), StoreError> {
        self.persist(HISTORY_KEY, history)
    }

    fn load<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        let Some(value) = self.store.get(key) else {
            return T::default();
        };
        serde_json::from_value(value).unwrap_or_else(|err| {
            warn!(key, error = %err, "ignoring malformed stored value");
            T::default()
        })
    }

    fn persist<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> Result<(), StoreError> {
        self.store.set(key, serde_json::to_value(value)?)
    }
}

/// Moves `query` to the front of `history`. A case-insensitive repeat keeps
/// the spelling it was first recorded with. Returns false for blank queries.
pub fn record_search(history: &mut Vec<String>, query: &str) -> bool {
    let query = query.trim();
    if query.is_empty() {
        return false;
    }
    let folded = query.to_lowercase();
    let entry = match history.iter().position(|entry| entry.to_lowercase() == folded) {
        Some(index) => history.remove(index),
        None => query.to_string(),
    };
    history.insert(0, entry);
    history.truncate(MAX_HISTORY_ITEMS);
    true
}

/// Flips membership of `article` (keyed by query). Returns true when it was added.
pub fn toggle_saved(saved: &mut Vec<SavedArticle>, article: &SavedArticle) -> bool {
    if let Some(index) = saved.iter().position(|entry| entry.query == article.query) {
        saved.remove(index);
        false
    } else {
        saved.push(article.clone());
        true
    }
}

pub fn is_saved(saved: &[SavedArticle], query: &str) -> bool {
    saved.iter().any(|entry| entry.query == query)
}
