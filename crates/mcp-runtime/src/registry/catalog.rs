//! Ordered, keyed collection with consistent snapshots.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::types::{EntryKind, McpError, McpResult};

/// Anything stored in a [`Catalog`] is looked up by a string key.
pub trait CatalogEntry: Send + Sync + 'static {
    fn key(&self) -> &str;
}

/// What a write did to the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Added,
    Replaced,
}

/// An immutable view of a catalog at one instant, in registration order.
pub struct Snapshot<T> {
    entries: Arc<Vec<Arc<T>>>,
}

impl<T> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<T> Snapshot<T> {
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.entries.iter().map(Arc::as_ref)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Entries keyed by name/uri, kept in registration order.
///
/// Writers build a new entry list and swap it in under the write lock, so a
/// reader either sees the whole previous list or the whole new one. Taking a
/// snapshot is a pointer copy.
pub struct Catalog<T> {
    kind: EntryKind,
    entries: RwLock<Arc<Vec<Arc<T>>>>,
}

impl<T: CatalogEntry> Catalog<T> {
    pub fn new(kind: EntryKind) -> Self {
        Self {
            kind,
            entries: RwLock::new(Arc::new(Vec::new())),
        }
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    /// Add a new entry. Fails if the key is already taken.
    pub async fn register(&self, entry: T) -> McpResult<Registration> {
        let mut guard = self.entries.write().await;
        if guard.iter().any(|e| e.key() == entry.key()) {
            return Err(McpError::AlreadyRegistered {
                kind: self.kind,
                name: entry.key().to_string(),
            });
        }
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(Arc::new(entry));
        *guard = Arc::new(next);
        Ok(Registration::Added)
    }

    /// Add or overwrite an entry. A replaced entry keeps its position.
    pub async fn replace(&self, entry: T) -> Registration {
        let mut guard = self.entries.write().await;
        let mut next: Vec<Arc<T>> = guard.iter().cloned().collect();
        let entry = Arc::new(entry);
        let outcome = match next.iter().position(|e| e.key() == entry.key()) {
            Some(index) => {
                next[index] = entry;
                Registration::Replaced
            }
            None => {
                next.push(entry);
                Registration::Added
            }
        };
        *guard = Arc::new(next);
        outcome
    }

    /// Remove an entry. Returns whether anything was removed.
    pub async fn unregister(&self, key: &str) -> bool {
        let mut guard = self.entries.write().await;
        if !guard.iter().any(|e| e.key() == key) {
            return false;
        }
        let next: Vec<Arc<T>> = guard.iter().filter(|e| e.key() != key).cloned().collect();
        *guard = Arc::new(next);
        true
    }

    pub async fn get(&self, key: &str) -> Option<Arc<T>> {
        self.entries
            .read()
            .await
            .iter()
            .find(|e| e.key() == key)
            .cloned()
    }

    pub async fn snapshot(&self) -> Snapshot<T> {
        Snapshot {
            entries: Arc::clone(&*self.entries.read().await),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
