//! Namespaced byte-level key-value storage.
//!
//! Namespaces partition resource kinds; the composite on-disk key is
//! `"{namespace}\0{key}"`. Writes that must land together (a resource
//! record and its slug index entry) go through [`KvStore::apply`], which
//! commits the whole batch in one transaction.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{StoreError, StoreResult};

fn validate_part(what: &str, value: &str) -> StoreResult<()> {
    if value.is_empty() {
        return Err(StoreError::InvalidKey(format!("{what} must not be empty")));
    }
    if value.contains('\0') {
        return Err(StoreError::InvalidKey(format!(
            "{what} must not contain null bytes"
        )));
    }
    Ok(())
}

/// Build the composite key `"{namespace}\0{key}"` as bytes.
fn composite_key(namespace: &str, key: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(namespace.len().saturating_add(key.len()).saturating_add(1));
    buf.extend_from_slice(namespace.as_bytes());
    buf.push(0);
    buf.extend_from_slice(key.as_bytes());
    buf
}

/// Inclusive start of a namespace's key range: `"{namespace}\0"`.
#[cfg(feature = "kv")]
fn namespace_range_start(namespace: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(namespace.len().saturating_add(1));
    buf.extend_from_slice(namespace.as_bytes());
    buf.push(0);
    buf
}

/// Exclusive end of a namespace's key range: `"{namespace}\x01"`.
///
/// `\0` is the separator, so every key in the namespace sorts inside
/// `["{namespace}\0", "{namespace}\x01")`.
#[cfg(feature = "kv")]
fn namespace_range_end(namespace: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(namespace.len().saturating_add(1));
    buf.extend_from_slice(namespace.as_bytes());
    buf.push(1);
    buf
}

/// One write in an atomic batch.
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Insert or overwrite a value.
    Put {
        /// Target namespace.
        namespace: String,
        /// Key within the namespace.
        key: String,
        /// Value bytes.
        value: Vec<u8>,
    },
    /// Remove a key if present.
    Delete {
        /// Target namespace.
        namespace: String,
        /// Key within the namespace.
        key: String,
    },
}

impl WriteOp {
    /// Put into a namespace.
    #[must_use]
    pub fn put(namespace: impl Into<String>, key: impl Into<String>, value: Vec<u8>) -> Self {
        Self::Put {
            namespace: namespace.into(),
            key: key.into(),
            value,
        }
    }

    /// Delete from a namespace.
    #[must_use]
    pub fn delete(namespace: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Delete {
            namespace: namespace.into(),
            key: key.into(),
        }
    }

    fn validate(&self) -> StoreResult<()> {
        let (ns, key) = match self {
            Self::Put { namespace, key, .. } | Self::Delete { namespace, key } => (namespace, key),
        };
        validate_part("namespace", ns)?;
        validate_part("key", key)
    }
}

/// Namespaced byte-level store with atomic batched writes.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Get a value. Returns `None` if the key does not exist.
    async fn get(&self, namespace: &str, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Set a single value, overwriting any existing one.
    async fn put(&self, namespace: &str, key: &str, value: Vec<u8>) -> StoreResult<()>;

    /// Delete a key. Returns `true` if it existed.
    async fn delete(&self, namespace: &str, key: &str) -> StoreResult<bool>;

    /// List all `(key, value)` entries in a namespace, key-ordered.
    async fn list(&self, namespace: &str) -> StoreResult<Vec<(String, Vec<u8>)>>;

    /// Apply a batch of writes in one transaction: either every op lands
    /// or none do.
    async fn apply(&self, ops: Vec<WriteOp>) -> StoreResult<()>;
}

// ---------------------------------------------------------------------------
// In-memory implementation (always available)
// ---------------------------------------------------------------------------

/// In-memory store for tests.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    data: std::sync::RwLock<std::collections::BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryKvStore {
    /// Create an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience: an `Arc<dyn KvStore>` over a fresh in-memory store.
    #[must_use]
    pub fn shared() -> Arc<dyn KvStore> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, namespace: &str, key: &str) -> StoreResult<Option<Vec<u8>>> {
        validate_part("namespace", namespace)?;
        validate_part("key", key)?;
        let data = self
            .data
            .read()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(data.get(&composite_key(namespace, key)).cloned())
    }

    async fn put(&self, namespace: &str, key: &str, value: Vec<u8>) -> StoreResult<()> {
        self.apply(vec![WriteOp::put(namespace, key, value)]).await
    }

    async fn delete(&self, namespace: &str, key: &str) -> StoreResult<bool> {
        validate_part("namespace", namespace)?;
        validate_part("key", key)?;
        let mut data = self
            .data
            .write()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(data.remove(&composite_key(namespace, key)).is_some())
    }

    async fn list(&self, namespace: &str) -> StoreResult<Vec<(String, Vec<u8>)>> {
        validate_part("namespace", namespace)?;
        let data = self
            .data
            .read()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let mut prefix = namespace.as_bytes().to_vec();
        prefix.push(0);
        Ok(data
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .filter_map(|(k, v)| {
                std::str::from_utf8(&k[prefix.len()..])
                    .ok()
                    .map(|key| (key.to_owned(), v.clone()))
            })
            .collect())
    }

    async fn apply(&self, ops: Vec<WriteOp>) -> StoreResult<()> {
        for op in &ops {
            op.validate()?;
        }
        let mut data = self
            .data
            .write()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        for op in ops {
            match op {
                WriteOp::Put {
                    namespace,
                    key,
                    value,
                } => {
                    data.insert(composite_key(&namespace, &key), value);
                }
                WriteOp::Delete { namespace, key } => {
                    data.remove(&composite_key(&namespace, &key));
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SurrealKV implementation (behind `kv` feature)
// ---------------------------------------------------------------------------

/// Persistent store backed by `SurrealKV`.
///
/// ACID, versioned, embedded LSM-tree storage; every operation runs inside
/// a transaction.
#[cfg(feature = "kv")]
pub struct SurrealKvStore {
    tree: surrealkv::Tree,
}

#[cfg(feature = "kv")]
impl std::fmt::Debug for SurrealKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurrealKvStore").finish_non_exhaustive()
    }
}

#[cfg(feature = "kv")]
fn map_kv_err(e: &surrealkv::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

#[cfg(feature = "kv")]
impl SurrealKvStore {
    /// Open (or create) a persistent store at the given directory.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if the tree cannot be opened.
    pub fn open(path: impl AsRef<std::path::Path>) -> StoreResult<Self> {
        let tree = surrealkv::TreeBuilder::new()
            .with_path(path.as_ref().to_path_buf())
            .build()
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self { tree })
    }

    /// Close the store, flushing pending writes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the flush fails.
    pub async fn close(&self) -> StoreResult<()> {
        self.tree
            .close()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

#[cfg(feature = "kv")]
#[async_trait]
impl KvStore for SurrealKvStore {
    async fn get(&self, namespace: &str, key: &str) -> StoreResult<Option<Vec<u8>>> {
        validate_part("namespace", namespace)?;
        validate_part("key", key)?;
        let ck = composite_key(namespace, key);
        let tx = self
            .tree
            .begin_with_mode(surrealkv::Mode::ReadOnly)
            .map_err(|ref e| map_kv_err(e))?;
        tx.get(&ck).map_err(|ref e| map_kv_err(e))
    }

    async fn put(&self, namespace: &str, key: &str, value: Vec<u8>) -> StoreResult<()> {
        self.apply(vec![WriteOp::put(namespace, key, value)]).await
    }

    async fn delete(&self, namespace: &str, key: &str) -> StoreResult<bool> {
        validate_part("namespace", namespace)?;
        validate_part("key", key)?;
        let ck = composite_key(namespace, key);
        let mut tx = self.tree.begin().map_err(|ref e| map_kv_err(e))?;
        let existed = tx.get(&ck).map_err(|ref e| map_kv_err(e))?.is_some();
        if existed {
            tx.delete(&ck).map_err(|ref e| map_kv_err(e))?;
            tx.commit().await.map_err(|ref e| map_kv_err(e))?;
        }
        Ok(existed)
    }

    async fn list(&self, namespace: &str) -> StoreResult<Vec<(String, Vec<u8>)>> {
        validate_part("namespace", namespace)?;
        let start = namespace_range_start(namespace);
        let end = namespace_range_end(namespace);
        let prefix_len = namespace.len().saturating_add(1);

        let tx = self
            .tree
            .begin_with_mode(surrealkv::Mode::ReadOnly)
            .map_err(|ref e| map_kv_err(e))?;

        // Collect keys first, then read values through the same read
        // transaction (the iterator borrows tx immutably).
        let raw_keys = {
            let mut iter = tx.range(&start, &end).map_err(|ref e| map_kv_err(e))?;
            iter.seek_first().map_err(|ref e| map_kv_err(e))?;
            let mut keys = Vec::new();
            while iter.valid() {
                keys.push(iter.key());
                iter.next().map_err(|ref e| map_kv_err(e))?;
            }
            keys
        };

        let mut entries = Vec::with_capacity(raw_keys.len());
        for raw_key in &raw_keys {
            if raw_key.len() > prefix_len
                && let Ok(key) = std::str::from_utf8(&raw_key[prefix_len..])
                && let Some(value) = tx.get(raw_key).map_err(|ref e| map_kv_err(e))?
            {
                entries.push((key.to_owned(), value));
            }
        }
        Ok(entries)
    }

    async fn apply(&self, ops: Vec<WriteOp>) -> StoreResult<()> {
        for op in &ops {
            op.validate()?;
        }
        let mut tx = self.tree.begin().map_err(|ref e| map_kv_err(e))?;
        for op in ops {
            match op {
                WriteOp::Put {
                    namespace,
                    key,
                    value,
                } => {
                    tx.set(&composite_key(&namespace, &key), &value)
                        .map_err(|ref e| map_kv_err(e))?;
                }
                WriteOp::Delete { namespace, key } => {
                    tx.delete(&composite_key(&namespace, &key))
                        .map_err(|ref e| map_kv_err(e))?;
                }
            }
        }
        tx.commit().await.map_err(|ref e| map_kv_err(e))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
