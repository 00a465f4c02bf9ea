//! Typed resource persistence over the raw KV layer.
//!
//! Key layout inside a kind's namespace:
//!
//! ```text
//! id/<resource-id>      -> proto-encoded resource
//! slug/<org>/<slug>     -> resource id (utf-8)
//! ```
//!
//! The slug index entry is written and removed in the same transaction as
//! the record, so a lookup by reference can never see a half-saved
//! resource. Namespace names come from [`ResourceKind::kind_key`], the same
//! enum the kind registry reads from service options.

use std::sync::Arc;

use prost::Message;
use tracing::debug;

use lodestar_proto::ApiResource;
use lodestar_proto::v1::ResourceKind;

use crate::error::{StoreError, StoreResult};
use crate::kv::{KvStore, WriteOp};

fn id_key(id: &str) -> String {
    format!("id/{id}")
}

fn slug_key(org: &str, slug: &str) -> String {
    format!("slug/{org}/{slug}")
}

/// Typed resource store used by every controller and pipeline step.
#[derive(Clone)]
pub struct ResourceStore {
    kv: Arc<dyn KvStore>,
}

impl std::fmt::Debug for ResourceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceStore").finish_non_exhaustive()
    }
}

impl ResourceStore {
    /// Wrap a KV backend.
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    fn decode<R: ApiResource>(bytes: &[u8]) -> StoreResult<R> {
        R::decode(bytes).map_err(|e| StoreError::Decode(e.to_string()))
    }

    fn identity<R: ApiResource>(resource: &R) -> StoreResult<(String, String, String)> {
        let metadata = resource.metadata().ok_or_else(|| {
            StoreError::InvalidKey("resource has no metadata; cannot persist".to_owned())
        })?;
        if metadata.id.is_empty() {
            return Err(StoreError::InvalidKey(
                "resource has no id; cannot persist".to_owned(),
            ));
        }
        Ok((
            metadata.id.clone(),
            metadata.org.clone(),
            metadata.slug.clone(),
        ))
    }

    /// Save a resource: primary record and slug index in one transaction.
    ///
    /// # Errors
    ///
    /// Fails if the resource has no metadata/id or the backend write fails.
    pub async fn save<R: ApiResource>(&self, resource: &R) -> StoreResult<()> {
        let (id, org, slug) = Self::identity(resource)?;
        let ns = R::KIND.kind_key();
        let mut ops = vec![WriteOp::put(ns, id_key(&id), resource.encode_to_vec())];
        if !slug.is_empty() {
            ops.push(WriteOp::put(ns, slug_key(&org, &slug), id.into_bytes()));
        }
        debug!(kind = ns, slug = %slug, "saving resource");
        self.kv.apply(ops).await
    }

    /// Load a resource by id, or `None` if absent.
    ///
    /// # Errors
    ///
    /// Fails on backend errors or corrupt stored bytes.
    pub async fn try_get<R: ApiResource>(&self, id: &str) -> StoreResult<Option<R>> {
        let bytes = self.kv.get(R::KIND.kind_key(), &id_key(id)).await?;
        bytes.map(|b| Self::decode(&b)).transpose()
    }

    /// Load a resource by id, failing with [`StoreError::NotFound`] if absent.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the id is unknown, otherwise backend errors.
    pub async fn get<R: ApiResource>(&self, id: &str) -> StoreResult<R> {
        self.try_get(id).await?.ok_or_else(|| StoreError::NotFound {
            kind: R::KIND.display_name(),
            id: id.to_owned(),
        })
    }

    /// Look a resource up through the slug index.
    ///
    /// # Errors
    ///
    /// Fails on backend errors or corrupt stored bytes.
    pub async fn get_by_slug<R: ApiResource>(
        &self,
        org: &str,
        slug: &str,
    ) -> StoreResult<Option<R>> {
        let ns = R::KIND.kind_key();
        let Some(id_bytes) = self.kv.get(ns, &slug_key(org, slug)).await? else {
            return Ok(None);
        };
        let id = String::from_utf8(id_bytes)
            .map_err(|e| StoreError::Decode(format!("slug index entry is not utf-8: {e}")))?;
        self.try_get(&id).await
    }

    /// Delete a resource, returning what was stored.
    ///
    /// Removes the record and its slug index entry in one transaction.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the id is unknown.
    pub async fn delete<R: ApiResource>(&self, id: &str) -> StoreResult<R> {
        let existing: R = self.get(id).await?;
        let (id, org, slug) = Self::identity(&existing)?;
        let ns = R::KIND.kind_key();
        let mut ops = vec![WriteOp::delete(ns, id_key(&id))];
        if !slug.is_empty() {
            ops.push(WriteOp::delete(ns, slug_key(&org, &slug)));
        }
        self.kv.apply(ops).await?;
        Ok(existing)
    }

    /// List every resource of a kind, in id order.
    ///
    /// # Errors
    ///
    /// Fails on backend errors or corrupt stored bytes.
    pub async fn list<R: ApiResource>(&self) -> StoreResult<Vec<R>> {
        let entries = self.kv.list(R::KIND.kind_key()).await?;
        entries
            .iter()
            .filter(|(key, _)| key.starts_with("id/"))
            .map(|(_, bytes)| Self::decode(bytes))
            .collect()
    }

    /// Delete every resource of a kind. Returns how many records existed.
    ///
    /// # Errors
    ///
    /// Fails on backend errors.
    pub async fn delete_kind(&self, kind: ResourceKind) -> StoreResult<u64> {
        let ns = kind.kind_key();
        let entries = self.kv.list(ns).await?;
        let count = entries
            .iter()
            .filter(|(key, _)| key.starts_with("id/"))
            .count() as u64;
        let ops: Vec<WriteOp> = entries
            .into_iter()
            .map(|(key, _)| WriteOp::delete(ns, key))
            .collect();
        if !ops.is_empty() {
            self.kv.apply(ops).await?;
        }
        Ok(count)
    }
}
