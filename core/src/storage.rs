//! `StorageBackend` — the narrow object-store contract the rest of the
//! engine depends on. Concretely implemented over any
//! `object_store::ObjectStore`.

use std::sync::Arc;

use bytes::Bytes;
use object_store::path::Path as StorePath;
use object_store::{Error as OSError, ObjectStore, PutMode, PutOptions, PutPayload};

use crate::error::{DeltaResult, Error};

/// Opaque stat result for a stored object.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    pub location: StorePath,
    pub size: u64,
    pub last_modified_ms: i64,
    pub e_tag: Option<String>,
}

/// A version token returned by a successful conditional write, used as the
/// `expectedVersion` of the *next* conditional write to the same key.
pub type VersionToken = Option<String>;

#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync {
    async fn read(&self, path: &StorePath) -> DeltaResult<Bytes>;

    async fn write(&self, path: &StorePath, bytes: Bytes) -> DeltaResult<()>;

    /// Atomically writes `bytes` to `path` iff the object's current version
    /// token equals `expected`. `None` means "must not exist". Returns the
    /// new version token on success.
    async fn write_conditional(
        &self,
        path: &StorePath,
        bytes: Bytes,
        expected: VersionToken,
    ) -> DeltaResult<VersionToken>;

    async fn list(&self, prefix: &StorePath) -> DeltaResult<Vec<ObjectMeta>>;

    async fn stat(&self, path: &StorePath) -> DeltaResult<Option<ObjectMeta>>;

    async fn read_range(&self, path: &StorePath, offset: u64, len: u64) -> DeltaResult<Bytes>;

    async fn delete(&self, path: &StorePath) -> DeltaResult<()>;

    async fn exists(&self, path: &StorePath) -> DeltaResult<bool> {
        Ok(self.stat(path).await?.is_some())
    }
}

/// `StorageBackend` over any `object_store::ObjectStore`.
pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreBackend {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }
}

#[async_trait::async_trait]
impl StorageBackend for ObjectStoreBackend {
    async fn read(&self, path: &StorePath) -> DeltaResult<Bytes> {
        let result = self
            .store
            .get(path)
            .await
            .map_err(|e| Error::storage(path.as_ref(), e))?;
        result
            .bytes()
            .await
            .map_err(|e| Error::storage(path.as_ref(), e))
    }

    async fn write(&self, path: &StorePath, bytes: Bytes) -> DeltaResult<()> {
        self.store
            .put(path, PutPayload::from_bytes(bytes))
            .await
            .map_err(|e| Error::storage(path.as_ref(), e))?;
        Ok(())
    }

    async fn write_conditional(
        &self,
        path: &StorePath,
        bytes: Bytes,
        expected: VersionToken,
    ) -> DeltaResult<VersionToken> {
        let mode = match &expected {
            None => PutMode::Create,
            Some(etag) => PutMode::Update(object_store::UpdateVersion {
                e_tag: Some(etag.clone()),
                version: None,
            }),
        };
        let opts = PutOptions {
            mode,
            ..Default::default()
        };
        let result = self
            .store
            .put_opts(path, PutPayload::from_bytes(bytes), opts)
            .await;
        match result {
            Ok(res) => Ok(res.e_tag),
            Err(OSError::AlreadyExists { path, .. }) => Err(Error::VersionMismatch { path }),
            Err(OSError::Precondition { path, .. }) => Err(Error::VersionMismatch { path }),
            Err(e) => Err(Error::storage(path.as_ref(), e)),
        }
    }

    async fn list(&self, prefix: &StorePath) -> DeltaResult<Vec<ObjectMeta>> {
        use futures::StreamExt;
        let mut stream = self.store.list(Some(prefix));
        let mut out = Vec::new();
        while let Some(meta) = stream.next().await {
            let meta = meta.map_err(|e| Error::storage(prefix.as_ref(), e))?;
            out.push(ObjectMeta {
                location: meta.location,
                size: meta.size as u64,
                last_modified_ms: meta.last_modified.timestamp_millis(),
                e_tag: meta.e_tag,
            });
        }
        out.sort_by(|a, b| a.location.cmp(&b.location));
        Ok(out)
    }

    async fn stat(&self, path: &StorePath) -> DeltaResult<Option<ObjectMeta>> {
        match self.store.head(path).await {
            Ok(meta) => Ok(Some(ObjectMeta {
                location: meta.location,
                size: meta.size as u64,
                last_modified_ms: meta.last_modified.timestamp_millis(),
                e_tag: meta.e_tag,
            })),
            Err(OSError::NotFound { .. }) => Ok(None),
            Err(e) => Err(Error::storage(path.as_ref(), e)),
        }
    }

    async fn read_range(&self, path: &StorePath, offset: u64, len: u64) -> DeltaResult<Bytes> {
        let range = offset..(offset + len);
        self.store
            .get_range(path, range)
            .await
            .map_err(|e| Error::storage(path.as_ref(), e))
    }

    async fn delete(&self, path: &StorePath) -> DeltaResult<()> {
        match self.store.delete(path).await {
            Ok(()) | Err(OSError::NotFound { .. }) => Ok(()),
            Err(e) => Err(Error::storage(path.as_ref(), e)),
        }
    }
}
