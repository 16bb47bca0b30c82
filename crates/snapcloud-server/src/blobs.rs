//! Async access to the versioned blob store.
//!
//! Blob I/O is synchronous filesystem work, so every call runs on the
//! blocking thread pool.

use snapcloud_storage::{ArtifactKind, BlobStore, SlotInfo, StorageResult};

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct ProjectBlobs {
    store: BlobStore,
}

impl ProjectBlobs {
    pub fn new(store: BlobStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &BlobStore {
        &self.store
    }

    pub async fn put(
        &self,
        project_id: i64,
        kind: ArtifactKind,
        bytes: Vec<u8>,
    ) -> Result<(), AppError> {
        self.blocking(move |store| store.put(project_id, kind, &bytes))
            .await
    }

    pub async fn remove(&self, project_id: i64, kind: ArtifactKind) -> Result<(), AppError> {
        self.blocking(move |store| store.remove(project_id, kind)).await
    }

    /// Reads `kind` at history `delta` (0, -1 or -2).
    pub async fn get(
        &self,
        project_id: i64,
        kind: ArtifactKind,
        delta: i32,
    ) -> Result<Option<Vec<u8>>, AppError> {
        self.blocking(move |store| store.get_delta(project_id, kind, delta))
            .await
    }

    pub async fn backup(&self, project_id: i64) -> Result<(), AppError> {
        self.blocking(move |store| store.backup(project_id)).await
    }

    pub async fn purge(&self, project_id: i64) -> Result<(), AppError> {
        self.blocking(move |store| store.purge(project_id)).await
    }

    pub async fn history(&self, project_id: i64) -> Result<Vec<SlotInfo>, AppError> {
        self.blocking(move |store| store.history(project_id)).await
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, AppError>
    where
        F: FnOnce(&BlobStore) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        Ok(tokio::task::spawn_blocking(move || f(&store)).await??)
    }
}
