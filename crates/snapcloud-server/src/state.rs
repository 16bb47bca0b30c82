//! Shared handler state.

use std::sync::Arc;

use snapcloud_storage::{BlobStore, DocumentParser};

use crate::blobs::ProjectBlobs;
use crate::catalog::Catalog;
use crate::collaborators::{AccountVerifier, Notifier};
use crate::derived::DerivedCache;
use crate::lifecycle::Lifecycle;
use crate::lineage::LineageGraph;

/// Everything the request handlers need, cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<dyn Catalog>,
    pub blobs: ProjectBlobs,
    pub lifecycle: Arc<Lifecycle>,
    pub lineage: LineageGraph,
    pub derived: DerivedCache,
}

impl AppState {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        accounts: Arc<dyn AccountVerifier>,
        notifier: Arc<dyn Notifier>,
        store: BlobStore,
        parser: Arc<dyn DocumentParser>,
    ) -> Self {
        let blobs = ProjectBlobs::new(store);
        let lifecycle = Lifecycle::new(
            Arc::clone(&catalog),
            blobs.clone(),
            Arc::clone(&parser),
            accounts,
            notifier,
        );

        Self {
            lineage: LineageGraph::new(Arc::clone(&catalog)),
            derived: DerivedCache::new(Arc::clone(&catalog), blobs.clone(), parser),
            lifecycle: Arc::new(lifecycle),
            blobs,
            catalog,
        }
    }
}
