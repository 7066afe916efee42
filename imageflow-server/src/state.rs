use imageflow_core::config::Config;
use imageflow_core::index::MetadataIndex;
use imageflow_core::select::Selector;
use imageflow_core::storage::ObjectStore;
use imageflow_core::sweep::Sweeper;
use imageflow_core::transcode::pool::WorkerPool;
use imageflow_core::transcode::{EncodeSettings, Transcoder};
use imageflow_core::upload::Uploader;
use std::sync::Arc;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn ObjectStore>,
    pub index: Arc<dyn MetadataIndex>,
    pub pool: Arc<WorkerPool>,
    pub uploader: Arc<Uploader>,
    pub selector: Arc<Selector>,
    pub sweeper: Arc<Sweeper>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish()
    }
}

impl AppState {
    /// Wire the services around an already-opened store and index. The
    /// encoder runtime must be initialized separately (once, at startup).
    pub fn assemble(
        config: Arc<Config>,
        store: Arc<dyn ObjectStore>,
        index: Arc<dyn MetadataIndex>,
    ) -> Self {
        let pool = Arc::new(WorkerPool::new(config.processing.worker_pool_size));
        let transcoder = Transcoder::new(EncodeSettings {
            quality: config.processing.image_quality,
            speed: config.processing.speed,
        });
        let uploader = Arc::new(Uploader::new(
            store.clone(),
            index.clone(),
            pool.clone(),
            transcoder,
            config.public_url_base(),
            config.processing.max_upload_count,
        ));
        let selector = Arc::new(Selector::new(store.clone(), index.clone()));
        let sweeper = Arc::new(Sweeper::new(store.clone(), index.clone()));

        Self {
            config,
            store,
            index,
            pool,
            uploader,
            selector,
            sweeper,
        }
    }
}
