use std::sync::Arc;

use resonate_cache::{CacheAdapter, SledCache};
use resonate_config::AppConfig;
use resonate_llm::{Completer, Embedder, OfflineCompleter, OfflineEmbedder, RateLimited, RateLimiter};
use resonate_store::{SledStore, Store};
use resonate_vector_store::{SledVectorStore, VectorStore};

/// Every shared dependency the RPC surface and the scheduled jobs need.
/// Built once at startup from [`AppConfig`].
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn Store>,
    pub vector_store: Arc<dyn VectorStore>,
    pub cache: Arc<dyn CacheAdapter>,
    pub embedder: Arc<dyn Embedder>,
    pub completer: Arc<dyn Completer>,
}

impl AppContext {
    pub fn build(config: AppConfig) -> anyhow::Result<Self> {
        let store = SledStore::open(&config.stores.profile_store_path)?;
        let vector_store =
            SledVectorStore::open(&config.stores.vector_store_path, config.llm.embedding_dimensions)?;
        let cache = SledCache::open(&config.stores.cache_path)?;

        let limiter = Arc::new(RateLimiter::from_settings(&config.llm));
        let embedder = RateLimited::new(OfflineEmbedder::new(config.llm.embedding_dimensions), limiter.clone());
        let completer = RateLimited::new(OfflineCompleter::default(), limiter);

        Ok(Self {
            config: Arc::new(config),
            store: Arc::new(store),
            vector_store: Arc::new(vector_store),
            cache: Arc::new(cache),
            embedder: Arc::new(embedder),
            completer: Arc::new(completer),
        })
    }
}
