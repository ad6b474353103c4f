//! Application state
//!
//! One immutable `Settings` and one `Services` struct holding handles into
//! the components; no process-wide singletons beyond the BM25 registry and
//! the metadata cache, which live inside `Services` and are shared by `Arc`.

use std::sync::Arc;
use std::time::Duration;

use parley_agents::AgentRegistry;
use parley_config::Settings;
use parley_core::{Error, Result};
use parley_ingest::{AnthropicAnnotator, Contextualizer, IngestPipeline};
use parley_retrieval::{
    Bm25Registry, ContextService, ContextServiceConfig, CrossEncoderReranker, HashEmbedder,
    HybridRetriever, MetadataCache, OpenAiEmbedder, Reranker, RetrieverConfig, TextEmbedder,
};
use parley_store::{PgConfig, StoreLayer};

/// All service handles shared across handlers
pub struct Services {
    pub store: StoreLayer,
    pub registry: Arc<Bm25Registry>,
    pub metadata_cache: Arc<MetadataCache>,
    pub retriever: Arc<HybridRetriever>,
    pub context: Arc<ContextService>,
    pub agents: AgentRegistry,
    pub pipeline: Arc<IngestPipeline>,
}

impl Services {
    /// Wire up every component from settings
    ///
    /// Connects to Postgres, ensures the schema, seeds default personas,
    /// pre-loads the reranker when enabled, and warms the per-owner sparse
    /// indexes so the first query after a restart pays no build cost.
    pub async fn initialize(settings: &Settings) -> Result<Self> {
        let store = parley_store::init(
            PgConfig::new(settings.database.url.clone()),
            settings.embedder.dimension,
        )
        .await
        .map_err(Error::from)?;

        let agents = AgentRegistry::new(store.agents.clone());
        agents.seed_defaults().await?;

        let registry = Arc::new(Bm25Registry::new());
        let metadata_cache = Arc::new(MetadataCache::new(Duration::from_secs(
            settings.retrieval.metadata_ttl_seconds,
        )));

        let embedder: Arc<dyn TextEmbedder> = if settings.embedder.api_key.trim().is_empty()
            && settings.embedder.base_url.contains("api.openai.com")
        {
            // No credentials for the default backend: run the deterministic
            // in-process embedder so the system stays functional.
            tracing::warn!("no embedding credentials configured; using in-process hash embedder");
            Arc::new(HashEmbedder::new(settings.embedder.dimension))
        } else {
            Arc::new(OpenAiEmbedder::new(&settings.embedder).map_err(Error::from)?)
        };

        let reranker: Option<Arc<dyn Reranker>> = if settings.features.rerank {
            // Loaded here, at startup, so the first query never blocks on it.
            let loaded = CrossEncoderReranker::load(&settings.reranker).map_err(Error::from)?;
            Some(Arc::new(loaded))
        } else {
            None
        };

        let retriever = Arc::new(HybridRetriever::new(
            Arc::new(store.sections.clone()),
            registry.clone(),
            embedder.clone(),
            reranker,
            RetrieverConfig::from_settings(&settings.retrieval, &settings.features),
        ));

        let context = Arc::new(ContextService::new(
            retriever.clone(),
            Arc::new(store.documents.clone()),
            Arc::new(store.agents.clone()),
            metadata_cache.clone(),
            ContextServiceConfig::from_settings(&settings.retrieval),
        ));

        let contextualizer = if settings.contextual.enabled {
            let annotator =
                AnthropicAnnotator::new(&settings.contextual).map_err(Error::from)?;
            Some(Contextualizer::new(
                Arc::new(annotator),
                settings.contextual.clone(),
            ))
        } else {
            None
        };

        let pipeline = Arc::new(IngestPipeline::new(
            settings.ingest.clone(),
            contextualizer,
            embedder,
            store.documents.clone(),
            store.sections.clone(),
            store.stats.clone(),
            registry.clone(),
            metadata_cache.clone(),
        ));

        let services = Self {
            store,
            registry,
            metadata_cache,
            retriever,
            context,
            agents,
            pipeline,
        };

        services.warm_sparse_indexes().await;

        Ok(services)
    }

    /// Build a BM25 snapshot for every owner with stored documents
    async fn warm_sparse_indexes(&self) {
        let owners = match self.store.documents.owners().await {
            Ok(owners) => owners,
            Err(err) => {
                tracing::error!(error = %err, "could not enumerate owners for index warm-up");
                return;
            }
        };

        for owner in owners {
            self.pipeline.refresh_owner_index(&owner).await;
        }
        tracing::info!(owners = self.registry.owner_count(), "Warmed sparse indexes");
    }
}

/// Application state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub services: Arc<Services>,
}

impl AppState {
    pub fn new(config: Settings, services: Services) -> Self {
        Self {
            config: Arc::new(config),
            services: Arc::new(services),
        }
    }
}
