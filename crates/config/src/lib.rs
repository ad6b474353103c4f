//! Configuration for the Parley retrieval service

mod settings;

pub use settings::{
    load_settings, ContextualConfig, DatabaseConfig, EmbedderConfig, FeatureFlags, IngestConfig,
    ObservabilityConfig, RerankerConfig, RetrievalConfig, ServerConfig, Settings,
};
