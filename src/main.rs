use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gallrag::config::EngineConfig;
use gallrag::embeddings::{EmbeddingProvider, HttpEmbeddingProvider, MockEmbeddingProvider};
use gallrag::engine::SearchEngine;
use gallrag::generation::{ChatCompletionGenerator, DisabledGenerator, Generator};
use gallrag::server;
use gallrag::stores::SqliteVectorStore;
use gallrag::types::PipelineError;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = EngineConfig::from_env()?;
    info!(db = %config.db_path, bind = %config.bind_addr, "starting gallrag");

    let store = Arc::new(SqliteVectorStore::open(&config.db_path).await?);

    let embedder: Arc<dyn EmbeddingProvider> = match &config.embedding_api_key {
        Some(key) => Arc::new(HttpEmbeddingProvider::new(
            &config.embedding_base,
            key.clone(),
            config.embedding_model.clone(),
            config.embedding_dimensions,
            config.embed_timeout,
        )?),
        None => {
            warn!("OPENAI_API_KEY unset, using deterministic mock embeddings");
            Arc::new(MockEmbeddingProvider::default())
        }
    };

    let generator: Arc<dyn Generator> = match &config.generation_api_key {
        Some(key) => Arc::new(ChatCompletionGenerator::new(
            &config.generation_base,
            key.clone(),
            config.generation_model.clone(),
            config.generation_timeout,
        )?),
        None => {
            warn!("GROQ_API_KEY unset, answers will be retrieval-only");
            Arc::new(DisabledGenerator)
        }
    };

    let bind_addr = config.bind_addr.clone();
    let engine = SearchEngine::builder(config)
        .store(store)
        .embedder(embedder)
        .generator(generator)
        .build()?;

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(PipelineError::from)?;
    server::serve_on(listener, Arc::new(engine)).await?;
    Ok(())
}
