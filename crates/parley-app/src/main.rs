//! Parley application binary - composition root.
//!
//! 1. Load configuration from TOML and apply CLI overrides
//! 2. Load the FAQ knowledge base and fit the embedding backend
//! 3. Open the product catalog
//! 4. Build the intent router, handlers, history store and orchestrator
//! 5. Start the axum HTTP server

mod cli;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use parley_api::{start_server, AppState};
use parley_chat::{
    ChatModel, ConversationOrchestrator, FaqHandler, FaqSettings, HandlerRegistry, IntentRouter,
    OpenAiCompatibleClient, OrchestratorSettings, ProductSearchHandler, SessionHistoryStore,
    SmallTalkHandler,
};
use parley_core::config::{expand_home, EmbeddingBackend, ParleyConfig};
use parley_core::error::ParleyError;
use parley_storage::{Database, ProductCatalog};
use parley_vector::faq::read_faq_csv;
use parley_vector::{
    DynEmbeddingService, FaqEntry, FaqKnowledgeBase, LexicalEmbedding, OnnxEmbeddingService,
};

use crate::cli::CliArgs;

/// Read FAQ entries if the file exists. A missing file leaves the FAQ route
/// answering from empty context.
async fn read_faq_entries(path: &Path) -> Result<Vec<FaqEntry>, ParleyError> {
    if !path.exists() {
        warn!(path = %path.display(), "FAQ file not found, FAQ answers will have no context");
        return Ok(Vec::new());
    }
    read_faq_csv(path).await
}

fn build_embedder(
    config: &ParleyConfig,
    faq: &[FaqEntry],
) -> Result<Arc<dyn DynEmbeddingService>, ParleyError> {
    match config.embedding.backend {
        EmbeddingBackend::Lexical => {
            let corpus = config
                .routes
                .iter()
                .flat_map(|r| r.utterances.iter().map(String::as_str))
                .chain(faq.iter().map(|e| e.question.as_str()));
            let embedder = LexicalEmbedding::fit(corpus);
            info!(vocabulary = embedder.vocabulary_len(), "Lexical embedding fitted");
            Ok(Arc::new(embedder))
        }
        EmbeddingBackend::Onnx => {
            let model_dir = expand_home(&config.embedding.model_dir);
            Ok(Arc::new(OnnxEmbeddingService::from_directory(&model_dir)?))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let config_file = args.resolve_config_path();
    let mut config = ParleyConfig::load_or_default(&config_file);
    args.apply(&mut config);

    // RUST_LOG wins over the configured level unless --log-level was given.
    let filter = match args.log_level {
        Some(ref level) => tracing_subscriber::EnvFilter::new(level),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting Parley v{}", env!("CARGO_PKG_VERSION"));
    info!(path = %config_file.display(), "Configuration loaded");

    // Knowledge.
    let faq_entries = read_faq_entries(&config.faq_path()).await?;
    let embedder = build_embedder(&config, &faq_entries)?;

    let knowledge = FaqKnowledgeBase::new(Arc::clone(&embedder));
    let faq_count = knowledge.ingest(faq_entries).await?;
    info!(entries = faq_count, "FAQ knowledge base ready");

    let catalog_path = config.catalog_path();
    let catalog = ProductCatalog::new(Arc::new(Database::new(&catalog_path)?))
        .with_max_rows(config.knowledge.max_result_rows);
    let products = catalog.count()?;
    if products == 0 {
        warn!(path = %catalog_path.display(), "Product catalog is empty");
    } else {
        info!(path = %catalog_path.display(), products, "Product catalog opened");
    }

    // Conversation.
    let timeout = Duration::from_secs(config.chat.request_timeout_secs);
    let client = OpenAiCompatibleClient::from_config(&config.llm, timeout)?;
    if config.llm.resolve_api_key().is_none() {
        warn!("No LLM API key configured (llm.api_key or GROQ_API_KEY); model calls will fail");
    }
    let model: Arc<dyn ChatModel> = Arc::new(client);

    let router = IntentRouter::build(
        &config.routes,
        Arc::clone(&embedder),
        config.chat.score_aggregation,
    )
    .await?;

    let faq_settings = FaqSettings {
        top_k: config.knowledge.faq_top_k,
        temperature: config.llm.faq_temperature,
        max_tokens: config.llm.faq_max_tokens,
    };
    let handlers = HandlerRegistry::new()
        .with(
            "faq",
            Arc::new(FaqHandler::new(knowledge, Arc::clone(&model), faq_settings)),
        )
        .with(
            "sql",
            Arc::new(ProductSearchHandler::new(
                catalog,
                Arc::clone(&model),
                config.llm.sql_temperature,
            )),
        )
        .with(
            "small_talk",
            Arc::new(SmallTalkHandler::new(
                Arc::clone(&model),
                config.llm.small_talk_temperature,
            )),
        );
    for route in router.route_names() {
        if !handlers.contains(&route) {
            warn!(route = %route, "No handler registered, messages will get the fallback answer");
        }
    }

    let store = Arc::new(SessionHistoryStore::from_config(&config.chat));
    let orchestrator = ConversationOrchestrator::new(
        Arc::new(router),
        store,
        handlers,
        OrchestratorSettings::from(&config.chat),
    );

    // API server.
    info!("Chat page at http://127.0.0.1:{}/ui", config.general.port);
    let state = AppState::new(config, Arc::new(orchestrator));
    start_server(state).await?;

    Ok(())
}
