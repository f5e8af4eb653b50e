use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ParleyError, Result};

/// Top-level configuration for the Parley assistant.
///
/// Loaded from `~/.parley/config.toml` by default. Every section falls back
/// to its defaults when absent, so an empty file is a valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParleyConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    /// Intent routes in declaration order. Declaration order breaks ties.
    #[serde(default = "default_routes")]
    pub routes: Vec<RouteConfig>,
}

impl Default for ParleyConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            chat: ChatConfig::default(),
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            knowledge: KnowledgeConfig::default(),
            routes: default_routes(),
        }
    }
}

impl ParleyConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ParleyConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration, falling back to defaults if the file is missing
    /// or unparsable.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the configuration to a TOML file, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| ParleyError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Data directory with `~` expanded.
    pub fn data_dir(&self) -> PathBuf {
        expand_home(&self.general.data_dir)
    }

    /// FAQ CSV location, resolved against the data directory.
    pub fn faq_path(&self) -> PathBuf {
        self.resolve_data_path(&self.knowledge.faq_path)
    }

    /// Product database location, resolved against the data directory.
    pub fn catalog_path(&self) -> PathBuf {
        self.resolve_data_path(&self.knowledge.catalog_path)
    }

    fn resolve_data_path(&self, raw: &str) -> PathBuf {
        let path = expand_home(raw);
        if path.is_absolute() {
            path
        } else {
            self.data_dir().join(path)
        }
    }
}

/// Expand a leading `~` to `$HOME`. Other paths are returned unchanged.
pub fn expand_home(raw: &str) -> PathBuf {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    match (raw.strip_prefix('~'), home) {
        (Some(rest), Some(home)) if rest.is_empty() || rest.starts_with('/') => {
            home.join(rest.trim_start_matches('/'))
        }
        _ => PathBuf::from(raw),
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory holding the FAQ file and product database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// HTTP port for the chat API.
    pub port: u16,
    /// Requests per second accepted by the chat API before answering 429.
    pub rate_limit_per_sec: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.parley/data".to_string(),
            log_level: "info".to_string(),
            port: 3040,
            rate_limit_per_sec: 100,
        }
    }
}

/// How a route's similarity score is derived from its utterance scores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreAggregation {
    /// Best single utterance match.
    #[default]
    Max,
    /// Average over all of the route's utterances.
    Mean,
}

/// Conversation handling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Turns of history handed to a handler per request.
    pub history_window: usize,
    /// Turns retained per session; oldest are dropped first.
    pub max_stored_turns: usize,
    /// Upper bound on live sessions. `None` keeps every session.
    pub max_sessions: Option<usize>,
    /// Maximum message length in characters.
    pub max_message_chars: usize,
    /// Bound on each embedding or handler call, in seconds.
    pub request_timeout_secs: u64,
    /// Answer returned when a handler fails or times out.
    pub apology_message: String,
    /// Answer returned when no route matches.
    pub fallback_message: String,
    /// Route to the fallback handler instead of failing when classification errors.
    pub degrade_on_classification_error: bool,
    pub score_aggregation: ScoreAggregation,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_window: 6,
            max_stored_turns: 50,
            max_sessions: None,
            max_message_chars: 2000,
            request_timeout_secs: 30,
            apology_message: "Sorry, I encountered an error. Please try again.".to_string(),
            fallback_message: "I'm sorry, I can only help with product searches, store policies, \
                               and general shopping questions. Could you rephrase that?"
                .to_string(),
            degrade_on_classification_error: false,
            score_aggregation: ScoreAggregation::Max,
        }
    }
}

/// Chat-completion backend settings (OpenAI-compatible API).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    /// API key. When empty, `GROQ_API_KEY` is read from the environment.
    pub api_key: String,
    pub faq_temperature: f32,
    pub faq_max_tokens: u32,
    pub sql_temperature: f32,
    pub small_talk_temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".to_string(),
            model: "llama-3.3-70b-versatile".to_string(),
            api_key: String::new(),
            faq_temperature: 0.1,
            faq_max_tokens: 500,
            sql_temperature: 0.2,
            small_talk_temperature: 0.7,
        }
    }
}

impl LlmConfig {
    /// Resolve the API key: config value first, then `GROQ_API_KEY`.
    pub fn resolve_api_key(&self) -> Option<String> {
        let key = self.api_key.trim();
        if !key.is_empty() {
            return Some(key.to_string());
        }
        std::env::var("GROQ_API_KEY")
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
    }
}

/// Which embedding backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackend {
    /// Bag-of-words over a fitted vocabulary. Needs no model files.
    #[default]
    Lexical,
    /// Sentence-transformer ONNX export (e.g. all-MiniLM-L6-v2).
    Onnx,
}

/// Embedding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    /// Directory with `model.onnx` and `tokenizer.json` for the ONNX backend.
    pub model_dir: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Lexical,
            model_dir: "~/.parley/models/all-MiniLM-L6-v2".to_string(),
        }
    }
}

/// Locations of the FAQ knowledge base and product catalog, relative to
/// `general.data_dir` unless absolute.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    /// CSV with a `question,answer` header.
    pub faq_path: String,
    /// SQLite database holding the `product` table.
    pub catalog_path: String,
    /// FAQ entries retrieved per question.
    pub faq_top_k: usize,
    /// Rows a generated catalog query may return.
    pub max_result_rows: usize,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            faq_path: "faq_data.csv".to_string(),
            catalog_path: "product.db".to_string(),
            faq_top_k: 2,
            max_result_rows: 20,
        }
    }
}

/// One intent route: name, example utterances, acceptance threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub name: String,
    pub utterances: Vec<String>,
    pub threshold: f32,
}

impl RouteConfig {
    pub fn new(name: &str, utterances: &[&str], threshold: f32) -> Self {
        Self {
            name: name.to_string(),
            utterances: utterances.iter().map(|u| u.to_string()).collect(),
            threshold,
        }
    }
}

/// The shop's stock routes: FAQ lookup, product search, small talk.
pub fn default_routes() -> Vec<RouteConfig> {
    vec![
        RouteConfig::new(
            "faq",
            &[
                "What is the return policy of the products?",
                "Do I get discount with the HDFC credit card?",
                "How can I track my order?",
                "What payment methods are accepted?",
                "How long does it take to process a refund?",
                "Are there any ongoing sales or promotions?",
                "Do you offer international shipping?",
            ],
            0.2,
        ),
        RouteConfig::new(
            "sql",
            &[
                "I want to buy nike shoes that have 50% discount",
                "Are there any shoes under Rs. 3000?",
                "Do you have formal shoes in size 9?",
                "Are there any Puma shoes on sale?",
                "What is the price of Puma running shoes?",
            ],
            0.25,
        ),
        RouteConfig::new(
            "small_talk",
            &[
                "Hello",
                "Hi there",
                "How are you?",
                "Good morning",
                "What's up?",
                "Thanks for your help",
                "Thank you",
                "You're awesome",
                "Can you help me?",
                "I need assistance",
                "Who are you?",
            ],
            0.25,
        ),
    ]
}
