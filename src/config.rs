use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub corpus: CorpusConfig,
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub summarization: SummarizationConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    /// Directory scanned for .txt, .md, and .pdf source documents.
    pub data_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
}

fn default_chunk_size() -> usize {
    256
}
fn default_overlap() -> usize {
    48
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Weight for vector vs lexical: `fused = alpha*vector + (1-alpha)*lexical`.
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
    /// Number of chunks returned to the budgeter.
    #[serde(default = "default_k")]
    pub k: usize,
    /// Candidate pool multiplier per channel, to avoid rank starvation
    /// after fusion.
    #[serde(default = "default_pool_factor")]
    pub candidate_pool_factor: usize,
    /// Chunks scoring below this after fusion are dropped, unless that
    /// would leave nothing, in which case the top-k survive anyway.
    #[serde(default = "default_min_score")]
    pub min_score: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            hybrid_alpha: default_hybrid_alpha(),
            k: default_k(),
            candidate_pool_factor: default_pool_factor(),
            min_score: default_min_score(),
        }
    }
}

fn default_hybrid_alpha() -> f64 {
    0.6
}
fn default_k() -> usize {
    5
}
fn default_pool_factor() -> usize {
    3
}
fn default_min_score() -> f64 {
    0.2
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContextConfig {
    /// Model context ceiling in tokens.
    #[serde(default = "default_model_max_tokens")]
    pub model_max_tokens: usize,
    /// Tokens reserved for the model's own response.
    #[serde(default = "default_reserved_response_tokens")]
    pub reserved_response_tokens: usize,
    /// Minimum slice of the budget held back for conversation history
    /// before chunks are admitted.
    #[serde(default = "default_min_history_tokens")]
    pub min_history_tokens: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            model_max_tokens: default_model_max_tokens(),
            reserved_response_tokens: default_reserved_response_tokens(),
            min_history_tokens: default_min_history_tokens(),
        }
    }
}

fn default_model_max_tokens() -> usize {
    6000
}
fn default_reserved_response_tokens() -> usize {
    1000
}
fn default_min_history_tokens() -> usize {
    256
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `hash` (deterministic local) or `openai` (remote API).
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: default_dims(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "hash".to_string()
}
fn default_dims() -> usize {
    384
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// OpenAI-compatible chat completions endpoint (e.g. Groq).
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Env var holding the API key. The key itself never lives in config.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_llm_timeout_secs(),
            temperature: default_temperature(),
        }
    }
}

fn default_llm_base_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}
fn default_llm_model() -> String {
    "llama-3.1-8b-instant".to_string()
}
fn default_api_key_env() -> String {
    "LLM_API_KEY".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    30
}
fn default_temperature() -> f64 {
    0.2
}

#[derive(Debug, Deserialize, Clone)]
pub struct SummarizationConfig {
    #[serde(default = "default_summarization_enabled")]
    pub enabled: bool,
    /// Turns accumulated past the last summary before a new one is made.
    #[serde(default = "default_after_turns")]
    pub after_turns: usize,
    /// Ceiling on the stored summary length, in tokens.
    #[serde(default = "default_max_summary_tokens")]
    pub max_summary_tokens: usize,
}

impl Default for SummarizationConfig {
    fn default() -> Self {
        Self {
            enabled: default_summarization_enabled(),
            after_turns: default_after_turns(),
            max_summary_tokens: default_max_summary_tokens(),
        }
    }
}

fn default_summarization_enabled() -> bool {
    true
}
fn default_after_turns() -> usize {
    6
}
fn default_max_summary_tokens() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    apply_env_overrides(&mut config)?;
    validate(&config)?;

    Ok(config)
}

/// Runtime tunables can be overridden through the environment without a
/// config edit: MODEL_MAX_TOKENS, RESERVED_RESPONSE_TOKENS, RETRIEVE_K,
/// HYBRID_ALPHA, ENABLE_TURN_SUMMARIZATION, SUMMARIZE_AFTER_TURNS.
fn apply_env_overrides(config: &mut Config) -> Result<()> {
    if let Some(v) = env_parse::<usize>("MODEL_MAX_TOKENS")? {
        config.context.model_max_tokens = v;
    }
    if let Some(v) = env_parse::<usize>("RESERVED_RESPONSE_TOKENS")? {
        config.context.reserved_response_tokens = v;
    }
    if let Some(v) = env_parse::<usize>("RETRIEVE_K")? {
        config.retrieval.k = v;
    }
    if let Some(v) = env_parse::<f64>("HYBRID_ALPHA")? {
        config.retrieval.hybrid_alpha = v;
    }
    if let Ok(v) = std::env::var("ENABLE_TURN_SUMMARIZATION") {
        config.summarization.enabled = v.to_lowercase() == "true";
    }
    if let Some(v) = env_parse::<usize>("SUMMARIZE_AFTER_TURNS")? {
        config.summarization.after_turns = v;
    }
    Ok(())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => {
            let parsed = raw
                .parse::<T>()
                .map_err(|_| anyhow::anyhow!("Invalid value for {}: '{}'", name, raw))?;
            Ok(Some(parsed))
        }
        Err(_) => Ok(None),
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size_tokens == 0 {
        anyhow::bail!("chunking.chunk_size_tokens must be > 0");
    }

    if config.retrieval.k < 1 {
        anyhow::bail!("retrieval.k must be >= 1");
    }

    if !(0.0..=1.0).contains(&config.retrieval.hybrid_alpha) {
        anyhow::bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
    }

    if config.context.model_max_tokens <= config.context.reserved_response_tokens {
        anyhow::bail!("context.model_max_tokens must exceed context.reserved_response_tokens");
    }

    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }

    match config.embedding.provider.as_str() {
        "hash" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be hash or openai.",
            other
        ),
    }

    if config.embedding.provider == "openai" && config.embedding.model.is_none() {
        anyhow::bail!("embedding.model must be specified when provider is 'openai'");
    }

    Ok(())
}
