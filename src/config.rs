use serde::Deserialize;
use std::env;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the ragpipe server and worker.
#[derive(Debug)]
pub struct Config {
    /// Base URL of the Qdrant instance that stores chunk vectors.
    pub qdrant_url: String,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Embedding provider used to generate vector representations.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors; fixed per collection.
    pub embedding_dimension: usize,
    /// API key for the OpenAI embeddings endpoint.
    pub openai_api_key: Option<String>,
    /// Optional OpenAI-compatible base URL override.
    pub openai_base_url: Option<String>,
    /// Optional Ollama runtime base URL override.
    pub ollama_url: Option<String>,
    /// Base URL of the object storage service holding uploaded files.
    pub storage_base_url: String,
    /// Optional bearer token for object storage downloads.
    pub storage_auth_token: Option<String>,
    /// Target chunk size in characters.
    pub chunk_size: usize,
    /// Overlap between adjacent chunks in characters.
    pub chunk_overlap: usize,
    /// Number of jobs a worker processes concurrently.
    pub worker_concurrency: usize,
    /// Total processing attempts per job before terminal failure.
    pub job_attempts: u32,
    /// Initial retry delay; doubles on each subsequent attempt.
    pub job_backoff_initial: Duration,
    /// Visibility lock a worker holds while processing a job.
    pub job_lock_duration: Duration,
    /// Times a stalled job is requeued before being failed outright.
    pub job_max_stalls: u32,
    /// Quiet period after which an idle worker pauses itself.
    pub idle_delay: Duration,
    /// Interval between idle-state checks.
    pub idle_check_interval: Duration,
    /// Model whose tokenizer budgets assembled prompts.
    pub prompt_model: String,
    /// Token ceiling for assembled prompts.
    pub prompt_max_tokens: usize,
    /// Declared response language returned with assembled prompts.
    pub response_language: String,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

/// Supported embedding backends for the processing pipeline.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Hosted OpenAI embeddings API.
    OpenAi,
    /// Local Ollama runtime.
    Ollama,
    /// Deterministic hash-projection embeddings for offline use and tests.
    Deterministic,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            qdrant_url: load_env("QDRANT_URL")?,
            qdrant_api_key: load_env_optional("QDRANT_API_KEY"),
            embedding_provider: load_env("EMBEDDING_PROVIDER")?.parse().map_err(|()| {
                ConfigError::InvalidValue("Invalid EMBEDDING_PROVIDER".to_string())
            })?,
            embedding_model: load_env("EMBEDDING_MODEL")?,
            embedding_dimension: load_env("EMBEDDING_DIMENSION")?
                .parse()
                .map_err(|_| ConfigError::InvalidValue("EMBEDDING_DIMENSION".to_string()))?,
            openai_api_key: load_env_optional("OPENAI_API_KEY"),
            openai_base_url: load_env_optional("OPENAI_BASE_URL"),
            ollama_url: load_env_optional("OLLAMA_URL"),
            storage_base_url: load_env("STORAGE_BASE_URL")?,
            storage_auth_token: load_env_optional("STORAGE_AUTH_TOKEN"),
            chunk_size: parse_env_or("CHUNK_SIZE", 800)?,
            chunk_overlap: parse_env_or("CHUNK_OVERLAP", 100)?,
            worker_concurrency: parse_env_or("WORKER_CONCURRENCY", 2)?,
            job_attempts: parse_env_or("JOB_ATTEMPTS", 3)?,
            job_backoff_initial: Duration::from_secs(parse_env_or("JOB_BACKOFF_SECS", 60)?),
            job_lock_duration: Duration::from_secs(parse_env_or("JOB_LOCK_SECS", 600)?),
            job_max_stalls: parse_env_or("JOB_MAX_STALLS", 2)?,
            idle_delay: Duration::from_secs(parse_env_or("IDLE_DELAY_SECS", 300)?),
            idle_check_interval: Duration::from_secs(parse_env_or("IDLE_CHECK_SECS", 120)?),
            prompt_model: load_env_optional("PROMPT_MODEL")
                .unwrap_or_else(|| "gpt-3.5-turbo".to_string()),
            prompt_max_tokens: parse_env_or("PROMPT_MAX_TOKENS", 4096)?,
            response_language: load_env_optional("RESPONSE_LANGUAGE")
                .unwrap_or_else(|| "en".to_string()),
            server_port: load_env_optional("SERVER_PORT")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".into()))
                })
                .transpose()?,
        })
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match load_env_optional(key) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            "deterministic" => Ok(Self::Deterministic),
            _ => Err(()),
        }
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    tracing::debug!(
        qdrant_url = %config.qdrant_url,
        storage_url = %config.storage_base_url,
        embedding_provider = ?config.embedding_provider,
        worker_concurrency = config.worker_concurrency,
        server_port = ?config.server_port,
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}
