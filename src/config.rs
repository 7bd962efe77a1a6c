use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default Ollama-compatible embedding endpoint
const DEFAULT_EMBEDDING_ENDPOINT: &str = "http://127.0.0.1:11434";
/// Default embedding model name
const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text";
/// Substring the provider emits when the prompt exceeds its input window
const DEFAULT_TOO_LONG_MARKER: &str = "input length exceeds";
/// Prefix length used for the single truncation retry
const DEFAULT_TRUNCATE_CHARS: usize = 800;
/// Maximum characters per produced chunk
const DEFAULT_CHUNK_CHARS: usize = 1400;
/// Results per page served from the cached ranked list
const DEFAULT_PAGE_SIZE: usize = 30;
/// Neighbors requested from the index per query, before deduplication
const DEFAULT_CANDIDATE_POOL: usize = 500;
/// Cosine similarity floor for the brute-force ranking path
const DEFAULT_MIN_SIMILARITY: f32 = 0.5;
/// Page fetch timeout in seconds
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 15;
/// Minimum usable page text length in characters
const DEFAULT_MIN_TEXT_CHARS: usize = 100;
/// Minimum share of alphanumeric characters in usable page text
const DEFAULT_MIN_ALNUM_RATIO: f32 = 0.5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    /// k-d tree over normalized vectors
    Kdtree,
    /// exhaustive scan, the correctness baseline
    Flat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    /// Ollama-compatible HTTP endpoint
    Http,
    /// In-process fastembed model, needs the `local-embeddings` feature
    Local,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: EmbeddingProviderKind,

    /// Base URL of the embedding provider
    #[serde(default = "default_embedding_endpoint")]
    pub endpoint: String,

    /// Model name passed to the provider
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Error substring signalling an oversized prompt
    #[serde(default = "default_too_long_marker")]
    pub too_long_marker: String,

    /// Prefix length for the single truncation retry
    #[serde(default = "default_truncate_chars")]
    pub truncate_chars: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::Http,
            endpoint: DEFAULT_EMBEDDING_ENDPOINT.to_string(),
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            too_long_marker: DEFAULT_TOO_LONG_MARKER.to_string(),
            truncate_chars: DEFAULT_TRUNCATE_CHARS,
        }
    }
}

fn default_embedding_provider() -> EmbeddingProviderKind {
    EmbeddingProviderKind::Http
}

fn default_embedding_endpoint() -> String {
    DEFAULT_EMBEDDING_ENDPOINT.to_string()
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_too_long_marker() -> String {
    DEFAULT_TOO_LONG_MARKER.to_string()
}

fn default_truncate_chars() -> usize {
    DEFAULT_TRUNCATE_CHARS
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_index_backend")]
    pub backend: IndexBackend,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: IndexBackend::Kdtree,
        }
    }
}

fn default_index_backend() -> IndexBackend {
    IndexBackend::Kdtree
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// How many neighbors to pull from the index before per-bookmark dedup
    #[serde(default = "default_candidate_pool")]
    pub candidate_pool: usize,

    /// Similarity floor [0.0, 1.0] applied by the full-scan ranking path
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            candidate_pool: DEFAULT_CANDIDATE_POOL,
            min_similarity: DEFAULT_MIN_SIMILARITY,
        }
    }
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_candidate_pool() -> usize {
    DEFAULT_CANDIDATE_POOL
}

fn default_min_similarity() -> f32 {
    DEFAULT_MIN_SIMILARITY
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            user_agent: default_user_agent(),
        }
    }
}

fn default_fetch_timeout_secs() -> u64 {
    DEFAULT_FETCH_TIMEOUT_SECS
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0".to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QualityConfig {
    #[serde(default = "default_min_text_chars")]
    pub min_text_chars: usize,

    #[serde(default = "default_min_alnum_ratio")]
    pub min_alnum_ratio: f32,

    /// Lowercase substrings that mark fetched text as boilerplate.
    /// Matching is literal containment, not regex.
    #[serde(default = "default_reject_patterns")]
    pub reject_patterns: Vec<String>,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_text_chars: DEFAULT_MIN_TEXT_CHARS,
            min_alnum_ratio: DEFAULT_MIN_ALNUM_RATIO,
            reject_patterns: default_reject_patterns(),
        }
    }
}

fn default_min_text_chars() -> usize {
    DEFAULT_MIN_TEXT_CHARS
}

fn default_min_alnum_ratio() -> f32 {
    DEFAULT_MIN_ALNUM_RATIO
}

fn default_reject_patterns() -> Vec<String> {
    [
        "enable javascript",
        "javascript is required",
        "javascript is disabled",
        "accept all cookies",
        "we use cookies",
        "this site uses cookies",
        "verify you are human",
        "are you a robot",
        "checking your browser",
        "access denied",
        "page not found",
        "sign in to continue",
        "subscribe to continue reading",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Path to a Chrome/Chromium-format Bookmarks JSON file
    #[serde(default)]
    pub bookmarks_file: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_web_host")]
    pub host: String,

    #[serde(default = "default_web_port")]
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_web_host(),
            port: default_web_port(),
        }
    }
}

fn default_web_host() -> String {
    "127.0.0.1".to_string()
}

fn default_web_port() -> u16 {
    8674
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub web: WebConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: String,
}

fn default_chunk_chars() -> usize {
    DEFAULT_CHUNK_CHARS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_chars: DEFAULT_CHUNK_CHARS,
            embedding: EmbeddingConfig::default(),
            index: IndexConfig::default(),
            search: SearchConfig::default(),
            fetch: FetchConfig::default(),
            quality: QualityConfig::default(),
            source: SourceConfig::default(),
            web: WebConfig::default(),
            base_path: String::new(),
        }
    }
}

impl Config {
    fn validate(&mut self) {
        if self.chunk_chars == 0 {
            panic!("chunk_chars must be greater than 0");
        }

        if self.embedding.truncate_chars == 0 {
            panic!("embedding.truncate_chars must be greater than 0");
        }
        if self.embedding.provider == EmbeddingProviderKind::Local
            && !cfg!(feature = "local-embeddings")
        {
            panic!("embedding.provider 'local' needs a build with the local-embeddings feature");
        }
        if self.embedding.too_long_marker.is_empty() {
            panic!("embedding.too_long_marker must not be empty");
        }
        if url::Url::parse(&self.embedding.endpoint).is_err() {
            panic!(
                "embedding.endpoint is not a valid URL: '{}'",
                self.embedding.endpoint
            );
        }

        if self.search.page_size == 0 {
            panic!("search.page_size must be greater than 0");
        }
        if self.search.candidate_pool < self.search.page_size {
            panic!(
                "search.candidate_pool must be at least search.page_size ({} < {})",
                self.search.candidate_pool, self.search.page_size
            );
        }
        if !(0.0..=1.0).contains(&self.search.min_similarity) {
            panic!(
                "search.min_similarity must be between 0.0 and 1.0, got {}",
                self.search.min_similarity
            );
        }

        if self.fetch.timeout_secs == 0 {
            panic!("fetch.timeout_secs must be greater than 0");
        }

        if !(0.0..=1.0).contains(&self.quality.min_alnum_ratio) {
            panic!(
                "quality.min_alnum_ratio must be between 0.0 and 1.0, got {}",
                self.quality.min_alnum_ratio
            );
        }
    }

    pub fn load_with(base_path: &str) -> Self {
        let config_path = Path::new(base_path).join("config.yaml");

        // create new if does not exist
        if !config_path.exists() {
            fs::write(
                &config_path,
                serde_yml::to_string(&Self::default()).unwrap().as_bytes(),
            )
            .expect("failed to write default config");
        }

        let config_str = fs::read_to_string(&config_path).expect("failed to read config file");
        let mut config: Self = serde_yml::from_str(&config_str).expect("config is malformed");

        config.base_path = base_path.to_string();

        config.validate();

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config).unwrap() {
            config.save();
        }

        config
    }

    pub fn save(&self) {
        let config_path = Path::new(&self.base_path).join("config.yaml");

        let config_str = serde_yml::to_string(&self).unwrap();
        fs::write(config_path, config_str.as_bytes()).expect("failed to write config file");
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }
}

/// Resolve the data directory: `SEMDEX_BASE_PATH` wins, otherwise
/// `~/.local/share/semdex`. The directory is created if missing.
pub fn resolve_base_path() -> anyhow::Result<PathBuf> {
    let base = match std::env::var("SEMDEX_BASE_PATH") {
        Ok(path) if !path.is_empty() => PathBuf::from(path),
        _ => {
            let home = homedir::my_home()?
                .ok_or_else(|| anyhow::anyhow!("could not determine home directory"))?;
            home.join(".local").join("share").join("semdex")
        }
    };

    fs::create_dir_all(&base)?;
    Ok(base)
}
