//! Embedding provider capability and the client that wraps it.
//!
//! The client makes at most two provider calls per text: one full attempt,
//! and one retry on a truncated prefix if the provider rejected the prompt
//! as too long. Every other failure is reported as "unavailable" so callers
//! can drop the chunk and keep going.

use crate::config::EmbeddingConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("prompt exceeds the provider input window")]
    InputTooLong,

    #[error("embedding request failed: {0}")]
    Request(String),

    #[error("provider returned no embedding")]
    EmptyEmbedding,
}

pub trait EmbeddingProvider: Send {
    fn embed(&self, model: &str, prompt: &str) -> Result<Vec<f32>, ProviderError>;
}

/// Ollama-compatible HTTP provider: `POST {endpoint}/api/embeddings`
/// with `{model, prompt}`, answering `{embedding: [..]}`.
pub struct HttpProvider {
    client: reqwest::blocking::Client,
    endpoint: String,
    too_long_marker: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

impl HttpProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, reqwest::Error> {
        // no request timeout here: the provider's own default applies
        let client = reqwest::blocking::Client::builder().build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            too_long_marker: config.too_long_marker.to_lowercase(),
        })
    }
}

impl EmbeddingProvider for HttpProvider {
    fn embed(&self, model: &str, prompt: &str) -> Result<Vec<f32>, ProviderError> {
        let url = format!("{}/api/embeddings", self.endpoint);

        let resp = self
            .client
            .post(&url)
            .json(&EmbeddingRequest { model, prompt })
            .send()
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            if body.to_lowercase().contains(&self.too_long_marker) {
                return Err(ProviderError::InputTooLong);
            }
            return Err(ProviderError::Request(format!("{status}: {body}")));
        }

        let parsed: EmbeddingResponse = resp
            .json()
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        if parsed.embedding.is_empty() {
            return Err(ProviderError::EmptyEmbedding);
        }
        Ok(parsed.embedding)
    }
}

/// In-process fastembed provider, selected with the `local-embeddings`
/// feature. The model argument is resolved against fastembed's catalog.
#[cfg(feature = "local-embeddings")]
pub struct LocalProvider {
    // fastembed's embed() takes &mut self
    model: std::sync::Mutex<fastembed::TextEmbedding>,
}

#[cfg(feature = "local-embeddings")]
impl LocalProvider {
    pub fn new(model_name: &str, cache_dir: std::path::PathBuf) -> Result<Self, ProviderError> {
        use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

        let model_enum = match model_name.to_lowercase().as_str() {
            "all-minilm-l6-v2" => EmbeddingModel::AllMiniLML6V2,
            "bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
            "bge-base-en-v1.5" => EmbeddingModel::BGEBaseENV15,
            "bge-large-en-v1.5" => EmbeddingModel::BGELargeENV15,
            other => {
                return Err(ProviderError::Request(format!(
                    "unknown local model '{other}'"
                )))
            }
        };

        std::fs::create_dir_all(&cache_dir)
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let options = InitOptions::new(model_enum)
            .with_cache_dir(cache_dir)
            .with_show_download_progress(false);
        let model = TextEmbedding::try_new(options)
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        Ok(Self {
            model: std::sync::Mutex::new(model),
        })
    }
}

#[cfg(feature = "local-embeddings")]
impl EmbeddingProvider for LocalProvider {
    fn embed(&self, _model: &str, prompt: &str) -> Result<Vec<f32>, ProviderError> {
        let mut model = self
            .model
            .lock()
            .map_err(|e| ProviderError::Request(format!("model lock poisoned: {e}")))?;

        let embeddings = model
            .embed(vec![prompt], None)
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        embeddings
            .into_iter()
            .next()
            .ok_or(ProviderError::EmptyEmbedding)
    }
}

pub struct EmbeddingClient {
    provider: Box<dyn EmbeddingProvider>,
    model: String,
    truncate_chars: usize,
}

impl EmbeddingClient {
    pub fn new(provider: Box<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Self {
        Self {
            provider,
            model: config.model.clone(),
            truncate_chars: config.truncate_chars,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Embed `text`, retrying once on a truncated prefix if the provider
    /// reported the prompt as too long. `None` means this text cannot be
    /// indexed right now; never an error.
    pub fn embed(&self, text: &str) -> Option<Vec<f32>> {
        match self.provider.embed(&self.model, text) {
            Ok(vector) => Some(vector),
            Err(ProviderError::InputTooLong) => {
                let prefix = truncate_to_chars(text, self.truncate_chars);
                log::debug!(
                    "prompt too long, retrying with a {}-char prefix",
                    prefix.chars().count()
                );
                match self.provider.embed(&self.model, prefix) {
                    Ok(vector) => Some(vector),
                    Err(err) => {
                        log::warn!("embedding unavailable after truncation: {err}");
                        None
                    }
                }
            }
            Err(err) => {
                log::warn!("embedding unavailable: {err}");
                None
            }
        }
    }

    /// `embed` composed with `normalize`; the form every stored or queried
    /// vector takes.
    pub fn embed_normalized(&self, text: &str) -> Option<Vec<f32>> {
        self.embed(text).map(normalize)
    }
}

/// Scale to unit Euclidean norm. A zero vector comes back unchanged; that
/// is a degenerate input, not an error.
pub fn normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in &mut vector {
            *x /= norm;
        }
    }
    vector
}

/// Prefix of at most `limit` characters, cut on a char boundary.
fn truncate_to_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// SHA-256 of the model name; stored in index snapshots so a model swap
/// invalidates them.
pub fn model_id_hash(model_name: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(model_name.as_bytes());
    hasher.finalize().into()
}
