//! The embedding-service collaborator.
//!
//! The retrieval core only sees the [`Embedder`] trait. Two backends are
//! provided: [`OllamaEmbedder`], which calls a local Ollama server, and
//! [`HashEmbedder`], a deterministic offline embedder used when no model
//! server is reachable (and by the tests).

use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_OLLAMA_MODEL: &str = "nomic-embed-text";
pub const DEFAULT_HASH_DIMENSION: usize = 256;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;

/// Failure talking to the embedding service.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("embedding service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not decode embedding response: {0}")]
    Decode(String),

    #[error("embedding service returned no vectors")]
    EmptyResponse,

    #[error("cannot embed empty text")]
    EmptyInput,
}

/// Turns text into a fixed-length vector.
///
/// Implementations must be safe to call from several threads at once; the
/// builder fans requests out over a worker pool.
pub trait Embedder: Send + Sync {
    /// Identifier of the model producing the vectors.
    fn model(&self) -> &str;

    fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbedError>;
}

/// Scale `vector` to unit L2 norm in place. Zero vectors are left alone.
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

// -- Ollama --

#[derive(Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embedder backed by Ollama's `/api/embed` endpoint.
pub struct OllamaEmbedder {
    client: reqwest::blocking::Client,
    url: String,
    model: String,
    timeout: Duration,
}

impl OllamaEmbedder {
    /// Create a client for `base_url` (e.g. `http://localhost:11434`).
    ///
    /// Every request is bounded by `timeout`.
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                Error::Config(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            url: format!("{}/api/embed", base_url.trim_end_matches('/')),
            model: model.to_string(),
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.url
    }

    fn transport_error(&self, source: reqwest::Error) -> EmbedError {
        if source.is_timeout() {
            EmbedError::Timeout {
                url: self.url.clone(),
                timeout: self.timeout,
            }
        } else {
            EmbedError::Transport {
                url: self.url.clone(),
                source,
            }
        }
    }
}

impl Embedder for OllamaEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbedError> {
        if text.trim().is_empty() {
            return Err(EmbedError::EmptyInput);
        }
        let request = OllamaEmbedRequest {
            model: &self.model,
            input: text,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(EmbedError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: OllamaEmbedResponse = response.json().map_err(|e| {
            if e.is_timeout() {
                self.transport_error(e)
            } else {
                EmbedError::Decode(e.to_string())
            }
        })?;

        let vector = body
            .embeddings
            .into_iter()
            .next()
            .ok_or(EmbedError::EmptyResponse)?;
        if vector.is_empty() {
            return Err(EmbedError::EmptyResponse);
        }
        Ok(vector)
    }
}

impl std::fmt::Debug for OllamaEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaEmbedder")
            .field("url", &self.url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

// -- Feature hashing --

/// Deterministic bag-of-words embedder.
///
/// Each lowercase whitespace token is hashed with BLAKE3 into one of
/// `dimension` buckets with a hash-derived sign, and the result is
/// L2-normalized. The hash is fixed across builds and platforms, so vectors
/// written at build time match the ones computed at query time.
/// Texts sharing vocabulary land close together, which is enough for
/// offline use and reproducible tests.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
    model: String,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        let dimension = dimension.max(1);
        Self {
            dimension,
            model: format!("feature-hash-{dimension}"),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_DIMENSION)
    }
}

impl Embedder for HashEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbedError> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text.split_whitespace() {
            let h = token_hash(&token.to_lowercase());
            let bucket = (h % self.dimension as u64) as usize;
            let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        normalize(&mut vector);
        Ok(vector)
    }
}

/// First eight bytes of the token's BLAKE3 digest, little-endian.
fn token_hash(token: &str) -> u64 {
    let digest = blake3::hash(token.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(head)
}

// -- Worker pool --

/// Bounded fan-out of embedding requests.
///
/// At most `max_in_flight` requests run concurrently. Output order always
/// matches input order, whatever order the requests complete in.
pub struct EmbeddingPool {
    pool: rayon::ThreadPool,
    max_in_flight: usize,
}

impl EmbeddingPool {
    pub fn new(max_in_flight: usize) -> Result<Self> {
        let max_in_flight = max_in_flight.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(max_in_flight)
            .thread_name(|i| format!("embed-{i}"))
            .build()
            .map_err(|e| {
                Error::Config(format!("failed to start embedding pool: {e}"))
            })?;
        Ok(Self {
            pool,
            max_in_flight,
        })
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Embed every text, one request per text.
    ///
    /// `on_progress` receives the number of completed requests after each
    /// one finishes. The first failure aborts the batch.
    pub fn embed_all<F>(
        &self,
        embedder: &dyn Embedder,
        texts: &[&str],
        on_progress: F,
    ) -> std::result::Result<Vec<Vec<f32>>, EmbedError>
    where
        F: Fn(usize) + Sync,
    {
        let completed = AtomicUsize::new(0);
        self.pool.install(|| {
            texts
                .par_iter()
                .with_max_len(1)
                .map(|text| {
                    let vector = embedder.embed(text)?;
                    let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                    on_progress(done);
                    Ok(vector)
                })
                .collect()
        })
    }
}

impl std::fmt::Debug for EmbeddingPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingPool")
            .field("max_in_flight", &self.max_in_flight)
            .finish_non_exhaustive()
    }
}
