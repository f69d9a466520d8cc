//! Runtime settings for the embedding backend.
//!
//! Each value is taken from the first source that has it: an explicit
//! override (command-line flag or its environment variable), the
//! `config.redb` settings table, then the built-in default.

use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use serde::Serialize;

use crate::{
    config_db::ConfigDb,
    embedding::{
        DEFAULT_HASH_DIMENSION,
        DEFAULT_MAX_IN_FLIGHT,
        DEFAULT_OLLAMA_MODEL,
        DEFAULT_TIMEOUT,
        Embedder,
        HashEmbedder,
        OllamaEmbedder,
    },
    error::{Error, Result},
};

/// Keys accepted by `config set`.
pub mod keys {
    pub const EMBEDDER: &str = "embedder";
    pub const EMBEDDING_MODEL: &str = "embedding_model";
    pub const OLLAMA_URL: &str = "ollama_url";
    pub const EMBED_TIMEOUT_SECS: &str = "embed_timeout_secs";
    pub const MAX_IN_FLIGHT: &str = "max_in_flight";
    pub const HASH_DIMENSION: &str = "hash_dimension";

    pub const ALL: &[&str] = &[
        EMBEDDER,
        EMBEDDING_MODEL,
        OLLAMA_URL,
        EMBED_TIMEOUT_SECS,
        MAX_IN_FLIGHT,
        HASH_DIMENSION,
    ];
}

/// Which embedding backend to use.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderKind {
    /// A local Ollama server.
    #[default]
    Ollama,
    /// Offline feature hashing; no model server needed.
    Hash,
}

impl fmt::Display for EmbedderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ollama => f.write_str("ollama"),
            Self::Hash => f.write_str("hash"),
        }
    }
}

impl FromStr for EmbedderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "hash" => Ok(Self::Hash),
            other => Err(Error::Config(format!(
                "unknown embedder '{other}' (expected 'ollama' or 'hash')"
            ))),
        }
    }
}

/// Values supplied on the command line. `None` defers to stored settings.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub embedder: Option<EmbedderKind>,
    pub embedding_model: Option<String>,
    pub ollama_url: Option<String>,
    pub embed_timeout_secs: Option<u64>,
    pub max_in_flight: Option<usize>,
}

/// Fully resolved settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settings {
    pub embedder: EmbedderKind,
    pub embedding_model: String,
    pub ollama_url: String,
    pub embed_timeout_secs: u64,
    pub max_in_flight: usize,
    pub hash_dimension: usize,
}

impl Settings {
    pub fn resolve(overrides: &Overrides, config_db: &ConfigDb) -> Result<Self> {
        Self::resolve_with(overrides, config_db, |name| std::env::var(name).ok())
    }

    /// Resolve with an explicit environment lookup, used for the Ollama
    /// host/port fallback.
    pub fn resolve_with(
        overrides: &Overrides,
        config_db: &ConfigDb,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let embedder = match overrides.embedder {
            Some(kind) => kind,
            None => stored(config_db, keys::EMBEDDER)?.unwrap_or_default(),
        };
        let embedding_model = match &overrides.embedding_model {
            Some(model) => model.clone(),
            None => config_db
                .get_setting_or(keys::EMBEDDING_MODEL, DEFAULT_OLLAMA_MODEL)?,
        };
        let ollama_url = match &overrides.ollama_url {
            Some(url) => url.clone(),
            None => match config_db.get_setting(keys::OLLAMA_URL)? {
                Some(url) => url,
                None => default_ollama_url(&env),
            },
        };
        let embed_timeout_secs = match overrides.embed_timeout_secs {
            Some(secs) => secs,
            None => stored(config_db, keys::EMBED_TIMEOUT_SECS)?
                .unwrap_or(DEFAULT_TIMEOUT.as_secs()),
        };
        let max_in_flight = match overrides.max_in_flight {
            Some(n) => n,
            None => stored(config_db, keys::MAX_IN_FLIGHT)?
                .unwrap_or(DEFAULT_MAX_IN_FLIGHT),
        };
        let hash_dimension = stored(config_db, keys::HASH_DIMENSION)?
            .unwrap_or(DEFAULT_HASH_DIMENSION);

        Ok(Self {
            embedder,
            embedding_model,
            ollama_url,
            embed_timeout_secs,
            max_in_flight,
            hash_dimension,
        })
    }

    pub fn embed_timeout(&self) -> Duration {
        Duration::from_secs(self.embed_timeout_secs)
    }

    /// Instantiate the configured embedding backend.
    pub fn build_embedder(&self) -> Result<Arc<dyn Embedder>> {
        Ok(match self.embedder {
            EmbedderKind::Ollama => Arc::new(OllamaEmbedder::new(
                &self.ollama_url,
                &self.embedding_model,
                self.embed_timeout(),
            )?),
            EmbedderKind::Hash => Arc::new(HashEmbedder::new(self.hash_dimension)),
        })
    }
}

/// Check that `value` is acceptable for `key` before it is stored.
pub fn validate_setting(key: &str, value: &str) -> Result<()> {
    let invalid = |what: &str| {
        Err(Error::Config(format!("{key}: expected {what}, got '{value}'")))
    };
    match key {
        keys::EMBEDDER => value.parse::<EmbedderKind>().map(|_| ()),
        keys::EMBEDDING_MODEL | keys::OLLAMA_URL => {
            if value.trim().is_empty() {
                invalid("a non-empty string")
            } else {
                Ok(())
            }
        }
        keys::EMBED_TIMEOUT_SECS | keys::MAX_IN_FLIGHT | keys::HASH_DIMENSION => {
            match value.parse::<u64>() {
                Ok(n) if n > 0 => Ok(()),
                _ => invalid("a positive integer"),
            }
        }
        _ => Err(Error::Config(format!(
            "unknown setting '{key}' (known: {})",
            keys::ALL.join(", ")
        ))),
    }
}

fn stored<T: FromStr>(config_db: &ConfigDb, key: &str) -> Result<Option<T>> {
    match config_db.get_setting(key)? {
        None => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(|_| {
            Error::Config(format!("stored setting {key} has invalid value '{raw}'"))
        }),
    }
}

fn default_ollama_url(env: &impl Fn(&str) -> Option<String>) -> String {
    let host = env("OLLAMA_HOST").unwrap_or_else(|| "localhost".to_string());
    let port = env("OLLAMA_PORT").unwrap_or_else(|| "11434".to_string());
    format!("http://{host}:{port}")
}
