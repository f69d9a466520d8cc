use std::path::PathBuf;

use crate::embedding::EmbedError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("keyword index error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),

    #[error("index artifact missing or unreadable: {0}")]
    MissingArtifact(PathBuf),

    #[error("corrupt vector index {path}: {reason}")]
    CorruptVectorIndex { path: PathBuf, reason: String },

    #[error("malformed record on line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },

    #[error("duplicate record id '{id}' on line {line}")]
    DuplicateRecordId { id: String, line: usize },

    #[error("no records to index")]
    EmptyCorpus,

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding service unavailable: {0}")]
    EmbeddingUnavailable(#[from] EmbedError),

    #[error("index stores are out of sync: {0}")]
    IndexDesync(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("generation {staged} was superseded by generation {current}")]
    Superseded { staged: u64, current: u64 },
}
