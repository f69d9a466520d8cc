//! hybridseek - hybrid document retrieval combining dense vectors and BM25.
//!
//! Records (pre-chunked documents) are embedded once by an
//! [`IndexBuilder`], which writes three stores from the same ordered
//! sequence: an exact L2 [`VectorIndex`], a BM25 [`KeywordIndex`] backed by
//! [Tantivy](https://github.com/quickwit-oss/tantivy), and a
//! [`MetadataStore`] backed by [redb](https://github.com/cberner/redb). A
//! [`HybridRetriever`] queries both indexes and merges the two ranked
//! lists with weighted reciprocal rank fusion.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use hybridseek::{DataDir, HashEmbedder, HybridRetriever, IndexBuilder, SearchParams};
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let embedder = Arc::new(HashEmbedder::default());
//!
//! let records = hybridseek::read_records("records.jsonl".as_ref()).unwrap();
//! IndexBuilder::new(data_dir.artifacts(), embedder.clone(), 4)
//!     .unwrap()
//!     .build(&records)
//!     .unwrap();
//!
//! let retriever = HybridRetriever::open_active(&data_dir.artifacts(), embedder).unwrap();
//! let params = SearchParams { k: 3, ..Default::default() };
//! for doc in retriever.search("credit report dispute", &params).unwrap() {
//!     println!("{} ({:.4}) {}", doc.id, doc.rrf_score, doc.title);
//! }
//! ```

pub mod artifacts;
pub mod builder;
pub mod collaborators;
pub mod config_db;
pub mod data_dir;
pub mod doc_id;
pub mod embedding;
pub mod error;
pub mod fusion;
pub mod keyword_index;
pub mod mcp;
pub mod metadata_store;
pub mod record;
pub mod retriever;
pub mod search;
pub mod settings;
pub mod text_util;
pub mod vector_index;

pub use artifacts::{ArtifactPaths, ArtifactSet};
pub use builder::{BuildResult, IndexBuilder};
pub use collaborators::{IdentityReranker, Reranker};
pub use config_db::ConfigDb;
pub use data_dir::DataDir;
pub use doc_id::{DocumentId, IdMap};
pub use embedding::{EmbedError, Embedder, HashEmbedder, OllamaEmbedder};
pub use error::{Error, Result};
pub use keyword_index::KeywordIndex;
pub use metadata_store::{Manifest, MetadataStore};
pub use record::{Record, read_records};
pub use retriever::{HybridRetriever, RetrievedDocument, SearchParams};
pub use settings::{EmbedderKind, Overrides, Settings};
pub use vector_index::VectorIndex;
