use std::{
    collections::HashSet,
    sync::Arc,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use tracing::{debug, info};

use crate::{
    artifacts::ArtifactSet,
    embedding::{Embedder, EmbeddingPool, normalize},
    error::{Error, Result},
    keyword_index::KeywordIndex,
    metadata_store::{Manifest, MetadataStore},
    record::Record,
    vector_index::VectorIndex,
};

/// Summary of a finished build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildResult {
    pub generation: u64,
    pub record_count: usize,
    pub dimension: usize,
    pub embedding_model: String,
    pub elapsed: Duration,
}

/// Offline pass that turns records into a published artifact generation.
///
/// Every store is written from the same ordered record slice, so position
/// `i` means the same record in all three. Nothing becomes visible to
/// readers until the whole generation is on disk.
pub struct IndexBuilder {
    artifacts: ArtifactSet,
    embedder: Arc<dyn Embedder>,
    pool: EmbeddingPool,
}

impl IndexBuilder {
    pub fn new(
        artifacts: ArtifactSet,
        embedder: Arc<dyn Embedder>,
        max_in_flight: usize,
    ) -> Result<Self> {
        Ok(Self {
            artifacts,
            embedder,
            pool: EmbeddingPool::new(max_in_flight)?,
        })
    }

    pub fn build(&self, records: &[Record]) -> Result<BuildResult> {
        self.build_with_progress(records, |_| {})
    }

    /// Build and publish a generation, reporting embedding progress.
    ///
    /// `on_progress` receives the number of records embedded so far. On
    /// any error the staged files are removed and the previously active
    /// generation stays in place.
    pub fn build_with_progress<F>(
        &self,
        records: &[Record],
        on_progress: F,
    ) -> Result<BuildResult>
    where
        F: Fn(usize) + Sync,
    {
        let start = Instant::now();
        validate(records)?;

        info!(
            records = records.len(),
            model = self.embedder.model(),
            max_in_flight = self.pool.max_in_flight(),
            "embedding records"
        );
        let texts: Vec<&str> = records.iter().map(|r| r.text.as_str()).collect();
        let mut vectors =
            self.pool
                .embed_all(self.embedder.as_ref(), &texts, on_progress)?;

        let dimension = vectors.first().map_or(0, Vec::len);
        if dimension == 0 {
            return Err(Error::DimensionMismatch {
                expected: 1,
                actual: 0,
            });
        }
        for vector in &mut vectors {
            if vector.len() != dimension {
                return Err(Error::DimensionMismatch {
                    expected: dimension,
                    actual: vector.len(),
                });
            }
            normalize(vector);
        }
        debug!(dimension, "embeddings complete");

        let mut index = VectorIndex::new(dimension);
        index.add(&vectors)?;
        drop(vectors);

        let manifest = Manifest {
            dimension,
            embedding_model: self.embedder.model().to_string(),
            record_count: records.len(),
            built_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| d.as_secs()),
        };

        let staging = self.artifacts.stage()?;
        {
            let paths = staging.paths();
            index.save(&paths.vectors())?;
            debug!(path = %paths.vectors().display(), "wrote vector index");
            MetadataStore::create(&paths.metadata(), records, &manifest)?;
            debug!(path = %paths.metadata().display(), "wrote metadata store");
            KeywordIndex::create(&paths.keyword(), records)?;
            debug!(path = %paths.keyword().display(), "wrote keyword index");
        }
        let published = staging.commit()?;

        let result = BuildResult {
            generation: published.generation(),
            record_count: records.len(),
            dimension,
            embedding_model: manifest.embedding_model,
            elapsed: start.elapsed(),
        };
        info!(
            generation = result.generation,
            records = result.record_count,
            dimension = result.dimension,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "published index generation"
        );
        Ok(result)
    }
}

impl std::fmt::Debug for IndexBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexBuilder")
            .field("artifacts", &self.artifacts)
            .field("model", &self.embedder.model())
            .finish_non_exhaustive()
    }
}

/// Records handed in directly (not through `read_records`) get the same
/// checks as a parsed file. Line numbers are 1-based positions.
fn validate(records: &[Record]) -> Result<()> {
    if records.is_empty() {
        return Err(Error::EmptyCorpus);
    }
    let mut seen = HashSet::with_capacity(records.len());
    for (idx, record) in records.iter().enumerate() {
        if record.id.is_empty() {
            return Err(Error::MalformedRecord {
                line: idx + 1,
                reason: "field `id` is empty".to_string(),
            });
        }
        if record.text.trim().is_empty() {
            return Err(Error::MalformedRecord {
                line: idx + 1,
                reason: "field `text` is blank".to_string(),
            });
        }
        if !seen.insert(record.id.as_str()) {
            return Err(Error::DuplicateRecordId {
                id: record.id.clone(),
                line: idx + 1,
            });
        }
    }
    Ok(())
}
