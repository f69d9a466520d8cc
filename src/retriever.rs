use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    artifacts::{ArtifactPaths, ArtifactSet},
    collaborators::Reranker,
    doc_id::{DocumentId, IdMap},
    embedding::{Embedder, normalize},
    error::{Error, Result},
    fusion::{self, DEFAULT_RRF_BETA},
    keyword_index::KeywordIndex,
    metadata_store::{Manifest, MetadataStore},
    vector_index::VectorIndex,
};

pub const DEFAULT_K: usize = 5;
pub const DEFAULT_K_SEMANTIC: usize = 10;
pub const DEFAULT_K_KEYWORD: usize = 10;

/// Knobs for one hybrid query.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchParams {
    /// Number of results to return.
    pub k: usize,
    /// Only return records from this source.
    pub filter_source_id: Option<String>,
    /// Candidates taken from the vector index.
    pub k_semantic: usize,
    /// Candidates taken from the keyword index.
    pub k_keyword: usize,
    /// Semantic candidates below this cosine similarity are dropped.
    pub similarity_threshold: f32,
    /// Weight of the semantic list in fusion; the keyword list gets
    /// `1 - rrf_beta`.
    pub rrf_beta: f64,
    /// On an embedding failure, continue with keyword candidates only
    /// instead of failing the query.
    pub keyword_fallback: bool,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            filter_source_id: None,
            k_semantic: DEFAULT_K_SEMANTIC,
            k_keyword: DEFAULT_K_KEYWORD,
            similarity_threshold: 0.0,
            rrf_beta: DEFAULT_RRF_BETA,
            keyword_fallback: false,
        }
    }
}

/// A fused result resolved through the metadata store.
#[derive(
    Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema,
)]
pub struct RetrievedDocument {
    pub id: String,
    pub rrf_score: f64,
    pub title: String,
    pub text: String,
    pub source_url: String,
}

/// Query-time view over one artifact generation.
///
/// Opening loads the vector index and the position → id map into memory
/// and checks that all three stores describe the same records. After
/// that the retriever is immutable and can serve concurrent searches.
pub struct HybridRetriever {
    paths: ArtifactPaths,
    vectors: VectorIndex,
    keyword: KeywordIndex,
    metadata: MetadataStore,
    ids: IdMap,
    manifest: Manifest,
    embedder: Arc<dyn Embedder>,
    reranker: Option<Arc<dyn Reranker>>,
}

impl HybridRetriever {
    /// Open the active generation of `artifacts`.
    pub fn open_active(
        artifacts: &ArtifactSet,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        Self::open(artifacts.active()?, embedder)
    }

    /// Open the stores at `paths`.
    ///
    /// Fails with [`Error::MissingArtifact`] if any store is absent and
    /// with [`Error::IndexDesync`] if the stores disagree.
    pub fn open(paths: ArtifactPaths, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let vectors = VectorIndex::load(&paths.vectors())?;
        let metadata = MetadataStore::open(&paths.metadata())?;
        let keyword = KeywordIndex::open(&paths.keyword())?;
        let manifest = metadata.manifest()?;
        let ids = IdMap::from_ordered(metadata.ordered_ids()?)?;

        check_consistency(&vectors, &keyword, &metadata, &ids, &manifest)?;

        if embedder.model() != manifest.embedding_model {
            warn!(
                built_with = manifest.embedding_model,
                querying_with = embedder.model(),
                "query embedder differs from the one used at build time"
            );
        }
        info!(
            generation = paths.generation(),
            records = ids.len(),
            dimension = vectors.dimension(),
            "opened index"
        );

        Ok(Self {
            paths,
            vectors,
            keyword,
            metadata,
            ids,
            manifest,
            embedder,
            reranker: None,
        })
    }

    /// Apply `reranker` to fused results before returning them.
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn generation(&self) -> u64 {
        self.paths.generation()
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Run one hybrid query.
    ///
    /// Returns at most `params.k` documents ordered by fused score, ties
    /// by id. An empty result is not an error, and a query with no tokens
    /// returns one without calling the embedder.
    pub fn search(
        &self,
        query: &str,
        params: &SearchParams,
    ) -> Result<Vec<RetrievedDocument>> {
        fusion::validate_beta(params.rrf_beta)?;
        if params.k == 0 || query.split_whitespace().next().is_none() {
            return Ok(Vec::new());
        }

        let semantic = self.semantic_candidates(query, params)?;
        let keyword = self.keyword_candidates(query, params)?;
        debug!(
            semantic = semantic.len(),
            keyword = keyword.len(),
            "candidate lists"
        );

        let allowed = params
            .filter_source_id
            .as_deref()
            .map(|source| self.metadata.filter_ids(source))
            .transpose()?;

        let fetch = if self.reranker.is_some() {
            params.k.saturating_mul(2)
        } else {
            params.k
        };
        let fused = fusion::fuse(
            &semantic,
            &keyword,
            params.rrf_beta,
            allowed.as_ref(),
            fetch,
        )?;

        let mut documents = Vec::with_capacity(fused.len());
        for candidate in fused {
            let row = self.metadata.lookup(&candidate.id).map_err(|e| match e {
                Error::NotFound { .. } => Error::IndexDesync(format!(
                    "fused id '{}' has no metadata row",
                    candidate.id
                )),
                other => other,
            })?;
            documents.push(RetrievedDocument {
                id: candidate.id,
                rrf_score: candidate.rrf_score,
                title: row.title,
                text: row.text,
                source_url: row.source_url,
            });
        }

        if let Some(reranker) = &self.reranker {
            documents = reranker.rerank(query, documents, params.k)?;
            documents.truncate(params.k);
        }

        debug!(results = documents.len(), "search complete");
        Ok(documents)
    }

    /// Record ids of the nearest vectors that clear the similarity
    /// threshold, nearest first.
    fn semantic_candidates(
        &self,
        query: &str,
        params: &SearchParams,
    ) -> Result<Vec<&str>> {
        let mut embedding = match self.embedder.embed(query) {
            Ok(v) => v,
            Err(e) if params.keyword_fallback => {
                warn!(error = %e, "embedding failed, using keyword results only");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        normalize(&mut embedding);

        let hits = self.vectors.search(&embedding, params.k_semantic)?;
        hits.into_iter()
            .filter(|hit| hit.similarity() >= params.similarity_threshold)
            .map(|hit| self.resolve(hit.doc))
            .collect()
    }

    /// Record ids of the best BM25 matches, best first.
    fn keyword_candidates(
        &self,
        query: &str,
        params: &SearchParams,
    ) -> Result<Vec<&str>> {
        let tokens = self.keyword.tokenize(query)?;
        self.keyword
            .top_k(&tokens, params.k_keyword)?
            .into_iter()
            .map(|hit| self.resolve(hit.doc))
            .collect()
    }

    fn resolve(&self, doc: DocumentId) -> Result<&str> {
        self.ids.record_id(doc).ok_or_else(|| {
            Error::IndexDesync(format!("position {doc} has no record id"))
        })
    }
}

impl std::fmt::Debug for HybridRetriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridRetriever")
            .field("generation", &self.paths.generation())
            .field("records", &self.ids.len())
            .field("dimension", &self.vectors.dimension())
            .field("model", &self.embedder.model())
            .finish_non_exhaustive()
    }
}

fn check_consistency(
    vectors: &VectorIndex,
    keyword: &KeywordIndex,
    metadata: &MetadataStore,
    ids: &IdMap,
    manifest: &Manifest,
) -> Result<()> {
    let counts = [
        ("vector rows", vectors.len()),
        ("metadata rows", metadata.count()?),
        ("ordered ids", ids.len()),
        ("keyword documents", keyword.num_docs()),
    ];
    if counts.iter().any(|(_, n)| *n != ids.len()) {
        let detail: Vec<String> =
            counts.iter().map(|(what, n)| format!("{what}={n}")).collect();
        return Err(Error::IndexDesync(format!(
            "store sizes differ: {}",
            detail.join(", ")
        )));
    }

    if vectors.dimension() != manifest.dimension {
        return Err(Error::IndexDesync(format!(
            "vector index dimension {} does not match manifest dimension {}",
            vectors.dimension(),
            manifest.dimension
        )));
    }

    if keyword.stored_ids()? != ids.ids() {
        return Err(Error::IndexDesync(
            "keyword index positions disagree with the metadata order".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        builder::IndexBuilder,
        collaborators::IdentityReranker,
        embedding::{EmbedError, HashEmbedder},
        record::Record,
    };

    const DIM: usize = 256;

    fn record(id: &str, source_id: &str, text: &str) -> Record {
        Record {
            id: id.to_string(),
            doc_id: format!("doc-{id}"),
            source_id: source_id.to_string(),
            source_url: format!("https://example.test/{id}"),
            title: format!("Title {id}"),
            tags: Vec::new(),
            text: text.to_string(),
        }
    }

    fn corpus() -> Vec<Record> {
        vec![
            record("r1", "mortgages.pdf", "fixed rate mortgage escrow account"),
            record("r2", "loans.pdf", "student loan repayment plans forgiveness"),
            record("r3", "credit.pdf", "how to file a credit report dispute online"),
            record("r4", "loans.pdf", "auto loan refinancing terms"),
            record("r5", "mortgages.pdf", "mortgage servicing transfer notice"),
        ]
    }

    struct Unavailable;

    impl Embedder for Unavailable {
        fn model(&self) -> &str {
            "feature-hash-256"
        }

        fn embed(
            &self,
            _text: &str,
        ) -> std::result::Result<Vec<f32>, EmbedError> {
            Err(EmbedError::EmptyResponse)
        }
    }

    fn build(root: &std::path::Path) -> ArtifactSet {
        let set = ArtifactSet::new(root);
        IndexBuilder::new(set.clone(), Arc::new(HashEmbedder::new(DIM)), 2)
            .unwrap()
            .build(&corpus())
            .unwrap();
        set
    }

    fn open(set: &ArtifactSet) -> HybridRetriever {
        HybridRetriever::open_active(set, Arc::new(HashEmbedder::new(DIM)))
            .unwrap()
    }

    fn ids(docs: &[RetrievedDocument]) -> Vec<&str> {
        docs.iter().map(|d| d.id.as_str()).collect()
    }

    #[test]
    fn retriever_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HybridRetriever>();
    }

    #[test]
    fn two_retrievers_serve_one_generation() {
        let tmp = tempfile::tempdir().unwrap();
        let set = build(tmp.path());
        let first = open(&set);
        let second = open(&set);
        assert_eq!(first.len(), 5);
        assert_eq!(second.len(), 5);

        let params = SearchParams::default();
        assert_eq!(
            first.search("credit report dispute", &params).unwrap(),
            second.search("credit report dispute", &params).unwrap()
        );
    }

    #[test]
    fn exact_phrase_ranks_first() {
        let tmp = tempfile::tempdir().unwrap();
        let retriever = open(&build(tmp.path()));

        let params = SearchParams {
            k: 3,
            ..Default::default()
        };
        let results = retriever.search("credit report dispute", &params).unwrap();

        assert!(!results.is_empty() && results.len() <= 3);
        let top = &results[0];
        assert_eq!(top.id, "r3");
        assert_eq!(top.title, "Title r3");
        assert_eq!(top.source_url, "https://example.test/r3");
        assert!(top.text.contains("credit report dispute"));
        // Rank 0 in both lists.
        assert!((top.rrf_score - 1.0 / 61.0).abs() < 1e-9);
    }

    #[test]
    fn results_are_bounded_and_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        let retriever = open(&build(tmp.path()));

        let params = SearchParams {
            k: 2,
            ..Default::default()
        };
        let results = retriever.search("loan mortgage", &params).unwrap();
        assert!(results.len() <= 2);
        for pair in results.windows(2) {
            assert!(
                pair[0].rrf_score > pair[1].rrf_score
                    || (pair[0].rrf_score == pair[1].rrf_score
                        && pair[0].id < pair[1].id)
            );
        }
    }

    #[test]
    fn source_filter_excludes_other_sources() {
        let tmp = tempfile::tempdir().unwrap();
        let retriever = open(&build(tmp.path()));

        let params = SearchParams {
            k: 5,
            filter_source_id: Some("loans.pdf".to_string()),
            ..Default::default()
        };
        let results = retriever.search("loan credit mortgage", &params).unwrap();
        assert!(!results.is_empty());
        for doc in &results {
            assert!(doc.id == "r2" || doc.id == "r4", "unexpected {}", doc.id);
        }

        let unknown = SearchParams {
            filter_source_id: Some("nope.pdf".to_string()),
            ..Default::default()
        };
        assert!(retriever.search("loan", &unknown).unwrap().is_empty());
    }

    #[test]
    fn threshold_above_one_disables_semantic_list() {
        let tmp = tempfile::tempdir().unwrap();
        let retriever = open(&build(tmp.path()));

        let params = SearchParams {
            similarity_threshold: 1.01,
            ..Default::default()
        };
        let results = retriever.search("credit report dispute", &params).unwrap();
        assert_eq!(ids(&results), vec!["r3"]);
        assert!((results[0].rrf_score - 0.3 / 61.0).abs() < 1e-9);

        assert!(retriever.search("zebra", &params).unwrap().is_empty());
    }

    /// Fixed 2-d vectors so similarities are known exactly.
    struct Compass;

    impl Embedder for Compass {
        fn model(&self) -> &str {
            "compass"
        }

        fn embed(
            &self,
            text: &str,
        ) -> std::result::Result<Vec<f32>, EmbedError> {
            match text {
                "east" | "north" => Ok(vec![1.0, 0.0]),
                "northeast" => Ok(vec![0.6, 0.8]),
                "west" => Ok(vec![-1.0, 0.0]),
                _ => Err(EmbedError::EmptyResponse),
            }
        }
    }

    #[test]
    fn threshold_is_inclusive_and_splits_the_list() {
        let tmp = tempfile::tempdir().unwrap();
        let set = ArtifactSet::new(tmp.path());
        IndexBuilder::new(set.clone(), Arc::new(Compass), 1)
            .unwrap()
            .build(&[
                record("e", "map.pdf", "east"),
                record("ne", "map.pdf", "northeast"),
                record("w", "map.pdf", "west"),
            ])
            .unwrap();
        let retriever = HybridRetriever::open_active(&set, Arc::new(Compass)).unwrap();

        // "north" matches no stored text, so only the semantic list counts.
        let hits = retriever.vectors.search(&[1.0, 0.0], 3).unwrap();
        let middle = hits[1].similarity();
        assert!(middle > 0.0 && middle < 1.0);

        let at = SearchParams {
            similarity_threshold: middle,
            ..Default::default()
        };
        let results = retriever.search("north", &at).unwrap();
        assert_eq!(ids(&results), vec!["e", "ne"]);
        assert!((results[1].rrf_score - 0.7 / 62.0).abs() < 1e-9);

        let above = SearchParams {
            similarity_threshold: f32::from_bits(middle.to_bits() + 1),
            ..Default::default()
        };
        assert_eq!(ids(&retriever.search("north", &above).unwrap()), vec!["e"]);

        let all = SearchParams {
            similarity_threshold: -1.0,
            ..Default::default()
        };
        assert_eq!(
            ids(&retriever.search("north", &all).unwrap()),
            vec!["e", "ne", "w"]
        );
    }

    #[test]
    fn searches_are_deterministic() {
        let tmp = tempfile::tempdir().unwrap();
        let retriever = open(&build(tmp.path()));
        let params = SearchParams::default();
        let first = retriever.search("loan repayment", &params).unwrap();
        let second = retriever.search("loan repayment", &params).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn k_zero_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let retriever = open(&build(tmp.path()));
        let params = SearchParams {
            k: 0,
            ..Default::default()
        };
        assert!(retriever.search("credit", &params).unwrap().is_empty());
    }

    #[test]
    fn blank_query_is_empty_without_embedding() {
        let tmp = tempfile::tempdir().unwrap();
        let set = build(tmp.path());
        let retriever =
            HybridRetriever::open_active(&set, Arc::new(Unavailable)).unwrap();
        for query in ["", "   ", "\t\n"] {
            assert!(
                retriever
                    .search(query, &SearchParams::default())
                    .unwrap()
                    .is_empty()
            );
        }
    }

    #[test]
    fn invalid_beta_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let retriever = open(&build(tmp.path()));
        let params = SearchParams {
            rrf_beta: 1.2,
            ..Default::default()
        };
        assert!(matches!(
            retriever.search("credit", &params).unwrap_err(),
            Error::InvalidParameter(_)
        ));
    }

    #[test]
    fn embedding_failure_is_surfaced() {
        let tmp = tempfile::tempdir().unwrap();
        let set = build(tmp.path());
        let retriever =
            HybridRetriever::open_active(&set, Arc::new(Unavailable)).unwrap();

        let err = retriever
            .search("credit report dispute", &SearchParams::default())
            .unwrap_err();
        assert!(matches!(err, Error::EmbeddingUnavailable(_)));
    }

    #[test]
    fn keyword_fallback_on_embedding_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let set = build(tmp.path());
        let retriever =
            HybridRetriever::open_active(&set, Arc::new(Unavailable)).unwrap();

        let params = SearchParams {
            keyword_fallback: true,
            ..Default::default()
        };
        let results = retriever.search("credit report dispute", &params).unwrap();
        assert_eq!(ids(&results), vec!["r3"]);
        assert!((results[0].rrf_score - 0.3 / 61.0).abs() < 1e-9);
    }

    #[test]
    fn query_dimension_mismatch() {
        let tmp = tempfile::tempdir().unwrap();
        let set = build(tmp.path());
        let retriever =
            HybridRetriever::open_active(&set, Arc::new(HashEmbedder::new(16)))
                .unwrap();
        assert!(matches!(
            retriever
                .search("credit", &SearchParams::default())
                .unwrap_err(),
            Error::DimensionMismatch {
                expected: DIM,
                actual: 16
            }
        ));
    }

    #[test]
    fn reranker_sees_doubled_candidates_and_trims() {
        let tmp = tempfile::tempdir().unwrap();
        let retriever = open(&build(tmp.path()))
            .with_reranker(Arc::new(IdentityReranker));
        let params = SearchParams {
            k: 1,
            ..Default::default()
        };
        let results = retriever.search("credit report dispute", &params).unwrap();
        assert_eq!(ids(&results), vec!["r3"]);
    }

    #[test]
    fn missing_generation_refuses_to_open() {
        let tmp = tempfile::tempdir().unwrap();
        let err = HybridRetriever::open_active(
            &ArtifactSet::new(tmp.path()),
            Arc::new(HashEmbedder::new(DIM)),
        )
        .unwrap_err();
        assert!(matches!(err, Error::MissingArtifact(_)));
    }

    #[test]
    fn missing_store_refuses_to_open() {
        let tmp = tempfile::tempdir().unwrap();
        let set = build(tmp.path());
        std::fs::remove_file(set.active().unwrap().vectors()).unwrap();
        let err =
            HybridRetriever::open_active(&set, Arc::new(HashEmbedder::new(DIM)))
                .unwrap_err();
        assert!(matches!(err, Error::MissingArtifact(_)));
    }

    #[test]
    fn row_count_mismatch_is_desync() {
        let tmp = tempfile::tempdir().unwrap();
        let set = build(tmp.path());
        let mut short = VectorIndex::new(DIM);
        short.add(&[vec![0.0; DIM]]).unwrap();
        short.save(&set.active().unwrap().vectors()).unwrap();

        let err =
            HybridRetriever::open_active(&set, Arc::new(HashEmbedder::new(DIM)))
                .unwrap_err();
        assert!(matches!(err, Error::IndexDesync(_)));
    }

    #[test]
    fn dimension_mismatch_with_manifest_is_desync() {
        let tmp = tempfile::tempdir().unwrap();
        let set = build(tmp.path());
        let mut other = VectorIndex::new(8);
        other.add(&vec![vec![0.0; 8]; corpus().len()]).unwrap();
        other.save(&set.active().unwrap().vectors()).unwrap();

        let err =
            HybridRetriever::open_active(&set, Arc::new(HashEmbedder::new(8)))
                .unwrap_err();
        assert!(matches!(err, Error::IndexDesync(_)));
    }
}
