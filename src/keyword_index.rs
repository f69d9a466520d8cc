use std::path::Path;

use tantivy::{
    Index,
    IndexReader,
    IndexWriter,
    ReloadPolicy,
    TantivyDocument,
    Term,
    collector::TopDocs,
    doc,
    query::{BooleanQuery, Occur, Query, TermQuery},
    schema::*,
    tokenizer::{
        LowerCaser,
        RemoveLongFilter,
        TextAnalyzer,
        TokenStream,
        WhitespaceTokenizer,
    },
};

use crate::{
    doc_id::DocumentId,
    error::{Error, Result},
    record::Record,
};

/// Name of the registered analyzer: whitespace split + lowercase, with no
/// stemming and no stopword removal.
const TOKENIZER: &str = "ws_lower";

/// Memory budget for the single indexing thread.
const WRITER_MEMORY: usize = 50_000_000;

/// Field names used in the schema.
pub mod fields {
    pub const ID: &str = "id";
    pub const POSITION: &str = "position";
    pub const TEXT: &str = "text";
}

/// BM25 keyword index over the record corpus.
///
/// Every document stores its record id and its [`DocumentId`] position so
/// scores can be reported per corpus position.
pub struct KeywordIndex {
    index: Index,
    reader: IndexReader,
    fields: SchemaFields,
}

/// Resolved field handles for the schema.
#[derive(Clone, Copy)]
struct SchemaFields {
    id: Field,
    position: Field,
    text: Field,
}

/// A keyword hit with its BM25 score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeywordHit {
    pub doc: DocumentId,
    pub score: f32,
}

fn build_schema() -> Schema {
    let mut builder = Schema::builder();

    builder.add_text_field(fields::ID, STRING | STORED);
    builder.add_u64_field(fields::POSITION, STORED | FAST);

    let text_opts = TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer(TOKENIZER)
            .set_index_option(IndexRecordOption::WithFreqs),
    );
    builder.add_text_field(fields::TEXT, text_opts);

    builder.build()
}

fn register_tokenizers(index: &Index) {
    let analyzer = TextAnalyzer::builder(WhitespaceTokenizer::default())
        .filter(RemoveLongFilter::limit(256))
        .filter(LowerCaser)
        .build();
    index.tokenizers().register(TOKENIZER, analyzer);
}

fn resolve_fields(schema: &Schema) -> Result<SchemaFields> {
    Ok(SchemaFields {
        id: schema.get_field(fields::ID)?,
        position: schema.get_field(fields::POSITION)?,
        text: schema.get_field(fields::TEXT)?,
    })
}

impl KeywordIndex {
    /// Build a new on-disk index over `records` in `dir`.
    ///
    /// The directory must not already hold an index.
    pub fn create(dir: &Path, records: &[Record]) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let index = Index::create_in_dir(dir, build_schema())?;
        Self::populate(index, records)
    }

    /// Build an in-memory index (for testing).
    pub fn create_in_ram(records: &[Record]) -> Result<Self> {
        let index = Index::create_in_ram(build_schema());
        Self::populate(index, records)
    }

    fn populate(index: Index, records: &[Record]) -> Result<Self> {
        register_tokenizers(&index);
        let fields = resolve_fields(&index.schema())?;

        let mut writer: IndexWriter =
            index.writer_with_num_threads(1, WRITER_MEMORY)?;
        for (position, record) in records.iter().enumerate() {
            let doc_id = DocumentId::from_position(position);
            writer.add_document(doc!(
                fields.id => record.id.as_str(),
                fields.position => doc_id.as_u64(),
                fields.text => record.text.as_str(),
            ))?;
        }
        writer.commit()?;
        writer.wait_merging_threads()?;

        Self::with_reader(index, fields)
    }

    /// Open an existing index read-only.
    pub fn open(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(Error::MissingArtifact(dir.to_path_buf()));
        }
        let index = Index::open_in_dir(dir)?;
        register_tokenizers(&index);
        let fields = resolve_fields(&index.schema())?;
        Self::with_reader(index, fields)
    }

    fn with_reader(index: Index, fields: SchemaFields) -> Result<Self> {
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        Ok(Self {
            index,
            reader,
            fields,
        })
    }

    /// Number of indexed documents.
    pub fn num_docs(&self) -> usize {
        self.reader.searcher().num_docs() as usize
    }

    /// Split `text` into query tokens with the same analyzer used at
    /// index time.
    pub fn tokenize(&self, text: &str) -> Result<Vec<String>> {
        let mut analyzer = self.index.tokenizer_for_field(self.fields.text)?;
        let mut stream = analyzer.token_stream(text);
        let mut tokens = Vec::new();
        while stream.advance() {
            tokens.push(stream.token().text.clone());
        }
        Ok(tokens)
    }

    /// BM25 score of every corpus position for `tokens`.
    ///
    /// The result has one entry per document; positions containing none
    /// of the tokens score 0.
    pub fn score(&self, tokens: &[String]) -> Result<Vec<f32>> {
        let mut scores = vec![0.0f32; self.num_docs()];
        for hit in self.matching(tokens)? {
            let slot = scores.get_mut(hit.doc.position()).ok_or_else(|| {
                Error::IndexDesync(format!(
                    "keyword index position {} out of range",
                    hit.doc
                ))
            })?;
            *slot = hit.score;
        }
        Ok(scores)
    }

    /// The `k` best positions for `tokens` by descending score.
    ///
    /// Zero scores are dropped; equal scores keep corpus order.
    pub fn top_k(&self, tokens: &[String], k: usize) -> Result<Vec<KeywordHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let mut hits = self.matching(tokens)?;
        hits.retain(|h| h.score > 0.0);
        hits.sort_by(|a, b| {
            b.score.total_cmp(&a.score).then_with(|| a.doc.cmp(&b.doc))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Tokenize `query` and return its top `k` positions.
    pub fn search(&self, query: &str, k: usize) -> Result<Vec<KeywordHit>> {
        let tokens = self.tokenize(query)?;
        self.top_k(&tokens, k)
    }

    /// Every document matching at least one token, unordered.
    fn matching(&self, tokens: &[String]) -> Result<Vec<KeywordHit>> {
        let num_docs = self.num_docs();
        if tokens.is_empty() || num_docs == 0 {
            return Ok(Vec::new());
        }

        // One SHOULD clause per token occurrence, so a repeated query term
        // contributes once per repetition.
        let clauses: Vec<(Occur, Box<dyn Query>)> = tokens
            .iter()
            .map(|token| {
                let term = Term::from_field_text(self.fields.text, token);
                let query: Box<dyn Query> = Box::new(TermQuery::new(
                    term,
                    IndexRecordOption::WithFreqs,
                ));
                (Occur::Should, query)
            })
            .collect();
        let query = BooleanQuery::new(clauses);

        let searcher = self.reader.searcher();
        let top_docs =
            searcher.search(&query, &TopDocs::with_limit(num_docs))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher.doc(doc_address)?;
            let position = doc
                .get_first(self.fields.position)
                .and_then(|v| v.as_u64())
                .ok_or_else(|| {
                    Error::IndexDesync(format!(
                        "keyword document {} has no position",
                        extract_text(&doc, self.fields.id)
                    ))
                })?;
            hits.push(KeywordHit {
                doc: DocumentId::from_stored(position),
                score,
            });
        }

        Ok(hits)
    }

    /// Record ids in position order, as stored in the index.
    pub fn stored_ids(&self) -> Result<Vec<String>> {
        let searcher = self.reader.searcher();
        let mut ids = vec![String::new(); self.num_docs()];
        for segment_ord in 0..searcher.segment_readers().len() {
            let segment = &searcher.segment_readers()[segment_ord];
            for doc_id in segment.doc_ids_alive() {
                let address =
                    tantivy::DocAddress::new(segment_ord as u32, doc_id);
                let doc: TantivyDocument = searcher.doc(address)?;
                let position = doc
                    .get_first(self.fields.position)
                    .and_then(|v| v.as_u64())
                    .map(DocumentId::from_stored);
                let slot = position
                    .and_then(|p| ids.get_mut(p.position()))
                    .ok_or_else(|| {
                        Error::IndexDesync(
                            "keyword document with invalid position".into(),
                        )
                    })?;
                *slot = extract_text(&doc, self.fields.id);
            }
        }
        Ok(ids)
    }
}

impl std::fmt::Debug for KeywordIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeywordIndex").finish_non_exhaustive()
    }
}

fn extract_text(doc: &TantivyDocument, field: Field) -> String {
    doc.get_first(field)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, text: &str) -> Record {
        Record {
            id: id.to_string(),
            doc_id: "doc".to_string(),
            source_id: "src".to_string(),
            source_url: String::new(),
            title: String::new(),
            tags: Vec::new(),
            text: text.to_string(),
        }
    }

    fn corpus() -> Vec<Record> {
        vec![
            record("r0", "Late payments stay on your credit report"),
            record("r1", "How to file a credit report dispute"),
            record("r2", "Bake the bread at high heat"),
            record("r3", "credit cards and credit limits"),
        ]
    }

    fn tokens(idx: &KeywordIndex, q: &str) -> Vec<String> {
        idx.tokenize(q).unwrap()
    }

    #[test]
    fn tokenize_lowercases_and_splits_on_whitespace() {
        let idx = KeywordIndex::create_in_ram(&[]).unwrap();
        assert_eq!(
            tokens(&idx, "Credit  REPORT\tdispute"),
            vec!["credit", "report", "dispute"]
        );
    }

    #[test]
    fn tokenize_does_not_stem() {
        let idx = KeywordIndex::create_in_ram(&[]).unwrap();
        assert_eq!(tokens(&idx, "payments running"), vec!["payments", "running"]);
    }

    #[test]
    fn score_has_one_entry_per_position() {
        let idx = KeywordIndex::create_in_ram(&corpus()).unwrap();
        let scores = idx.score(&tokens(&idx, "credit")).unwrap();
        assert_eq!(scores.len(), 4);
        assert!(scores[0] > 0.0);
        assert!(scores[1] > 0.0);
        assert_eq!(scores[2], 0.0);
        assert!(scores[3] > 0.0);
    }

    #[test]
    fn top_k_drops_zero_scores() {
        let idx = KeywordIndex::create_in_ram(&corpus()).unwrap();
        let hits = idx.search("bread", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc.position(), 2);
    }

    #[test]
    fn top_k_ranks_best_match_first() {
        let idx = KeywordIndex::create_in_ram(&corpus()).unwrap();
        let hits = idx.search("credit report dispute", 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].doc.position(), 1);
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn top_k_ties_keep_corpus_order() {
        let records = vec![
            record("a", "alpha beta"),
            record("b", "gamma delta"),
            record("c", "alpha beta"),
            record("d", "alpha beta"),
        ];
        let idx = KeywordIndex::create_in_ram(&records).unwrap();
        let hits = idx.search("alpha", 10).unwrap();
        let positions: Vec<usize> =
            hits.iter().map(|h| h.doc.position()).collect();
        assert_eq!(positions, vec![0, 2, 3]);
    }

    #[test]
    fn no_matches_is_empty() {
        let idx = KeywordIndex::create_in_ram(&corpus()).unwrap();
        assert!(idx.search("xyzzy", 10).unwrap().is_empty());
        assert!(idx.search("", 10).unwrap().is_empty());
        assert!(idx.search("credit", 0).unwrap().is_empty());
    }

    #[test]
    fn empty_index() {
        let idx = KeywordIndex::create_in_ram(&[]).unwrap();
        assert_eq!(idx.num_docs(), 0);
        assert!(idx.search("credit", 10).unwrap().is_empty());
        assert!(idx.score(&["credit".to_string()]).unwrap().is_empty());
    }

    #[test]
    fn stored_ids_follow_positions() {
        let idx = KeywordIndex::create_in_ram(&corpus()).unwrap();
        assert_eq!(idx.stored_ids().unwrap(), vec!["r0", "r1", "r2", "r3"]);
    }

    #[test]
    fn disk_persistence() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("keyword");

        {
            let idx = KeywordIndex::create(&dir, &corpus()).unwrap();
            assert_eq!(idx.num_docs(), 4);
        }

        let idx = KeywordIndex::open(&dir).unwrap();
        assert_eq!(idx.num_docs(), 4);
        let hits = idx.search("bread", 10).unwrap();
        assert_eq!(hits[0].doc.position(), 2);
    }

    #[test]
    fn open_missing_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let err = KeywordIndex::open(&tmp.path().join("nope")).unwrap_err();
        assert!(matches!(err, Error::MissingArtifact(_)));
    }
}
