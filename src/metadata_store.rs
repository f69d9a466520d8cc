use std::{collections::HashSet, path::Path};

use redb::{
    Database,
    MultimapTableDefinition,
    ReadOnlyDatabase,
    ReadableDatabase,
    ReadableTable,
    ReadableTableMetadata,
    TableDefinition,
};
use serde::{Deserialize, Serialize};

use crate::{
    doc_id::DocumentId,
    error::{Error, Result},
    record::Record,
};

const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("records");
const ORDER: TableDefinition<u64, &str> = TableDefinition::new("order");
const SOURCES: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("sources");
const MANIFEST: TableDefinition<&str, &str> = TableDefinition::new("manifest");

mod manifest_keys {
    pub const DIMENSION: &str = "dimension";
    pub const EMBEDDING_MODEL: &str = "embedding_model";
    pub const RECORD_COUNT: &str = "record_count";
    pub const BUILT_AT: &str = "built_at";
}

/// Per-record metadata returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRow {
    pub source_id: String,
    pub doc_id: String,
    pub source_url: String,
    pub title: String,
    pub text: String,
}

impl From<&Record> for MetadataRow {
    fn from(record: &Record) -> Self {
        Self {
            source_id: record.source_id.clone(),
            doc_id: record.doc_id.clone(),
            source_url: record.source_url.clone(),
            title: record.title.clone(),
            text: record.text.clone(),
        }
    }
}

/// Facts about the build that produced an artifact generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub dimension: usize,
    pub embedding_model: String,
    pub record_count: usize,
    /// Seconds since the Unix epoch.
    pub built_at: u64,
}

/// Record metadata keyed by record id, plus the insertion order.
///
/// Tables:
/// - `records`: id → JSON-encoded [`MetadataRow`]
/// - `order`: position → id
/// - `sources`: source_id → ids (multimap)
/// - `manifest`: build facts
///
/// Written once by [`MetadataStore::create`] and read-only afterwards. The
/// file is held with a shared lock, so any number of processes can serve
/// the same generation. Every read opens its own transaction.
pub struct MetadataStore {
    db: ReadOnlyDatabase,
}

impl MetadataStore {
    /// Create a new store at `path` holding `records` in order.
    pub fn create(
        path: &Path,
        records: &[Record],
        manifest: &Manifest,
    ) -> Result<Self> {
        let db = Database::create(path)?;
        Self::write(&db, records, manifest)?;
        drop(db);

        Self::open(path)
    }

    fn write(
        db: &Database,
        records: &[Record],
        manifest: &Manifest,
    ) -> Result<()> {
        let txn = db.begin_write()?;
        {
            let mut rows = txn.open_table(RECORDS)?;
            let mut order = txn.open_table(ORDER)?;
            let mut sources = txn.open_multimap_table(SOURCES)?;

            for (position, record) in records.iter().enumerate() {
                let bytes = serde_json::to_vec(&MetadataRow::from(record))?;
                rows.insert(record.id.as_str(), bytes.as_slice())?;
                order.insert(
                    DocumentId::from_position(position).as_u64(),
                    record.id.as_str(),
                )?;
                sources
                    .insert(record.source_id.as_str(), record.id.as_str())?;
            }

            let mut meta = txn.open_table(MANIFEST)?;
            meta.insert(
                manifest_keys::DIMENSION,
                manifest.dimension.to_string().as_str(),
            )?;
            meta.insert(
                manifest_keys::EMBEDDING_MODEL,
                manifest.embedding_model.as_str(),
            )?;
            meta.insert(
                manifest_keys::RECORD_COUNT,
                manifest.record_count.to_string().as_str(),
            )?;
            meta.insert(
                manifest_keys::BUILT_AT,
                manifest.built_at.to_string().as_str(),
            )?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Open an existing store. A missing file is a [`Error::MissingArtifact`].
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::MissingArtifact(path.to_path_buf()));
        }
        let db = ReadOnlyDatabase::open(path)?;

        // Fail now rather than on the first query if a table is missing.
        let txn = db.begin_read()?;
        txn.open_table(RECORDS)?;
        txn.open_table(ORDER)?;
        txn.open_multimap_table(SOURCES)?;
        txn.open_table(MANIFEST)?;
        drop(txn);

        Ok(Self { db })
    }

    /// Metadata for `id`, or [`Error::NotFound`].
    pub fn lookup(&self, id: &str) -> Result<MetadataRow> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(RECORDS)?;
        let guard = table.get(id)?.ok_or_else(|| Error::NotFound {
            kind: "record",
            name: id.to_string(),
        })?;
        Ok(serde_json::from_slice(guard.value())?)
    }

    /// Ids of every record whose `source_id` equals `source_id`.
    pub fn filter_ids(&self, source_id: &str) -> Result<HashSet<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_multimap_table(SOURCES)?;
        let mut ids = HashSet::new();
        for entry in table.get(source_id)? {
            ids.insert(entry?.value().to_string());
        }
        Ok(ids)
    }

    /// Record ids in insertion order.
    ///
    /// Fails with [`Error::IndexDesync`] if the stored positions are not
    /// exactly `0..count`.
    pub fn ordered_ids(&self) -> Result<Vec<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ORDER)?;
        let mut ids = Vec::new();
        for entry in table.iter()? {
            let (position, id) = entry?;
            if position.value() != ids.len() as u64 {
                return Err(Error::IndexDesync(format!(
                    "metadata order has a gap at position {}",
                    ids.len()
                )));
            }
            ids.push(id.value().to_string());
        }
        Ok(ids)
    }

    /// Number of stored records.
    pub fn count(&self) -> Result<usize> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(RECORDS)?;
        Ok(table.len()? as usize)
    }

    pub fn manifest(&self) -> Result<Manifest> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(MANIFEST)?;

        let get = |key: &str| -> Result<String> {
            table
                .get(key)?
                .map(|v| v.value().to_string())
                .ok_or_else(|| Error::NotFound {
                    kind: "manifest entry",
                    name: key.to_string(),
                })
        };
        let number = |key: &str| -> Result<u64> {
            get(key)?.parse().map_err(|_| {
                Error::IndexDesync(format!("manifest entry {key} is not a number"))
            })
        };

        Ok(Manifest {
            dimension: number(manifest_keys::DIMENSION)? as usize,
            embedding_model: get(manifest_keys::EMBEDDING_MODEL)?,
            record_count: number(manifest_keys::RECORD_COUNT)? as usize,
            built_at: number(manifest_keys::BUILT_AT)?,
        })
    }
}

impl std::fmt::Debug for MetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataStore").finish_non_exhaustive()
    }
}
