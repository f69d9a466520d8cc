use std::collections::HashMap;

use crate::error::{Error, Result};

/// A positional document identifier shared by every index store.
///
/// Position `i` names the `i`-th record of a build: row `i` of the vector
/// index, the keyword-index document tagged with `i`, and entry `i` of the
/// metadata store's ordered id list. Values are only minted by the builder
/// and by the stores while decoding their own rows, so a `DocumentId` can
/// never come from zipping independently ordered lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentId(u64);

impl DocumentId {
    pub(crate) fn from_position(position: usize) -> Self {
        Self(position as u64)
    }

    pub(crate) fn from_stored(position: u64) -> Self {
        Self(position)
    }

    /// Zero-based position in insertion order.
    pub fn position(self) -> usize {
        self.0 as usize
    }

    pub(crate) fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// The position → record id mapping of one artifact generation.
///
/// Loaded from the metadata store's ordered id list; every position
/// surfaced by the vector or keyword index is translated through it.
#[derive(Debug, Clone, Default)]
pub struct IdMap {
    ids: Vec<String>,
    positions: HashMap<String, DocumentId>,
}

impl IdMap {
    /// Build the map from ids in insertion order, rejecting duplicates.
    pub(crate) fn from_ordered(ids: Vec<String>) -> Result<Self> {
        let mut positions = HashMap::with_capacity(ids.len());
        for (position, id) in ids.iter().enumerate() {
            if positions
                .insert(id.clone(), DocumentId::from_position(position))
                .is_some()
            {
                return Err(Error::IndexDesync(format!(
                    "record id '{id}' appears more than once in the ordered id list"
                )));
            }
        }
        Ok(Self { ids, positions })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// The record id stored at `doc`, or `None` if the position is out of
    /// range for this generation.
    pub fn record_id(&self, doc: DocumentId) -> Option<&str> {
        self.ids.get(doc.position()).map(String::as_str)
    }

    pub fn document_id(&self, record_id: &str) -> Option<DocumentId> {
        self.positions.get(record_id).copied()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn position_roundtrip() {
        let doc = DocumentId::from_position(42);
        assert_eq!(doc.position(), 42);
        assert_eq!(doc.as_u64(), 42);
        assert_eq!(DocumentId::from_stored(42), doc);
    }

    #[test]
    fn display_has_at_prefix() {
        assert_eq!(DocumentId::from_position(7).to_string(), "@7");
    }

    #[test]
    fn id_map_translates_both_ways() {
        let map = IdMap::from_ordered(ids(&["a", "b", "c"])).unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map.record_id(DocumentId::from_position(1)), Some("b"));
        assert_eq!(map.document_id("c"), Some(DocumentId::from_position(2)));
        assert_eq!(map.record_id(DocumentId::from_position(3)), None);
        assert_eq!(map.document_id("zzz"), None);
    }

    #[test]
    fn id_map_rejects_duplicates() {
        let err = IdMap::from_ordered(ids(&["a", "b", "a"])).unwrap_err();
        assert!(matches!(err, Error::IndexDesync(_)));
    }

    #[test]
    fn empty_map() {
        let map = IdMap::from_ordered(Vec::new()).unwrap();
        assert!(map.is_empty());
    }
}
