use std::{
    io::Write,
    path::{Path, PathBuf},
};

use rayon::prelude::*;

use crate::{
    doc_id::DocumentId,
    error::{Error, Result},
};

const MAGIC: &[u8; 8] = b"HSVECIDX";
const FORMAT_VERSION: u32 = 1;

/// Header size: 8 bytes magic + 4 bytes version + 4 bytes dimension +
/// 8 bytes row count.
const HEADER_SIZE: usize = 24;

/// Exact (flat) L2 nearest-neighbor index over unit-normalized vectors.
///
/// Rows are append-only: row `i` is the `i`-th vector added, and its
/// [`DocumentId`] is position `i`.
///
/// File format:
/// - 8 bytes: magic `HSVECIDX`
/// - 4 bytes: format version (u32 LE)
/// - 4 bytes: dimension D (u32 LE)
/// - 8 bytes: row count N (u64 LE)
/// - N * D * 4 bytes: f32 LE values in row-major order
#[derive(Clone)]
pub struct VectorIndex {
    dimension: usize,
    data: Vec<f32>,
}

/// One nearest-neighbor hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorHit {
    pub doc: DocumentId,
    /// Euclidean (L2) distance to the query.
    pub distance: f32,
}

impl VectorHit {
    /// Cosine similarity recovered from the L2 distance between unit
    /// vectors: `1 - d² / 2`.
    pub fn similarity(&self) -> f32 {
        1.0 - (self.distance * self.distance) / 2.0
    }
}

impl VectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of stored rows.
    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append vectors in order. Nothing is appended if any vector has the
    /// wrong dimension.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<()> {
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            });
        }

        self.data.reserve(vectors.len() * self.dimension);
        for v in vectors {
            self.data.extend_from_slice(v);
        }
        Ok(())
    }

    /// Row `doc`, if it exists.
    pub fn vector(&self, doc: DocumentId) -> Option<&[f32]> {
        let start = doc.position().checked_mul(self.dimension)?;
        self.data.get(start..start + self.dimension)
    }

    /// The `k` rows closest to `query`, nearest first.
    ///
    /// Returns fewer than `k` hits when the index is smaller than `k`.
    /// Equal distances are ordered by position.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<VectorHit>> {
        if query.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits: Vec<VectorHit> = self
            .data
            .par_chunks_exact(self.dimension)
            .enumerate()
            .map(|(position, row)| VectorHit {
                doc: DocumentId::from_position(position),
                distance: squared_l2(query, row).sqrt(),
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.doc.cmp(&b.doc))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Write the index to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
        let dimension = u32::try_from(self.dimension).map_err(|_| {
            Error::Config(format!(
                "embedding dimension {} does not fit the index format",
                self.dimension
            ))
        })?;

        file.write_all(MAGIC)?;
        file.write_all(&FORMAT_VERSION.to_le_bytes())?;
        file.write_all(&dimension.to_le_bytes())?;
        file.write_all(&(self.len() as u64).to_le_bytes())?;
        file.write_all(bytemuck::cast_slice(&self.data))?;

        let file = file.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(())
    }

    /// Read an index written by [`VectorIndex::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::MissingArtifact(path.to_path_buf())
            } else {
                Error::Io(e)
            }
        })?;
        let corrupt = |reason: &str| Error::CorruptVectorIndex {
            path: PathBuf::from(path),
            reason: reason.to_string(),
        };

        if bytes.len() < HEADER_SIZE {
            return Err(corrupt("file shorter than header"));
        }
        if &bytes[0..8] != MAGIC {
            return Err(corrupt("bad magic"));
        }

        let version = u32::from_le_bytes(read_array(&bytes[8..12]));
        if version != FORMAT_VERSION {
            return Err(corrupt(&format!("unsupported version {version}")));
        }
        let dimension = u32::from_le_bytes(read_array(&bytes[12..16])) as usize;
        let count = u64::from_le_bytes(read_array(&bytes[16..24])) as usize;

        let expected_len = count
            .checked_mul(dimension)
            .and_then(|n| n.checked_mul(4))
            .and_then(|n| n.checked_add(HEADER_SIZE));
        if expected_len != Some(bytes.len()) {
            return Err(corrupt("length does not match header"));
        }
        if dimension == 0 && count > 0 {
            return Err(corrupt("rows with zero dimension"));
        }

        // The payload offset is not guaranteed to be f32-aligned, so decode
        // through a byte copy rather than a cast.
        let data: Vec<f32> = bytes[HEADER_SIZE..]
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes(read_array(c)))
            .collect();

        Ok(Self { dimension, data })
    }
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("dimension", &self.dimension)
            .field("len", &self.len())
            .finish()
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn read_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}
