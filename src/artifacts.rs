//! On-disk layout of the index stores.
//!
//! Each build writes a complete generation:
//!
//! ```text
//! <root>/
//!   CURRENT            name of the active generation, e.g. "gen-3"
//!   gen-3/
//!     vectors.bin
//!     keyword/
//!     metadata.redb
//!   gen-4.staging/     build in progress
//! ```
//!
//! A build stages into `gen-<n>.staging`, renames it to `gen-<n>` once all
//! three stores are written, and then replaces `CURRENT` atomically.
//! Readers resolve `CURRENT` once at open time, so they always see a
//! complete, mutually consistent set.

use std::{
    io::Write,
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

use crate::error::{Error, Result};

const CURRENT_FILE: &str = "CURRENT";
const GENERATION_PREFIX: &str = "gen-";
const STAGING_SUFFIX: &str = ".staging";

const VECTORS_FILE: &str = "vectors.bin";
const KEYWORD_DIR: &str = "keyword";
const METADATA_FILE: &str = "metadata.redb";

/// Paths of the three stores inside one generation directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    generation: u64,
    dir: PathBuf,
}

impl ArtifactPaths {
    fn new(generation: u64, dir: PathBuf) -> Self {
        Self { generation, dir }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn vectors(&self) -> PathBuf {
        self.dir.join(VECTORS_FILE)
    }

    pub fn keyword(&self) -> PathBuf {
        self.dir.join(KEYWORD_DIR)
    }

    pub fn metadata(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }
}

/// The directory holding every artifact generation.
#[derive(Debug, Clone)]
pub struct ArtifactSet {
    root: PathBuf,
}

impl ArtifactSet {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The generation named by `CURRENT`, or `None` before the first build.
    pub fn current_generation(&self) -> Result<Option<u64>> {
        let pointer = self.root.join(CURRENT_FILE);
        let contents = match std::fs::read_to_string(&pointer) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        parse_generation(contents.trim()).map(Some).ok_or_else(|| {
            Error::IndexDesync(format!(
                "{} does not name a generation: '{}'",
                pointer.display(),
                contents.trim()
            ))
        })
    }

    /// Paths of the active generation.
    ///
    /// Fails with [`Error::MissingArtifact`] if nothing has been built yet
    /// or the named generation directory is gone.
    pub fn active(&self) -> Result<ArtifactPaths> {
        let generation = self
            .current_generation()?
            .ok_or_else(|| Error::MissingArtifact(self.root.join(CURRENT_FILE)))?;
        let dir = self.generation_dir(generation);
        if !dir.is_dir() {
            return Err(Error::MissingArtifact(dir));
        }
        Ok(ArtifactPaths::new(generation, dir))
    }

    /// Reserve the next generation number and create its staging
    /// directory.
    pub fn stage(&self) -> Result<Staging> {
        std::fs::create_dir_all(&self.root)?;

        let next = self
            .existing_generations()?
            .into_iter()
            .chain(self.current_generation()?)
            .max()
            .map_or(1, |n| n + 1);

        let dir = self
            .root
            .join(format!("{GENERATION_PREFIX}{next}{STAGING_SUFFIX}"));
        // create_dir (not _all) so two concurrent builds cannot share a
        // staging directory.
        std::fs::create_dir(&dir)?;
        debug!(generation = next, dir = %dir.display(), "staging generation");

        Ok(Staging {
            set: self.clone(),
            paths: ArtifactPaths::new(next, dir),
            committed: false,
        })
    }

    /// Every generation number present on disk, staged or published.
    fn existing_generations(&self) -> Result<Vec<u64>> {
        let mut generations = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else { continue };
            let name = name.strip_suffix(STAGING_SUFFIX).unwrap_or(name);
            if let Some(n) = parse_generation(name) {
                generations.push(n);
            }
        }
        Ok(generations)
    }

    /// Published generation numbers, ascending.
    pub fn generations(&self) -> Result<Vec<u64>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut generations = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(n) = entry.file_name().to_str().and_then(parse_generation)
            {
                generations.push(n);
            }
        }
        generations.sort_unstable();
        Ok(generations)
    }

    fn generation_dir(&self, generation: u64) -> PathBuf {
        self.root.join(format!("{GENERATION_PREFIX}{generation}"))
    }

    fn write_current(&self, generation: u64) -> Result<()> {
        let tmp = self.root.join(format!("{CURRENT_FILE}.tmp"));
        {
            let mut file = std::fs::File::create(&tmp)?;
            writeln!(file, "{GENERATION_PREFIX}{generation}")?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, self.root.join(CURRENT_FILE))?;

        // Persist the rename itself. Not every platform can open a
        // directory for syncing, so failure here is only logged.
        if let Err(e) =
            std::fs::File::open(&self.root).and_then(|dir| dir.sync_all())
        {
            debug!(error = %e, "could not sync index directory");
        }
        Ok(())
    }

    /// Remove published generations older than `keep`.
    fn remove_older_than(&self, keep: u64) {
        let generations = match self.generations() {
            Ok(g) => g,
            Err(e) => {
                warn!(error = %e, "could not list old generations");
                return;
            }
        };
        for generation in generations.into_iter().filter(|g| *g < keep) {
            let dir = self.generation_dir(generation);
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => debug!(generation, "removed old generation"),
                Err(e) => warn!(
                    generation,
                    error = %e,
                    "failed to remove old generation"
                ),
            }
        }
    }
}

fn parse_generation(name: &str) -> Option<u64> {
    name.strip_prefix(GENERATION_PREFIX)?.parse().ok()
}

/// A generation being written.
///
/// Dropping a `Staging` without calling [`Staging::commit`] deletes the
/// staging directory, leaving the active generation untouched.
#[derive(Debug)]
pub struct Staging {
    set: ArtifactSet,
    paths: ArtifactPaths,
    committed: bool,
}

impl Staging {
    /// Where the stores of this generation should be written.
    pub fn paths(&self) -> &ArtifactPaths {
        &self.paths
    }

    /// Publish the staged generation and make it active.
    ///
    /// All store handles writing into the staging directory must be
    /// closed before calling this. If a newer generation was published
    /// while this one was being written, the pointer is left alone, the
    /// staging directory is discarded and [`Error::Superseded`] is
    /// returned.
    pub fn commit(mut self) -> Result<ArtifactPaths> {
        let generation = self.paths.generation;
        let published = self.set.generation_dir(generation);

        if let Some(current) = self.set.current_generation()?
            && current > generation
        {
            warn!(
                staged = generation,
                current, "newer generation already published, discarding"
            );
            return Err(Error::Superseded {
                staged: generation,
                current,
            });
        }

        std::fs::rename(&self.paths.dir, &published)?;
        self.committed = true;

        self.set.write_current(generation)?;
        self.set.remove_older_than(generation);

        Ok(ArtifactPaths::new(generation, published))
    }
}

impl Drop for Staging {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.paths.dir) {
            warn!(
                dir = %self.paths.dir.display(),
                error = %e,
                "failed to remove staging directory"
            );
        }
    }
}
