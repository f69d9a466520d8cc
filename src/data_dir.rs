//! Location of everything hybridseek keeps on disk.
//!
//! ```text
//! <data_dir>/
//!   config.redb          persisted settings
//!   index/
//!     CURRENT            name of the active generation
//!     gen-<n>/           published artifacts (vectors.bin, keyword/, metadata.redb)
//!     gen-<n>.staging/   a build in progress
//! ```

use std::path::{Path, PathBuf};

use crate::{
    artifacts::ArtifactSet,
    error::{Error, Result},
};

pub const DATA_DIR_ENV: &str = "HYBRIDSEEK_DATA_DIR";

const CONFIG_DB_FILE: &str = "config.redb";
const INDEX_DIR: &str = "index";

#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the data directory from, in order of priority:
    /// 1. An explicit path (from --data-dir)
    /// 2. The HYBRIDSEEK_DATA_DIR environment variable
    /// 3. The XDG data directory (~/.local/share/hybridseek/)
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        Self::resolve_with(explicit, |key| std::env::var(key).ok())
    }

    /// Like [`DataDir::resolve`], reading the environment through `env`.
    /// A blank variable counts as unset.
    pub fn resolve_with(
        explicit: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let from_env = env(DATA_DIR_ENV).filter(|v| !v.trim().is_empty());
        let root = match (explicit, from_env) {
            (Some(path), _) => path.to_path_buf(),
            (None, Some(val)) => PathBuf::from(val),
            (None, None) => xdg::BaseDirectories::with_prefix("hybridseek")
                .get_data_home()
                .ok_or_else(|| {
                    Error::Config(
                        "could not determine XDG data home directory".into(),
                    )
                })?,
        };

        if root.exists() && !root.is_dir() {
            return Err(Error::DataDir(root));
        }
        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_db(&self) -> PathBuf {
        self.root.join(CONFIG_DB_FILE)
    }

    /// Root of the index generations.
    pub fn index_dir(&self) -> PathBuf {
        self.root.join(INDEX_DIR)
    }

    /// The generation set under [`DataDir::index_dir`]. Nothing is created
    /// until the first build stages a generation.
    pub fn artifacts(&self) -> ArtifactSet {
        ArtifactSet::new(self.index_dir())
    }
}
