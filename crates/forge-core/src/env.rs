//! Build environment — the filesystem anchor for a build.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Subtree under the root that receives final rule outputs.
pub const OUT_DIR_NAME: &str = "build-out";
/// Subtree under the root that receives generated intermediates.
pub const GEN_DIR_NAME: &str = "build-gen";
/// Subtree reserved for cache-key-indexed artifacts.
pub const CACHE_DIR_NAME: &str = ".build-cache";

/// Root path plus opaque options; all path resolution in a build is anchored
/// here. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct BuildEnvironment {
    root_path: PathBuf,
    options: HashMap<String, String>,
}

impl BuildEnvironment {
    pub fn new(root_path: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root_path.into(),
            options: HashMap::new(),
        }
    }

    pub fn with_options(root_path: impl Into<PathBuf>, options: HashMap<String, String>) -> Self {
        Self {
            root_path: root_path.into(),
            options,
        }
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// `<root>/build-out`
    pub fn out_root(&self) -> PathBuf {
        self.root_path.join(OUT_DIR_NAME)
    }

    /// `<root>/build-gen`
    pub fn gen_root(&self) -> PathBuf {
        self.root_path.join(GEN_DIR_NAME)
    }

    /// `<root>/.build-cache`
    pub fn cache_root(&self) -> PathBuf {
        self.root_path.join(CACHE_DIR_NAME)
    }
}
