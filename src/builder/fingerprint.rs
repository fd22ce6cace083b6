//! Persistent fingerprints for change detection.
//!
//! Each target gets one flat file under `<cache root>/targets/`, named by
//! a hex encoding of the target name (injective and filesystem-safe) and
//! holding the hex-printed digest of the target's last known state.
//!
//! A target's digest folds in, in sorted prerequisite-name order, each
//! prerequisite's *stored* digest, making it a function of the last-known
//! state of the whole transitive graph rather than just direct inputs.
//! External input files (paths that are not registered targets) contribute
//! cheap metadata (mtime, size) instead of content hashes; registered
//! targets contribute a fixed marker, since their own staleness is already
//! captured by their stored digest chain.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::Context;

use crate::core::graph::BuildGraph;
use crate::error::BuildResult;
use crate::util::hash::Hasher;

/// On-disk key→digest store, one entry per target name.
#[derive(Debug, Clone)]
pub struct FingerprintStore {
    root: PathBuf,
    targets_dir: PathBuf,
}

impl FingerprintStore {
    /// Create a store rooted at `root`. No directories are created until
    /// [`prepare`](Self::prepare) runs.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let targets_dir = root.join("targets");
        FingerprintStore { root, targets_dir }
    }

    /// The cache root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the cache directories. Idempotent.
    pub fn prepare(&self) -> BuildResult<()> {
        fs::create_dir_all(&self.targets_dir).with_context(|| {
            format!(
                "cache directory is not available: {}",
                self.targets_dir.display()
            )
        })?;
        Ok(())
    }

    fn entry_path(&self, name: &str) -> PathBuf {
        self.targets_dir.join(hex::encode(name.as_bytes()))
    }

    /// The stored digest for a name, or `None` if no fingerprinting pass
    /// ever completed for it. `None` compares unequal to every real
    /// digest.
    pub fn stored(&self, name: &str) -> Option<String> {
        let text = fs::read_to_string(self.entry_path(name)).ok()?;
        let digest = text.trim().to_string();
        if digest.is_empty() {
            None
        } else {
            Some(digest)
        }
    }

    /// Persist the digest for a name.
    pub fn save(&self, name: &str, digest: &str) -> BuildResult<()> {
        let path = self.entry_path(name);
        fs::write(&path, digest)
            .with_context(|| format!("failed to write fingerprint: {}", path.display()))?;
        Ok(())
    }

    /// Whether the store holds an entry for this name.
    pub fn has_entry(&self, name: &str) -> bool {
        self.entry_path(name).is_file()
    }

    /// Compute the combined digest for a target.
    ///
    /// `prereqs` must be the resolved flat prerequisite set; being a
    /// `BTreeSet` it is iterated in sorted order, so the digest is
    /// independent of dependency declaration order.
    pub fn compute(
        &self,
        graph: &BuildGraph,
        prereqs: &BTreeSet<String>,
        name: &str,
        phony: bool,
    ) -> String {
        let mut hasher = Hasher::new();

        if phony {
            hasher.update_str("phony@");
            hasher.update_str(name);
        } else {
            hasher.update_str("fs@");
            hasher.update_str(name);
            match fs::metadata(name) {
                Ok(meta) => {
                    if graph.contains(name) {
                        // The target's own stored digest chain already
                        // captures its staleness; mixing in mtime would
                        // double-count and trip on coarse clocks.
                        hasher.update_str("target@");
                    } else {
                        if let Ok(modified) = meta.modified() {
                            if let Ok(elapsed) = modified.duration_since(UNIX_EPOCH) {
                                hasher.update_u64(elapsed.as_secs());
                                hasher.update_u64(u64::from(elapsed.subsec_nanos()));
                            }
                        }
                        hasher.update_u64(meta.len());
                    }
                }
                Err(_) => {
                    hasher.update_str("unknown@");
                }
            }
        }

        for prereq in prereqs {
            hasher.update_str("+");
            hasher.update_str(prereq);
            if let Some(digest) = self.stored(prereq) {
                hasher.update_str(&digest);
            }
        }

        hasher.finish()
    }
}
