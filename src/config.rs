//! Runtime configuration, built the way the reference wrapper builds an
//! `Environment`: a small builder struct with chainable setters and a
//! terminal constructor, rather than a bag of positional arguments.

use std::path::{Path, PathBuf};

// Memory-mapped, so a generous reservation costs no physical memory up
// front -- 1 TiB of address space on 64-bit targets, the most a 32-bit
// address space can spare (1 << 40 overflows `usize` there) on 32-bit.
#[cfg(target_pointer_width = "64")]
const DEFAULT_MAP_SIZE: usize = 1 << 40;
#[cfg(not(target_pointer_width = "64"))]
const DEFAULT_MAP_SIZE: usize = 1 << 30;
const DEFAULT_YIELD_EVERY: usize = 1000;

/// Configuration for an [`crate::runtime::NdsRuntime`].
///
/// Constructed with [`NdsConfigBuilder`]; see [`NdsConfig::builder`].
#[derive(Debug, Clone)]
pub struct NdsConfig {
    pub(crate) root: PathBuf,
    pub(crate) snapshot_root: PathBuf,
    pub(crate) num_dbs: u32,
    pub(crate) map_size: usize,
    pub(crate) yield_every: usize,
}

impl NdsConfig {
    pub fn builder<P: Into<PathBuf>>(root: P) -> NdsConfigBuilder {
        NdsConfigBuilder::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn snapshot_root(&self) -> &Path {
        &self.snapshot_root
    }

    pub fn num_dbs(&self) -> u32 {
        self.num_dbs
    }

    pub fn yield_every(&self) -> usize {
        self.yield_every
    }
}

/// Builder for [`NdsConfig`]. Defaults: a `./snapshot` sibling directory,
/// a 1 TiB map size reservation, 8 logical DBs, and a yield granularity
/// of 1000 keys per walker step.
pub struct NdsConfigBuilder {
    root: PathBuf,
    snapshot_root: Option<PathBuf>,
    num_dbs: u32,
    map_size: usize,
    yield_every: usize,
}

impl NdsConfigBuilder {
    pub fn new<P: Into<PathBuf>>(root: P) -> NdsConfigBuilder {
        NdsConfigBuilder {
            root: root.into(),
            snapshot_root: None,
            num_dbs: 8,
            map_size: DEFAULT_MAP_SIZE,
            yield_every: DEFAULT_YIELD_EVERY,
        }
    }

    pub fn snapshot_root<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.snapshot_root = Some(path.into());
        self
    }

    pub fn num_dbs(mut self, n: u32) -> Self {
        self.num_dbs = n;
        self
    }

    pub fn map_size(mut self, bytes: usize) -> Self {
        self.map_size = bytes;
        self
    }

    /// Keys walked between yield-callback invocations. Clamped to at
    /// least 1: zero would turn the walker's `% yield_every()` into a
    /// divide-by-zero on the first key.
    pub fn yield_every(mut self, n: usize) -> Self {
        self.yield_every = n.max(1);
        self
    }

    pub fn build(self) -> NdsConfig {
        let NdsConfigBuilder { root, snapshot_root, num_dbs, map_size, yield_every } = self;
        let snapshot_root = snapshot_root.unwrap_or_else(|| root.join("snapshot"));
        NdsConfig {
            root,
            snapshot_root,
            num_dbs,
            map_size,
            yield_every,
        }
    }
}
