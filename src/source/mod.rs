//! Frame sources
//!
//! A [FrameSource] gives access to the pixel data and to the acquisition models
//! of every frame of a file or of an in-memory buffer.
//! A [SourceAdapter] knows how to open a given format from a path,
//! and the [SourceCache] keeps one opened source per path.

use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use crate::models::{Beam, Detector, FormatParams, Goniometer, Scan};

pub mod manifest;
pub mod memory;
pub use manifest::{read_npy, ManifestAdapter, ManifestSource};
pub use memory::{MemoryAdapter, MemoryFrame, MemorySource};

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("failed to read {1}")]
    Io(#[source] io::Error, String),
    #[error("invalid manifest")]
    Csv(#[from] csv::Error),
    #[error("failed to decode pixel data from {1}")]
    Npy(#[source] io::Error, String),
    #[error("frame {index} has {found} pixels, expected {expected}")]
    PixelCount {
        index: usize,
        expected: usize,
        found: usize,
    },
    #[error("frame {index} is out of range, the source has {num_frames} frames")]
    FrameIndex { index: usize, num_frames: usize },
    #[error("manifest {0} has no frame")]
    EmptyManifest(String),
    #[error("source cache lock is poisoned")]
    Poisoned,
}
pub type Result<T> = std::result::Result<T, SourceError>;

/// Per-frame access to pixel data and acquisition models
///
/// Sources are read-only once opened: every accessor takes `&self`
/// so a source can be shared between collections and threads.
pub trait FrameSource: Send + Sync {
    /// Source name, the file path for file backed sources
    fn name(&self) -> String;
    fn num_frames(&self) -> usize;
    fn beam(&self, index: usize) -> Option<Beam>;
    fn detector(&self, index: usize) -> Option<Detector>;
    fn goniometer(&self, index: usize) -> Option<Goniometer>;
    fn scan(&self, index: usize) -> Option<Scan>;
    fn raw_data(&self, index: usize) -> Result<Vec<i32>>;
    /// Pixel mask, `true` for valid pixels
    ///
    /// Defaults to the detector trusted range applied to the raw data.
    fn mask(&self, index: usize, _goniometer: Option<&Goniometer>) -> Result<Option<Vec<bool>>> {
        match self.detector(index) {
            Some(detector) => Ok(Some(detector.trusted_mask(&self.raw_data(index)?))),
            None => Ok(None),
        }
    }
}

/// Opens frame sources of a given format
pub trait SourceAdapter: Send + Sync {
    /// Vendor or format tag
    fn vendor(&self) -> String;
    fn open(&self, path: &Path, params: &FormatParams) -> Result<Arc<dyn FrameSource>>;
}

/// Opened sources, one per path
#[derive(Default)]
pub struct SourceCache {
    sources: Mutex<HashMap<PathBuf, Arc<dyn FrameSource>>>,
}
impl SourceCache {
    pub fn new() -> Self {
        Default::default()
    }
    /// Returns the source opened from `path`, opening it with `adapter` the first time
    pub fn get_or_open(
        &self,
        adapter: &dyn SourceAdapter,
        path: &Path,
        params: &FormatParams,
    ) -> Result<Arc<dyn FrameSource>> {
        let mut sources = self.sources.lock().map_err(|_| SourceError::Poisoned)?;
        if let Some(source) = sources.get(path) {
            return Ok(Arc::clone(source));
        }
        log::debug!("opening {:?} with the {} adapter", path, adapter.vendor());
        let source = adapter.open(path, params)?;
        sources.insert(path.to_path_buf(), Arc::clone(&source));
        Ok(source)
    }
    pub fn len(&self) -> usize {
        self.sources.lock().map(|s| s.len()).unwrap_or_default()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
