//! Image collections
//!
//! An [ImageCollection] binds an ordered list of frame indices to a [FrameSource]
//! together with the acquisition models of the frames:
//! one shared set of models for a sweep or one set per frame for stills.

use std::{collections::BTreeMap, fmt, sync::Arc};

use itertools::Itertools;

use crate::{
    error::{Error, Result},
    models::{Beam, Detector, FormatParams, Goniometer, ModelKind, OpticalModels, Scan},
    source::FrameSource,
};

mod factory;
pub use factory::{BuildOptions, ImageSetFactory, ModelSlot};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigurationError {
    #[error("the frame source has no frame")]
    EmptySource,
    #[error("the list of frame indices is empty")]
    EmptyIndices,
    #[error("frame index {index} is out of range, the source has {num_frames} frames")]
    IndexOutOfRange { index: usize, num_frames: usize },
    #[error("non-sequential indices: a sweep requires contiguous and increasing frame indices")]
    NonSequentialIndices,
    #[error("failed to merge the frame scans into a sweep")]
    ScanMerge(#[from] crate::models::ScanError),
    #[error("invalid scan")]
    InvalidScan(#[source] crate::models::ScanError),
    #[error("frame {index} of the sweep has no scan")]
    MissingScan { index: usize },
    #[error("the {model} of frame {index} is already assigned")]
    AlreadyAssigned { model: ModelKind, index: usize },
    #[error("the sweep scan has {found} images, expected {expected}")]
    ScanLength { expected: usize, found: usize },
}

/// Checks that all frame indices are within `[0,num_frames)`
pub(crate) fn check_indices(indices: &[usize], num_frames: usize) -> Result<()> {
    if indices.is_empty() {
        return Err(ConfigurationError::EmptyIndices.into());
    }
    if let Some(&index) = indices.iter().find(|&&i| i >= num_frames) {
        return Err(ConfigurationError::IndexOutOfRange { index, num_frames }.into());
    }
    Ok(())
}

/// Checks that the frame indices are contiguous and increasing
pub(crate) fn check_sequential(indices: &[usize]) -> Result<()> {
    if indices.iter().tuple_windows().all(|(a, b)| *b == a + 1) {
        Ok(())
    } else {
        Err(ConfigurationError::NonSequentialIndices.into())
    }
}

/// Image collection metadata value
#[derive(Debug, Clone, PartialEq)]
pub enum Property {
    Text(String),
    Params(FormatParams),
}
impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Property::Text(text) => write!(f, "{}", text),
            Property::Params(params) => write!(
                f,
                "{{{}}}",
                params.iter().map(|(k, v)| format!("{k}: {v}")).join(", ")
            ),
        }
    }
}
pub type Properties = BTreeMap<String, Property>;

/// The complete set of models of a frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameModels<'a> {
    pub beam: &'a Beam,
    pub detector: &'a Detector,
    pub goniometer: &'a Goniometer,
    pub scan: Scan,
}

#[derive(Debug, Clone)]
enum Models {
    Sweep(OpticalModels),
    Stills(Vec<OpticalModels>),
}

/// A sweep or a set of stills
#[derive(Clone)]
pub struct ImageCollection {
    source: Arc<dyn FrameSource>,
    indices: Vec<usize>,
    models: Models,
    properties: Properties,
}
impl fmt::Debug for ImageCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageCollection")
            .field("source", &self.source.name())
            .field("indices", &self.indices)
            .field("models", &self.models)
            .field("properties", &self.properties)
            .finish()
    }
}
impl ImageCollection {
    pub(crate) fn sweep(
        source: Arc<dyn FrameSource>,
        indices: Vec<usize>,
        models: OpticalModels,
        properties: Properties,
    ) -> Self {
        Self {
            source,
            indices,
            models: Models::Sweep(models),
            properties,
        }
    }
    pub(crate) fn stills(
        source: Arc<dyn FrameSource>,
        indices: Vec<usize>,
        properties: Properties,
    ) -> Self {
        let n = indices.len();
        Self {
            source,
            indices,
            models: Models::Stills(vec![OpticalModels::default(); n]),
            properties,
        }
    }
    pub fn len(&self) -> usize {
        self.indices.len()
    }
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
    pub fn is_sweep(&self) -> bool {
        matches!(self.models, Models::Sweep(_))
    }
    /// Source frame indices
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }
    pub fn source(&self) -> &Arc<dyn FrameSource> {
        &self.source
    }
    pub fn properties(&self) -> &Properties {
        &self.properties
    }
    fn check_index(&self, index: usize) -> Result<()> {
        if index < self.len() {
            Ok(())
        } else {
            Err(ConfigurationError::IndexOutOfRange {
                index,
                num_frames: self.len(),
            }
            .into())
        }
    }
    fn models(&self, index: usize) -> Option<&OpticalModels> {
        match &self.models {
            Models::Sweep(models) => (index < self.len()).then_some(models),
            Models::Stills(models) => models.get(index),
        }
    }
    fn models_mut(&mut self, index: usize) -> Result<&mut OpticalModels> {
        self.check_index(index)?;
        Ok(match &mut self.models {
            Models::Sweep(models) => models,
            Models::Stills(models) => &mut models[index],
        })
    }
    pub fn beam(&self, index: usize) -> Option<&Beam> {
        self.models(index).and_then(|m| m.beam.as_ref())
    }
    pub fn detector(&self, index: usize) -> Option<&Detector> {
        self.models(index).and_then(|m| m.detector.as_ref())
    }
    pub fn goniometer(&self, index: usize) -> Option<&Goniometer> {
        self.models(index).and_then(|m| m.goniometer.as_ref())
    }
    /// The scan of a single frame
    ///
    /// For a sweep, this is the image of the merged scan at `index`
    pub fn scan(&self, index: usize) -> Option<Scan> {
        match &self.models {
            Models::Sweep(models) => models.scan.as_ref().and_then(|s| s.image(index)),
            Models::Stills(models) => models.get(index).and_then(|m| m.scan.clone()),
        }
    }
    /// The scan of the whole sweep
    pub fn merged_scan(&self) -> Option<&Scan> {
        match &self.models {
            Models::Sweep(models) => models.scan.as_ref(),
            Models::Stills(_) => None,
        }
    }
    pub fn set_beam(&mut self, beam: Beam, index: usize) -> Result<()> {
        let slot = &mut self.models_mut(index)?.beam;
        assign(slot, beam, ModelKind::Beam, index)
    }
    pub fn set_detector(&mut self, detector: Detector, index: usize) -> Result<()> {
        let slot = &mut self.models_mut(index)?.detector;
        assign(slot, detector, ModelKind::Detector, index)
    }
    pub fn set_goniometer(&mut self, goniometer: Goniometer, index: usize) -> Result<()> {
        let slot = &mut self.models_mut(index)?.goniometer;
        assign(slot, goniometer, ModelKind::Goniometer, index)
    }
    /// Sets the scan of a frame or, for a sweep, the scan of the whole sweep
    pub fn set_scan(&mut self, scan: Scan, index: usize) -> Result<()> {
        if self.is_sweep() && scan.num_images() != self.len() {
            return Err(ConfigurationError::ScanLength {
                expected: self.len(),
                found: scan.num_images(),
            }
            .into());
        }
        let slot = &mut self.models_mut(index)?.scan;
        assign(slot, scan, ModelKind::Scan, index)
    }
    /// Returns all the models of a frame or an error naming the first missing one
    pub fn require_models(&self, index: usize) -> Result<FrameModels<'_>> {
        self.check_index(index)?;
        let missing = |model| Error::IncompleteModel { index, model };
        Ok(FrameModels {
            beam: self.beam(index).ok_or_else(|| missing(ModelKind::Beam))?,
            detector: self
                .detector(index)
                .ok_or_else(|| missing(ModelKind::Detector))?,
            goniometer: self
                .goniometer(index)
                .ok_or_else(|| missing(ModelKind::Goniometer))?,
            scan: self.scan(index).ok_or_else(|| missing(ModelKind::Scan))?,
        })
    }
    /// Checks that every frame has a complete set of models
    pub fn check_complete(&self) -> Result<()> {
        (0..self.len()).try_for_each(|i| self.require_models(i).map(|_| ()))
    }
    pub fn reader(&self) -> Reader {
        Reader {
            source: Arc::clone(&self.source),
            indices: self.indices.clone(),
        }
    }
    pub fn masker(&self) -> Masker {
        Masker {
            source: Arc::clone(&self.source),
            indices: self.indices.clone(),
        }
    }
    /// Pixel data of a frame
    pub fn raw_data(&self, index: usize) -> Result<Vec<i32>> {
        self.reader().read(index)
    }
    /// Pixel mask of a frame, using the frame goniometer
    pub fn mask(&self, index: usize) -> Result<Option<Vec<bool>>> {
        self.masker().get(index, self.goniometer(index))
    }
    pub fn summary(&self) {
        println!("SUMMARY:");
        println!(" - source: {}", self.source.name());
        println!(
            " - type: {}",
            if self.is_sweep() { "sweep" } else { "stills" }
        );
        println!(" - # of frames: {}", self.len());
        if let Some(scan) = self.merged_scan() {
            println!(" - images: {:?}", scan.image_range);
            println!(" - rotation: {:.3?} degree", scan.oscillation_range());
        }
        let wavelengths: Vec<f64> = (0..self.len())
            .filter_map(|i| self.beam(i).map(|b| b.wavelength))
            .collect();
        match wavelengths.iter().minmax_by(|a, b| a.total_cmp(b)) {
            itertools::MinMaxResult::MinMax(lo, hi) => {
                println!(" - wavelength: [{:.4}-{:.4}]A", lo, hi)
            }
            itertools::MinMaxResult::OneElement(w) => println!(" - wavelength: {:.4}A", w),
            itertools::MinMaxResult::NoElements => (),
        }
        println!(" - properties:");
        self.properties
            .iter()
            .for_each(|(key, value)| println!("  - {:10}: {}", key, value));
    }
}

fn assign<T>(slot: &mut Option<T>, model: T, kind: ModelKind, index: usize) -> Result<()> {
    match slot {
        Some(_) => Err(ConfigurationError::AlreadyAssigned { model: kind, index }.into()),
        None => {
            *slot = Some(model);
            Ok(())
        }
    }
}

/// Reads the pixel data of the frames of a collection
#[derive(Clone)]
pub struct Reader {
    source: Arc<dyn FrameSource>,
    indices: Vec<usize>,
}
impl Reader {
    /// A reader of the frames `indices` of `source`, all frames if `indices` is `None`
    pub fn new(source: Arc<dyn FrameSource>, indices: Option<Vec<usize>>) -> Result<Self> {
        let num_frames = source.num_frames();
        let indices = match indices {
            Some(indices) => {
                check_indices(&indices, num_frames)?;
                indices
            }
            None => (0..num_frames).collect(),
        };
        Ok(Self { source, indices })
    }
    fn source_index(&self, index: usize) -> Result<usize> {
        self.indices.get(index).copied().ok_or_else(|| {
            ConfigurationError::IndexOutOfRange {
                index,
                num_frames: self.indices.len(),
            }
            .into()
        })
    }
    pub fn read(&self, index: usize) -> Result<Vec<i32>> {
        Ok(self.source.raw_data(self.source_index(index)?)?)
    }
    pub fn paths(&self) -> Vec<String> {
        vec![self.source.name()]
    }
    /// Number of frames in the source
    pub fn num_images(&self) -> usize {
        self.source.num_frames()
    }
    pub fn len(&self) -> usize {
        self.indices.len()
    }
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
    /// Unique frame identifiers: `<source>-<index>`
    pub fn identifiers(&self) -> Vec<String> {
        let name = self.source.name();
        self.indices
            .iter()
            .map(|index| format!("{}-{}", name, index))
            .collect()
    }
}

/// Reads the pixel masks of the frames of a collection
#[derive(Clone)]
pub struct Masker {
    source: Arc<dyn FrameSource>,
    indices: Vec<usize>,
}
impl Masker {
    pub fn get(&self, index: usize, goniometer: Option<&Goniometer>) -> Result<Option<Vec<bool>>> {
        let source_index =
            self.indices
                .get(index)
                .copied()
                .ok_or(ConfigurationError::IndexOutOfRange {
                    index,
                    num_frames: self.indices.len(),
                })?;
        Ok(self.source.mask(source_index, goniometer)?)
    }
    pub fn paths(&self) -> Vec<String> {
        vec![self.source.name()]
    }
    pub fn len(&self) -> usize {
        self.indices.len()
    }
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}
