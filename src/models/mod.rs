//! Acquisition geometry models
//!
//! A frame is described by a beam, a detector, a goniometer and a scan.
//! The four of them together make an [OpticalModels] set.

use nalgebra::Vector3;
use std::{collections::BTreeMap, fmt};
use strum_macros::EnumIter;

mod scan;
pub use scan::{Scan, ScanError};

/// Format keyword arguments handed to a source adapter
pub type FormatParams = BTreeMap<String, String>;

/// X-ray beam
#[derive(Debug, Clone, PartialEq)]
pub struct Beam {
    /// wavelength [Å]
    pub wavelength: f64,
    /// unit vector pointing from the sample toward the source
    pub direction: Vector3<f64>,
}
impl Beam {
    /// A beam of the given wavelength along the conventional `-z` incident direction
    pub fn new(wavelength: f64) -> Self {
        Self {
            wavelength,
            direction: Vector3::new(0., 0., 1.),
        }
    }
    /// Photon energy [eV]
    pub fn energy(&self) -> f64 {
        12398.419843320026 / self.wavelength
    }
}

/// Single panel detector
#[derive(Debug, Clone, PartialEq)]
pub struct Detector {
    /// sample to detector distance [mm]
    pub distance: f64,
    /// fast and slow pixel size [mm]
    pub pixel_size: (f64, f64),
    /// fast and slow number of pixels
    pub image_size: (usize, usize),
    /// pixel values outside this range are not trusted
    pub trusted_range: (f64, f64),
}
impl Detector {
    pub fn new(distance: f64, pixel_size: (f64, f64), image_size: (usize, usize)) -> Self {
        Self {
            distance,
            pixel_size,
            image_size,
            trusted_range: (0., f64::INFINITY),
        }
    }
    pub fn trusted_range(self, trusted_range: (f64, f64)) -> Self {
        Self {
            trusted_range,
            ..self
        }
    }
    /// Total number of pixels
    pub fn n_pixels(&self) -> usize {
        self.image_size.0 * self.image_size.1
    }
    /// Flags the pixels which values are within the trusted range
    pub fn trusted_mask(&self, data: &[i32]) -> Vec<bool> {
        let (lo, hi) = self.trusted_range;
        data.iter()
            .map(|&v| {
                let v = v as f64;
                v >= lo && v <= hi
            })
            .collect()
    }
}

/// Single axis goniometer
#[derive(Debug, Clone, PartialEq)]
pub struct Goniometer {
    pub rotation_axis: Vector3<f64>,
}
impl Default for Goniometer {
    fn default() -> Self {
        Self {
            rotation_axis: Vector3::x(),
        }
    }
}
impl Goniometer {
    pub fn new(rotation_axis: Vector3<f64>) -> Self {
        Self {
            rotation_axis: rotation_axis.normalize(),
        }
    }
}

/// The four acquisition models
#[derive(EnumIter, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Beam,
    Detector,
    Goniometer,
    Scan,
}
impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::Beam => write!(f, "beam"),
            ModelKind::Detector => write!(f, "detector"),
            ModelKind::Goniometer => write!(f, "goniometer"),
            ModelKind::Scan => write!(f, "scan"),
        }
    }
}

/// Beam, detector, goniometer and scan, any of them possibly unset
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpticalModels {
    pub beam: Option<Beam>,
    pub detector: Option<Detector>,
    pub goniometer: Option<Goniometer>,
    pub scan: Option<Scan>,
}
impl OpticalModels {
    pub fn beam(self, beam: Beam) -> Self {
        Self {
            beam: Some(beam),
            ..self
        }
    }
    pub fn detector(self, detector: Detector) -> Self {
        Self {
            detector: Some(detector),
            ..self
        }
    }
    pub fn goniometer(self, goniometer: Goniometer) -> Self {
        Self {
            goniometer: Some(goniometer),
            ..self
        }
    }
    pub fn scan(self, scan: Scan) -> Self {
        Self {
            scan: Some(scan),
            ..self
        }
    }
    /// Checks whether the model of a given kind is set
    pub fn has(&self, kind: ModelKind) -> bool {
        match kind {
            ModelKind::Beam => self.beam.is_some(),
            ModelKind::Detector => self.detector.is_some(),
            ModelKind::Goniometer => self.goniometer.is_some(),
            ModelKind::Scan => self.scan.is_some(),
        }
    }
    /// Returns the first model kind that is not set, if any
    pub fn missing(&self) -> Option<ModelKind> {
        use strum::IntoEnumIterator;
        ModelKind::iter().find(|&kind| !self.has(kind))
    }
    pub fn is_complete(&self) -> bool {
        self.missing().is_none()
    }
}
