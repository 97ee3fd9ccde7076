use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use super::{FrameSource, Result, SourceAdapter, SourceError};
use crate::models::{Beam, Detector, FormatParams, Goniometer, Scan};

/// A frame held in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryFrame {
    pub data: Vec<i32>,
    pub beam: Option<Beam>,
    pub detector: Option<Detector>,
    pub goniometer: Option<Goniometer>,
    pub scan: Option<Scan>,
}
impl MemoryFrame {
    pub fn new(data: Vec<i32>) -> Self {
        Self {
            data,
            ..Default::default()
        }
    }
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
}

/// Frames held in memory
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    frames: Vec<MemoryFrame>,
}
impl Default for MemorySource {
    fn default() -> Self {
        Self {
            name: String::from("memory"),
            frames: Vec::new(),
        }
    }
}
impl MemorySource {
    pub fn named<S: Into<String>>(self, name: S) -> Self {
        Self {
            name: name.into(),
            ..self
        }
    }
    pub fn frame(mut self, frame: MemoryFrame) -> Self {
        self.frames.push(frame);
        self
    }
    /// `n` still frames of blank pixels sharing the same beam and detector
    pub fn stills(n: usize, wavelength: f64, detector: Detector) -> Self {
        (0..n)
            .map(|i| {
                MemoryFrame::new(vec![0; detector.n_pixels()])
                    .beam(Beam::new(wavelength))
                    .detector(detector.clone())
                    .goniometer(Goniometer::default())
                    .scan(Scan::still(i + 1))
            })
            .collect()
    }
    /// `n` contiguous rotation frames of blank pixels
    pub fn sweep(n: usize, oscillation: (f64, f64), wavelength: f64, detector: Detector) -> Self {
        let (start, width) = oscillation;
        (0..n)
            .map(|i| {
                MemoryFrame::new(vec![0; detector.n_pixels()])
                    .beam(Beam::new(wavelength))
                    .detector(detector.clone())
                    .goniometer(Goniometer::default())
                    .scan(Scan::new((i + 1, i + 1), (start + width * i as f64, width)))
            })
            .collect()
    }
    fn get(&self, index: usize) -> Option<&MemoryFrame> {
        self.frames.get(index)
    }
}
impl FromIterator<MemoryFrame> for MemorySource {
    fn from_iter<T: IntoIterator<Item = MemoryFrame>>(iter: T) -> Self {
        Self {
            frames: iter.into_iter().collect(),
            ..Default::default()
        }
    }
}
impl FrameSource for MemorySource {
    fn name(&self) -> String {
        self.name.clone()
    }
    fn num_frames(&self) -> usize {
        self.frames.len()
    }
    fn beam(&self, index: usize) -> Option<Beam> {
        self.get(index).and_then(|f| f.beam.clone())
    }
    fn detector(&self, index: usize) -> Option<Detector> {
        self.get(index).and_then(|f| f.detector.clone())
    }
    fn goniometer(&self, index: usize) -> Option<Goniometer> {
        self.get(index).and_then(|f| f.goniometer.clone())
    }
    fn scan(&self, index: usize) -> Option<Scan> {
        self.get(index).and_then(|f| f.scan.clone())
    }
    fn raw_data(&self, index: usize) -> Result<Vec<i32>> {
        self.get(index)
            .map(|f| f.data.clone())
            .ok_or(SourceError::FrameIndex {
                index,
                num_frames: self.num_frames(),
            })
    }
}

/// Hands out in-memory sources registered under a path
#[derive(Default)]
pub struct MemoryAdapter {
    vendor: String,
    sources: HashMap<PathBuf, Arc<MemorySource>>,
}
impl MemoryAdapter {
    pub fn new<S: Into<String>>(vendor: S) -> Self {
        Self {
            vendor: vendor.into(),
            ..Default::default()
        }
    }
    pub fn register<P: Into<PathBuf>>(mut self, path: P, source: MemorySource) -> Self {
        self.sources.insert(path.into(), Arc::new(source));
        self
    }
}
impl SourceAdapter for MemoryAdapter {
    fn vendor(&self) -> String {
        self.vendor.clone()
    }
    fn open(&self, path: &Path, _params: &FormatParams) -> Result<Arc<dyn FrameSource>> {
        match self.sources.get(path) {
            Some(source) => Ok(Arc::clone(source) as Arc<dyn FrameSource>),
            None => Err(SourceError::Io(
                io::Error::new(io::ErrorKind::NotFound, "no in-memory source"),
                path.to_string_lossy().into_owned(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_frames() {
        let detector = Detector::new(150., (0.1, 0.1), (2, 3));
        let source = MemorySource::sweep(3, (5., 0.5), 1.2, detector);
        assert_eq!(source.num_frames(), 3);
        let scan = source.scan(2).unwrap();
        assert_eq!(scan.image_range, (3, 3));
        assert_eq!(scan.oscillation, (6., 0.5));
        assert_eq!(source.raw_data(1).unwrap().len(), 6);
        assert!(matches!(
            source.raw_data(3),
            Err(SourceError::FrameIndex { index: 3, .. })
        ));
        assert!(source.beam(3).is_none());
    }

    #[test]
    fn registered_sources() {
        let adapter = MemoryAdapter::new("cspad").register(
            "run-1",
            MemorySource::stills(2, 1., Detector::new(150., (0.1, 0.1), (2, 2))),
        );
        let params = FormatParams::new();
        assert_eq!(adapter.vendor(), "cspad");
        assert_eq!(
            adapter
                .open(Path::new("run-1"), &params)
                .unwrap()
                .num_frames(),
            2
        );
        assert!(adapter.open(Path::new("run-2"), &params).is_err());
    }
}
