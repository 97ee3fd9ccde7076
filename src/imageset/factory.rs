use std::{path::Path, sync::Arc};

use super::{
    check_indices, check_sequential, ConfigurationError, ImageCollection, Properties, Property,
};
use crate::{
    error::{Error, Result},
    models::{Beam, Detector, FormatParams, Goniometer, OpticalModels, Scan},
    source::{FrameSource, SourceAdapter, SourceCache},
};

/// A model either given by the caller or to be read from the frame source
#[derive(Debug, Clone, PartialEq)]
pub enum ModelSlot<T> {
    Resolved(T),
    NeedsLookup,
}
impl<T> From<Option<T>> for ModelSlot<T> {
    fn from(model: Option<T>) -> Self {
        match model {
            Some(model) => ModelSlot::Resolved(model),
            None => ModelSlot::NeedsLookup,
        }
    }
}
impl<T: Clone> ModelSlot<T> {
    pub fn is_resolved(&self) -> bool {
        matches!(self, ModelSlot::Resolved(_))
    }
    /// Returns the resolved model or the one given by `lookup`
    fn resolve<F>(&self, lookup: F) -> Option<T>
    where
        F: FnOnce() -> Option<T>,
    {
        match self {
            ModelSlot::Resolved(model) => Some(model.clone()),
            ModelSlot::NeedsLookup => lookup(),
        }
    }
}

struct Slots {
    beam: ModelSlot<Beam>,
    detector: ModelSlot<Detector>,
    goniometer: ModelSlot<Goniometer>,
    scan: ModelSlot<Scan>,
}
impl From<OpticalModels> for Slots {
    fn from(models: OpticalModels) -> Self {
        Self {
            beam: models.beam.into(),
            detector: models.detector.into(),
            goniometer: models.goniometer.into(),
            scan: models.scan.into(),
        }
    }
}
impl Slots {
    fn n_lookups(&self) -> usize {
        [
            self.beam.is_resolved(),
            self.detector.is_resolved(),
            self.goniometer.is_resolved(),
            self.scan.is_resolved(),
        ]
        .into_iter()
        .filter(|resolved| !resolved)
        .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Classification {
    Sweep,
    StillSet,
}

/// Image collection build options
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    sweep_as_imageset: bool,
    params: FormatParams,
}
impl BuildOptions {
    /// Assembles sweeps as sets of stills
    pub fn sweep_as_imageset(self, sweep_as_imageset: bool) -> Self {
        Self {
            sweep_as_imageset,
            ..self
        }
    }
    /// Format keyword arguments passed to the source adapter
    pub fn params(self, params: FormatParams) -> Self {
        Self { params, ..self }
    }
}

/// Builds [ImageCollection]s from frame sources
///
/// The factory holds the adapter used to open sources from paths and caches the
/// opened sources, one per path.
pub struct ImageSetFactory {
    adapter: Arc<dyn SourceAdapter>,
    cache: SourceCache,
}
impl ImageSetFactory {
    pub fn new<A: SourceAdapter + 'static>(adapter: A) -> Self {
        Self {
            adapter: Arc::new(adapter),
            cache: SourceCache::new(),
        }
    }
    pub fn cache(&self) -> &SourceCache {
        &self.cache
    }
    /// Opens (once) the source at `path` and builds a collection from it
    pub fn build_from_path<P: AsRef<Path>>(
        &self,
        path: P,
        supplied: OpticalModels,
        indices: Option<&[usize]>,
        options: &BuildOptions,
    ) -> Result<ImageCollection> {
        let source = self
            .cache
            .get_or_open(self.adapter.as_ref(), path.as_ref(), &options.params)?;
        self.build(source, supplied, indices, options)
    }
    /// Builds a sweep or a set of stills from the frames `indices` of `source`
    ///
    /// All frames are used if `indices` is `None`.
    /// The models not given in `supplied` are read from the source.
    /// The frames are a sweep if the scan, supplied or read from frame 0,
    /// has a non-zero oscillation width. A sweep must rotate by a positive width.
    pub fn build(
        &self,
        source: Arc<dyn FrameSource>,
        supplied: OpticalModels,
        indices: Option<&[usize]>,
        options: &BuildOptions,
    ) -> Result<ImageCollection> {
        let num_frames = source.num_frames();
        if num_frames == 0 {
            return Err(ConfigurationError::EmptySource.into());
        }
        let indices: Vec<usize> = match indices {
            Some(indices) => {
                check_indices(indices, num_frames)?;
                indices.to_vec()
            }
            None => (0..num_frames).collect(),
        };

        let slots = Slots::from(supplied);
        let classification = match slots.scan.resolve(|| source.scan(0)) {
            Some(scan) => {
                scan.validate().map_err(ConfigurationError::InvalidScan)?;
                if scan.is_still() {
                    Classification::StillSet
                } else {
                    Classification::Sweep
                }
            }
            None => Classification::StillSet,
        };
        log::debug!(
            "{} classified as {:?} ({} model(s) to look up)",
            source.name(),
            classification,
            slots.n_lookups()
        );

        let mut properties = Properties::new();
        properties.insert("vendor".into(), Property::Text(self.adapter.vendor()));
        properties.insert("params".into(), Property::Params(options.params.clone()));

        let collection = match classification {
            Classification::Sweep if !options.sweep_as_imageset => {
                properties.insert("template".into(), Property::Text(source.name()));
                build_sweep(Arc::clone(&source), &slots, indices, properties)?
            }
            _ => build_stills(Arc::clone(&source), &slots, indices, properties)?,
        };

        let found = source.num_frames();
        if found != num_frames {
            return Err(Error::SourceInconsistency {
                expected: num_frames,
                found,
            });
        }
        log::info!(
            "Built {} with {} frames from {}",
            if collection.is_sweep() {
                "a sweep"
            } else {
                "a set of stills"
            },
            collection.len(),
            source.name()
        );
        Ok(collection)
    }
}

fn build_sweep(
    source: Arc<dyn FrameSource>,
    slots: &Slots,
    indices: Vec<usize>,
    properties: Properties,
) -> Result<ImageCollection> {
    check_sequential(&indices)?;
    let first = indices[0];
    let scan = match &slots.scan {
        ModelSlot::Resolved(scan) => {
            scan.check_rotation().map_err(ConfigurationError::InvalidScan)?;
            if scan.num_images() != indices.len() {
                return Err(ConfigurationError::ScanLength {
                    expected: indices.len(),
                    found: scan.num_images(),
                }
                .into());
            }
            scan.clone()
        }
        ModelSlot::NeedsLookup => merge_scans(source.as_ref(), &indices)?,
    };
    let models = OpticalModels {
        beam: slots.beam.resolve(|| source.beam(first)),
        detector: slots.detector.resolve(|| source.detector(first)),
        goniometer: slots.goniometer.resolve(|| source.goniometer(first)),
        scan: Some(scan),
    };
    Ok(ImageCollection::sweep(source, indices, models, properties))
}

/// Concatenates the scans of the frames `indices` in order
fn merge_scans(source: &dyn FrameSource, indices: &[usize]) -> Result<Scan> {
    let mut scans = indices
        .iter()
        .map(|&index| source.scan(index).ok_or(ConfigurationError::MissingScan { index }));
    let mut merged = match scans.next() {
        Some(scan) => scan?,
        None => return Err(ConfigurationError::EmptyIndices.into()),
    };
    merged.check_rotation().map_err(ConfigurationError::InvalidScan)?;
    for scan in scans {
        let scan = scan?;
        scan.validate().map_err(ConfigurationError::InvalidScan)?;
        merged.append(&scan).map_err(ConfigurationError::from)?;
    }
    Ok(merged)
}

fn build_stills(
    source: Arc<dyn FrameSource>,
    slots: &Slots,
    indices: Vec<usize>,
    properties: Properties,
) -> Result<ImageCollection> {
    let mut collection = ImageCollection::stills(Arc::clone(&source), indices.clone(), properties);
    for (k, &index) in indices.iter().enumerate() {
        log::debug!("resolving the models of frame #{}", index);
        if let Some(beam) = slots.beam.resolve(|| source.beam(index)) {
            collection.set_beam(beam, k)?;
        }
        if let Some(detector) = slots.detector.resolve(|| source.detector(index)) {
            collection.set_detector(detector, k)?;
        }
        if let Some(goniometer) = slots.goniometer.resolve(|| source.goniometer(index)) {
            collection.set_goniometer(goniometer, k)?;
        }
        if let Some(scan) = slots.scan.resolve(|| source.scan(index)) {
            collection.set_scan(scan, k)?;
        }
    }
    Ok(collection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{ModelKind, ScanError},
        source::{ManifestAdapter, MemoryFrame, MemorySource, SourceError},
    };
    use rand::Rng;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn detector() -> Detector {
        Detector::new(100., (0.1, 0.1), (2, 2))
    }

    /// Counts the calls to the model accessors of the wrapped source
    #[derive(Default)]
    struct Counting {
        source: MemorySource,
        calls: [AtomicUsize; 4],
        num_frames_calls: AtomicUsize,
        drift: bool,
    }
    impl Counting {
        fn new(source: MemorySource) -> Arc<Self> {
            Arc::new(Self {
                source,
                ..Default::default()
            })
        }
        fn calls(&self, kind: ModelKind) -> usize {
            self.calls[kind as usize].load(Ordering::SeqCst)
        }
        fn count(&self, kind: ModelKind) {
            self.calls[kind as usize].fetch_add(1, Ordering::SeqCst);
        }
    }
    impl FrameSource for Counting {
        fn name(&self) -> String {
            self.source.name()
        }
        fn num_frames(&self) -> usize {
            let n = self.num_frames_calls.fetch_add(1, Ordering::SeqCst);
            if self.drift && n > 0 {
                self.source.num_frames() + 1
            } else {
                self.source.num_frames()
            }
        }
        fn beam(&self, index: usize) -> Option<Beam> {
            self.count(ModelKind::Beam);
            self.source.beam(index)
        }
        fn detector(&self, index: usize) -> Option<Detector> {
            self.count(ModelKind::Detector);
            self.source.detector(index)
        }
        fn goniometer(&self, index: usize) -> Option<Goniometer> {
            self.count(ModelKind::Goniometer);
            self.source.goniometer(index)
        }
        fn scan(&self, index: usize) -> Option<Scan> {
            self.count(ModelKind::Scan);
            self.source.scan(index)
        }
        fn raw_data(&self, index: usize) -> std::result::Result<Vec<i32>, SourceError> {
            self.source.raw_data(index)
        }
    }

    fn factory() -> ImageSetFactory {
        ImageSetFactory::new(ManifestAdapter)
    }

    #[test]
    fn zero_width_scans_are_stills() {
        let source = Arc::new(MemorySource::stills(4, 1.3, detector()));
        let iset = factory()
            .build(source.clone(), OpticalModels::default(), None, &BuildOptions::default())
            .unwrap();
        assert!(!iset.is_sweep());
        assert_eq!(iset.len(), 4);
        assert!(iset.merged_scan().is_none());
        for i in 0..4 {
            assert_eq!(iset.beam(i), source.beam(i).as_ref());
            assert_eq!(iset.scan(i), source.scan(i));
        }
        assert!(iset.check_complete().is_ok());
        assert!(!iset.properties().contains_key("template"));
    }

    #[test]
    fn five_frame_sweep() {
        let source = Arc::new(MemorySource::sweep(5, (0., 1.), 1., detector()).named("sweep"));
        let iset = factory()
            .build(source, OpticalModels::default(), None, &BuildOptions::default())
            .unwrap();
        assert!(iset.is_sweep());
        assert_eq!(iset.len(), 5);
        let scan = iset.merged_scan().unwrap();
        assert_eq!(scan.image_range, (1, 5));
        assert_eq!(scan.oscillation_range(), (0., 5.));
        assert_eq!(iset.scan(3).unwrap().oscillation, (3., 1.));
        assert_eq!(
            iset.properties().get("template"),
            Some(&Property::Text("sweep".into()))
        );
        assert_eq!(
            iset.properties().get("vendor"),
            Some(&Property::Text("manifest".into()))
        );
    }

    #[test]
    fn random_sweeps() {
        let mut rng = rand::thread_rng();
        for _ in 0..20 {
            let n = rng.gen_range(1..30);
            let start = rng.gen_range(-180f64..180f64);
            let width = rng.gen_range(0.01f64..2f64);
            let source = Arc::new(MemorySource::sweep(n, (start, width), 1., detector()));
            let iset = factory()
                .build(source, OpticalModels::default(), None, &BuildOptions::default())
                .unwrap();
            assert!(iset.is_sweep());
            let scan = iset.merged_scan().unwrap();
            assert_eq!(scan.num_images(), n);
            let starts: Vec<f64> = (0..n).map(|i| iset.scan(i).unwrap().oscillation.0).collect();
            assert!(starts.windows(2).all(|w| w[1] > w[0]));
        }
    }

    #[test]
    fn supplied_models_bypass_lookups() {
        let source = Counting::new(MemorySource::stills(3, 1., detector()));
        let supplied = OpticalModels::default()
            .beam(Beam::new(0.9))
            .detector(detector())
            .goniometer(Goniometer::default())
            .scan(Scan::still(1));
        let iset = factory()
            .build(source.clone(), supplied, None, &BuildOptions::default())
            .unwrap();
        assert!(!iset.is_sweep());
        assert_eq!(iset.beam(2).unwrap().wavelength, 0.9);
        use strum::IntoEnumIterator;
        for kind in ModelKind::iter() {
            assert_eq!(source.calls(kind), 0, "{kind} was looked up");
        }

        let source = Counting::new(MemorySource::sweep(3, (0., 1.), 1., detector()));
        let supplied = OpticalModels::default()
            .beam(Beam::new(0.9))
            .detector(detector())
            .goniometer(Goniometer::default())
            .scan(Scan::new((1, 3), (10., 0.5)));
        let iset = factory()
            .build(source.clone(), supplied, None, &BuildOptions::default())
            .unwrap();
        assert!(iset.is_sweep());
        assert_eq!(iset.merged_scan().unwrap().oscillation, (10., 0.5));
        for kind in ModelKind::iter() {
            assert_eq!(source.calls(kind), 0, "{kind} was looked up");
        }
    }

    #[test]
    fn stills_without_scan() {
        let source = Counting::new(
            (0..3)
                .map(|i| {
                    MemoryFrame::new(vec![i; 4])
                        .beam(Beam::new(1. + i as f64 / 10.))
                        .detector(detector())
                })
                .collect(),
        );
        let iset = factory()
            .build(source.clone(), OpticalModels::default(), None, &BuildOptions::default())
            .unwrap();
        assert!(!iset.is_sweep());
        assert_eq!(iset.len(), 3);
        assert_eq!(source.calls(ModelKind::Beam), 3);
        assert_eq!(source.calls(ModelKind::Detector), 3);
        assert_eq!(source.calls(ModelKind::Goniometer), 3);
        // classification + one per frame
        assert_eq!(source.calls(ModelKind::Scan), 4);
        assert!(matches!(
            iset.check_complete(),
            Err(Error::IncompleteModel {
                index: 0,
                model: ModelKind::Goniometer
            })
        ));
    }

    #[test]
    fn non_contiguous_sweep_indices() {
        let source = Arc::new(MemorySource::sweep(6, (0., 1.), 1., detector()));
        let err = factory()
            .build(
                source.clone(),
                OpticalModels::default(),
                Some(&[0, 2, 4][..]),
                &BuildOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::NonSequentialIndices)
        ));
        let iset = factory()
            .build(
                source,
                OpticalModels::default(),
                Some(&[0, 2, 4][..]),
                &BuildOptions::default().sweep_as_imageset(true),
            )
            .unwrap();
        assert!(!iset.is_sweep());
        assert_eq!(iset.len(), 3);
    }

    #[test]
    fn restricted_sweep() {
        let source = Arc::new(MemorySource::sweep(6, (0., 1.), 1., detector()));
        let iset = factory()
            .build(
                source,
                OpticalModels::default(),
                Some(&[1, 2, 3][..]),
                &BuildOptions::default(),
            )
            .unwrap();
        assert_eq!(iset.len(), 3);
        assert_eq!(iset.merged_scan().unwrap().image_range, (2, 4));
        assert_eq!(iset.reader().identifiers()[0], "memory-1");
    }

    #[test]
    fn round_trip() {
        let source: Arc<MemorySource> = Arc::new(
            (0..4)
                .map(|i| {
                    MemoryFrame::new(vec![i; 4])
                        .beam(Beam::new(1. + i as f64))
                        .detector(detector())
                        .goniometer(Goniometer::default())
                })
                .collect(),
        );
        let iset = factory()
            .build(
                source.clone(),
                OpticalModels::default(),
                Some(&[3, 0, 2][..]),
                &BuildOptions::default(),
            )
            .unwrap();
        assert_eq!(iset.len(), 3);
        for (k, &index) in [3usize, 0, 2].iter().enumerate() {
            assert_eq!(iset.beam(k), source.beam(index).as_ref());
            assert_eq!(iset.detector(k), source.detector(index).as_ref());
            assert_eq!(iset.raw_data(k).unwrap(), source.raw_data(index).unwrap());
        }
        assert_eq!(iset.mask(0).unwrap(), Some(vec![true; 4]));
    }

    #[test]
    fn invalid_requests() {
        let source = Arc::new(MemorySource::stills(2, 1., detector()));
        assert!(matches!(
            factory().build(
                source.clone(),
                OpticalModels::default(),
                Some(&[0, 2][..]),
                &BuildOptions::default()
            ),
            Err(Error::Configuration(ConfigurationError::IndexOutOfRange {
                index: 2,
                num_frames: 2
            }))
        ));
        assert!(matches!(
            factory().build(
                Arc::new(MemorySource::default()),
                OpticalModels::default(),
                None,
                &BuildOptions::default()
            ),
            Err(Error::Configuration(ConfigurationError::EmptySource))
        ));
    }

    #[test]
    fn inconsistent_frame_count() {
        let source = Arc::new(Counting {
            source: MemorySource::stills(2, 1., detector()),
            drift: true,
            ..Default::default()
        });
        assert!(matches!(
            factory().build(source, OpticalModels::default(), None, &BuildOptions::default()),
            Err(Error::SourceInconsistency {
                expected: 2,
                found: 3
            })
        ));
    }

    #[test]
    fn overlapping_scans() {
        let source: Arc<MemorySource> = Arc::new(
            [(0., 1.), (1., 1.), (1.5, 1.)]
                .into_iter()
                .enumerate()
                .map(|(i, oscillation)| {
                    MemoryFrame::new(vec![0; 4]).scan(Scan::new((i + 1, i + 1), oscillation))
                })
                .collect(),
        );
        assert!(matches!(
            factory().build(source, OpticalModels::default(), None, &BuildOptions::default()),
            Err(Error::Configuration(ConfigurationError::ScanMerge(_)))
        ));
    }

    fn build_sweep_of(n: usize, width: f64) -> Result<ImageCollection> {
        let source = Arc::new(MemorySource::sweep(n, (0., width), 1., detector()));
        factory().build(source, OpticalModels::default(), None, &BuildOptions::default())
    }

    #[test]
    fn single_frame_sweep() {
        let iset = build_sweep_of(1, 0.5).unwrap();
        assert!(iset.is_sweep());
        assert_eq!(iset.len(), 1);
        let scan = iset.merged_scan().unwrap();
        assert_eq!(scan.image_range, (1, 1));
        assert_eq!(scan.oscillation_range(), (0., 0.5));
    }

    #[test]
    fn sweep_widths() {
        for n in [1, 2] {
            assert!(
                matches!(
                    build_sweep_of(n, -1.),
                    Err(Error::Configuration(ConfigurationError::InvalidScan(
                        ScanError::NonPositiveWidth(w)
                    ))) if w == -1.
                ),
                "{n} frame(s) with a negative width"
            );
            assert!(
                matches!(
                    build_sweep_of(n, f64::NAN),
                    Err(Error::Configuration(ConfigurationError::InvalidScan(
                        ScanError::NonFiniteOscillation(..)
                    )))
                ),
                "{n} frame(s) with a NaN width"
            );
            assert!(matches!(
                build_sweep_of(n, f64::INFINITY),
                Err(Error::Configuration(ConfigurationError::InvalidScan(_)))
            ));
        }

        let source = Arc::new(MemorySource::sweep(3, (0., 1.), 1., detector()));
        assert!(matches!(
            factory().build(
                source,
                OpticalModels::default().scan(Scan::new((1, 3), (0., -0.5))),
                None,
                &BuildOptions::default()
            ),
            Err(Error::Configuration(ConfigurationError::InvalidScan(
                ScanError::NonPositiveWidth(_)
            )))
        ));
    }

    #[test]
    fn inverted_supplied_scan() {
        let source = Arc::new(MemorySource::sweep(3, (0., 1.), 1., detector()));
        let scan = Scan {
            image_range: (3, 1),
            ..Scan::new((1, 3), (0., 1.))
        };
        assert!(matches!(
            factory().build(
                source,
                OpticalModels::default().scan(scan),
                None,
                &BuildOptions::default()
            ),
            Err(Error::Configuration(ConfigurationError::InvalidScan(
                ScanError::InvertedRange { first: 3, last: 1 }
            )))
        ));
    }

    #[test]
    fn supplied_scan_length() {
        let source = Arc::new(MemorySource::sweep(4, (0., 1.), 1., detector()));
        assert!(matches!(
            factory().build(
                source,
                OpticalModels::default().scan(Scan::new((1, 3), (0., 1.))),
                None,
                &BuildOptions::default()
            ),
            Err(Error::Configuration(ConfigurationError::ScanLength {
                expected: 4,
                found: 3
            }))
        ));
    }

    #[test]
    fn sweep_frame_without_scan() {
        let source: Arc<MemorySource> = Arc::new(
            (0..3)
                .map(|i| {
                    let frame = MemoryFrame::new(vec![0; 4]);
                    if i == 2 {
                        frame
                    } else {
                        frame.scan(Scan::new((i + 1, i + 1), (i as f64, 1.)))
                    }
                })
                .collect(),
        );
        assert!(matches!(
            factory().build(source, OpticalModels::default(), None, &BuildOptions::default()),
            Err(Error::Configuration(ConfigurationError::MissingScan { index: 2 }))
        ));
    }

    #[test]
    fn from_path() {
        let dir = std::env::temp_dir().join("imageset-factory-factory");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("sweep.csv");
        std::fs::write(
            &path,
            "wavelength,distance,pixel_size,nx,ny,phi_start,phi_width,exposure,epoch,data
0.98,200,0.1,3,3,0,0.2,0.05,0,
0.98,200,0.1,3,3,0.2,0.2,0.05,0.05,
",
        )
        .unwrap();
        let factory = factory();
        let mut params = FormatParams::new();
        params.insert("gain".into(), "1.0".into());
        let options = BuildOptions::default().params(params.clone());
        let iset = factory
            .build_from_path(&path, OpticalModels::default(), None, &options)
            .unwrap();
        assert!(iset.is_sweep());
        assert_eq!(iset.len(), 2);
        assert_eq!(iset.properties().get("params"), Some(&Property::Params(params)));
        let stills = factory
            .build_from_path(
                &path,
                OpticalModels::default(),
                Some(&[1][..]),
                &options.sweep_as_imageset(true),
            )
            .unwrap();
        assert!(!stills.is_sweep());
        assert_eq!(factory.cache().len(), 1);
    }
}
