#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ScanError {
    #[error("non positive oscillation width ({0} degree)")]
    NonPositiveWidth(f64),
    #[error("oscillation width mismatch: {0} degree vs {1} degree")]
    WidthMismatch(f64, f64),
    #[error("image {found} overlaps the scan ending at image {last}")]
    ImageOverlap { last: usize, found: usize },
    #[error("gap between image {last} and image {found}")]
    ImageGap { last: usize, found: usize },
    #[error("rotation starting at {found} degree overlaps the scan ending at {expected} degree")]
    AngleOverlap { expected: f64, found: f64 },
    #[error("gap in rotation: expected {expected} degree, found {found} degree")]
    AngleGap { expected: f64, found: f64 },
    #[error("first image {first} is after last image {last}")]
    InvertedRange { first: usize, last: usize },
    #[error("oscillation is not finite: ({0}, {1}) degree")]
    NonFiniteOscillation(f64, f64),
}
type Result<T> = std::result::Result<T, ScanError>;

/// Rotation scan
///
/// Images are numbered from 1 and `image_range` is inclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct Scan {
    /// first and last image numbers
    pub image_range: (usize, usize),
    /// rotation angle at the start of the first image and rotation per image [degree]
    pub oscillation: (f64, f64),
    /// exposure time of each image [s]
    pub exposure_times: Vec<f64>,
    /// start time of each image [s]
    pub epochs: Vec<f64>,
}
impl Scan {
    pub fn new(image_range: (usize, usize), oscillation: (f64, f64)) -> Self {
        let n = (image_range.1 + 1).saturating_sub(image_range.0);
        Self {
            image_range,
            oscillation,
            exposure_times: vec![0f64; n],
            epochs: vec![0f64; n],
        }
    }
    /// A single image scan without rotation
    pub fn still(image: usize) -> Self {
        Self::new((image, image), (0., 0.))
    }
    pub fn exposure_times(self, exposure_times: Vec<f64>) -> Self {
        Self {
            exposure_times,
            ..self
        }
    }
    pub fn epochs(self, epochs: Vec<f64>) -> Self {
        Self { epochs, ..self }
    }
    /// Number of images, 0 if the image range is inverted
    pub fn num_images(&self) -> usize {
        (self.image_range.1 + 1).saturating_sub(self.image_range.0)
    }
    pub fn oscillation_width(&self) -> f64 {
        self.oscillation.1
    }
    pub fn is_still(&self) -> bool {
        self.oscillation.1 == 0.
    }
    /// Rotation angles at the start of the first image and at the end of the last image
    pub fn oscillation_range(&self) -> (f64, f64) {
        let (start, width) = self.oscillation;
        (start, start + width * self.num_images() as f64)
    }
    /// The single image scan of the image at `offset` from the first image
    pub fn image(&self, offset: usize) -> Option<Self> {
        if offset >= self.num_images() {
            return None;
        }
        let (start, width) = self.oscillation;
        let image = self.image_range.0 + offset;
        Some(Self {
            image_range: (image, image),
            oscillation: (start + width * offset as f64, width),
            exposure_times: self.exposure_times.get(offset).copied().into_iter().collect(),
            epochs: self.epochs.get(offset).copied().into_iter().collect(),
        })
    }
    /// Checks that the image range is ordered and the oscillation finite
    pub fn validate(&self) -> Result<()> {
        let (first, last) = self.image_range;
        if first > last {
            return Err(ScanError::InvertedRange { first, last });
        }
        let (start, width) = self.oscillation;
        if !(start.is_finite() && width.is_finite()) {
            return Err(ScanError::NonFiniteOscillation(start, width));
        }
        Ok(())
    }
    /// Checks that the scan is a valid rotation: [Scan::validate] and a positive width
    pub fn check_rotation(&self) -> Result<()> {
        self.validate()?;
        let width = self.oscillation.1;
        if width <= 0. {
            return Err(ScanError::NonPositiveWidth(width));
        }
        Ok(())
    }
    /// Appends `other` to the end of the scan
    ///
    /// `other` must start on the image following the last image of the scan and at
    /// the rotation angle where the scan ends, with the same oscillation width.
    pub fn append(&mut self, other: &Scan) -> Result<()> {
        let width = self.oscillation.1;
        if !(width > 0.) {
            return Err(ScanError::NonPositiveWidth(width));
        }
        let tolerance = 1e-6 * width;
        if (other.oscillation.1 - width).abs() > tolerance {
            return Err(ScanError::WidthMismatch(width, other.oscillation.1));
        }
        let last = self.image_range.1;
        let found = other.image_range.0;
        if found <= last {
            return Err(ScanError::ImageOverlap { last, found });
        }
        if found > last + 1 {
            return Err(ScanError::ImageGap { last, found });
        }
        let expected = self.oscillation_range().1;
        let found = other.oscillation.0;
        if found < expected - tolerance {
            return Err(ScanError::AngleOverlap { expected, found });
        }
        if found > expected + tolerance {
            return Err(ScanError::AngleGap { expected, found });
        }
        self.image_range.1 = other.image_range.1;
        self.exposure_times.extend_from_slice(&other.exposure_times);
        self.epochs.extend_from_slice(&other.epochs);
        Ok(())
    }
}
