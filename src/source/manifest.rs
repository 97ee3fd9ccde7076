use std::{
    fs::{self, File},
    io::{BufReader, Read},
    path::{Path, PathBuf},
    sync::Arc,
};

use bzip2::bufread::BzDecoder;
use serde::Deserialize;

use super::{FrameSource, Result, SourceAdapter, SourceError};
use crate::models::{Beam, Detector, FormatParams, Goniometer, Scan};

/// A frame description, one per manifest row
#[derive(Deserialize, Debug, Clone, PartialEq)]
struct Row {
    /// [Å]
    wavelength: f64,
    /// [mm]
    distance: f64,
    /// [mm]
    pixel_size: f64,
    nx: usize,
    ny: usize,
    #[serde(default)]
    phi_start: Option<f64>,
    #[serde(default)]
    phi_width: Option<f64>,
    #[serde(default)]
    exposure: Option<f64>,
    #[serde(default)]
    epoch: Option<f64>,
    /// path to a `.npy` pixel array, relative to the manifest
    #[serde(default)]
    data: Option<String>,
}

/// Frames described by a CSV manifest
///
/// The manifest has the columns
/// `wavelength,distance,pixel_size,nx,ny,phi_start,phi_width,exposure,epoch,data`,
/// the last 5 being optional.
/// A frame without `phi_width` has no scan.
/// Manifests with the `.bz2` extension are decompressed on loading.
#[derive(Debug)]
pub struct ManifestSource {
    path: PathBuf,
    rows: Vec<Row>,
}
impl ManifestSource {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = if path.extension().map_or(false, |ext| ext == "bz2") {
            Self::decompress(path)?
        } else {
            fs::read_to_string(path)
                .map_err(|e| SourceError::Io(e, path.to_string_lossy().into_owned()))?
        };
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(contents.as_bytes());
        let rows = rdr
            .deserialize()
            .collect::<std::result::Result<Vec<Row>, csv::Error>>()?;
        if rows.is_empty() {
            return Err(SourceError::EmptyManifest(
                path.to_string_lossy().into_owned(),
            ));
        }
        log::info!("Loaded {} frames from {:?}", rows.len(), path);
        Ok(Self {
            path: path.to_path_buf(),
            rows,
        })
    }
    fn decompress(path: &Path) -> Result<String> {
        let name = path.to_string_lossy().into_owned();
        let csv_file = File::open(path).map_err(|e| SourceError::Io(e, name.clone()))?;
        let buf = BufReader::new(csv_file);
        let mut bz2 = BzDecoder::new(buf);
        let mut contents = String::new();
        bz2.read_to_string(&mut contents)
            .map_err(|e| SourceError::Io(e, name))?;
        Ok(contents)
    }
    fn row(&self, index: usize) -> Result<&Row> {
        self.rows.get(index).ok_or(SourceError::FrameIndex {
            index,
            num_frames: self.rows.len(),
        })
    }
    fn read_npy(&self, data: &str) -> Result<Vec<i32>> {
        let path = self
            .path
            .parent()
            .map_or_else(|| PathBuf::from(data), |root| root.join(data));
        read_npy(path)
    }
}

impl FrameSource for ManifestSource {
    fn name(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
    fn num_frames(&self) -> usize {
        self.rows.len()
    }
    fn beam(&self, index: usize) -> Option<Beam> {
        self.rows.get(index).map(|row| Beam::new(row.wavelength))
    }
    fn detector(&self, index: usize) -> Option<Detector> {
        self.rows.get(index).map(|row| {
            Detector::new(
                row.distance,
                (row.pixel_size, row.pixel_size),
                (row.nx, row.ny),
            )
        })
    }
    fn goniometer(&self, index: usize) -> Option<Goniometer> {
        self.rows.get(index).map(|_| Goniometer::default())
    }
    fn scan(&self, index: usize) -> Option<Scan> {
        let row = self.rows.get(index)?;
        let width = row.phi_width?;
        let image = index + 1;
        Some(
            Scan::new((image, image), (row.phi_start.unwrap_or_default(), width))
                .exposure_times(vec![row.exposure.unwrap_or_default()])
                .epochs(vec![row.epoch.unwrap_or_default()]),
        )
    }
    fn raw_data(&self, index: usize) -> Result<Vec<i32>> {
        let row = self.row(index)?;
        let expected = row.nx * row.ny;
        let pixels = match &row.data {
            Some(data) => self.read_npy(data)?,
            None => vec![0; expected],
        };
        if pixels.len() != expected {
            return Err(SourceError::PixelCount {
                index,
                expected,
                found: pixels.len(),
            });
        }
        Ok(pixels)
    }
}

/// Reads a `.npy` pixel array of `i32` or `f64` values
pub fn read_npy<P: AsRef<Path>>(path: P) -> Result<Vec<i32>> {
    let name = path.as_ref().to_string_lossy().into_owned();
    let bytes = fs::read(&path).map_err(|e| SourceError::Io(e, name.clone()))?;
    let npy = npyz::NpyFile::new(&bytes[..]).map_err(|e| SourceError::Npy(e, name.clone()))?;
    match npy.into_vec::<i32>() {
        Ok(pixels) => Ok(pixels),
        Err(_) => {
            let npy =
                npyz::NpyFile::new(&bytes[..]).map_err(|e| SourceError::Npy(e, name.clone()))?;
            let pixels = npy
                .into_vec::<f64>()
                .map_err(|e| SourceError::Npy(e, name))?;
            Ok(pixels.into_iter().map(|x| x.round() as i32).collect())
        }
    }
}

/// Opens CSV manifests
#[derive(Debug, Default, Clone, Copy)]
pub struct ManifestAdapter;
impl SourceAdapter for ManifestAdapter {
    fn vendor(&self) -> String {
        String::from("manifest")
    }
    fn open(&self, path: &Path, _params: &FormatParams) -> Result<Arc<dyn FrameSource>> {
        Ok(Arc::new(ManifestSource::load(path)?))
    }
}
