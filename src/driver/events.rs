use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use super::{DriverError, Result};
use crate::source::read_npy;

/// A detector readout with its beamline metadata
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Event {
    /// `YYYY-MM-DDThh:mm:ss.mmm`
    pub timestamp: Option<String>,
    /// [Å]
    pub wavelength: Option<f64>,
    /// [mm]
    pub distance: Option<f64>,
    pub data: Option<Vec<i32>>,
}

/// Random access to the events of a run
pub trait EventSource {
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn event(&self, index: usize) -> Result<Event>;
}

impl EventSource for [Event] {
    fn len(&self) -> usize {
        <[Event]>::len(self)
    }
    fn event(&self, index: usize) -> Result<Event> {
        self.get(index)
            .cloned()
            .ok_or(DriverError::EventIndex(index))
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
struct Record {
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    wavelength: Option<f64>,
    #[serde(default)]
    distance: Option<f64>,
    /// path to a `.npy` pixel array, relative to the event list
    #[serde(default)]
    data: Option<String>,
}

/// Events listed in a CSV file with the columns `timestamp,wavelength,distance,data`
///
/// Pixel data are read from `.npy` files only when an event is requested.
#[derive(Debug)]
pub struct EventList {
    root: PathBuf,
    records: Vec<Record>,
}
impl EventList {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| DriverError::Io(e, path.to_string_lossy().into_owned()))?;
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(contents.as_bytes());
        let records = rdr
            .deserialize()
            .collect::<std::result::Result<Vec<Record>, csv::Error>>()?;
        log::info!("Found {} events in {:?}", records.len(), path);
        Ok(Self {
            root: path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
            records,
        })
    }
}
impl EventSource for EventList {
    fn len(&self) -> usize {
        self.records.len()
    }
    fn event(&self, index: usize) -> Result<Event> {
        let record = self
            .records
            .get(index)
            .ok_or(DriverError::EventIndex(index))?;
        let data = match &record.data {
            Some(data) => Some(read_npy(self.root.join(data))?),
            None => None,
        };
        Ok(Event {
            timestamp: record.timestamp.clone(),
            wavelength: record.wavelength,
            distance: record.distance,
            data,
        })
    }
}
