//! Shard driver
//!
//! The events of a run are split in contiguous shards, one per worker.
//! A worker goes through the events of its shard in order: events without
//! pixel data, detector distance, wavelength or timestamp are skipped, every
//! other event is turned into a single still image collection handed to a
//! [FrameProcessor]. A processing failure is logged and the worker moves on
//! to the next event.

use std::{error::Error as StdError, fs::File, io, ops::Range, path::Path, sync::Arc};

use regex::Regex;

use crate::{
    imageset::{BuildOptions, ImageCollection, ImageSetFactory},
    models::{Beam, Detector, Goniometer, OpticalModels, Scan},
    source::{MemoryAdapter, MemoryFrame, MemorySource, SourceError},
};

mod events;
mod templates;
pub use events::{Event, EventList, EventSource};
pub use templates::{OutputPaths, OutputTemplates};

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("shard rank {rank} is not in [0,{size})")]
    Shard { rank: usize, size: usize },
    #[error("failed to read {1}")]
    Io(#[source] io::Error, String),
    #[error("invalid event list")]
    Csv(#[from] csv::Error),
    #[error("event #{0} does not exist")]
    EventIndex(usize),
    #[error("failed to load the event pixel data")]
    Source(#[from] SourceError),
    #[error("event has {found} pixels, the detector has {expected}")]
    PixelCount { expected: usize, found: usize },
    #[error("failed to write the mask to {1}")]
    Pickle(#[source] serde_pickle::Error, String),
    #[error("failed to build the image collection")]
    Build(#[from] crate::Error),
    #[error("invalid frame")]
    Frame(#[source] crate::Error),
    #[error("invalid timestamp pattern")]
    Regex(#[from] regex::Error),
    #[error("frame processing failed")]
    Processor(#[source] Box<dyn StdError + Send + Sync>),
}
pub type Result<T> = std::result::Result<T, DriverError>;
impl DriverError {
    /// Whether the error stops the processing of the whole shard
    ///
    /// Only a failure to build an image collection does, errors tied to a
    /// single event do not.
    pub fn aborts_run(&self) -> bool {
        matches!(self, DriverError::Build(_))
    }
}

/// The slice of a run owned by one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shard {
    rank: usize,
    size: usize,
}
impl Shard {
    pub fn new(rank: usize, size: usize) -> Result<Self> {
        if rank >= size {
            return Err(DriverError::Shard { rank, size });
        }
        Ok(Self { rank, size })
    }
    pub fn rank(&self) -> usize {
        self.rank
    }
    pub fn size(&self) -> usize {
        self.size
    }
    /// The events of the shard out of `n_events`
    ///
    /// Shards are contiguous and disjoint and together cover all the events,
    /// the first `n_events % size` shards having one more event than the others.
    pub fn range(&self, n_events: usize) -> Range<usize> {
        let base = n_events / self.size;
        let remainder = n_events % self.size;
        let start = self.rank * base + self.rank.min(remainder);
        let len = base + usize::from(self.rank < remainder);
        start..start + len
    }
}

/// An event ready for processing
pub struct Hit {
    /// `hit-<compact timestamp>`
    pub name: String,
    /// source event index
    pub index: usize,
    pub collection: ImageCollection,
    pub paths: OutputPaths,
}

/// Processes the image collection of a hit
pub trait FrameProcessor {
    type Output;
    fn process(
        &mut self,
        hit: &Hit,
    ) -> std::result::Result<Self::Output, Box<dyn StdError + Send + Sync>>;
}

/// Counts of the events of a shard
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShardReport {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}
impl ShardReport {
    pub fn total(&self) -> usize {
        self.processed + self.skipped + self.failed
    }
}
impl std::ops::Add for ShardReport {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            processed: self.processed + rhs.processed,
            skipped: self.skipped + rhs.skipped,
            failed: self.failed + rhs.failed,
        }
    }
}

enum Outcome<T> {
    Processed(T),
    Skipped(&'static str),
}

/// Runs the events of a shard through a [FrameProcessor]
pub struct ShardDriver {
    shard: Shard,
    detector: Detector,
    templates: OutputTemplates,
    factory: ImageSetFactory,
    timestamp: Regex,
}
impl ShardDriver {
    /// A driver for `shard` with the detector geometry common to all events
    ///
    /// The detector distance is replaced by the distance of each event.
    pub fn new(shard: Shard, detector: Detector, templates: OutputTemplates) -> Result<Self> {
        Ok(Self {
            shard,
            detector,
            templates,
            factory: ImageSetFactory::new(MemoryAdapter::new("memory")),
            timestamp: Regex::new(
                r"^(\d{4})-(\d{2})-(\d{2})[T ](\d{2}):(\d{2}):(\d{2})\.(\d{3})",
            )?,
        })
    }
    /// Sets the vendor tag of the image collections
    pub fn vendor<S: Into<String>>(self, vendor: S) -> Self {
        Self {
            factory: ImageSetFactory::new(MemoryAdapter::new(vendor)),
            ..self
        }
    }
    pub fn shard(&self) -> Shard {
        self.shard
    }
    /// `hit-YYYYMMDDhhmmssmmm` from a `YYYY-MM-DDThh:mm:ss.mmm` timestamp
    pub fn hit_name(&self, timestamp: &str) -> Option<String> {
        let caps = self.timestamp.captures(timestamp)?;
        let digits: String = (1..=7)
            .filter_map(|i| caps.get(i).map(|m| m.as_str()))
            .collect();
        Some(format!("hit-{}", digits))
    }
    /// Processes the events of the shard in order
    ///
    /// Events failing to load or to process, or with an incomplete or unreadable
    /// frame, are logged and counted as failed.
    /// A failure to build an image collection aborts the run.
    pub fn run<E, P>(
        &self,
        events: &E,
        processor: &mut P,
    ) -> Result<(ShardReport, Vec<P::Output>)>
    where
        E: EventSource + ?Sized,
        P: FrameProcessor,
    {
        if self.templates.mask.is_some() {
            let output_dir = &self.templates.output_dir;
            std::fs::create_dir_all(output_dir)
                .map_err(|e| DriverError::Io(e, output_dir.to_string_lossy().into_owned()))?;
        }
        let range = self.shard.range(events.len());
        log::info!(
            "Shard {}/{}: processing events {:?}",
            self.shard.rank,
            self.shard.size,
            range
        );
        let mut report = ShardReport::default();
        let mut outputs = vec![];
        for index in range {
            match self.process_event(events, index, processor) {
                Ok(Outcome::Processed(output)) => {
                    report.processed += 1;
                    outputs.push(output);
                }
                Ok(Outcome::Skipped(reason)) => {
                    log::warn!("Event #{}: {}, skipping shot", index, reason);
                    report.skipped += 1;
                }
                Err(e) if e.aborts_run() => return Err(e),
                Err(e) => {
                    log::warn!("Event #{} failed: {}", index, error_chain(&e));
                    report.failed += 1;
                }
            }
        }
        log::info!("Shard {} done: {:?}", self.shard.rank, report);
        Ok((report, outputs))
    }
    fn process_event<E, P>(
        &self,
        events: &E,
        index: usize,
        processor: &mut P,
    ) -> Result<Outcome<P::Output>>
    where
        E: EventSource + ?Sized,
        P: FrameProcessor,
    {
        let event = events.event(index)?;
        let Some(data) = event.data else {
            return Ok(Outcome::Skipped("no data"));
        };
        let Some(distance) = event.distance else {
            return Ok(Outcome::Skipped("no distance"));
        };
        let Some(wavelength) = event.wavelength else {
            return Ok(Outcome::Skipped("no wavelength"));
        };
        let Some(name) = event.timestamp.as_deref().and_then(|t| self.hit_name(t)) else {
            return Ok(Outcome::Skipped("no timestamp"));
        };
        log::info!("Processing shot {}", name);
        let expected = self.detector.n_pixels();
        if data.len() != expected {
            return Err(DriverError::PixelCount {
                expected,
                found: data.len(),
            });
        }

        let detector = Detector {
            distance,
            ..self.detector.clone()
        };
        let source = MemorySource::default().named(name.clone()).frame(
            MemoryFrame::new(data)
                .beam(Beam::new(wavelength))
                .detector(detector)
                .goniometer(Goniometer::default())
                .scan(Scan::still(1)),
        );
        let collection = self.factory.build(
            Arc::new(source),
            OpticalModels::default(),
            None,
            &BuildOptions::default(),
        )?;
        collection.check_complete().map_err(DriverError::Frame)?;

        let paths = self.templates.paths(&name);
        if let Some(path) = &paths.mask {
            if let Some(mask) = collection.mask(0).map_err(DriverError::Frame)? {
                write_pickle(path, &mask)?;
            }
        }
        let hit = Hit {
            name,
            index,
            collection,
            paths,
        };
        processor
            .process(&hit)
            .map(Outcome::Processed)
            .map_err(DriverError::Processor)
    }
}

fn write_pickle<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let name = path.to_string_lossy().into_owned();
    let mut file = File::create(path).map_err(|e| DriverError::Io(e, name.clone()))?;
    serde_pickle::to_writer(&mut file, value, Default::default())
        .map_err(|e| DriverError::Pickle(e, name))
}

/// Formats an error followed by its causes
pub fn error_chain(e: &dyn StdError) -> String {
    let mut chain = e.to_string();
    let mut current = e.source();
    while let Some(cause) = current {
        chain.push_str(": ");
        chain.push_str(&cause.to_string());
        current = cause.source();
    }
    chain
}
