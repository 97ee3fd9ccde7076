//! # imageset-factory
//!
//! Classifies the frames of a crystallography [FrameSource](source::FrameSource)
//! as a rotation sweep or as a set of stills and assembles the matching
//! [ImageCollection](imageset::ImageCollection).
//!
//! ```no_run
//! use imageset_factory::{BuildOptions, ImageSetFactory, ManifestAdapter, OpticalModels};
//!
//! let factory = ImageSetFactory::new(ManifestAdapter);
//! let iset = factory
//!     .build_from_path("frames.csv", OpticalModels::default(), None, &BuildOptions::default())
//!     .unwrap();
//! iset.summary();
//! ```

pub mod driver;
pub mod error;
pub mod imageset;
pub mod models;
pub mod source;

pub use error::{Error, Result};
pub use imageset::{BuildOptions, ImageCollection, ImageSetFactory};
pub use models::{Beam, Detector, FormatParams, Goniometer, ModelKind, OpticalModels, Scan};
pub use source::{FrameSource, ManifestAdapter, SourceAdapter};
