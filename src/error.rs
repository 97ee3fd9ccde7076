use crate::{imageset::ConfigurationError, models::ModelKind, source::SourceError};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid image collection request")]
    Configuration(#[from] ConfigurationError),
    #[error("the frame source reported {found} frames, previously {expected}")]
    SourceInconsistency { expected: usize, found: usize },
    #[error("frame {index} has no {model} model")]
    IncompleteModel { index: usize, model: ModelKind },
    #[error("error in the frame source")]
    Source(#[from] SourceError),
}
pub type Result<T> = std::result::Result<T, Error>;
