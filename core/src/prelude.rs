use crate::dataset::Dataset;
use crate::validate::ValidationError;

/// Speed of light in vacuum (m/s).
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Common error type for decoding, transforms and container access.
#[derive(thiserror::Error, Debug)]
pub enum GhogError {
    #[error("malformed capture: {0}")]
    Format(String),
    #[error("invalid dataset: {0}")]
    Validation(#[from] ValidationError),
    #[error("invalid parameter: {0}")]
    Parameter(String),
    #[error("group '{group}' already exists in {path}; pass overwrite to replace it")]
    ContainerConflict { group: String, path: String },
    #[error("container failure: {0}")]
    Container(String),
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

pub type GhogResult<T> = Result<T, GhogError>;

/// A pure dataset-to-dataset processing step.
///
/// Implementations validate their input, never mutate it, and return a new
/// dataset that satisfies the same invariants.
pub trait Transform {
    fn name(&self) -> &'static str;
    fn apply(&self, dataset: &Dataset) -> GhogResult<Dataset>;
}

pub(crate) fn parameter_error(message: impl Into<String>) -> GhogError {
    GhogError::Parameter(message.into())
}
