//! Processing core for Groundhog ground-penetrating-radar captures.
//!
//! The modules follow the survey processing chain: raw captures are decoded
//! into a validated [`Dataset`], passed through pure transforms (filter, gain,
//! mute, move-out correction, restacking, Stolt migration) and persisted to a
//! grouped container.

pub mod dataset;
pub mod io;
pub mod math;
pub mod prelude;
pub mod processing;
pub mod telemetry;
pub mod validate;

pub use dataset::{AttrValue, Attributes, Dataset, Fix};
pub use prelude::{GhogError, GhogResult, Transform};
pub use validate::ValidationError;
