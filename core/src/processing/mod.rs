pub mod filter;
pub mod gain;
pub mod mute;
pub mod nmo;
pub mod restack;
pub mod stolt;

pub use filter::{Filter, FilterAxis};
pub use gain::Gain;
pub use mute::{Mute, MuteAxis};
pub use nmo::Nmo;
pub use restack::{Restack, RestackPlan, StepCheck};
pub use stolt::Stolt;

/// Relative permittivity of glacier ice used for move-out and migration.
pub const DEFAULT_PERMITTIVITY: f64 = 3.15;
