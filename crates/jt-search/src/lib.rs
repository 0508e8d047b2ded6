//! Intensity-maximizing actuator searches.
//!
//! A [`Searcher`] owns a [`SearchConfig`] and borrows an actuator and a
//! [`Meter`] for one run. Four strategies are available:
//! - [`Algorithm::Linear`]: full sweeps, shrinking the step until one beats
//!   the starting intensity.
//! - [`Algorithm::Ternary`]: bracket reduction assuming a unimodal profile,
//!   with one retry on a trimmed bracket.
//! - [`Algorithm::LinearThenTernary`]: coarse sweep, then ternary refinement.
//! - [`Algorithm::DynamicLinear`]: one sweep with an adaptive step.
//!
//! Every visited sample is recorded in a [`SearchTrace`]. A search that fails
//! to improve or is cancelled returns the actuator to its starting position.

mod config;
mod searcher;
mod strategy;
mod trace;

pub use config::{Algorithm, SearchConfig};
pub use searcher::{Meter, SearchOutcome, Searcher};
pub use trace::{SearchSample, SearchTrace};
