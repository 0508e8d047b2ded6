//! Closed-loop jet tracking.
//!
//! [`Controller`] is the state machine that classifies shots, escalates
//! persistent misses into actuator searches and applies vision-driven
//! corrections while tracking. [`Runtime`] runs it on a shot thread next to a
//! vision thread. [`TrackerConfig`] is the single configuration surface and
//! [`sim`] provides devices for offline sessions.
//!
//! ## States
//! `IDLE -> CALIBRATING -> MONITORING <-> SEARCHING`, with `TRACKING` in place
//! of `MONITORING` while tracking is enabled. Unrecoverable errors lead to
//! `FAULTED`, which only an explicit reset leaves.

mod config;
mod controller;
mod runtime;
mod sampler;
pub mod sim;
mod state;
mod status;
mod window;

pub use config::{LiveOrSim, TrackerConfig};
pub use controller::{Controller, OperatorCommand, StepOutcome};
pub use runtime::{Runtime, Telemetry, spawn_thread};
pub use sampler::ShotSampler;
pub use state::{ControllerState, StatusColor};
pub use status::{StatusBoard, StatusEvent};
pub use window::LabelWindow;
