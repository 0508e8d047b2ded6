//! Umbrella crate for the `jet-tracking` workspace.
//!
//! Re-exports the core types, the vision and signal pipelines, the searcher
//! and the controller with its simulated devices.

pub use jt_control::*;
pub use jt_core::*;
pub use jt_search::*;
pub use jt_signal::*;
pub use jt_vision::*;
