//! Contracts for the three external collaborators.
//!
//! The core never addresses hardware directly: positioners, cameras and
//! per-shot detectors are reached only through these traits.

use serde::{Deserialize, Serialize};

use crate::image::{Frame, Roi};
use crate::{Error, Result};

/// One X-ray pulse: monotonic timestamp, incident intensity and diffraction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Shot {
    pub t: f64,
    pub i0: f64,
    pub diff: f64,
}

impl Shot {
    pub fn new(t: f64, i0: f64, diff: f64) -> Self {
        Self { t, i0, diff }
    }

    /// Normalized intensity `D / I0`; zero when `I0` is not positive.
    pub fn ratio(&self) -> f64 {
        if self.i0 > 0.0 {
            self.diff / self.i0
        } else {
            0.0
        }
    }
}

/// Single-axis positioner. Limits are authoritative.
pub trait Actuator: Send {
    fn position(&mut self) -> Result<f64>;

    /// Commands a move. With `wait` the call blocks until the target is
    /// reached or the device reports [`Error::Timeout`].
    fn move_to(&mut self, target: f64, wait: bool) -> Result<()>;

    fn limits(&self) -> (f64, f64);

    /// Rejects targets outside the limits with [`Error::OutOfRange`].
    fn check_target(&self, target: f64) -> Result<()> {
        let (low, high) = self.limits();
        if target < low || target > high || !target.is_finite() {
            return Err(Error::OutOfRange { target, low, high });
        }
        Ok(())
    }
}

impl<A: Actuator + ?Sized> Actuator for Box<A> {
    fn position(&mut self) -> Result<f64> {
        (**self).position()
    }

    fn move_to(&mut self, target: f64, wait: bool) -> Result<()> {
        (**self).move_to(target, wait)
    }

    fn limits(&self) -> (f64, f64) {
        (**self).limits()
    }
}

pub trait ImageSource: Send {
    /// Latest full frame, or [`Error::NoFrame`] when none is ready.
    fn read_frame(&mut self) -> Result<Frame>;

    fn read_roi(&mut self, roi: Roi) -> Result<Frame> {
        self.read_frame()?.crop(roi)
    }

    fn set_roi(&mut self, roi: Roi) -> Result<()>;

    fn roi(&self) -> Roi;
}

/// Outcome of a non-blocking shot poll.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShotRead {
    Shot(Shot),
    Waiting,
}

pub trait SignalSource: Send {
    fn read_shot(&mut self) -> Result<ShotRead>;
}

impl<S: SignalSource + ?Sized> SignalSource for Box<S> {
    fn read_shot(&mut self) -> Result<ShotRead> {
        (**self).read_shot()
    }
}
