//! Simulated devices for offline sessions and tests.
//!
//! The three devices share the actuator position through [`SimPosition`], so a
//! move is immediately visible in the simulated signal and camera frames.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use jt_core::{Actuator, Error, Frame, Image, ImageSource, Result, Roi, Shot, ShotRead, SignalSource};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Lock-free shared `f64`.
#[derive(Debug, Clone, Default)]
pub struct SimPosition(Arc<AtomicU64>);

impl SimPosition {
    pub fn new(v: f64) -> Self {
        Self(Arc::new(AtomicU64::new(v.to_bits())))
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::SeqCst))
    }

    pub fn set(&self, v: f64) {
        self.0.store(v.to_bits(), Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub struct SimActuator {
    position: SimPosition,
    limits: (f64, f64),
    stuck: Arc<AtomicBool>,
    timeout_s: f64,
}

impl SimActuator {
    pub fn new(start: f64, limits: (f64, f64)) -> Self {
        Self {
            position: SimPosition::new(start),
            limits,
            stuck: Arc::new(AtomicBool::new(false)),
            timeout_s: 5.0,
        }
    }

    pub fn with_timeout(mut self, timeout_s: f64) -> Self {
        self.timeout_s = timeout_s;
        self
    }

    pub fn position_handle(&self) -> SimPosition {
        self.position.clone()
    }

    /// While set, every move fails with [`Error::Timeout`].
    pub fn stuck_handle(&self) -> Arc<AtomicBool> {
        self.stuck.clone()
    }
}

impl Actuator for SimActuator {
    fn position(&mut self) -> Result<f64> {
        Ok(self.position.get())
    }

    fn move_to(&mut self, target: f64, _wait: bool) -> Result<()> {
        self.check_target(target)?;
        if self.stuck.load(Ordering::SeqCst) {
            return Err(Error::Timeout {
                target,
                timeout_s: self.timeout_s,
            });
        }
        self.position.set(target);
        Ok(())
    }

    fn limits(&self) -> (f64, f64) {
        self.limits
    }
}

/// `(I0, D)` of shot `index` with the actuator at `position`.
pub type IntensityField = Box<dyn FnMut(u64, f64) -> (f64, f64) + Send>;

/// Shot generator driven by an intensity field, with seeded relative noise.
pub struct SimSignalSource {
    field: IntensityField,
    position: SimPosition,
    rng: StdRng,
    noise: f64,
    index: u64,
    rate_hz: f64,
    period: Option<Duration>,
    next_due: Instant,
}

impl SimSignalSource {
    pub fn new(field: IntensityField, position: SimPosition, seed: u64) -> Self {
        Self {
            field,
            position,
            rng: StdRng::seed_from_u64(seed),
            noise: 0.0,
            index: 0,
            rate_hz: 50.0,
            period: None,
            next_due: Instant::now(),
        }
    }

    /// Uniform relative noise of amplitude `noise` on both intensities.
    pub fn with_noise(mut self, noise: f64) -> Self {
        self.noise = noise.abs();
        self
    }

    /// Rate used for timestamps. With `paced`, shots are released in real time.
    pub fn with_rate(mut self, rate_hz: f64, paced: bool) -> Self {
        self.rate_hz = rate_hz;
        self.period = paced.then(|| Duration::from_secs_f64(1.0 / rate_hz));
        self
    }

    pub fn shots_emitted(&self) -> u64 {
        self.index
    }

    fn jitter(&mut self) -> f64 {
        if self.noise > 0.0 {
            1.0 + self.rng.gen_range(-self.noise..self.noise)
        } else {
            1.0
        }
    }
}

impl SignalSource for SimSignalSource {
    fn read_shot(&mut self) -> Result<ShotRead> {
        if let Some(period) = self.period {
            let now = Instant::now();
            if now < self.next_due {
                return Ok(ShotRead::Waiting);
            }
            self.next_due = now + period;
        }

        let (i0, diff) = (self.field)(self.index, self.position.get());
        let t = self.index as f64 / self.rate_hz;
        self.index += 1;
        let i0 = i0 * self.jitter();
        let diff = diff * self.jitter();
        Ok(ShotRead::Shot(Shot::new(t, i0, diff)))
    }
}

const NOZZLE_AMPLITUDE: f64 = 150.0;
/// `2 * sigma^2` of the nozzle spot, in square pixels.
const NOZZLE_SPREAD: f64 = 32.0;

/// Side-view camera rendering a vertical jet below a bright nozzle spot.
///
/// The jet sits at full-frame column `jet_origin_px + (position + drift) / pxsize`.
pub struct SimCamera {
    width: usize,
    height: usize,
    roi: Roi,
    pxsize: f64,
    jet_origin_px: f64,
    jet_half_width_px: f64,
    position: SimPosition,
    drift: SimPosition,
    background: f64,
    amplitude: f64,
    rng: StdRng,
    visible: Arc<AtomicBool>,
}

impl SimCamera {
    pub fn new(width: usize, height: usize, pxsize: f64, position: SimPosition, seed: u64) -> Self {
        Self {
            width,
            height,
            roi: Roi::full(width, height),
            pxsize,
            jet_origin_px: width as f64 / 2.0,
            jet_half_width_px: 1.5,
            position,
            drift: SimPosition::new(0.0),
            background: 10.0,
            amplitude: 190.0,
            rng: StdRng::seed_from_u64(seed),
            visible: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn with_jet_origin(mut self, column: f64) -> Self {
        self.jet_origin_px = column;
        self
    }

    /// Jet drift in mm, independent of the actuator.
    pub fn drift_handle(&self) -> SimPosition {
        self.drift.clone()
    }

    /// Clearing the flag hides the jet.
    pub fn visible_handle(&self) -> Arc<AtomicBool> {
        self.visible.clone()
    }

    pub fn jet_column(&self) -> f64 {
        self.jet_origin_px + (self.position.get() + self.drift.get()) / self.pxsize
    }

    fn render(&mut self) -> Result<Frame> {
        let xc = self.jet_column();
        let visible = self.visible.load(Ordering::SeqCst);
        let nozzle_row = self.height as f64 * 0.2;
        let mut data = Vec::with_capacity(self.width * self.height);
        for y in 0..self.height {
            for x in 0..self.width {
                let mut v = self.background + self.rng.gen_range(-1.5..1.5);
                if visible {
                    // Flat core with one-pixel linear edges.
                    let d = (x as f64 - xc).abs() - self.jet_half_width_px;
                    let w = (0.5 - d).clamp(0.0, 1.0);
                    v += self.amplitude * w;
                    let (dx, dy) = (x as f64 - xc, y as f64 - nozzle_row);
                    v += NOZZLE_AMPLITUDE * (-(dx * dx + dy * dy) / NOZZLE_SPREAD).exp();
                }
                data.push(v.round().clamp(0.0, u16::MAX as f64) as u16);
            }
        }
        Image::from_vec(self.width, self.height, data)
    }
}

impl ImageSource for SimCamera {
    fn read_frame(&mut self) -> Result<Frame> {
        self.render()
    }

    fn read_roi(&mut self, roi: Roi) -> Result<Frame> {
        self.render()?.crop(roi)
    }

    fn set_roi(&mut self, roi: Roi) -> Result<()> {
        if roi.is_collapsed() || roi.x0 + roi.width > self.width || roi.y0 + roi.height > self.height {
            return Err(Error::OutOfBounds);
        }
        self.roi = roi;
        Ok(())
    }

    fn roi(&self) -> Roi {
        self.roi
    }
}

#[cfg(test)]
mod tests {
    use jt_core::{Actuator, Error, ImageSource, Roi, ShotRead, SignalSource};

    use super::{SimActuator, SimCamera, SimSignalSource};

    #[test]
    fn actuator_shares_position_and_injects_timeouts() {
        let mut act = SimActuator::new(0.0, (-1.0, 1.0));
        let pos = act.position_handle();
        act.move_to(0.3, true).expect("in range");
        assert_eq!(pos.get(), 0.3);

        assert!(matches!(act.move_to(2.0, true), Err(Error::OutOfRange { .. })));
        act.stuck_handle().store(true, std::sync::atomic::Ordering::SeqCst);
        assert!(matches!(act.move_to(0.1, true), Err(Error::Timeout { .. })));
        assert_eq!(pos.get(), 0.3);
    }

    #[test]
    fn signal_follows_field() {
        let act = SimActuator::new(0.2, (-1.0, 1.0));
        let mut src = SimSignalSource::new(
            Box::new(|i, p| (1.0, if i < 2 { 0.5 } else { p })),
            act.position_handle(),
            1,
        );
        let mut diffs = Vec::new();
        for _ in 0..3 {
            match src.read_shot().expect("sim never fails") {
                ShotRead::Shot(s) => diffs.push(s.diff),
                ShotRead::Waiting => panic!("unpaced source waited"),
            }
        }
        assert_eq!(diffs, vec![0.5, 0.5, 0.2]);
        assert_eq!(src.shots_emitted(), 3);
    }

    #[test]
    fn camera_jet_tracks_actuator() {
        let mut act = SimActuator::new(0.0, (-1.0, 1.0));
        let mut cam = SimCamera::new(80, 40, 0.01, act.position_handle(), 5).with_jet_origin(30.0);
        assert_eq!(cam.jet_column(), 30.0);

        act.move_to(0.1, true).expect("in range");
        assert!((cam.jet_column() - 40.0).abs() < 1e-9);

        let frame = cam.read_frame().expect("frame");
        let row = frame.as_view().row(5).to_vec();
        assert!(row[40] > 150 && row[30] < 20);

        assert!(cam.set_roi(Roi::new(70, 0, 20, 40)).is_err());
        cam.set_roi(Roi::new(20, 0, 40, 40)).expect("inside sensor");
        assert_eq!(cam.read_roi(cam.roi()).expect("roi").width(), 40);
    }

    #[test]
    fn hidden_jet_leaves_background() {
        let act = SimActuator::new(0.0, (-1.0, 1.0));
        let mut cam = SimCamera::new(40, 20, 0.01, act.position_handle(), 7);
        cam.visible_handle().store(false, std::sync::atomic::Ordering::SeqCst);
        let frame = cam.read_frame().expect("frame");
        assert!(frame.data().iter().all(|&v| v < 20));
    }
}
