//! Device set for a session.

use std::f64::consts::TAU;

use jt_control::sim::{SimActuator, SimCamera, SimSignalSource};
use jt_control::{LiveOrSim, TrackerConfig};
use jt_core::Error;

pub const SENSOR_WIDTH: usize = 320;
pub const SENSOR_HEIGHT: usize = 240;

/// Jet offset from the beam when the session starts, in mm.
const DRIFT_OFFSET_MM: f64 = 0.04;
const DRIFT_AMPLITUDE_MM: f64 = 0.03;
const DRIFT_PERIOD_S: f64 = 120.0;
/// Offset at which diffraction falls to its floor, in mm.
const OVERLAP_HALF_WIDTH_MM: f64 = 0.2;

pub struct Devices {
    pub actuator: SimActuator,
    pub signal: SimSignalSource,
    pub camera: SimCamera,
}

/// Opens the configured devices. Only the simulated set exists in this build.
///
/// The simulated jet drifts slowly; diffraction falls off linearly with the
/// jet-beam offset and the camera renders the same drift.
pub fn open(cfg: &TrackerConfig, paced: bool) -> Result<Devices, Error> {
    if cfg.live_or_sim == LiveOrSim::Live {
        return Err(Error::Device(
            "no live device backend in this build; set live_or_sim = \"sim\"".into(),
        ));
    }

    let limits = (cfg.low_limit.min(-1.0), cfg.high_limit.max(1.0));
    let actuator = SimActuator::new(0.0, limits).with_timeout(cfg.move_timeout_s);
    let camera = SimCamera::new(
        SENSOR_WIDTH,
        SENSOR_HEIGHT,
        cfg.pxsize,
        actuator.position_handle(),
        0x6a6574,
    )
    .with_jet_origin(cfg.beam_pixel[0]);

    let drift = camera.drift_handle();
    let rate = cfg.shot_rate_hz;
    let field = move |index: u64, position: f64| {
        let t = index as f64 / rate;
        let d = DRIFT_OFFSET_MM + DRIFT_AMPLITUDE_MM * (TAU * t / DRIFT_PERIOD_S).sin();
        drift.set(d);
        let overlap = (1.0 - (position + d).abs() / OVERLAP_HALF_WIDTH_MM).max(0.1);
        (1.0, 0.5 * overlap)
    };
    let signal = SimSignalSource::new(Box::new(field), actuator.position_handle(), 0x73686f74)
        .with_noise(0.02)
        .with_rate(rate, paced);

    Ok(Devices {
        actuator,
        signal,
        camera,
    })
}
