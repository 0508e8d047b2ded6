//! Example: a tracking session against simulated devices.
//!
//! Calibrates on simulated shots, switches tracking on, then drifts the jet
//! linearly while the controller follows it through the vision pipeline.
//! Shots keep flowing between frames, so the classifier sees the whole run.
//!
//! One JSON record per frame is written to stdout, or to `--out`.
//!
//! Run from the workspace root:
//!   cargo run -p jet-tracking --example sim_session -- --help
//!   cargo run -p jet-tracking --example sim_session -- --drift-mm 0.05

use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use jet_tracking::sim::{SimActuator, SimCamera, SimSignalSource};
use jet_tracking::{
    Actuator, Controller, ImageSource, OperatorCommand, StatusBoard, StepOutcome, TrackerConfig,
    VisionPipeline,
};
use serde::Serialize;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(about = "Follow a drifting jet with simulated devices")]
struct Args {
    /// Camera frames to process
    #[arg(long, default_value_t = 60)]
    frames: usize,

    /// Shots read between consecutive frames
    #[arg(long, default_value_t = 5)]
    shots_per_frame: usize,

    /// Total jet drift over the run, in mm
    #[arg(long, default_value_t = 0.04, allow_negative_numbers = true)]
    drift_mm: f64,

    /// Shots used for calibration
    #[arg(long, default_value_t = 400)]
    num_cali: usize,

    /// Output JSON path (stdout when omitted)
    #[arg(long)]
    out: Option<String>,
}

// ── JSON DTOs ─────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct FrameDto {
    frame: usize,
    drift: f64,
    position: f64,
    /// Jet offset from the beam in mm, when a line was found.
    jet_x: Option<f64>,
    jet_width: Option<f64>,
    state: String,
}

#[derive(Serialize)]
struct SessionDto {
    ratio_median: f64,
    elapsed_ms: f64,
    final_state: String,
    faults: usize,
    frames: Vec<FrameDto>,
}

// ── Main ──────────────────────────────────────────────────────────────────────

const WIDTH: usize = 320;
const HEIGHT: usize = 240;
const OVERLAP_HALF_WIDTH_MM: f64 = 0.2;

fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = TrackerConfig {
        num_cali: args.num_cali,
        ..TrackerConfig::default()
    };
    cfg.validate().context("invalid configuration")?;

    let actuator = SimActuator::new(0.0, (cfg.low_limit, cfg.high_limit));
    let mut camera = SimCamera::new(WIDTH, HEIGHT, cfg.pxsize, actuator.position_handle(), 1)
        .with_jet_origin(cfg.beam_pixel[0]);
    let drift = camera.drift_handle();

    let field_drift = drift.clone();
    let field = move |_index: u64, position: f64| {
        let offset = (position + field_drift.get()).abs();
        (1.0, 0.5 * (1.0 - offset / OVERLAP_HALF_WIDTH_MM).max(0.1))
    };
    let mut signal = SimSignalSource::new(Box::new(field), actuator.position_handle(), 2)
        .with_noise(0.02)
        .with_rate(cfg.shot_rate_hz, false);

    let mut pipeline = VisionPipeline::new(cfg.line_detect_config(), cfg.cam_calib()?, cfg.beam_pose()?);
    let mut controller = Controller::new(cfg, actuator, StatusBoard::new());

    let t0 = Instant::now();
    let calibration = controller
        .calibrate(&mut signal)
        .context("calibration failed")?;
    controller.handle_command(OperatorCommand::TrackOn);

    let mut records = Vec::with_capacity(args.frames);
    for k in 0..args.frames {
        let d = args.drift_mm * (k + 1) as f64 / args.frames as f64;
        drift.set(d);

        for _ in 0..args.shots_per_frame {
            if let StepOutcome::Faulted = controller.step(&mut signal) {
                break;
            }
        }

        let roi = camera.roi();
        let reading = camera
            .read_roi(roi)
            .and_then(|frame| pipeline.process(&frame, roi));
        let metrics = reading.as_ref().ok().map(|r| r.metrics);
        controller.on_vision(reading);
        if let Some(dx) = controller.take_roi_shift() {
            let shifted = camera.roi().shifted_x(dx, WIDTH);
            camera.set_roi(shifted)?;
        }

        records.push(FrameDto {
            frame: k,
            drift: d,
            position: controller.actuator_mut().position()?,
            jet_x: metrics.map(|m| m.jet_x),
            jet_width: metrics.and_then(|m| m.jet_width),
            state: controller.state().to_string(),
        });
    }

    let session = SessionDto {
        ratio_median: calibration.ratio_median,
        elapsed_ms: t0.elapsed().as_secs_f64() * 1e3,
        final_state: controller.state().to_string(),
        faults: controller.faults(),
        frames: records,
    };
    let json = serde_json::to_string_pretty(&session)?;
    match args.out {
        Some(path) => {
            std::fs::write(&path, json).with_context(|| format!("writing {path}"))?;
            println!("wrote {path}");
        }
        None => println!("{json}"),
    }
    Ok(())
}
