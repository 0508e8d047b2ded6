mod devices;
mod frames;
mod session;

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use jt_control::{Controller, OperatorCommand, Runtime, StatusBoard, TrackerConfig};
use jt_core::{Actuator, CamCalib, CancelToken, Error, ErrorKind, Point2, Roi};
use jt_search::{SearchOutcome, SearchSample};
use jt_signal::{CalibrationRecord, CalibrationResult, load_calibration, load_latest};
use jt_vision::{
    CalibrationFrame, CamCalibration, DEFAULT_UPSAMPLE, VisionPipeline, acquire_frames,
    calibrate_camera,
};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(name = "jet-tracker")]
#[command(about = "Keep a liquid sample jet in the X-ray beam")]
struct Cli {
    /// Tracker configuration (TOML); defaults apply to missing keys.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run an interactive session.
    Start(StartArgs),
    Stop,
    /// Run one two-pass calibration and save it.
    Calibrate,
    TrackOn,
    TrackOff,
    /// Run one search with the stored calibration.
    SearchOnce(CalibrationArgs),
    SetLimits(SetLimitsArgs),
    SetStep(SetStepArgs),
    /// Run the vision pipeline on a grayscale image.
    Detect(DetectArgs),
    /// Estimate pixel size and camera roll from frames at known positions.
    CamCalibrate(CamCalibrateArgs),
}

#[derive(Args, Debug, Clone)]
struct CalibrationArgs {
    /// Calibration file; the newest under `results_dir` otherwise.
    #[arg(long)]
    calibration: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
struct StartArgs {
    #[command(flatten)]
    calibration: CalibrationArgs,
    /// Camera calibration as printed by `cam-calibrate`; overrides the
    /// camera keys of the configuration.
    #[arg(long)]
    cam_calibration: Option<PathBuf>,
    /// Enable tracking once watching.
    #[arg(long)]
    track: bool,
}

#[derive(Args, Debug, Clone)]
struct SetLimitsArgs {
    #[arg(allow_negative_numbers = true)]
    low: f64,
    #[arg(allow_negative_numbers = true)]
    high: f64,
}

#[derive(Args, Debug, Clone)]
struct SetStepArgs {
    step: f64,
}

#[derive(Args, Debug, Clone)]
struct DetectArgs {
    #[arg(long)]
    image: PathBuf,
    /// ROI as x0 y0 width height; the full image otherwise.
    #[arg(long, num_args = 4, value_names = ["X0", "Y0", "W", "H"])]
    roi: Option<Vec<usize>>,
}

#[derive(Args, Debug, Clone)]
struct CamCalibrateArgs {
    /// Frames in acquisition order. Without frames, they are acquired from the devices.
    #[arg(long, num_args = 1..)]
    frames: Vec<PathBuf>,
    /// Actuator position of each frame, in mm.
    #[arg(long, num_args = 1.., allow_negative_numbers = true)]
    positions: Vec<f64>,
    /// Frames to acquire from the devices.
    #[arg(long, default_value_t = 3)]
    steps: usize,
    /// Actuator step between acquired frames, in mm.
    #[arg(long, default_value_t = 0.05)]
    step_mm: f64,
    /// Directory to write acquired frames to, as PNG.
    #[arg(long)]
    save: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct SearchReport<'a> {
    outcome: &'a SearchOutcome,
    trace: &'a [SearchSample],
}

fn main() {
    init_tracing();
    if let Err(err) = run(Cli::parse()) {
        eprintln!("error: {err:#}");
        std::process::exit(exit_code(&err));
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_timer(fmt::time::uptime())
                .with_writer(std::io::stderr)
                .with_filter(env_filter),
        )
        .try_init();
}

/// 2 configuration, 3 device, 4 calibration, 1 anything else.
fn exit_code(err: &anyhow::Error) -> i32 {
    let Some(root) = err.chain().find_map(|e| e.downcast_ref::<Error>()) else {
        return 1;
    };
    match root.kind() {
        ErrorKind::Config => 2,
        ErrorKind::Device => 3,
        ErrorKind::Calibration => 4,
        ErrorKind::Vision | ErrorKind::Search => 1,
    }
}

fn run(cli: Cli) -> Result<()> {
    let cfg = load_config(cli.config.as_deref())?;
    match cli.cmd {
        Command::Start(args) => cmd_start(cfg, args),
        Command::Calibrate => cmd_calibrate(cfg),
        Command::SearchOnce(args) => cmd_search_once(cfg, args),
        Command::Stop => no_session("stop"),
        Command::TrackOn => no_session("track-on"),
        Command::TrackOff => no_session("track-off"),
        Command::SetLimits(args) => {
            if !(args.low < args.high) {
                return Err(Error::Config(format!(
                    "low limit {} must be below high limit {}",
                    args.low, args.high
                ))
                .into());
            }
            no_session("set-limits")
        }
        Command::SetStep(args) => {
            if !(args.step.is_finite() && args.step > 0.0) {
                return Err(Error::Config(format!("step must be > 0, got {}", args.step)).into());
            }
            no_session("set-step")
        }
        Command::Detect(args) => cmd_detect(cfg, args),
        Command::CamCalibrate(args) => cmd_cam_calibrate(cfg, args),
    }
}

fn load_config(path: Option<&Path>) -> Result<TrackerConfig> {
    let cfg = match path {
        Some(p) => TrackerConfig::from_path(p)?,
        None => TrackerConfig::default(),
    };
    info!(mode = ?cfg.live_or_sim, algorithm = %cfg.algorithm, "configuration loaded");
    Ok(cfg)
}

fn no_session(verb: &str) -> Result<()> {
    Err(Error::Config(format!(
        "`{verb}` acts on a running session; use it at the `jet-tracker start` prompt"
    ))
    .into())
}

fn stored_calibration(
    cfg: &TrackerConfig,
    args: &CalibrationArgs,
) -> Result<Option<CalibrationResult>> {
    let sigma = cfg.acceptance_sigma()?;
    if let Some(path) = &args.calibration {
        let result = load_calibration(path, sigma)
            .with_context(|| format!("loading calibration {}", path.display()))?;
        return Ok(Some(result));
    }
    let Some(dir) = &cfg.results_dir else {
        return Ok(None);
    };
    Ok(load_latest(dir, sigma)?.map(|(_, result)| result))
}

fn load_cam_calibration(path: &Path) -> Result<CamCalib, Error> {
    let raw = std::fs::read_to_string(path)?;
    let cal: CamCalibration = serde_json::from_str(&raw).map_err(|e| Error::Format {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    Ok(CamCalib::new(cal.pxsize, cal.roll, Point2::default())?.with_axis(cal.axis))
}

fn cmd_start(mut cfg: TrackerConfig, args: StartArgs) -> Result<()> {
    if let Some(path) = &args.cam_calibration {
        let calib = load_cam_calibration(path)
            .with_context(|| format!("loading camera calibration {}", path.display()))?;
        info!(path = %path.display(), pxsize = calib.pxsize, "using measured camera calibration");
        cfg.set_cam_calib(&calib);
    }
    let calibration = stored_calibration(&cfg, &args.calibration)?;
    let dev = devices::open(&cfg, true)?;
    let runtime = Runtime::spawn(cfg, dev.actuator, dev.signal, Some(dev.camera), calibration)
        .context("starting runtime")?;

    let running = runtime.running_flag();
    let flag = running.clone();
    if let Err(err) = ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst)) {
        warn!("failed to install Ctrl+C handler: {err}");
    }

    runtime.send(OperatorCommand::Start)?;
    if args.track {
        runtime.send(OperatorCommand::TrackOn)?;
    }
    session::run(runtime, running)
}

fn cmd_calibrate(cfg: TrackerConfig) -> Result<()> {
    let dev = devices::open(&cfg, false)?;
    let mut signal = dev.signal;
    let mut controller = Controller::new(cfg, dev.actuator, StatusBoard::new());
    cancel_on_ctrlc(controller.cancel_token());

    let result = controller.calibrate(&mut signal).context("calibration failed")?;
    let text = toml::to_string_pretty(&CalibrationRecord::from(&result))
        .context("serializing calibration")?;
    println!("{text}");
    Ok(())
}

fn cmd_search_once(cfg: TrackerConfig, args: CalibrationArgs) -> Result<()> {
    let Some(calibration) = stored_calibration(&cfg, &args)? else {
        return Err(Error::Format {
            path: cfg
                .results_dir
                .as_deref()
                .map_or_else(|| "<no results_dir>".to_owned(), |d| d.display().to_string()),
            reason: "no stored calibration; run `jet-tracker calibrate` first".into(),
        }
        .into());
    };

    let dev = devices::open(&cfg, false)?;
    let mut signal = dev.signal;
    let mut controller = Controller::new(cfg, dev.actuator, StatusBoard::new());
    controller.set_calibration(calibration);
    cancel_on_ctrlc(controller.cancel_token());

    let outcome = controller
        .search(&mut signal)
        .with_context(|| format!("search failed after {} samples", controller.search_trace().len()))?;
    let report = SearchReport {
        outcome: &outcome,
        trace: controller.search_trace().samples(),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("serializing search report")?
    );
    Ok(())
}

fn cmd_detect(cfg: TrackerConfig, args: DetectArgs) -> Result<()> {
    let frame = frames::load_frame(&args.image)?;
    let roi = match args.roi.as_deref() {
        Some(&[x0, y0, w, h]) => Roi::new(x0, y0, w, h),
        Some(other) => bail!("ROI needs four values, got {}", other.len()),
        None => Roi::full(frame.width(), frame.height()),
    };
    let crop = frame.crop(roi).context("ROI outside the image")?;

    let mut pipeline =
        VisionPipeline::new(cfg.line_detect_config(), cfg.cam_calib()?, cfg.beam_pose()?);
    let reading = pipeline
        .process(&crop, roi)
        .with_context(|| format!("detecting jet in {}", args.image.display()))?;
    println!(
        "{}",
        serde_json::to_string_pretty(&reading).context("serializing reading")?
    );
    Ok(())
}

fn cmd_cam_calibrate(cfg: TrackerConfig, args: CamCalibrateArgs) -> Result<()> {
    let frames = if args.frames.is_empty() {
        let mut dev = devices::open(&cfg, false)?;
        let start = dev.actuator.position()?;
        let positions: Vec<f64> = (0..args.steps)
            .map(|k| start + k as f64 * args.step_mm)
            .collect();
        let frames = acquire_frames(&mut dev.actuator, &mut dev.camera, &positions)
            .context("acquiring calibration frames")?;
        if let Some(dir) = &args.save {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
            for (k, f) in frames.iter().enumerate() {
                frames::save_frame(&dir.join(format!("camcal_{k:02}.png")), &f.frame)?;
            }
        }
        frames
    } else {
        if args.frames.len() != args.positions.len() {
            return Err(Error::Config(format!(
                "{} frames but {} positions",
                args.frames.len(),
                args.positions.len()
            ))
            .into());
        }
        args.frames
            .iter()
            .zip(&args.positions)
            .map(|(path, &position)| {
                Ok(CalibrationFrame {
                    frame: frames::load_frame(path)?,
                    position,
                })
            })
            .collect::<Result<Vec<_>>>()?
    };

    let cal = calibrate_camera(&frames, cfg.calibration_axis, DEFAULT_UPSAMPLE)
        .context("camera calibration failed")?;
    println!(
        "{}",
        serde_json::to_string_pretty(&cal).context("serializing camera calibration")?
    );
    Ok(())
}

fn cancel_on_ctrlc(token: CancelToken) {
    if let Err(err) = ctrlc::set_handler(move || token.cancel()) {
        warn!("failed to install Ctrl+C handler: {err}");
    }
}
