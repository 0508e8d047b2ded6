//! Controller state machine.
//!
//! The controller owns the actuator, the classifier and the searcher. It is
//! driven one step at a time by the shot loop: each step either runs a pending
//! long operation (calibration or search) or reads and classifies one shot.
//! Vision readings arrive separately through [`Controller::on_vision`].

use std::time::Duration;

use jt_core::{Actuator, CamCalib, CancelToken, Error, Shot, ShotRead, SignalSource};
use jt_search::{SearchOutcome, SearchTrace, Searcher};
use jt_signal::{
    CalibrationResult, Calibrator, Classifier, Label, SharedShotStream, save_calibration,
};
use jt_vision::VisionReading;
use serde::{Deserialize, Serialize};
use tracing::{debug, debug_span, error, info, warn};

use crate::config::TrackerConfig;
use crate::sampler::ShotSampler;
use crate::state::ControllerState;
use crate::status::StatusBoard;
use crate::window::LabelWindow;

/// Operator requests accepted by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum OperatorCommand {
    Start,
    Stop,
    Calibrate,
    TrackOn,
    TrackOff,
    SearchOnce,
    SetLimits { low: f64, high: f64 },
    SetStep { step: f64 },
    Reset,
    /// Aborts the running calibration or search and drops pending work.
    Cancel,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    Calibrate,
    Search(&'static str),
}

/// What one [`Controller::step`] did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    /// A shot was read; the label is present when it was classified.
    Shot(Shot, Option<Label>),
    /// No shot was ready.
    Waiting,
    /// A calibration or search ran to completion, failure or cancellation.
    Operation(ControllerState),
    /// The source failed and the controller faulted.
    Faulted,
}

pub struct Controller<A> {
    cfg: TrackerConfig,
    state: ControllerState,
    actuator: A,
    classifier: Option<Classifier>,
    stream: SharedShotStream,
    window: LabelWindow,
    searcher: Searcher,
    calibrator: Calibrator,
    status: StatusBoard,
    cancel: CancelToken,
    tracking: bool,
    pending: Option<Pending>,
    bad_scans: usize,
    no_jet_streak: usize,
    frames_seen: usize,
    roi_shift: Option<f64>,
    dropped_alert: bool,
    faults: usize,
    last_search: Option<SearchOutcome>,
    last_reading: Option<VisionReading>,
}

impl<A: Actuator> Controller<A> {
    pub fn new(cfg: TrackerConfig, actuator: A, status: StatusBoard) -> Self {
        let stream = SharedShotStream::new(cfg.buffer_capacity);
        let window = LabelWindow::new(cfg.window_len());
        let searcher = Searcher::new(cfg.search_config());
        let calibrator = Calibrator::new(cfg.calibrator_config());
        let tracking = cfg.tracking_enabled;
        status.publish(ControllerState::Idle, "ready");
        Self {
            cfg,
            state: ControllerState::Idle,
            actuator,
            classifier: None,
            stream,
            window,
            searcher,
            calibrator,
            status,
            cancel: CancelToken::new(),
            tracking,
            pending: None,
            bad_scans: 0,
            no_jet_streak: 0,
            frames_seen: 0,
            roi_shift: None,
            dropped_alert: false,
            faults: 0,
            last_search: None,
            last_reading: None,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.cfg
    }

    /// Number of transitions into FAULTED so far.
    pub fn faults(&self) -> usize {
        self.faults
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    pub fn actuator_mut(&mut self) -> &mut A {
        &mut self.actuator
    }

    pub fn stream(&self) -> &SharedShotStream {
        &self.stream
    }

    pub fn status(&self) -> &StatusBoard {
        &self.status
    }

    /// Token observed by running calibrations and searches.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn calibration(&self) -> Option<&CalibrationResult> {
        self.classifier.as_ref().map(Classifier::calibration)
    }

    pub fn tracking_enabled(&self) -> bool {
        self.tracking
    }

    pub fn search_pending(&self) -> bool {
        matches!(self.pending, Some(Pending::Search(_)))
    }

    pub fn last_search(&self) -> Option<&SearchOutcome> {
        self.last_search.as_ref()
    }

    pub fn search_trace(&self) -> &SearchTrace {
        self.searcher.trace()
    }

    pub fn last_reading(&self) -> Option<&VisionReading> {
        self.last_reading.as_ref()
    }

    /// Accumulated ROI shift in pixels owed to the vision loop since the last call.
    pub fn take_roi_shift(&mut self) -> Option<f64> {
        self.roi_shift.take()
    }

    fn watch_state(&self) -> ControllerState {
        if self.tracking {
            ControllerState::Tracking
        } else {
            ControllerState::Monitoring
        }
    }

    fn transition(&mut self, to: ControllerState, message: impl Into<String>) {
        let message = message.into();
        if to == ControllerState::Faulted {
            self.faults += 1;
            error!(from = %self.state, %message, "controller faulted");
        } else if to != self.state {
            info!(from = %self.state, to = %to, %message, "state change");
        }
        self.state = to;
        self.status.publish(to, message);
    }

    fn fault(&mut self, err: &Error) {
        self.pending = None;
        self.transition(ControllerState::Faulted, err.to_string());
    }

    /// Installs a calibration. From IDLE or CALIBRATING the controller starts
    /// watching.
    pub fn set_calibration(&mut self, result: CalibrationResult) {
        self.classifier = Some(Classifier::new(result));
        self.window.clear();
        if matches!(self.state, ControllerState::Idle | ControllerState::Calibrating) {
            self.transition(self.watch_state(), "calibrated");
        }
    }

    /// Installs a camera calibration. Later ROI shifts use its pixel size.
    pub fn set_cam_calib(&mut self, calib: CamCalib) {
        info!(
            pxsize = calib.pxsize,
            roll = calib.cam_roll,
            axis = calib.axis.position_label(),
            "camera calibration installed"
        );
        self.cfg.set_cam_calib(&calib);
    }

    pub fn handle_command(&mut self, cmd: OperatorCommand) {
        debug!(?cmd, state = %self.state, "operator command");
        match cmd {
            OperatorCommand::Start => match self.state {
                ControllerState::Idle if self.classifier.is_some() => {
                    self.transition(self.watch_state(), "started");
                }
                ControllerState::Idle => self.pending = Some(Pending::Calibrate),
                _ => {}
            },
            OperatorCommand::Stop => {
                self.pending = None;
                if self.state != ControllerState::Faulted {
                    self.transition(ControllerState::Idle, "stopped");
                }
            }
            OperatorCommand::Calibrate => {
                if self.state == ControllerState::Faulted {
                    self.status.publish(self.state, "reset before calibrating");
                } else {
                    self.pending = Some(Pending::Calibrate);
                }
            }
            OperatorCommand::TrackOn => {
                self.tracking = true;
                self.frames_seen = 0;
                if self.state == ControllerState::Monitoring {
                    self.transition(ControllerState::Tracking, "tracking enabled");
                }
            }
            OperatorCommand::TrackOff => {
                self.tracking = false;
                if self.state == ControllerState::Tracking {
                    self.transition(ControllerState::Monitoring, "tracking disabled");
                }
            }
            OperatorCommand::SearchOnce => {
                if self.state.is_watching() {
                    self.request_search("operator request");
                } else {
                    self.status
                        .publish(self.state, format!("cannot search while {}", self.state));
                }
            }
            OperatorCommand::SetLimits { low, high } => self.set_limits(low, high),
            OperatorCommand::SetStep { step } => {
                if step.is_finite() && step > 0.0 {
                    self.searcher.config_mut().step_size = step;
                    info!(step, "search step updated");
                } else {
                    warn!(step, "rejected search step");
                    self.status.publish(self.state, format!("invalid step {step}"));
                }
            }
            OperatorCommand::Reset => self.reset(),
            OperatorCommand::Cancel => {
                self.pending = None;
                self.cancel.reset();
            }
            OperatorCommand::Shutdown => {
                self.pending = None;
                self.cancel.cancel();
            }
        }
    }

    fn set_limits(&mut self, low: f64, high: f64) {
        let checked = if low < high {
            self.actuator
                .check_target(low)
                .and_then(|()| self.actuator.check_target(high))
        } else {
            Err(Error::Config(format!("low limit {low} must be below high limit {high}")))
        };
        match checked {
            Ok(()) => {
                let cfg = self.searcher.config_mut();
                cfg.low = low;
                cfg.high = high;
                info!(low, high, "search limits updated");
            }
            Err(err) => {
                warn!(%err, "rejected search limits");
                self.status.publish(self.state, err.to_string());
            }
        }
    }

    /// Back to IDLE with counters and pending work cleared. The calibration is kept.
    pub fn reset(&mut self) {
        self.cancel.reset();
        self.pending = None;
        self.window.clear();
        self.bad_scans = 0;
        self.no_jet_streak = 0;
        self.dropped_alert = false;
        self.roi_shift = None;
        self.transition(ControllerState::Idle, "reset");
    }

    fn request_search(&mut self, reason: &'static str) {
        if self.pending.is_none() {
            info!(reason, "search requested");
            self.pending = Some(Pending::Search(reason));
        }
    }

    /// Records and, while watching, classifies one shot.
    pub fn on_shot(&mut self, shot: Shot) -> Option<Label> {
        self.stream.push(shot);
        if !self.state.is_watching() {
            return None;
        }
        let label = self.classifier.as_ref()?.classify(&shot);
        self.window.push(label);

        let tol = self.cfg.notification_tolerance;
        let dropped = self.window.count(Label::Dropped);
        if dropped >= tol {
            if !self.dropped_alert {
                warn!(dropped, "incoming beam intensity out of band");
                self.status
                    .publish(self.state, format!("beam dropped on {dropped} shots"));
                self.dropped_alert = true;
            }
        } else {
            self.dropped_alert = false;
        }

        if self.window.count(Label::Missed) >= tol {
            self.request_search("missed shots");
        } else if self.window.count(Label::Low) >= tol {
            self.request_search("low intensity ratio");
        }
        Some(label)
    }

    /// Runs pending work, otherwise reads one shot.
    pub fn step<S: SignalSource + ?Sized>(&mut self, source: &mut S) -> StepOutcome {
        match self.pending.take() {
            Some(Pending::Calibrate) => {
                let _ = self.calibrate(source);
                return StepOutcome::Operation(self.state);
            }
            Some(Pending::Search(reason)) => {
                debug!(reason, "running pending search");
                let _ = self.search(source);
                return StepOutcome::Operation(self.state);
            }
            None => {}
        }

        match source.read_shot() {
            Ok(ShotRead::Shot(shot)) => StepOutcome::Shot(shot, self.on_shot(shot)),
            Ok(ShotRead::Waiting) => StepOutcome::Waiting,
            Err(err) => {
                self.fault(&err);
                StepOutcome::Faulted
            }
        }
    }

    /// Two-pass calibration. On success the result is installed and, when a
    /// results directory is configured, saved.
    pub fn calibrate<S: SignalSource + ?Sized>(
        &mut self,
        source: &mut S,
    ) -> Result<CalibrationResult, Error> {
        self.transition(ControllerState::Calibrating, "calibrating");
        match self.calibrator.run(source, &self.cancel) {
            Ok(result) => {
                if let Some(dir) = &self.cfg.results_dir {
                    if let Err(err) = save_calibration(dir, &result) {
                        warn!(%err, "could not save calibration");
                    }
                }
                self.set_calibration(result.clone());
                Ok(result)
            }
            Err(Error::Cancelled) => {
                self.cancel.reset();
                let back = if self.classifier.is_some() {
                    self.watch_state()
                } else {
                    ControllerState::Idle
                };
                self.transition(back, "calibration cancelled");
                Err(Error::Cancelled)
            }
            Err(err) => {
                self.fault(&err);
                Err(err)
            }
        }
    }

    /// Searches for the intensity maximum, averaging `motor_averaging`
    /// non-dropped shots per sample.
    pub fn search<S: SignalSource + ?Sized>(
        &mut self,
        source: &mut S,
    ) -> Result<SearchOutcome, Error> {
        let Some(classifier) = self.classifier.as_ref() else {
            let err = Error::Config("search requires a calibration".into());
            self.status.publish(self.state, err.to_string());
            return Err(err);
        };
        let back = self.watch_state();
        self.state = ControllerState::Searching;
        info!(algorithm = %self.searcher.config().algorithm, "state change to SEARCHING");
        self.status.publish(ControllerState::Searching, "searching");

        let mut sampler = ShotSampler {
            source,
            classifier,
            stream: &self.stream,
            cancel: &self.cancel,
            averaging: self.cfg.motor_averaging,
            timeout: Duration::from_secs_f64(self.cfg.sample_timeout_s),
            poll: Duration::from_millis(2),
        };
        let result = self
            .searcher
            .run(&mut self.actuator, &mut sampler, &self.cancel);

        self.window.clear();
        self.no_jet_streak = 0;
        match &result {
            Ok(outcome) => {
                self.bad_scans = 0;
                self.last_search = Some(*outcome);
                self.transition(
                    back,
                    format!(
                        "search done: {:.4} mm, ratio {:.4}",
                        outcome.best_position, outcome.best_intensity
                    ),
                );
            }
            Err(err @ Error::NoImprovement { .. }) => {
                self.bad_scans += 1;
                warn!(bad_scans = self.bad_scans, limit = self.cfg.bad_scan_limit, %err, "search failed");
                if self.bad_scans >= self.cfg.bad_scan_limit {
                    let msg = format!("{} searches without improvement", self.bad_scans);
                    self.pending = None;
                    self.transition(ControllerState::Faulted, msg);
                } else {
                    self.transition(back, err.to_string());
                }
            }
            Err(Error::Cancelled) => {
                self.cancel.reset();
                self.transition(back, "search cancelled");
            }
            Err(err) => self.fault(err),
        }
        result
    }

    /// Applies one vision reading. Only every `tracking_frame_interval`-th
    /// frame is acted on while TRACKING.
    pub fn on_vision(&mut self, reading: Result<VisionReading, Error>) {
        if let Ok(r) = &reading {
            self.last_reading = Some(*r);
        }
        if self.state != ControllerState::Tracking {
            return;
        }
        self.frames_seen += 1;
        if self.frames_seen % self.cfg.tracking_frame_interval != 0 {
            return;
        }

        let _span = debug_span!("tracking.update", frame = self.frames_seen).entered();
        match reading {
            Ok(r) => {
                self.no_jet_streak = 0;
                let jet_x = r.metrics.jet_x;
                if jet_x.abs() > self.cfg.tracking_epsilon_mm {
                    self.correct(jet_x);
                }
            }
            Err(Error::NoJet { attempts }) => {
                self.no_jet_streak += 1;
                debug!(attempts, streak = self.no_jet_streak, "no jet in frame");
                if self.no_jet_streak >= self.cfg.no_jet_limit {
                    warn!(streak = self.no_jet_streak, "jet lost");
                    self.status.publish(self.state, "jet lost");
                    self.no_jet_streak = 0;
                    self.request_search("jet lost");
                }
            }
            Err(Error::DegenerateGeometry(what)) => {
                self.status
                    .publish(self.state, format!("tracking paused: {what}"));
            }
            Err(err) => debug!(%err, "vision reading skipped"),
        }
    }

    /// Moves the actuator against the measured offset and queues the matching
    /// ROI shift.
    fn correct(&mut self, jet_x: f64) {
        let pos = match self.actuator.position() {
            Ok(p) => p,
            Err(err) => return self.fault(&err),
        };
        let target = pos - jet_x;
        let (low, high) = self.actuator.limits();
        let clamped = target.clamp(low, high);
        if clamped != target {
            warn!(target, low, high, "tracking correction clamped to limits");
            self.status
                .publish(self.state, format!("correction clamped to {clamped:.4} mm"));
        }
        if let Err(err) = self.actuator.move_to(clamped, true) {
            return self.fault(&err);
        }
        debug!(jet_x, from = pos, to = clamped, "tracking correction");
        let px = jet_x / self.cfg.pxsize;
        self.roi_shift = Some(self.roi_shift.unwrap_or(0.0) + px);
    }
}
