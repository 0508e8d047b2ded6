//! Shot and vision loops on dedicated threads.
//!
//! The shot thread owns the [`Controller`] and the signal source. The vision
//! thread owns the camera and the [`VisionPipeline`]. They exchange readings
//! and ROI shifts over bounded channels; a reading lost to a full channel is
//! superseded by the next frame.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, unbounded};
use jt_core::{Actuator, CancelToken, Error, ImageSource, Roi, SignalSource};
use jt_signal::{CalibrationResult, ShotAverages};
use jt_vision::{JetMetrics, VisionPipeline, VisionReading};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::TrackerConfig;
use crate::controller::{Controller, OperatorCommand, StepOutcome};
use crate::state::ControllerState;
use crate::status::{StatusBoard, StatusEvent};

/// Spawns a named thread that inherits the caller's tracing dispatcher.
pub fn spawn_thread<F, T>(name: impl Into<String>, f: F) -> io::Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let dispatch = tracing::dispatcher::get_default(|current| current.clone());
    thread::Builder::new()
        .name(name.into())
        .spawn(move || tracing::dispatcher::with_default(&dispatch, f))
}

/// Snapshot published for displays at `refresh_rate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub state: ControllerState,
    pub position: Option<f64>,
    /// Rolling means over `graph_average` seconds of shots.
    pub averages: Option<ShotAverages>,
    /// `(t, ratio)` over the last `display_time` seconds.
    pub ratio_history: Vec<(f64, f64)>,
    pub jet: Option<JetMetrics>,
    pub roi: Option<Roi>,
}

enum VisionCommand {
    ShiftRoi(f64),
}

/// Handle to a running session. Dropping it stops both threads.
pub struct Runtime {
    commands: Sender<OperatorCommand>,
    telemetry: Receiver<Telemetry>,
    status: StatusBoard,
    cancel: CancelToken,
    running: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl Runtime {
    /// Starts the shot loop and, when a camera is given, the vision loop.
    ///
    /// With a stored `calibration` the controller starts in MONITORING.
    pub fn spawn<A, S, C>(
        cfg: TrackerConfig,
        actuator: A,
        signal: S,
        camera: Option<C>,
        calibration: Option<CalibrationResult>,
    ) -> Result<Self, Error>
    where
        A: Actuator + 'static,
        S: SignalSource + 'static,
        C: ImageSource + 'static,
    {
        cfg.validate()?;
        let status = StatusBoard::new();
        let mut controller = Controller::new(cfg.clone(), actuator, status.clone());
        if let Some(result) = calibration {
            controller.set_calibration(result);
        }
        let cancel = controller.cancel_token();
        let running = Arc::new(AtomicBool::new(true));
        let following = Arc::new(AtomicBool::new(false));

        let (cmd_tx, cmd_rx) = unbounded();
        let (tele_tx, tele_rx) = bounded(4);
        let (reading_tx, reading_rx) = bounded(4);
        let (roi_tx, roi_rx) = unbounded();

        let mut threads = Vec::with_capacity(2);
        if let Some(camera) = camera {
            let pipeline = VisionPipeline::new(
                cfg.line_detect_config(),
                cfg.cam_calib()?,
                cfg.beam_pose()?,
            );
            let vision = VisionLoop {
                camera,
                pipeline,
                period: cfg.vision_period(),
                readings: reading_tx,
                roi_commands: roi_rx,
                following: following.clone(),
                running: running.clone(),
            };
            threads.push(spawn_thread("jt-vision", move || vision.run())?);
        } else {
            drop(reading_tx);
        }

        let shots = ShotLoop {
            controller,
            signal,
            commands: cmd_rx,
            readings: reading_rx,
            roi_commands: roi_tx,
            telemetry: tele_tx,
            following,
            running: running.clone(),
            poll: cfg.shot_period().div_f64(4.0),
            refresh: cfg.refresh_period(),
            average_shots: (cfg.graph_average * cfg.shot_rate_hz).round().max(1.0) as usize,
            display_time: cfg.display_time,
            last_roi: None,
        };
        threads.push(spawn_thread("jt-shots", move || shots.run())?);
        info!(threads = threads.len(), "runtime started");

        Ok(Self {
            commands: cmd_tx,
            telemetry: tele_rx,
            status,
            cancel,
            running,
            threads,
        })
    }

    pub fn send(&self, cmd: OperatorCommand) -> Result<(), Error> {
        self.commands
            .send(cmd)
            .map_err(|_| Error::Device("shot loop has stopped".into()))
    }

    /// Interrupts a running calibration or search at its next sample.
    pub fn cancel(&self) -> Result<(), Error> {
        self.cancel.cancel();
        self.send(OperatorCommand::Cancel)
    }

    pub fn subscribe(&self) -> Receiver<StatusEvent> {
        self.status.subscribe()
    }

    pub fn last_status(&self) -> Option<StatusEvent> {
        self.status.last()
    }

    pub fn telemetry(&self) -> &Receiver<Telemetry> {
        &self.telemetry
    }

    /// Flag cleared on shutdown; suitable for a Ctrl-C handler.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stops both loops and waits for them.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.cancel.cancel();
        let _ = self.commands.send(OperatorCommand::Shutdown);
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                warn!("runtime thread panicked");
            }
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

struct ShotLoop<A, S> {
    controller: Controller<A>,
    signal: S,
    commands: Receiver<OperatorCommand>,
    readings: Receiver<Result<VisionReading, Error>>,
    roi_commands: Sender<VisionCommand>,
    telemetry: Sender<Telemetry>,
    following: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    poll: Duration,
    refresh: Duration,
    average_shots: usize,
    display_time: f64,
    last_roi: Option<Roi>,
}

impl<A: Actuator, S: SignalSource> ShotLoop<A, S> {
    fn run(mut self) {
        let mut last_publish = Instant::now();
        while self.running.load(Ordering::SeqCst) {
            for cmd in self.commands.try_iter() {
                if cmd == OperatorCommand::Shutdown {
                    self.running.store(false, Ordering::SeqCst);
                    break;
                }
                self.controller.handle_command(cmd);
            }
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            for reading in self.readings.try_iter() {
                if let Ok(r) = &reading {
                    self.last_roi = Some(r.roi);
                }
                self.controller.on_vision(reading);
            }
            if let Some(dx) = self.controller.take_roi_shift() {
                let _ = self.roi_commands.send(VisionCommand::ShiftRoi(dx));
            }

            self.following
                .store(self.controller.search_pending(), Ordering::SeqCst);
            let outcome = self.controller.step(&mut self.signal);
            self.following.store(false, Ordering::SeqCst);

            if last_publish.elapsed() >= self.refresh {
                self.publish();
                last_publish = Instant::now();
            }
            if outcome == StepOutcome::Waiting {
                thread::sleep(self.poll);
            }
        }
        info!(state = %self.controller.state(), "shot loop stopped");
    }

    fn publish(&mut self) {
        let snapshot = self.controller.stream().snapshot();
        let telemetry = Telemetry {
            state: self.controller.state(),
            position: self.controller.actuator_mut().position().ok(),
            averages: snapshot.averages(self.average_shots),
            ratio_history: snapshot.ratio_since(self.display_time),
            jet: self.controller.last_reading().map(|r| r.metrics),
            roi: self.last_roi,
        };
        match self.telemetry.try_send(telemetry) {
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => debug!("no telemetry consumer"),
        }
    }
}

struct VisionLoop<C> {
    camera: C,
    pipeline: VisionPipeline,
    period: Duration,
    readings: Sender<Result<VisionReading, Error>>,
    roi_commands: Receiver<VisionCommand>,
    following: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
}

impl<C: ImageSource> VisionLoop<C> {
    fn run(mut self) {
        let sensor_width = match self.camera.read_frame() {
            Ok(frame) => frame.width(),
            Err(err) => {
                warn!(%err, "could not read a full frame; ROI shifts limited to current ROI");
                let roi = self.camera.roi();
                roi.x0 + roi.width
            }
        };

        while self.running.load(Ordering::SeqCst) {
            let started = Instant::now();
            let commands: Vec<VisionCommand> = self.roi_commands.try_iter().collect();
            for cmd in commands {
                match cmd {
                    VisionCommand::ShiftRoi(dx) => self.shift_roi(dx, sensor_width),
                }
            }

            let roi = self.camera.roi();
            let reading = self
                .camera
                .read_roi(roi)
                .and_then(|frame| self.pipeline.process(&frame, roi));

            match &reading {
                Ok(r) if self.following.load(Ordering::SeqCst) => {
                    // Keep the jet centred while the actuator is searching.
                    let centre = roi.height as f64 / 2.0;
                    if let Ok(x) = r.line.x_at_y(centre) {
                        let dx = x - roi.width as f64 / 2.0;
                        if dx.abs() >= 1.0 {
                            self.shift_roi(dx, sensor_width);
                        }
                    }
                }
                Err(Error::NoFrame) => {
                    thread::sleep(self.period);
                    continue;
                }
                _ => {}
            }

            match self.readings.try_send(reading) {
                Ok(()) | Err(TrySendError::Full(_)) => {}
                Err(TrySendError::Disconnected(_)) => break,
            }
            if let Some(rest) = self.period.checked_sub(started.elapsed()) {
                thread::sleep(rest);
            }
        }
        debug!("vision loop stopped");
    }

    fn shift_roi(&mut self, dx: f64, sensor_width: usize) {
        let roi = self.camera.roi().shifted_x(dx, sensor_width);
        if let Err(err) = self.camera.set_roi(roi) {
            warn!(%err, dx, "ROI shift rejected");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::spawn_thread;

    #[test]
    fn spawned_thread_is_named_and_joins() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = {
            let hits = hits.clone();
            spawn_thread("jt-test", move || {
                hits.fetch_add(1, Ordering::SeqCst);
                std::thread::current().name().map(str::to_owned)
            })
            .expect("spawn")
        };
        assert_eq!(h.join().expect("join").as_deref(), Some("jt-test"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
