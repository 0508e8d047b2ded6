use jt_control::sim::{SimActuator, SimSignalSource};
use jt_control::{Controller, ControllerState, StatusBoard, StepOutcome, TrackerConfig};
use jt_core::Actuator;
use jt_search::Algorithm;
use jt_signal::{CalibrationResult, Stats};

fn calibration() -> CalibrationResult {
    CalibrationResult {
        i0: Stats::with_band(1.0, 0.01, 2.0),
        diff: Stats::with_band(0.5, 0.01, 2.0),
        ratio: Stats::with_band(0.5, 0.01, 2.0),
        ratio_median: 0.5,
        sigma: 2.0,
        peak_bin: 0,
        delta_bin: 0,
    }
}

fn config() -> TrackerConfig {
    TrackerConfig {
        notification_tolerance: 100,
        classify_window: 100,
        algorithm: Algorithm::Ternary,
        low_limit: -0.2,
        high_limit: 0.2,
        search_tolerance: 0.005,
        motor_averaging: 5,
        ..TrackerConfig::default()
    }
}

/// Triangular diffraction profile peaking at `peak` once the jet has drifted.
fn drifted_source(act: &SimActuator, stable_shots: u64, peak: f64) -> SimSignalSource {
    SimSignalSource::new(
        Box::new(move |i, pos| {
            if i < stable_shots {
                (1.0, 0.5)
            } else {
                let field = (1.0 - (pos - peak).abs() / 0.2).max(0.1);
                (1.0, 0.5 * field)
            }
        }),
        act.position_handle(),
        42,
    )
    .with_noise(0.002)
}

fn state_sequence(rx: &crossbeam_channel::Receiver<jt_control::StatusEvent>) -> Vec<ControllerState> {
    let mut out: Vec<ControllerState> = Vec::new();
    for e in rx.try_iter() {
        if out.last() != Some(&e.state) {
            out.push(e.state);
        }
    }
    out
}

#[test]
fn drifted_jet_is_recovered_by_search() {
    let act = SimActuator::new(0.0, (-0.5, 0.5));
    let mut src = drifted_source(&act, 500, 0.05);
    let mut c = Controller::new(config(), act, StatusBoard::new());
    let rx = c.status().subscribe();
    c.set_calibration(calibration());

    let mut operations = 0;
    for _ in 0..1000 {
        if let StepOutcome::Operation(_) = c.step(&mut src) {
            operations += 1;
        }
    }

    assert_eq!(operations, 1);
    assert_eq!(
        state_sequence(&rx),
        vec![
            ControllerState::Monitoring,
            ControllerState::Searching,
            ControllerState::Monitoring
        ]
    );
    let pos = c.actuator_mut().position().expect("sim position");
    assert!((pos - 0.05).abs() < 0.01, "settled at {pos}");
    assert_eq!(c.faults(), 0);

    let outcome = c.last_search().expect("search ran");
    assert_eq!(outcome.initial_position, 0.0);
    assert!(outcome.best_intensity > outcome.initial_intensity);
    assert!(c.search_trace().len() > 2);
}

#[test]
fn search_without_improvement_faults_at_limit() {
    let act = SimActuator::new(0.0, (-0.5, 0.5));
    let mut src = SimSignalSource::new(Box::new(|_, _| (1.0, 0.3)), act.position_handle(), 1);
    let cfg = TrackerConfig {
        bad_scan_limit: 2,
        ..config()
    };
    let mut c = Controller::new(cfg, act, StatusBoard::new());
    c.set_calibration(calibration());

    // First failed search: back to watching.
    while !c.search_pending() {
        c.step(&mut src);
    }
    assert_eq!(c.step(&mut src), StepOutcome::Operation(ControllerState::Monitoring));
    assert_eq!(c.actuator_mut().position().expect("sim position"), 0.0);

    // Second: the limit is reached.
    while !c.search_pending() {
        c.step(&mut src);
    }
    assert_eq!(c.step(&mut src), StepOutcome::Operation(ControllerState::Faulted));
    assert_eq!(c.faults(), 1);
    assert_eq!(c.actuator_mut().position().expect("sim position"), 0.0);

    // Faulted controllers neither classify nor escalate.
    for _ in 0..200 {
        c.step(&mut src);
    }
    assert_eq!(c.state(), ControllerState::Faulted);
    assert!(!c.search_pending());
}

#[test]
fn cancelled_search_restores_position() {
    let act = SimActuator::new(0.0, (-0.5, 0.5));
    let mut c = Controller::new(config(), act.clone(), StatusBoard::new());
    c.set_calibration(calibration());

    let token = c.cancel_token();
    let field = move |i: u64, pos: f64| {
        if i == 170 {
            token.cancel();
        }
        if i < 50 {
            (1.0, 0.5)
        } else {
            (1.0, 0.5 * (1.0 - (pos - 0.05).abs() / 0.2).max(0.1))
        }
    };
    let mut src = SimSignalSource::new(Box::new(field), act.position_handle(), 3);

    while !c.search_pending() {
        c.step(&mut src);
    }
    assert_eq!(c.step(&mut src), StepOutcome::Operation(ControllerState::Monitoring));
    assert_eq!(act.position_handle().get(), 0.0);
    assert!(!c.cancel_token().is_cancelled());
    assert_eq!(c.faults(), 0);
}

#[test]
fn actuator_timeout_during_search_faults() {
    let act = SimActuator::new(0.0, (-0.5, 0.5));
    let stuck = act.stuck_handle();
    let mut src = drifted_source(&act, 0, 0.05);
    let mut c = Controller::new(config(), act, StatusBoard::new());
    c.set_calibration(calibration());

    while !c.search_pending() {
        c.step(&mut src);
    }
    stuck.store(true, std::sync::atomic::Ordering::SeqCst);
    assert_eq!(c.step(&mut src), StepOutcome::Operation(ControllerState::Faulted));
    assert!(c.status().last().is_some_and(|e| e.message.contains("did not reach")));
}

#[test]
fn beam_outage_during_search_faults_instead_of_waiting() {
    let act = SimActuator::new(0.0, (-0.5, 0.5));
    let mut src = SimSignalSource::new(Box::new(|_, _| (0.01, 0.005)), act.position_handle(), 3);
    let cfg = TrackerConfig {
        sample_timeout_s: 0.05,
        ..config()
    };
    let mut c = Controller::new(cfg, act, StatusBoard::new());
    c.set_calibration(calibration());

    let started = std::time::Instant::now();
    let err = c.search(&mut src).expect_err("every shot is dropped");
    assert!(matches!(err, jt_core::Error::Starved { .. }), "{err}");
    assert!(started.elapsed() < std::time::Duration::from_secs(2));
    assert_eq!(c.state(), ControllerState::Faulted);
}
