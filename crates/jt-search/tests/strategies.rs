use jt_core::{Actuator, CancelToken, Error, Result};
use jt_search::{Algorithm, SearchConfig, Searcher};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

struct Stage {
    pos: f64,
    limits: (f64, f64),
    visited: Vec<f64>,
}

impl Stage {
    fn at(pos: f64, limits: (f64, f64)) -> Self {
        Self {
            pos,
            limits,
            visited: Vec::new(),
        }
    }
}

impl Actuator for Stage {
    fn position(&mut self) -> Result<f64> {
        Ok(self.pos)
    }

    fn move_to(&mut self, target: f64, _wait: bool) -> Result<()> {
        self.check_target(target)?;
        self.pos = target;
        self.visited.push(target);
        Ok(())
    }

    fn limits(&self) -> (f64, f64) {
        self.limits
    }
}

fn triangle(peak: f64) -> impl FnMut(f64) -> Result<f64> {
    move |p| Ok(1.0 - (p - peak).abs())
}

#[test]
fn ternary_finds_triangle_peak() {
    let mut stage = Stage::at(0.0, (0.0, 1.0));
    let mut searcher = Searcher::new(SearchConfig {
        algorithm: Algorithm::Ternary,
        low: 0.0,
        high: 1.0,
        tolerance: 0.01,
        ..SearchConfig::default()
    });

    let out = searcher
        .run(&mut stage, &mut triangle(0.37), &CancelToken::new())
        .expect("peak found");

    assert!((out.best_position - 0.37).abs() <= 0.01, "{out:?}");
    assert!(out.iterations <= 12, "iterations {}", out.iterations);
    assert!((stage.pos - out.best_position).abs() < 1e-12);
    // Initial sample, two per iteration, one final.
    assert_eq!(searcher.trace().len(), 2 + 2 * out.iterations);
}

#[test]
fn linear_without_improvement_restores_start() {
    let mut stage = Stage::at(0.0, (-0.5, 0.5));
    let mut searcher = Searcher::new(SearchConfig {
        algorithm: Algorithm::Linear,
        low: -0.1,
        high: 0.1,
        step_size: 0.04,
        step_decrement: 0.02,
        step_floor: 0.02,
        ..SearchConfig::default()
    });
    let mut flat = |_: f64| -> Result<f64> { Ok(0.5) };

    let err = searcher
        .run(&mut stage, &mut flat, &CancelToken::new())
        .expect_err("flat profile");

    assert!(matches!(err, Error::NoImprovement { .. }));
    assert_eq!(stage.pos, 0.0);
    // Initial sample, a sweep at 0.04 and a sweep at the 0.02 floor.
    assert_eq!(searcher.trace().len(), 1 + 6 + 11);
}

#[test]
fn linear_moves_to_argmax() {
    let mut stage = Stage::at(-0.1, (-0.5, 0.5));
    let mut searcher = Searcher::new(SearchConfig {
        algorithm: Algorithm::Linear,
        low: -0.1,
        high: 0.1,
        step_size: 0.02,
        ..SearchConfig::default()
    });

    let out = searcher
        .run(&mut stage, &mut triangle(0.06), &CancelToken::new())
        .expect("improves");
    assert!((out.best_position - 0.06).abs() < 1e-9);
    assert_eq!(out.iterations, 1);
}

#[test]
fn linear_then_ternary_refines_coarse_bin() {
    let mut stage = Stage::at(-0.1, (-0.5, 0.5));
    let mut searcher = Searcher::new(SearchConfig {
        algorithm: Algorithm::LinearThenTernary,
        low: -0.1,
        high: 0.1,
        step_size: 0.02,
        tolerance: 0.002,
        ..SearchConfig::default()
    });

    let out = searcher
        .run(&mut stage, &mut triangle(0.037), &CancelToken::new())
        .expect("improves");
    assert!((out.best_position - 0.037).abs() < 0.003, "{out:?}");
}

#[test]
fn dynamic_linear_climbs_toward_peak() {
    let mut stage = Stage::at(-0.08, (-0.5, 0.5));
    let mut searcher = Searcher::new(SearchConfig {
        algorithm: Algorithm::DynamicLinear,
        low: -0.1,
        high: 0.1,
        step_size: 0.02,
        ..SearchConfig::default()
    });

    let out = searcher
        .run(&mut stage, &mut triangle(0.05), &CancelToken::new())
        .expect("improves");
    assert!(out.best_intensity > out.initial_intensity);
    assert!((out.best_position - 0.05).abs() < 0.03, "{out:?}");
}

#[test]
fn noisy_ternary_stays_near_peak() {
    let delta = 0.005;
    let mut rng = StdRng::seed_from_u64(42);
    for peak in [0.13, 0.37, 0.5, 0.81] {
        let mut stage = Stage::at(0.0, (0.0, 1.0));
        let mut searcher = Searcher::new(SearchConfig {
            algorithm: Algorithm::Ternary,
            low: 0.0,
            high: 1.0,
            tolerance: 0.01,
            ..SearchConfig::default()
        });
        let mut noisy = |p: f64| -> Result<f64> {
            Ok(1.0 - (p - peak).abs() + rng.gen_range(-delta..delta))
        };

        let out = searcher
            .run(&mut stage, &mut noisy, &CancelToken::new())
            .expect("peak found");
        assert!((out.best_position - peak).abs() < 0.05, "peak {peak}: {out:?}");
    }
}

#[test]
fn every_strategy_stays_in_bracket() {
    let algorithms = [
        Algorithm::Linear,
        Algorithm::Ternary,
        Algorithm::LinearThenTernary,
        Algorithm::DynamicLinear,
    ];
    let mut rng = StdRng::seed_from_u64(3);
    for algorithm in algorithms {
        for _ in 0..8 {
            let peak: f64 = rng.gen_range(-0.3..0.3);
            let p0: f64 = rng.gen_range(-0.2..0.2);
            let mut stage = Stage::at(p0, (-1.0, 1.0));
            let mut searcher = Searcher::new(SearchConfig {
                algorithm,
                low: -0.2,
                high: 0.2,
                step_size: 0.04,
                ..SearchConfig::default()
            });

            let res = searcher.run(&mut stage, &mut triangle(peak), &CancelToken::new());
            assert!(
                stage.visited.iter().all(|&p| (-0.2..=0.2).contains(&p) || p == p0),
                "{algorithm} left the bracket"
            );
            match res {
                Ok(out) => assert_eq!(stage.pos, out.best_position),
                Err(Error::NoImprovement { .. }) => assert_eq!(stage.pos, p0),
                Err(other) => panic!("unexpected error {other}"),
            }
        }
    }
}

#[test]
fn cancel_restores_start() {
    let mut stage = Stage::at(0.25, (0.0, 1.0));
    let mut searcher = Searcher::new(SearchConfig {
        algorithm: Algorithm::Linear,
        low: 0.0,
        high: 1.0,
        step_size: 0.01,
        ..SearchConfig::default()
    });
    let cancel = CancelToken::new();
    let remote = cancel.clone();
    let mut count = 0;
    let mut meter = |p: f64| -> Result<f64> {
        count += 1;
        if count == 10 {
            remote.cancel();
        }
        Ok(p)
    };

    let err = searcher
        .run(&mut stage, &mut meter, &cancel)
        .expect_err("cancelled mid-sweep");
    assert!(matches!(err, Error::Cancelled));
    assert!((stage.pos - 0.25).abs() < 1e-12);
    assert_eq!(searcher.trace().len(), 10);
}
