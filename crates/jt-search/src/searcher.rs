use jt_core::{Actuator, CancelToken, Error};
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn};

use crate::config::{Algorithm, SearchConfig};
use crate::strategy;
use crate::trace::SearchTrace;

/// Intensity measurement at the current actuator position.
///
/// The searcher moves the actuator before each call; `position` is passed for
/// meters that model intensity directly.
pub trait Meter {
    fn sample(&mut self, position: f64) -> Result<f64, Error>;
}

impl<F> Meter for F
where
    F: FnMut(f64) -> Result<f64, Error>,
{
    fn sample(&mut self, position: f64) -> Result<f64, Error> {
        self(position)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub algorithm: Algorithm,
    pub initial_position: f64,
    pub initial_intensity: f64,
    pub best_position: f64,
    pub best_intensity: f64,
    /// Bracket reductions for ternary stages, sweeps for linear ones.
    pub iterations: usize,
}

/// State shared by the strategies during one search.
pub(crate) struct Session<'a, A: ?Sized, P: ?Sized> {
    pub(crate) actuator: &'a mut A,
    pub(crate) meter: &'a mut P,
    pub(crate) cancel: &'a CancelToken,
    pub(crate) trace: &'a mut SearchTrace,
    pub(crate) cfg: &'a SearchConfig,
    pub(crate) initial: f64,
    pub(crate) iterations: usize,
}

impl<A: Actuator + ?Sized, P: Meter + ?Sized> Session<'_, A, P> {
    /// Moves to `position` and measures there.
    pub(crate) fn sample(&mut self, position: f64) -> Result<f64, Error> {
        self.cancel.check()?;
        let (low, high) = (self.cfg.low, self.cfg.high);
        let target = position.clamp(low, high);
        self.actuator.move_to(target, true)?;
        let v = self.meter.sample(target)?;
        self.trace.push(target, v);
        Ok(v)
    }

    pub(crate) fn no_improvement(&self, best: f64) -> Error {
        Error::NoImprovement {
            best,
            initial: self.initial,
        }
    }
}

/// Runs one configured search strategy and keeps the trace of the last run.
#[derive(Debug, Clone, Default)]
pub struct Searcher {
    cfg: SearchConfig,
    trace: SearchTrace,
}

impl Searcher {
    pub fn new(cfg: SearchConfig) -> Self {
        Self {
            cfg,
            trace: SearchTrace::default(),
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.cfg
    }

    pub fn config_mut(&mut self) -> &mut SearchConfig {
        &mut self.cfg
    }

    /// Samples visited by the most recent run, successful or not.
    pub fn trace(&self) -> &SearchTrace {
        &self.trace
    }

    /// Searches the bracket for the intensity maximum.
    ///
    /// On success the actuator is left at the best position. On
    /// [`Error::NoImprovement`] or [`Error::Cancelled`] it is returned to where
    /// it started. Device errors are returned without further moves.
    pub fn run<A, P>(
        &mut self,
        actuator: &mut A,
        meter: &mut P,
        cancel: &CancelToken,
    ) -> Result<SearchOutcome, Error>
    where
        A: Actuator + ?Sized,
        P: Meter + ?Sized,
    {
        let _span = info_span!("search", strategy = %self.cfg.algorithm).entered();
        self.cfg.validate()?;
        actuator.check_target(self.cfg.low)?;
        actuator.check_target(self.cfg.high)?;

        self.trace.clear();
        let p0 = actuator.position()?;
        cancel.check()?;
        let initial = meter.sample(p0)?;
        self.trace.push(p0, initial);
        info!(p0, initial, low = self.cfg.low, high = self.cfg.high, "search started");

        let mut session = Session {
            actuator: &mut *actuator,
            meter,
            cancel,
            trace: &mut self.trace,
            cfg: &self.cfg,
            initial,
            iterations: 0,
        };
        let result = match self.cfg.algorithm {
            Algorithm::Linear => strategy::linear_scan(&mut session),
            Algorithm::Ternary => strategy::ternary_search(&mut session),
            Algorithm::LinearThenTernary => strategy::linear_then_ternary(&mut session),
            Algorithm::DynamicLinear => strategy::dynamic_linear(&mut session),
        };
        let iterations = session.iterations;

        match result {
            Ok((best_position, best_intensity)) => {
                actuator.move_to(best_position, true)?;
                info!(best_position, best_intensity, iterations, "search improved intensity");
                Ok(SearchOutcome {
                    algorithm: self.cfg.algorithm,
                    initial_position: p0,
                    initial_intensity: initial,
                    best_position,
                    best_intensity,
                    iterations,
                })
            }
            Err(err @ (Error::NoImprovement { .. } | Error::Cancelled)) => {
                warn!(%err, p0, "search ended without a new position; restoring");
                actuator.move_to(p0, true)?;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }
}
