use jt_core::{Actuator, Error};
use tracing::debug;

use crate::searcher::{Meter, Session};

const EPS: f64 = 1e-9;

type Found = Result<(f64, f64), Error>;

/// Samples `lo, lo + step, ...` up to `hi` and returns the best point.
fn sweep<A, P>(s: &mut Session<'_, A, P>, lo: f64, hi: f64, step: f64) -> Found
where
    A: Actuator + ?Sized,
    P: Meter + ?Sized,
{
    let n = ((hi - lo) / step + EPS).floor() as usize;
    let mut best = (lo, f64::NEG_INFINITY);
    for i in 0..=n {
        let p = (lo + i as f64 * step).min(hi);
        let v = s.sample(p)?;
        if v > best.1 {
            best = (p, v);
        }
    }
    s.iterations += 1;
    debug!(step, best_position = best.0, best = best.1, "sweep done");
    Ok(best)
}

/// Full sweeps with a shrinking step until one beats the initial intensity.
pub(crate) fn linear_scan<A, P>(s: &mut Session<'_, A, P>) -> Found
where
    A: Actuator + ?Sized,
    P: Meter + ?Sized,
{
    let (lo, hi) = (s.cfg.low, s.cfg.high);
    let mut step = s.cfg.step_size;
    let mut overall = f64::NEG_INFINITY;
    loop {
        let (p, v) = sweep(s, lo, hi, step)?;
        if v > s.initial {
            return Ok((p, v));
        }
        overall = overall.max(v);
        step -= s.cfg.step_decrement;
        if step < s.cfg.step_floor - EPS {
            return Err(s.no_improvement(overall));
        }
    }
}

/// Iterative ternary reduction; returns the bracket midpoint and its intensity.
fn ternary_once<A, P>(s: &mut Session<'_, A, P>, mut lo: f64, mut hi: f64) -> Found
where
    A: Actuator + ?Sized,
    P: Meter + ?Sized,
{
    while hi - lo > s.cfg.tolerance {
        let third = (hi - lo) / 3.0;
        let m1 = lo + third;
        let m2 = hi - third;
        let v1 = s.sample(m1)?;
        let v2 = s.sample(m2)?;
        if v1 > v2 {
            hi = m2;
        } else {
            lo = m1;
        }
        s.iterations += 1;
    }
    let mid = 0.5 * (lo + hi);
    let v = s.sample(mid)?;
    Ok((mid, v))
}

fn ternary_in<A, P>(s: &mut Session<'_, A, P>, lo: f64, hi: f64) -> Found
where
    A: Actuator + ?Sized,
    P: Meter + ?Sized,
{
    let (p, v) = ternary_once(s, lo, hi)?;
    if v > s.initial {
        return Ok((p, v));
    }

    let margin = s.cfg.ternary_margin * (hi - lo);
    debug!(margin, "ternary search did not improve; retrying on trimmed bracket");
    let (p2, v2) = ternary_once(s, lo + margin, hi - margin)?;
    if v2 > s.initial {
        Ok((p2, v2))
    } else {
        Err(s.no_improvement(v.max(v2)))
    }
}

pub(crate) fn ternary_search<A, P>(s: &mut Session<'_, A, P>) -> Found
where
    A: Actuator + ?Sized,
    P: Meter + ?Sized,
{
    let (lo, hi) = (s.cfg.low, s.cfg.high);
    ternary_in(s, lo, hi)
}

/// Coarse sweep, then ternary refinement within one step of the best bin.
pub(crate) fn linear_then_ternary<A, P>(s: &mut Session<'_, A, P>) -> Found
where
    A: Actuator + ?Sized,
    P: Meter + ?Sized,
{
    let (low, high, step) = (s.cfg.low, s.cfg.high, s.cfg.step_size);
    let (cp, cv) = sweep(s, low, high, step)?;
    let lo = (cp - step).max(low);
    let hi = (cp + step).min(high);

    match ternary_in(s, lo, hi) {
        Ok((p, v)) if v >= cv => Ok((p, v)),
        Ok(_) => Ok((cp, cv)),
        Err(Error::NoImprovement { best, .. }) => {
            if cv > s.initial {
                Ok((cp, cv))
            } else {
                Err(s.no_improvement(best.max(cv)))
            }
        }
        Err(err) => Err(err),
    }
}

/// Single pass whose step halves after a decrease and doubles after an
/// increase, never below the floor.
pub(crate) fn dynamic_linear<A, P>(s: &mut Session<'_, A, P>) -> Found
where
    A: Actuator + ?Sized,
    P: Meter + ?Sized,
{
    let (lo, hi) = (s.cfg.low, s.cfg.high);
    let floor = s.cfg.step_floor.min(s.cfg.step_size);
    let max_step = hi - lo;
    let mut step = s.cfg.step_size;

    let mut pos = lo;
    let mut prev = s.sample(pos)?;
    let mut best = (pos, prev);
    while pos < hi - EPS {
        pos = (pos + step).min(hi);
        let v = s.sample(pos)?;
        if v > best.1 {
            best = (pos, v);
        }
        if v < prev {
            step = (0.5 * step).max(floor);
        } else if v > prev {
            step = (2.0 * step).min(max_step);
        }
        prev = v;
    }
    s.iterations += 1;

    if best.1 > s.initial {
        Ok(best)
    } else {
        Err(s.no_improvement(best.1))
    }
}
