use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock};

use jt_core::Shot;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CAPACITY: usize = 300;

/// Bounded history of shots kept as four parallel ring buffers.
#[derive(Debug, Clone)]
pub struct ShotStream {
    capacity: usize,
    t: VecDeque<f64>,
    i0: VecDeque<f64>,
    diff: VecDeque<f64>,
    ratio: VecDeque<f64>,
    pushed: u64,
}

impl Default for ShotStream {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ShotStream {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            t: VecDeque::with_capacity(capacity),
            i0: VecDeque::with_capacity(capacity),
            diff: VecDeque::with_capacity(capacity),
            ratio: VecDeque::with_capacity(capacity),
            pushed: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.t.len()
    }

    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }

    /// Total number of shots ever pushed.
    pub fn pushed(&self) -> u64 {
        self.pushed
    }

    pub fn push(&mut self, shot: Shot) {
        if self.t.len() == self.capacity {
            self.t.pop_front();
            self.i0.pop_front();
            self.diff.pop_front();
            self.ratio.pop_front();
        }
        self.t.push_back(shot.t);
        self.i0.push_back(shot.i0);
        self.diff.push_back(shot.diff);
        self.ratio.push_back(shot.ratio());
        self.pushed += 1;
    }

    pub fn last(&self) -> Option<Shot> {
        Some(Shot::new(
            *self.t.back()?,
            *self.i0.back()?,
            *self.diff.back()?,
        ))
    }

    pub fn clear(&mut self) {
        self.t.clear();
        self.i0.clear();
        self.diff.clear();
        self.ratio.clear();
    }

    /// Copies of all buffers, oldest first.
    pub fn snapshot(&self) -> ShotSnapshot {
        ShotSnapshot {
            t: self.t.iter().copied().collect(),
            i0: self.i0.iter().copied().collect(),
            diff: self.diff.iter().copied().collect(),
            ratio: self.ratio.iter().copied().collect(),
        }
    }

    /// Averages over the newest `window` shots.
    pub fn rolling_mean(&self, window: usize) -> Option<ShotAverages> {
        let n = window.min(self.len());
        if n == 0 {
            return None;
        }
        let skip = self.len() - n;
        let mean = |buf: &VecDeque<f64>| buf.iter().skip(skip).sum::<f64>() / n as f64;
        Some(ShotAverages {
            count: n,
            i0: mean(&self.i0),
            diff: mean(&self.diff),
            ratio: mean(&self.ratio),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShotAverages {
    pub count: usize,
    pub i0: f64,
    pub diff: f64,
    pub ratio: f64,
}

/// Consistent copy of a [`ShotStream`]; all vectors have the same length.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShotSnapshot {
    pub t: Vec<f64>,
    pub i0: Vec<f64>,
    pub diff: Vec<f64>,
    pub ratio: Vec<f64>,
}

impl ShotSnapshot {
    pub fn len(&self) -> usize {
        self.t.len()
    }

    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }

    pub fn averages(&self, k: usize) -> Option<ShotAverages> {
        let n = k.min(self.len());
        if n == 0 {
            return None;
        }
        let tail = |v: &[f64]| v[v.len() - n..].iter().sum::<f64>() / n as f64;
        Some(ShotAverages {
            count: n,
            i0: tail(&self.i0),
            diff: tail(&self.diff),
            ratio: tail(&self.ratio),
        })
    }

    /// Ratio samples with `t` no older than `span` before the newest shot.
    pub fn ratio_since(&self, span: f64) -> Vec<(f64, f64)> {
        let Some(&newest) = self.t.last() else {
            return Vec::new();
        };
        self.t
            .iter()
            .zip(&self.ratio)
            .filter(|(t, _)| newest - **t <= span)
            .map(|(&t, &r)| (t, r))
            .collect()
    }
}

/// [`ShotStream`] behind a lock: one writer, any number of snapshot readers.
#[derive(Debug, Clone, Default)]
pub struct SharedShotStream(Arc<RwLock<ShotStream>>);

impl SharedShotStream {
    pub fn new(capacity: usize) -> Self {
        Self(Arc::new(RwLock::new(ShotStream::new(capacity))))
    }

    pub fn push(&self, shot: Shot) {
        self.0
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(shot);
    }

    pub fn snapshot(&self) -> ShotSnapshot {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    pub fn rolling_mean(&self, window: usize) -> Option<ShotAverages> {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .rolling_mean(window)
    }

    pub fn len(&self) -> usize {
        self.0.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use jt_core::Shot;

    use super::{SharedShotStream, ShotStream};

    #[test]
    fn bounded_and_ordered() {
        let mut s = ShotStream::new(5);
        for k in 1..=12 {
            s.push(Shot::new(k as f64, 1.0, 0.5));
            assert!(s.len() <= 5);
        }
        let snap = s.snapshot();
        assert_eq!(snap.len(), 5);
        // After K pushes the oldest retained shot is push K - capacity + 1.
        assert_eq!(snap.t[0], 8.0);
        assert_eq!(snap.t[4], 12.0);
        assert_eq!(s.pushed(), 12);
    }

    #[test]
    fn snapshot_buffers_align() {
        let mut s = ShotStream::new(3);
        s.push(Shot::new(0.0, 2.0, 1.0));
        s.push(Shot::new(1.0, 0.0, 1.0));
        let snap = s.snapshot();
        assert_eq!(snap.i0.len(), snap.t.len());
        assert_eq!(snap.diff.len(), snap.t.len());
        assert_eq!(snap.ratio, vec![0.5, 0.0]);
    }

    #[test]
    fn rolling_mean_uses_newest() {
        let mut s = ShotStream::new(10);
        for k in 0..6 {
            s.push(Shot::new(k as f64, k as f64, 0.0));
        }
        let avg = s.rolling_mean(2).expect("non-empty");
        assert_eq!(avg.count, 2);
        assert!((avg.i0 - 4.5).abs() < 1e-12);

        let all = s.snapshot().averages(100).expect("non-empty");
        assert_eq!(all.count, 6);
        assert!((all.i0 - 2.5).abs() < 1e-12);
        assert!(ShotStream::new(4).rolling_mean(3).is_none());
    }

    #[test]
    fn ratio_history_span() {
        let mut s = ShotStream::new(10);
        for k in 0..10 {
            s.push(Shot::new(k as f64 * 0.5, 1.0, 0.25));
        }
        let recent = s.snapshot().ratio_since(1.0);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].0, 3.5);
    }

    #[test]
    fn shared_stream_readers_see_whole_shots() {
        let stream = SharedShotStream::new(50);
        let writer = stream.clone();
        let handle = thread::spawn(move || {
            for k in 0..500 {
                writer.push(Shot::new(k as f64, 2.0, 1.0));
            }
        });
        for _ in 0..100 {
            let snap = stream.snapshot();
            assert_eq!(snap.t.len(), snap.ratio.len());
            assert!(snap.ratio.iter().all(|&r| r == 0.5));
        }
        handle.join().expect("writer thread");
        assert_eq!(stream.len(), 50);
    }
}
