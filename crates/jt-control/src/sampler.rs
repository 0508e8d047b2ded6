use std::thread;
use std::time::{Duration, Instant};

use jt_core::{CancelToken, Error, ShotRead, SignalSource};
use jt_search::Meter;
use jt_signal::{Classifier, Label, SharedShotStream};
use tracing::{trace, warn};

/// Averages the ratio of `averaging` non-dropped shots at the current position.
///
/// Gives up with [`Error::Starved`] when no non-dropped shot arrives within
/// `timeout`.
///
/// Every shot read is also appended to the shared stream so displays keep
/// updating during a search.
pub struct ShotSampler<'a, S: ?Sized> {
    pub source: &'a mut S,
    pub classifier: &'a Classifier,
    pub stream: &'a SharedShotStream,
    pub cancel: &'a CancelToken,
    pub averaging: usize,
    pub timeout: Duration,
    pub poll: Duration,
}

impl<S: SignalSource + ?Sized> Meter for ShotSampler<'_, S> {
    fn sample(&mut self, position: f64) -> Result<f64, Error> {
        let need = self.averaging.max(1);
        let (mut sum, mut n, mut dropped) = (0.0f64, 0usize, 0usize);
        // Starvation counts from the last admitted shot.
        let mut last_admitted = Instant::now();

        while n < need {
            self.cancel.check()?;
            let waiting = match self.source.read_shot()? {
                ShotRead::Shot(shot) => {
                    self.stream.push(shot);
                    if self.classifier.classify(&shot) == Label::Dropped {
                        dropped += 1;
                        false
                    } else {
                        last_admitted = Instant::now();
                        sum += shot.ratio();
                        n += 1;
                        continue;
                    }
                }
                ShotRead::Waiting => true,
            };

            let waited = last_admitted.elapsed();
            if waited >= self.timeout {
                warn!(position, dropped, "no admissible shot within the sample timeout");
                return Err(Error::Starved {
                    waited_s: waited.as_secs_f64(),
                });
            }
            if waiting {
                thread::sleep(self.poll);
            }
        }

        let mean = sum / n as f64;
        trace!(position, mean, dropped, "search sample");
        Ok(mean)
    }
}
