use serde::{Deserialize, Serialize};

/// One visited position and the intensity measured there.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchSample {
    pub position: f64,
    pub intensity: f64,
}

/// Every sample taken by a search, in visiting order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchTrace {
    samples: Vec<SearchSample>,
}

impl SearchTrace {
    pub fn push(&mut self, position: f64, intensity: f64) {
        self.samples.push(SearchSample {
            position,
            intensity,
        });
    }

    pub fn samples(&self) -> &[SearchSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Highest-intensity sample; the earliest wins ties.
    pub fn best(&self) -> Option<SearchSample> {
        self.samples.iter().copied().fold(None, |best, s| match best {
            Some(b) if b.intensity >= s.intensity => Some(b),
            _ => Some(s),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::SearchTrace;

    #[test]
    fn best_prefers_first_of_ties() {
        let mut t = SearchTrace::default();
        assert!(t.best().is_none());
        t.push(0.0, 1.0);
        t.push(0.1, 3.0);
        t.push(0.2, 3.0);
        let b = t.best().expect("non-empty");
        assert_eq!(b.position, 0.1);
        assert_eq!(t.len(), 3);
    }
}
