use std::collections::VecDeque;

use jt_signal::Label;

/// Counts of each label over the most recent shots.
#[derive(Debug, Clone)]
pub struct LabelWindow {
    len: usize,
    labels: VecDeque<Label>,
    counts: [usize; 4],
}

impl LabelWindow {
    pub fn new(len: usize) -> Self {
        let len = len.max(1);
        Self {
            len,
            labels: VecDeque::with_capacity(len),
            counts: [0; 4],
        }
    }

    pub fn push(&mut self, label: Label) {
        if self.labels.len() == self.len
            && let Some(old) = self.labels.pop_front()
        {
            self.counts[old.index()] -= 1;
        }
        self.labels.push_back(label);
        self.counts[label.index()] += 1;
    }

    pub fn count(&self, label: Label) -> usize {
        self.counts[label.index()]
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn clear(&mut self) {
        self.labels.clear();
        self.counts = [0; 4];
    }
}
