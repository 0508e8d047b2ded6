//! Publish/subscribe status line shared with any number of displays.

use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_channel::{Receiver, Sender, unbounded};
use serde::{Deserialize, Serialize};

use crate::state::{ControllerState, StatusColor};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub state: ControllerState,
    pub color: StatusColor,
    pub message: String,
}

#[derive(Debug, Default)]
struct Inner {
    subscribers: Vec<Sender<StatusEvent>>,
    last: Option<StatusEvent>,
}

/// Fan-out of status events. A message identical to the previous one is
/// dropped. Disconnected subscribers are pruned on publish.
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    inner: Arc<Mutex<Inner>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<StatusEvent> {
        let (tx, rx) = unbounded();
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribers
            .push(tx);
        rx
    }

    /// Returns `false` when the event repeated the previous one.
    pub fn publish(&self, state: ControllerState, message: impl Into<String>) -> bool {
        let event = StatusEvent {
            state,
            color: state.color(),
            message: message.into(),
        };
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.last.as_ref() == Some(&event) {
            return false;
        }
        inner
            .subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
        inner.last = Some(event);
        true
    }

    pub fn last(&self) -> Option<StatusEvent> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::StatusBoard;
    use crate::state::{ControllerState, StatusColor};

    #[test]
    fn consecutive_duplicates_are_suppressed() {
        let board = StatusBoard::new();
        let rx = board.subscribe();

        assert!(board.publish(ControllerState::Monitoring, "watching"));
        assert!(!board.publish(ControllerState::Monitoring, "watching"));
        assert!(board.publish(ControllerState::Searching, "watching"));
        assert!(board.publish(ControllerState::Monitoring, "watching"));

        let got: Vec<_> = rx.try_iter().collect();
        assert_eq!(got.len(), 3);
        assert_eq!(got[1].color, StatusColor::Orange);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let board = StatusBoard::new();
        let rx = board.subscribe();
        drop(board.subscribe());

        board.publish(ControllerState::Idle, "ready");
        assert_eq!(rx.try_iter().count(), 1);
        assert_eq!(
            board.last().map(|e| e.state),
            Some(ControllerState::Idle)
        );
    }
}
