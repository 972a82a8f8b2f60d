use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;

use crate::overlay::error::FailureReason;
use crate::overlay::state::SessionId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayEventKind {
    Tracking,
    Failed { reason: FailureReason },
    TargetLost,
    /// Container hidden; sync suspended.
    Paused,
    Resumed,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayEvent {
    pub session: SessionId,
    pub kind: OverlayEventKind,
}

/// Fan-out of overlay events to every live subscriber.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<OverlayEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<OverlayEvent> {
        let (tx, rx) = channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(tx);
        rx
    }

    pub fn publish(&self, session: SessionId, kind: OverlayEventKind) {
        let event = OverlayEvent { session, kind };
        tracing::debug!(session = %event.session, kind = ?event.kind, "overlay event");
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|p| p.into_inner());
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
