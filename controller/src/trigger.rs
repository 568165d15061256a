use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

/// Requests an immediate cycle. At most one request is ever queued, so a
/// burst of thermostat changes collapses into a single extra cycle.
#[derive(Clone)]
pub struct CycleTrigger {
    tx: mpsc::Sender<()>,
}

pub struct CycleRequests {
    rx: mpsc::Receiver<()>,
}

pub fn channel() -> (CycleTrigger, CycleRequests) {
    let (tx, rx) = mpsc::channel(1);
    (CycleTrigger { tx }, CycleRequests { rx })
}

impl CycleTrigger {
    /// Returns `false` when a cycle was already queued.
    pub fn request(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) => false,
            Err(TrySendError::Closed(())) => {
                warn!("cycle requested after the control loop stopped");
                false
            }
        }
    }
}

impl CycleRequests {
    pub async fn recv(&mut self) -> Option<()> {
        self.rx.recv().await
    }
}
