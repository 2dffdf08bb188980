use crate::error::{CompressionError, Result};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Shared pause switch checked by workers between jobs.
#[derive(Debug)]
pub struct PauseGate {
    paused: watch::Sender<bool>,
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseGate {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self { paused }
    }

    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    /// Flips the gate and returns whether it is now paused.
    pub fn toggle(&self) -> bool {
        let mut now_paused = false;
        self.paused.send_modify(|paused| {
            *paused = !*paused;
            now_paused = *paused;
        });
        now_paused
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Returns once the gate is open, or `Cancelled` if `cancel` fires first.
    pub async fn wait_while_paused(&self, cancel: &CancellationToken) -> Result<()> {
        let mut rx = self.paused.subscribe();
        let opened = async move {
            let _ = rx.wait_for(|paused| !*paused).await;
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CompressionError::Cancelled),
            _ = opened => Ok(()),
        }
    }
}
