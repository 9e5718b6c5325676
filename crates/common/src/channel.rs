//! Async channel bridge between Tokio runtime and USB thread

use async_channel::{Receiver, Sender, bounded};
use tuner::{ManagedInfo, TargetInterval, TrackerStatus};

/// Commands from Tokio runtime to USB thread
#[derive(Debug)]
pub enum TunerCommand {
    /// Change the target bInterval at runtime
    SetTargetInterval {
        /// Raw value, clamped by the tracker
        raw: u32,
        /// Channel to send the effective value back
        response: tokio::sync::oneshot::Sender<TargetInterval>,
    },

    /// Report the tracker state
    Status {
        /// Channel to send response back
        response: tokio::sync::oneshot::Sender<TrackerStatus>,
    },

    /// Restore the managed device and stop the USB thread
    Shutdown,
}

/// Events from the USB thread
#[derive(Debug, Clone)]
pub enum TunerEvent {
    /// A controller is now managed
    DeviceManaged {
        device: ManagedInfo,
        /// Whether any endpoint interval was changed
        patched: bool,
    },

    /// The managed controller was released
    DeviceReleased {
        device: ManagedInfo,
        /// Whether original intervals were written back
        restored: bool,
    },

    /// Target interval changed
    TargetChanged { target: TargetInterval },
}

impl From<tuner::Transition> for TunerEvent {
    fn from(transition: tuner::Transition) -> Self {
        match transition {
            tuner::Transition::Acquired { device, patched } => {
                TunerEvent::DeviceManaged { device, patched }
            }
            tuner::Transition::Released { device, restored } => {
                TunerEvent::DeviceReleased { device, restored }
            }
        }
    }
}

/// Handle for Tokio runtime (async)
#[derive(Clone)]
pub struct TunerBridge {
    cmd_tx: Sender<TunerCommand>,
    event_rx: Receiver<TunerEvent>,
}

impl TunerBridge {
    /// Send a command to the USB thread
    pub async fn send_command(&self, cmd: TunerCommand) -> crate::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Receive an event from the USB thread
    pub async fn recv_event(&self) -> crate::Result<TunerEvent> {
        self.event_rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Change the target interval and wait for the effective value
    pub async fn set_target_interval(&self, raw: u32) -> crate::Result<TargetInterval> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send_command(TunerCommand::SetTargetInterval { raw, response: tx })
            .await?;
        rx.await.map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Query the tracker state
    pub async fn status(&self) -> crate::Result<TrackerStatus> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send_command(TunerCommand::Status { response: tx })
            .await?;
        rx.await.map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Handle for USB thread (blocking)
pub struct TunerWorker {
    pub(crate) cmd_rx: Receiver<TunerCommand>,
    /// Event sender (public for USB worker thread to access)
    pub event_tx: Sender<TunerEvent>,
}

impl TunerWorker {
    /// Try to receive a command without blocking
    pub fn try_recv_command(&self) -> Option<TunerCommand> {
        self.cmd_rx.try_recv().ok()
    }

    /// Whether every bridge handle has been dropped
    pub fn is_disconnected(&self) -> bool {
        self.cmd_rx.is_closed()
    }

    /// Refuse further commands and drop the ones already queued
    ///
    /// Dropping a queued command drops its response sender, so callers
    /// awaiting a reply get an error instead of waiting forever.
    pub fn close(&self) {
        self.cmd_rx.close();
        while self.cmd_rx.try_recv().is_ok() {}
    }
}

/// Create the channel bridge between Tokio and USB thread
///
/// Returns (TunerBridge for Tokio, TunerWorker for USB thread)
pub fn create_tuner_bridge() -> (TunerBridge, TunerWorker) {
    let (cmd_tx, cmd_rx) = bounded(32);
    let (event_tx, event_rx) = bounded(64);

    (
        TunerBridge { cmd_tx, event_rx },
        TunerWorker { cmd_rx, event_tx },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_bridge() {
        let (bridge, worker) = create_tuner_bridge();

        // Spawn a thread to simulate USB worker
        let handle = std::thread::spawn(move || {
            loop {
                if let Some(cmd) = worker.try_recv_command() {
                    return matches!(cmd, TunerCommand::Shutdown);
                }
                std::thread::sleep(std::time::Duration::from_millis(5));
            }
        });

        bridge.send_command(TunerCommand::Shutdown).await.unwrap();

        assert!(handle.join().unwrap());
    }

    #[tokio::test]
    async fn test_close_fails_pending_requests() {
        let (bridge, worker) = create_tuner_bridge();

        let pending = tokio::spawn({
            let bridge = bridge.clone();
            async move { bridge.status().await }
        });
        // Let the status request reach the queue
        while worker.cmd_rx.is_empty() {
            tokio::task::yield_now().await;
        }

        worker.close();

        assert!(pending.await.unwrap().is_err());
        assert!(bridge.send_command(TunerCommand::Shutdown).await.is_err());
    }
}
