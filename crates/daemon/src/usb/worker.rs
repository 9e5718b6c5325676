//! USB worker thread
//!
//! Dedicated thread that runs the libusb event loop, feeds hotplug notices
//! to the tracker, and serves commands from the Tokio runtime. Device resets
//! block, so they happen here and never on the async runtime.

use crate::usb::manager::DeviceManager;
use common::{TunerCommand, TunerWorker};
use rusb::UsbContext;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tuner::{DeviceMatch, TargetInterval};

/// Interval at which the loop checks for commands between libusb passes
const EVENT_TIMEOUT: Duration = Duration::from_millis(100);

/// USB worker thread
pub struct TunerWorkerThread {
    /// Device manager for USB operations
    manager: DeviceManager,
    /// Communication channel with Tokio runtime
    worker: TunerWorker,
}

impl TunerWorkerThread {
    /// Create the worker, scan present devices and register hotplug
    pub fn new(
        worker: TunerWorker,
        matcher: DeviceMatch,
        target: TargetInterval,
    ) -> Result<Self, rusb::Error> {
        let manager = DeviceManager::new(worker.event_tx.clone(), matcher, target)
            .and_then(|mut manager| manager.initialize().map(|()| manager));

        match manager {
            Ok(manager) => Ok(Self { manager, worker }),
            Err(e) => {
                error!("USB worker failed to start: {}", e);
                worker.close();
                Err(e)
            }
        }
    }

    /// Run the worker event loop
    ///
    /// Each pass:
    /// 1. Serves pending commands (non-blocking)
    /// 2. Processes libusb events (with timeout), which queues hotplug notices
    /// 3. Hands queued notices to the tracker
    ///
    /// The loop ends on Shutdown or when the runtime side goes away; either
    /// way the managed device is restored before returning.
    pub fn run(mut self) -> Result<(), rusb::Error> {
        info!("USB worker thread started");

        loop {
            match self.worker.try_recv_command() {
                Some(TunerCommand::Shutdown) => {
                    info!("USB worker shutting down");
                    break;
                }
                Some(cmd) => self.handle_command(cmd),
                None if self.worker.is_disconnected() => {
                    warn!("Command channel closed, shutting down");
                    break;
                }
                None => {}
            }

            match self.manager.context().handle_events(Some(EVENT_TIMEOUT)) {
                Ok(()) => {}
                Err(rusb::Error::Interrupted) => {
                    debug!("USB event handling interrupted");
                }
                Err(e) => {
                    warn!("Error handling USB events: {}", e);
                    std::thread::sleep(EVENT_TIMEOUT);
                }
            }

            self.manager.process_hotplug_notices();
        }

        self.manager.shutdown();
        info!("USB worker thread stopped");
        Ok(())
    }

    /// Handle a command from the Tokio runtime
    fn handle_command(&mut self, cmd: TunerCommand) {
        match cmd {
            TunerCommand::SetTargetInterval { raw, response } => {
                debug!("Setting target interval to {}", raw);
                let target = self.manager.set_target_interval(raw);
                if response.send(target).is_err() {
                    debug!("SetTargetInterval caller went away");
                }
            }

            TunerCommand::Status { response } => {
                let _ = response.send(self.manager.status());
            }

            TunerCommand::Shutdown => {
                // Already handled in main loop
                error!("Shutdown reached command handler");
            }
        }
    }
}

/// Spawn the USB worker thread
///
/// Startup failures (no USB context, hotplug registration) are returned
/// through the join handle.
pub fn spawn_tuner_worker(
    worker: TunerWorker,
    matcher: DeviceMatch,
    target: TargetInterval,
) -> std::io::Result<std::thread::JoinHandle<Result<(), rusb::Error>>> {
    std::thread::Builder::new()
        .name("usb-worker".to_string())
        .spawn(move || {
            let worker_thread = TunerWorkerThread::new(worker, matcher, target)?;
            worker_thread.run()
        })
}
