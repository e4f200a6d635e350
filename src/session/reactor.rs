//! Reactor thread: drains device events and timer ticks into the controller.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{select, tick, unbounded, Receiver, Sender};

use super::SessionController;
use crate::device::DeviceEvent;
use crate::errors::{Result, VaultError};

/// Handle to a running reactor.  Dropping it stops the thread.
pub struct ReactorHandle {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ReactorHandle {
    /// Stop the reactor and wait for it to exit.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("session reactor thread panicked");
            }
        }
    }
}

impl Drop for ReactorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl SessionController {
    /// Spawn the reactor thread.
    ///
    /// Device events are applied in arrival order; `tick_interval`
    /// drives the lockout and auto-lock timers.  The thread exits when
    /// stopped or when the device channel closes.
    pub fn spawn_reactor(
        self: &Arc<Self>,
        device_events: Receiver<DeviceEvent>,
        tick_interval: Duration,
    ) -> Result<ReactorHandle> {
        let (stop_tx, stop_rx) = unbounded::<()>();
        let controller = Arc::clone(self);

        let handle = thread::Builder::new()
            .name("session-reactor".into())
            .spawn(move || {
                let ticker = tick(tick_interval);
                loop {
                    select! {
                        recv(device_events) -> event => match event {
                            Ok(event) => controller.handle_device_event(event),
                            Err(_) => break,
                        },
                        recv(ticker) -> _ => controller.tick(),
                        recv(stop_rx) -> _ => break,
                    }
                }
                tracing::debug!("session reactor stopped");
            })
            .map_err(|e| VaultError::CommandFailed(format!("cannot start session reactor: {e}")))?;

        Ok(ReactorHandle {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }
}
