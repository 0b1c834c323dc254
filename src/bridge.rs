//! Application-facing entry points.
//!
//! [`DeviceLog`] owns the engine thread; [`LogHandle`] is the cheap, cloneable
//! view the rest of the application appends through.
//!
//! ```rust,no_run
//! use loglink::bridge::DeviceLog;
//! use loglink::config::LinkConfig;
//! use loglink::link::MockTransport;
//!
//! # fn main() -> anyhow::Result<()> {
//! let link = DeviceLog::start(MockTransport::new(), LinkConfig::default())?;
//! let log = link.handle();
//! log.error("pump", "pressure low", "inlet pressure 0.4 bar below threshold");
//! link.shutdown();
//! # Ok(())
//! # }
//! ```
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Result};
use log::{debug, info, warn};

use crate::config::LinkConfig;
use crate::display::{DisplayState, LinkState};
use crate::link::{ControlMessage, ProtocolEngine, ReceiveBuffer, Transport};
use crate::metrics::{LinkMetrics, MetricsSnapshot};
use crate::store::{LogEntry, Severity};

const ENGINE_THREAD_NAME: &str = "loglink-engine";

/// A running link to one display device.
///
/// Dropping it shuts the link down and waits for the engine thread.
pub struct DeviceLog {
    handle: LogHandle,
    metrics: Arc<LinkMetrics>,
    control_tx: Sender<ControlMessage>,
    worker: Option<JoinHandle<()>>,
}

impl DeviceLog {
    /// Start transport I/O and spawn the protocol engine.
    pub fn start<T>(mut transport: T, config: LinkConfig) -> Result<Self>
    where
        T: Transport + 'static,
    {
        config.validate()?;
        let rx = Arc::new(ReceiveBuffer::new());
        transport
            .start_io(Arc::clone(&rx))
            .map_err(|e| anyhow!("Failed to start transport I/O: {}", e))?;

        let state = Arc::new(Mutex::new(LinkState::new(config.default_line_len)));
        let metrics = Arc::new(LinkMetrics::new());
        let (control_tx, control_rx) = mpsc::channel();
        let engine = ProtocolEngine::new(
            transport,
            Arc::clone(&rx),
            Arc::clone(&state),
            control_rx,
            config,
            Arc::clone(&metrics),
        );

        let worker = thread::Builder::new()
            .name(ENGINE_THREAD_NAME.to_string())
            .spawn(move || engine.run())
            .map_err(|e| anyhow!("Failed to spawn {} thread: {}", ENGINE_THREAD_NAME, e))?;
        info!("Device log link started");

        Ok(Self {
            handle: LogHandle { state, rx },
            metrics,
            control_tx,
            worker: Some(worker),
        })
    }

    pub fn handle(&self) -> LogHandle {
        self.handle.clone()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Whether the engine thread already exited (shutdown or a fatal transport error).
    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().map_or(true, |w| w.is_finished())
    }

    /// Stop the engine and wait for it to release the transport.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        // The engine may already be gone; a closed channel is fine.
        let _ = self.control_tx.send(ControlMessage::Shutdown);
        // Ends any read in progress so the engine sees the request at once.
        self.handle.rx.close();
        if worker.join().is_err() {
            warn!("Engine thread panicked during shutdown");
        }
        debug!("Device log link stopped: {:?}", self.metrics.snapshot());
    }
}

impl Drop for DeviceLog {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Cloneable application handle. Appends never block on the device.
#[derive(Clone)]
pub struct LogHandle {
    state: Arc<Mutex<LinkState>>,
    rx: Arc<ReceiveBuffer>,
}

impl LogHandle {
    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record an entry and return its id.
    pub fn append(&self, tag: &str, short_msg: &str, long_msg: &str, severity: Severity) -> u16 {
        let id = self.lock().append(tag, short_msg, long_msg, severity);
        // Wake an idle engine so the entry goes out promptly.
        self.rx.nudge();
        id
    }

    pub fn error(&self, tag: &str, short_msg: &str, long_msg: &str) -> u16 {
        self.append(tag, short_msg, long_msg, Severity::Error)
    }

    pub fn warn(&self, tag: &str, short_msg: &str, long_msg: &str) -> u16 {
        self.append(tag, short_msg, long_msg, Severity::Warn)
    }

    pub fn info(&self, tag: &str, short_msg: &str, long_msg: &str) -> u16 {
        self.append(tag, short_msg, long_msg, Severity::Info)
    }

    pub fn debug(&self, tag: &str, short_msg: &str, long_msg: &str) -> u16 {
        self.append(tag, short_msg, long_msg, Severity::Debug)
    }

    /// Single-text forms: `msg` serves as both the short and the long message.
    pub fn error_short(&self, tag: &str, msg: &str) -> u16 {
        self.error(tag, msg, msg)
    }

    pub fn warn_short(&self, tag: &str, msg: &str) -> u16 {
        self.warn(tag, msg, msg)
    }

    pub fn info_short(&self, tag: &str, msg: &str) -> u16 {
        self.info(tag, msg, msg)
    }

    pub fn debug_short(&self, tag: &str, msg: &str) -> u16 {
        self.debug(tag, msg, msg)
    }

    pub fn len(&self) -> usize {
        self.lock().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().store.is_empty()
    }

    pub fn is_synced(&self) -> bool {
        self.lock().ready
    }

    pub fn display_state(&self) -> DisplayState {
        self.lock().display.state()
    }

    pub fn line_len(&self) -> u8 {
        self.lock().line_len
    }

    pub fn entry(&self, index: usize) -> Option<Arc<LogEntry>> {
        self.lock().store.get(index).cloned()
    }

    /// Entries still waiting to be sent.
    pub fn pending(&self) -> usize {
        self.lock().display.queue().len()
    }
}
