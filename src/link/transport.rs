//! Byte transports the engine can drive.
//!
//! A transport is handed to the engine already opened. The engine starts its
//! inbound delivery (a separate thread that only pushes bytes into the
//! [`ReceiveBuffer`]), writes frames with explicit timeouts, purges input
//! during resynchronization and tears everything down on shutdown.
//!
//! - [`SerialTransport`] (feature `serial`) drives a real port at 115200 8N1.
//! - [`MockTransport`] replays a scripted device for tests and dry runs.
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use super::rx_buffer::ReceiveBuffer;

/// The engine's only path to the device.
pub trait Transport: Send {
    /// Begin delivering inbound bytes into `sink` from the transport's own thread.
    fn start_io(&mut self, sink: Arc<ReceiveBuffer>) -> io::Result<()>;

    /// Write `data`, returning how many bytes the device side accepted.
    fn write(&mut self, data: &[u8], timeout: Duration) -> io::Result<usize>;

    /// Discard bytes still sitting in the driver/hardware receive buffers.
    fn purge_input(&mut self) -> io::Result<()>;

    /// Stop the delivery thread started by `start_io`.
    fn stop_io(&mut self);

    /// Release the underlying port.
    fn close(&mut self) -> io::Result<()>;
}

#[cfg(feature = "serial")]
pub use serial::SerialTransport;

#[cfg(feature = "serial")]
mod serial {
    use super::*;
    use crate::config::SerialConfig;
    use anyhow::{anyhow, Result};
    use log::{debug, info, warn};
    use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
    use std::io::{Read, Write};
    use std::thread::{self, JoinHandle};

    /// Serial port transport with a background reader thread.
    pub struct SerialTransport {
        port_name: String,
        port: Option<Box<dyn SerialPort>>,
        read_timeout: Duration,
        running: Arc<AtomicBool>,
        reader: Option<JoinHandle<()>>,
    }

    impl SerialTransport {
        /// Open `cfg.port` with the device's fixed framing (8 data bits, no parity, 1 stop bit).
        pub fn open(cfg: &SerialConfig) -> Result<Self> {
            debug!("Opening serial port {} at {} baud", cfg.port, cfg.baud_rate);
            let read_timeout = Duration::from_millis(cfg.read_timeout_ms.max(1));
            let port = serialport::new(cfg.port.as_str(), cfg.baud_rate)
                .data_bits(DataBits::Eight)
                .parity(Parity::None)
                .stop_bits(StopBits::One)
                .flow_control(FlowControl::None)
                .timeout(read_timeout)
                .open()
                .map_err(|e| anyhow!("Failed to open serial port {}: {}", cfg.port, e))?;
            info!("Serial port {} open", cfg.port);
            Ok(Self {
                port_name: cfg.port.clone(),
                port: Some(port),
                read_timeout,
                running: Arc::new(AtomicBool::new(false)),
                reader: None,
            })
        }

        fn port(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
            self.port
                .as_mut()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port closed"))
        }
    }

    impl Transport for SerialTransport {
        fn start_io(&mut self, sink: Arc<ReceiveBuffer>) -> io::Result<()> {
            let mut reader = self.port()?.try_clone().map_err(io::Error::from)?;
            let running = Arc::clone(&self.running);
            running.store(true, Ordering::Release);
            let backoff = self.read_timeout;
            let name = self.port_name.clone();
            let handle = thread::Builder::new()
                .name("loglink-serial-rx".to_string())
                .spawn(move || {
                    let mut buf = [0u8; 256];
                    while running.load(Ordering::Acquire) {
                        match reader.read(&mut buf) {
                            Ok(0) => {}
                            Ok(n) => sink.push(&buf[..n]),
                            Err(ref e)
                                if matches!(
                                    e.kind(),
                                    io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                                ) => {}
                            Err(e) => {
                                warn!("Serial read error on {} (continuing): {}", name, e);
                                sink.report_error(&e);
                                // Avoid a tight error loop while the port is gone.
                                thread::sleep(backoff);
                            }
                        }
                    }
                    debug!("Serial reader for {} stopped", name);
                })?;
            self.reader = Some(handle);
            Ok(())
        }

        fn write(&mut self, data: &[u8], timeout: Duration) -> io::Result<usize> {
            let port = self.port()?;
            port.set_timeout(timeout).map_err(io::Error::from)?;
            let written = port.write(data)?;
            port.flush()?;
            Ok(written)
        }

        fn purge_input(&mut self) -> io::Result<()> {
            self.port()?
                .clear(ClearBuffer::Input)
                .map_err(io::Error::from)
        }

        fn stop_io(&mut self) {
            self.running.store(false, Ordering::Release);
            if let Some(handle) = self.reader.take() {
                let _ = handle.join();
            }
        }

        fn close(&mut self) -> io::Result<()> {
            if self.port.take().is_some() {
                debug!("Serial port {} closed", self.port_name);
            }
            Ok(())
        }
    }
}

/// Device reaction to one host write: the bytes it sends back.
pub type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

#[derive(Default)]
struct MockShared {
    sink: OnceLock<Arc<ReceiveBuffer>>,
    writes: Mutex<Vec<Vec<u8>>>,
    fail_writes: AtomicBool,
    io_running: AtomicBool,
    closed: AtomicBool,
    purges: Mutex<usize>,
}

/// Scripted in-memory device.
///
/// Every host write is recorded and passed to the responder; whatever the
/// responder returns is delivered to the receive buffer before `write`
/// returns, exactly as if the device had answered immediately.
pub struct MockTransport {
    shared: Arc<MockShared>,
    responder: Responder,
}

impl MockTransport {
    /// A device that never answers on its own; feed it through [`MockProbe::inject`].
    pub fn new() -> Self {
        Self::with_responder(|_| Vec::new())
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Vec<u8> + Send + 'static,
    {
        Self {
            shared: Arc::new(MockShared::default()),
            responder: Box::new(responder),
        }
    }

    /// Handle for inspecting and poking the mock after it moved into the engine.
    pub fn probe(&self) -> MockProbe {
        MockProbe {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockTransport {
    fn start_io(&mut self, sink: Arc<ReceiveBuffer>) -> io::Result<()> {
        self.shared
            .sink
            .set(sink)
            .map_err(|_| io::Error::new(io::ErrorKind::AlreadyExists, "mock I/O already started"))?;
        self.shared.io_running.store(true, Ordering::Release);
        Ok(())
    }

    fn write(&mut self, data: &[u8], _timeout: Duration) -> io::Result<usize> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "mock port closed"));
        }
        if self.shared.fail_writes.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock write failure"));
        }
        self.shared
            .writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(data.to_vec());
        let reply = (self.responder)(data);
        if let Some(sink) = self.shared.sink.get() {
            sink.push(&reply);
        }
        Ok(data.len())
    }

    fn purge_input(&mut self) -> io::Result<()> {
        *self.shared.purges.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }

    fn stop_io(&mut self) {
        self.shared.io_running.store(false, Ordering::Release);
    }

    fn close(&mut self) -> io::Result<()> {
        self.shared.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Cloneable view into a [`MockTransport`].
#[derive(Clone)]
pub struct MockProbe {
    shared: Arc<MockShared>,
}

impl MockProbe {
    /// Deliver bytes as if the device had sent them unprompted.
    pub fn inject(&self, data: &[u8]) -> bool {
        match self.shared.sink.get() {
            Some(sink) => {
                sink.push(data);
                true
            }
            None => false,
        }
    }

    /// Simulate a transport-level read failure.
    pub fn inject_error(&self, err: io::Error) -> bool {
        match self.shared.sink.get() {
            Some(sink) => {
                sink.report_error(&err);
                true
            }
            None => false,
        }
    }

    /// Every write so far, one element per `write` call.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.shared
            .writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear_writes(&self) {
        self.shared
            .writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.shared.fail_writes.store(fail, Ordering::Release);
    }

    pub fn purge_count(&self) -> usize {
        *self.shared.purges.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn io_running(&self) -> bool {
        self.shared.io_running.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_records_writes_and_delivers_replies() {
        let mut mock = MockTransport::with_responder(|data| {
            if data == [0x16] {
                vec![0x06]
            } else {
                Vec::new()
            }
        });
        let probe = mock.probe();
        let rx = Arc::new(ReceiveBuffer::new());
        mock.start_io(Arc::clone(&rx)).unwrap();
        assert!(probe.io_running());

        mock.write(&[0x16], Duration::from_millis(1)).unwrap();
        mock.write(&[0x15], Duration::from_millis(1)).unwrap();
        assert_eq!(probe.writes(), vec![vec![0x16], vec![0x15]]);
        assert_eq!(rx.read_byte(Duration::from_millis(1)).unwrap(), 0x06);
        assert_eq!(rx.available(), 0);
    }

    #[test]
    fn mock_write_failures_and_close() {
        let mut mock = MockTransport::new();
        let probe = mock.probe();
        probe.set_fail_writes(true);
        assert!(mock.write(&[1], Duration::from_millis(1)).is_err());
        probe.set_fail_writes(false);
        mock.close().unwrap();
        assert!(probe.is_closed());
        assert!(mock.write(&[1], Duration::from_millis(1)).is_err());
    }
}
