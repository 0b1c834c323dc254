//! Receive buffer between the transport's delivery thread and the engine.
//!
//! The delivery thread only appends bytes (or reports a fault); the engine
//! is the single reader and blocks on a condition variable until enough
//! bytes are present, a fault is reported, or the deadline passes.
use std::collections::VecDeque;
use std::io;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::trace;

use super::error::{LinkError, LinkResult};
use crate::logutil::hex_snippet;

#[derive(Debug, Default)]
struct RxInner {
    bytes: VecDeque<u8>,
    /// Set when the transport reports a read failure; cleared by the next push.
    fault: Option<(io::ErrorKind, String)>,
    /// Latched by `close`; every wait ends and reads report cancellation.
    closed: bool,
}

impl RxInner {
    fn take(&mut self, n: usize) -> Vec<u8> {
        self.bytes.drain(..n).collect()
    }

    fn fault_error(&self) -> Option<LinkError> {
        if self.closed {
            return Some(LinkError::Cancelled);
        }
        self.fault
            .as_ref()
            .map(|(kind, msg)| LinkError::TransportIo(io::Error::new(*kind, msg.clone())))
    }
}

/// Thread-safe byte FIFO with a blocking, all-or-nothing read.
#[derive(Debug, Default)]
pub struct ReceiveBuffer {
    inner: Mutex<RxInner>,
    readable: Condvar,
}

impl ReceiveBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RxInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append bytes delivered by the transport and wake the reader.
    /// A successful delivery also clears any previously reported fault.
    pub fn push(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        trace!("rx {} bytes: {}", data.len(), hex_snippet(data, 32));
        let mut inner = self.lock();
        inner.bytes.extend(data.iter().copied());
        inner.fault = None;
        drop(inner);
        self.readable.notify_all();
    }

    /// Record a transport read failure. Reads and flushes fail until the next push.
    pub fn report_error(&self, err: &io::Error) {
        let mut inner = self.lock();
        inner.fault = Some((err.kind(), err.to_string()));
        drop(inner);
        self.readable.notify_all();
    }

    /// Wake a parked reader without delivering bytes.
    pub fn nudge(&self) {
        self.readable.notify_all();
    }

    /// Release the reader for shutdown. Blocked and later reads fail with
    /// `Cancelled` instead of waiting out their timeout.
    pub fn close(&self) {
        self.lock().closed = true;
        self.readable.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn available(&self) -> usize {
        self.lock().bytes.len()
    }

    pub fn is_faulted(&self) -> bool {
        self.lock().fault.is_some()
    }

    /// Block until exactly `n` bytes can be taken or `timeout` elapses.
    ///
    /// Never returns a partial read: on timeout the buffered bytes stay put.
    /// Only one thread may wait at a time.
    pub fn read_bytes(&self, n: usize, timeout: Duration) -> LinkResult<Vec<u8>> {
        let guard = self.lock();
        let (mut inner, _) = self
            .readable
            .wait_timeout_while(guard, timeout, |s| {
                s.bytes.len() < n && s.fault.is_none() && !s.closed
            })
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(err) = inner.fault_error() {
            return Err(err);
        }
        if inner.bytes.len() < n {
            return Err(LinkError::Timeout {
                wanted: n,
                available: inner.bytes.len(),
                waited_ms: timeout.as_millis() as u64,
            });
        }
        Ok(inner.take(n))
    }

    /// Convenience for `read_bytes(1, timeout)`.
    pub fn read_byte(&self, timeout: Duration) -> LinkResult<u8> {
        let bytes = self.read_bytes(1, timeout)?;
        Ok(bytes[0])
    }

    /// Park until at least one byte is buffered, a fault is reported, a
    /// nudge arrives, or `timeout` passes. Returns whether bytes are waiting.
    pub fn wait_readable(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        if !guard.bytes.is_empty() || guard.closed {
            return !guard.bytes.is_empty();
        }
        let (inner, _) = self
            .readable
            .wait_timeout(guard, timeout)
            .unwrap_or_else(PoisonError::into_inner);
        !inner.bytes.is_empty()
    }

    /// Drop everything buffered. Fails while the transport is faulted.
    /// Purging the hardware buffers is the transport's job; the engine does both.
    pub fn flush(&self) -> LinkResult<()> {
        let mut inner = self.lock();
        if let Some(err) = inner.fault_error() {
            return Err(err);
        }
        inner.bytes.clear();
        Ok(())
    }
}
