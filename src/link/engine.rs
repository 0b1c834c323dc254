//! The protocol engine: handshake, command dispatch and message delivery.
//!
//! One engine runs on one dedicated thread and is the only reader of the
//! [`ReceiveBuffer`] and the only writer of the [`Transport`], so every
//! exchange below is strictly sequential.
//!
//! ```text
//! Handshaking ──ENQ + sync──▶ Synced ──shutdown──▶ Closing
//!      │                                              ▲
//!      └──────────── shutdown / transport error ──────┘
//! ```
//!
//! While Synced, each loop iteration reads at most one inbound command and
//! transmits at most one queued entry. A device ENQ at a command boundary
//! renegotiates the session without leaving Synced.
use std::io;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, error, info, trace, warn};

use super::codec::{
    decode_sync_frame, Command, CommandHeader, MessageFrame, COMMAND_HEADER_LEN, SYNC_FRAME_LEN,
};
use super::control::{describe, ACK, CAN, ENQ, NAK, SOH, SYN, VERSION};
use super::error::{LinkError, LinkResult};
use super::rx_buffer::ReceiveBuffer;
use super::transport::Transport;
use super::ControlMessage;
use crate::config::LinkConfig;
use crate::display::LinkState;
use crate::logutil::{escape_log, hex_snippet};
use crate::metrics::LinkMetrics;

/// Lifecycle phase of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    /// Waiting for the device's ENQ.
    Handshaking,
    /// Session established; serving commands and messages.
    Synced,
    /// Shutting down. Terminal.
    Closing,
}

/// Outcome of offering one message to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Header and body were both acknowledged.
    Delivered,
    /// The device answered CAN; the message is not retried.
    Cancelled,
    /// The retransmit cap was reached.
    Dropped,
    /// A transport error or shutdown interrupted the exchange.
    Aborted,
}

/// A failed sync attempt, remembering whether the device had already ACKed our SYN.
struct SyncFailure {
    error: LinkError,
    past_ack: bool,
}

impl SyncFailure {
    fn before_ack(error: LinkError) -> Self {
        Self {
            error,
            past_ack: false,
        }
    }

    fn after_ack(error: LinkError) -> Self {
        Self {
            error,
            past_ack: true,
        }
    }
}

pub struct ProtocolEngine<T: Transport> {
    transport: T,
    rx: Arc<ReceiveBuffer>,
    state: Arc<Mutex<LinkState>>,
    control_rx: Receiver<ControlMessage>,
    config: LinkConfig,
    metrics: Arc<LinkMetrics>,
    phase: EnginePhase,
    cancelled: bool,
}

impl<T: Transport> ProtocolEngine<T> {
    /// Build an engine over a transport whose I/O already feeds `rx`.
    pub fn new(
        transport: T,
        rx: Arc<ReceiveBuffer>,
        state: Arc<Mutex<LinkState>>,
        control_rx: Receiver<ControlMessage>,
        config: LinkConfig,
        metrics: Arc<LinkMetrics>,
    ) -> Self {
        Self {
            transport,
            rx,
            state,
            control_rx,
            config,
            metrics,
            phase: EnginePhase::Handshaking,
            cancelled: false,
        }
    }

    pub fn phase(&self) -> EnginePhase {
        self.phase
    }

    /// Run until shutdown is requested or the transport fails during the handshake.
    pub fn run(mut self) {
        info!("Protocol engine started");
        loop {
            match self.phase {
                EnginePhase::Handshaking => self.handshake_step(),
                EnginePhase::Synced => self.synced_step(),
                EnginePhase::Closing => break,
            }
        }
        self.close();
    }

    fn lock_state(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Latch and report a pending shutdown request.
    fn check_cancelled(&mut self) -> bool {
        if !self.cancelled {
            match self.control_rx.try_recv() {
                Ok(ControlMessage::Shutdown) | Err(TryRecvError::Disconnected) => {
                    self.cancelled = true;
                }
                Err(TryRecvError::Empty) => {}
            }
        }
        self.cancelled
    }

    /// Sleep for `duration` unless shutdown arrives first.
    fn pause(&mut self, duration: Duration) -> LinkResult<()> {
        if self.cancelled {
            return Err(LinkError::Cancelled);
        }
        match self.control_rx.recv_timeout(duration) {
            Ok(ControlMessage::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                self.cancelled = true;
                Err(LinkError::Cancelled)
            }
            Err(RecvTimeoutError::Timeout) => Ok(()),
        }
    }

    // ---- raw I/O helpers ----------------------------------------------------

    fn write_bytes(&mut self, data: &[u8], timeout: Duration) -> LinkResult<()> {
        trace!("tx {} bytes: {}", data.len(), hex_snippet(data, 32));
        let written = self.transport.write(data, timeout)?;
        if written < data.len() {
            return Err(LinkError::TransportIo(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short write: {} of {} bytes", written, data.len()),
            )));
        }
        Ok(())
    }

    fn send_control(&mut self, byte: u8) -> LinkResult<()> {
        let timeout = self.config.control_write_timeout();
        self.write_bytes(&[byte], timeout)
    }

    fn write_frame(&mut self, frame: &[u8]) -> LinkResult<()> {
        let timeout = self.config.frame_write_timeout();
        self.write_bytes(frame, timeout)
    }

    /// Drop buffered input on both our side and the transport's.
    fn flush(&mut self) -> LinkResult<()> {
        self.rx.flush()?;
        self.transport.purge_input()?;
        Ok(())
    }

    fn send_nak(&mut self) -> LinkResult<()> {
        self.send_control(NAK)?;
        self.metrics.inc_naks();
        self.flush()
    }

    // ---- handshake ------------------------------------------------------------

    /// One poll of the Handshaking phase.
    pub fn handshake_step(&mut self) {
        if self.check_cancelled() {
            self.phase = EnginePhase::Closing;
            return;
        }
        let poll = self.config.handshake_poll();
        match self.rx.read_byte(poll) {
            Ok(ENQ) => match self.sync() {
                Ok(()) => self.phase = EnginePhase::Synced,
                Err(LinkError::Cancelled) => self.phase = EnginePhase::Closing,
                Err(LinkError::TransportIo(e)) => {
                    error!("Transport failed during handshake: {}", e);
                    self.metrics.inc_io_errors();
                    self.phase = EnginePhase::Closing;
                }
                Err(e) => warn!("{}; waiting for the next ENQ", e),
            },
            Ok(other) => {
                debug!("Expected ENQ, got {}; sending NAK", describe(other));
                if let Err(LinkError::TransportIo(e)) = self.send_nak() {
                    error!("Transport failed during handshake: {}", e);
                    self.metrics.inc_io_errors();
                    self.phase = EnginePhase::Closing;
                }
            }
            // Nothing yet; the device has not asked for a session.
            Err(LinkError::Timeout { .. }) => {}
            Err(LinkError::Cancelled) => self.phase = EnginePhase::Closing,
            Err(LinkError::TransportIo(e)) => {
                error!("Transport failed while waiting for ENQ: {}", e);
                self.metrics.inc_io_errors();
                self.phase = EnginePhase::Closing;
            }
            Err(e) => debug!("Handshake poll: {}", e),
        }
    }

    /// Run the SYN/ACK/line-length exchange, retrying with backoff.
    ///
    /// Returns `SyncExhausted` once `sync_max_attempts` attempts failed;
    /// transport errors and shutdown are returned immediately.
    pub fn sync(&mut self) -> LinkResult<()> {
        let attempts = self.config.sync_max_attempts.max(1);
        for attempt in 1..=attempts {
            if self.check_cancelled() {
                return Err(LinkError::Cancelled);
            }
            match self.sync_attempt() {
                Ok(line_len) => {
                    self.metrics.inc_syncs();
                    info!("Synced with device (line length {})", line_len);
                    return Ok(());
                }
                Err(SyncFailure { error, .. }) if !error.is_recoverable() => return Err(error),
                Err(SyncFailure { error, past_ack }) => {
                    warn!("Sync attempt {}/{} failed: {}", attempt, attempts, error);
                    if past_ack {
                        self.send_nak()?;
                    } else {
                        self.flush()?;
                    }
                    if attempt < attempts {
                        self.pause(self.config.sync_backoff(attempt))?;
                    }
                }
            }
        }
        Err(LinkError::SyncExhausted { attempts })
    }

    fn sync_attempt(&mut self) -> Result<u8, SyncFailure> {
        self.flush().map_err(SyncFailure::before_ack)?;
        self.lock_state().reset_session();

        self.send_control(SYN).map_err(SyncFailure::before_ack)?;
        let reply = self
            .rx
            .read_byte(self.config.sync_ack_timeout())
            .map_err(SyncFailure::before_ack)?;
        if reply != ACK {
            return Err(SyncFailure::before_ack(LinkError::violation(format!(
                "expected ACK after SYN, got {}",
                describe(reply)
            ))));
        }

        let frame = self
            .rx
            .read_bytes(SYNC_FRAME_LEN, self.config.sync_frame_timeout())
            .map_err(SyncFailure::after_ack)?;
        let line_len = decode_sync_frame(&frame).map_err(SyncFailure::after_ack)?;
        self.send_control(ACK).map_err(SyncFailure::after_ack)?;

        self.lock_state().mark_synced(line_len);
        self.flush().map_err(SyncFailure::after_ack)?;
        Ok(line_len)
    }

    // ---- steady state ---------------------------------------------------------

    /// One iteration of the Synced loop.
    pub fn synced_step(&mut self) {
        if self.check_cancelled() {
            self.phase = EnginePhase::Closing;
            return;
        }

        let mut busy = false;
        if self.rx.available() > 0 {
            busy = true;
            self.read_command();
            if self.phase != EnginePhase::Synced {
                return;
            }
        }

        let (next, line_len) = {
            let mut state = self.lock_state();
            (state.display.next_outgoing(), state.line_len)
        };
        if let Some(entry) = next {
            busy = true;
            self.deliver(&MessageFrame::short(&entry, line_len));
        }

        if !busy {
            self.rx.wait_readable(self.config.idle_poll());
        }
    }

    /// Read one inbound command and act on it. Malformed frames are NAKed and dropped;
    /// the device is responsible for sending them again.
    pub fn read_command(&mut self) {
        match self.receive_command() {
            Ok(Some(command)) => self.dispatch(command),
            Ok(None) => {}
            Err(LinkError::Cancelled) => self.phase = EnginePhase::Closing,
            Err(LinkError::TransportIo(e)) => {
                warn!("Command read aborted: {}", e);
                self.metrics.inc_io_errors();
            }
            Err(e) => {
                warn!("Dropping malformed command: {}", e);
                if let Err(nak_err) = self.send_nak() {
                    debug!("NAK not sent: {}", nak_err);
                }
            }
        }
    }

    fn receive_command(&mut self) -> LinkResult<Option<Command>> {
        let lead = self.rx.read_byte(self.config.command_lead_timeout())?;
        if lead == ENQ {
            info!("Device requested a resync");
            match self.sync() {
                Ok(()) => {}
                Err(LinkError::SyncExhausted { attempts }) => {
                    warn!(
                        "Resync abandoned after {} attempts; waiting for the device to retry",
                        attempts
                    );
                }
                Err(e) => return Err(e),
            }
            return Ok(None);
        }
        if lead != SOH {
            return Err(LinkError::violation(format!(
                "command must start with SOH, got {}",
                describe(lead)
            )));
        }

        let body_timeout = self.config.command_body_timeout();
        let raw_header = self.rx.read_bytes(COMMAND_HEADER_LEN, body_timeout)?;
        let header = CommandHeader::decode(&raw_header)?;
        if header.version != VERSION {
            debug!(
                "Command {:?} carries version {}, host speaks {}",
                header.code as char, header.version, VERSION
            );
        }
        self.send_control(ACK)?;

        let body = self.rx.read_bytes(header.body_len(), body_timeout)?;
        let payload = header.payload(&body)?;
        let command = Command::parse(header.code, payload)?;
        self.send_control(ACK)?;
        Ok(Some(command))
    }

    /// Apply a decoded command to the display state.
    pub fn dispatch(&mut self, command: Command) {
        self.metrics.inc_commands();
        match command {
            Command::Page { start, count } => {
                let queued = self.lock_state().enter_page(start, count);
                debug!("Page view from {} (count {}): {} entries queued", start, count, queued);
            }
            Command::Expand { id } => {
                let entry = self.lock_state().enter_expanded(id);
                match entry {
                    Some(entry) => {
                        debug!("Expanded view of entry {} (requested {})", entry.id, id);
                        self.deliver(&MessageFrame::expanded(&entry));
                    }
                    None => debug!("Expanded view of {} requested but the store is empty", id),
                }
            }
            Command::Resume => {
                let queued = self.lock_state().resume_scroll();
                debug!("Scroll view resumed (newest entry queued: {})", queued);
            }
            Command::Unknown { code } => {
                debug!("Ignoring unknown command 0x{:02x}", code);
            }
        }
    }

    // ---- message delivery -----------------------------------------------------

    /// Offer a message until the device ACKs or CANs it.
    ///
    /// Any other answer (including silence) retransmits the identical frame,
    /// without limit unless `max_retransmits` is configured. Shutdown is
    /// honoured between attempts.
    pub fn deliver(&mut self, frame: &MessageFrame) -> Delivery {
        let header = frame.header();
        let body = frame.body();
        self.metrics.inc_sent();
        trace!(
            "Offering message {} ({:?}): {}",
            frame.id,
            frame.kind,
            escape_log(&String::from_utf8_lossy(&frame.text))
        );

        let mut retransmits: u32 = 0;
        loop {
            match self.offer_message(&header, &body) {
                Ok(Delivery::Cancelled) => {
                    debug!("Device cancelled message {}", frame.id);
                    self.metrics.inc_cancelled();
                    return Delivery::Cancelled;
                }
                Ok(outcome) => {
                    self.metrics.inc_delivered();
                    return outcome;
                }
                Err(LinkError::TransportIo(e)) => {
                    warn!("Message {} aborted: {}", frame.id, e);
                    self.metrics.inc_io_errors();
                    return Delivery::Aborted;
                }
                Err(e) => {
                    if self.check_cancelled() {
                        return Delivery::Aborted;
                    }
                    if let Some(max) = self.config.max_retransmits {
                        if retransmits >= max {
                            warn!(
                                "Dropping message {} after {} retransmissions: {}",
                                frame.id, retransmits, e
                            );
                            self.metrics.inc_dropped();
                            return Delivery::Dropped;
                        }
                    }
                    retransmits += 1;
                    self.metrics.inc_retransmits();
                    debug!("Retransmitting message {} (#{}): {}", frame.id, retransmits, e);
                }
            }
        }
    }

    fn offer_message(&mut self, header: &[u8], body: &[u8]) -> LinkResult<Delivery> {
        self.write_frame(header)?;
        if self.await_reply()? == Delivery::Cancelled {
            return Ok(Delivery::Cancelled);
        }
        self.write_frame(body)?;
        self.await_reply()
    }

    fn await_reply(&mut self) -> LinkResult<Delivery> {
        match self.rx.read_byte(self.config.message_timeout())? {
            ACK => Ok(Delivery::Delivered),
            CAN => Ok(Delivery::Cancelled),
            other => Err(LinkError::violation(format!(
                "expected ACK or CAN, got {}",
                describe(other)
            ))),
        }
    }

    // ---- shutdown -------------------------------------------------------------

    /// Best-effort teardown; errors are logged and otherwise ignored.
    fn close(&mut self) {
        self.phase = EnginePhase::Closing;
        self.lock_state().reset_session();
        self.transport.stop_io();
        if let Err(e) = self.transport.close() {
            debug!("Ignoring error while closing transport: {}", e);
        }
        info!("Protocol engine stopped: {:?}", self.metrics.snapshot());
    }
}
