//! Test utilities: a fast link configuration and a scripted display device.
#![allow(dead_code)]

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use loglink::bridge::DeviceLog;
use loglink::config::LinkConfig;
use loglink::link::codec::{MessageHeader, MESSAGE_HEADER_LEN};
use loglink::link::control::{ACK, EOT, SOH, STX, SYN};
use loglink::link::{MockProbe, MockTransport};

/// Protocol timing shrunk so failure paths finish in milliseconds.
pub fn fast_config() -> LinkConfig {
    LinkConfig {
        handshake_poll_ms: 20,
        sync_ack_timeout_ms: 50,
        sync_frame_timeout_ms: 50,
        command_lead_timeout_ms: 50,
        command_body_timeout_ms: 50,
        message_timeout_ms: 50,
        sync_backoff_ms: 1,
        sync_backoff_max_ms: 4,
        idle_poll_ms: 5,
        ..LinkConfig::default()
    }
}

/// A well-behaved device: answers SYN with the current line length and ACKs every frame.
pub fn cooperative_device(line_len: Arc<AtomicU8>) -> impl FnMut(&[u8]) -> Vec<u8> + Send + 'static {
    move |data: &[u8]| {
        if data == [SYN] {
            vec![ACK, SOH, line_len.load(Ordering::SeqCst), EOT]
        } else if is_message_header(data) || data.first() == Some(&STX) {
            vec![ACK]
        } else {
            Vec::new()
        }
    }
}

pub fn is_message_header(data: &[u8]) -> bool {
    data.len() == MESSAGE_HEADER_LEN && data[0] == SOH
}

/// Decoded message headers among the recorded host writes, in order.
pub fn message_headers(probe: &MockProbe) -> Vec<MessageHeader> {
    probe
        .writes()
        .iter()
        .filter(|w| is_message_header(w))
        .filter_map(|w| MessageHeader::decode(w).ok())
        .collect()
}

/// Poll `cond` until it holds or two seconds pass.
pub fn wait_until<F: FnMut() -> bool>(mut cond: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// Start a link against a cooperative device and complete the handshake.
pub fn synced_link(line_len: u8) -> (DeviceLog, MockProbe, Arc<AtomicU8>) {
    let len = Arc::new(AtomicU8::new(line_len));
    let transport = MockTransport::with_responder(cooperative_device(Arc::clone(&len)));
    let probe = transport.probe();
    let link = DeviceLog::start(transport, fast_config()).unwrap();
    probe.inject(&[loglink::link::control::ENQ]);
    // The sync counter moves only after the post-handshake flush, so injected commands are safe from here on.
    assert!(
        wait_until(|| link.metrics().syncs_completed >= 1),
        "handshake did not complete"
    );
    (link, probe, len)
}
