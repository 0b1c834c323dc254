// Integration: device-driven page, expand and resume views plus mid-session resync.
mod common;

use std::sync::atomic::Ordering;

use common::{message_headers, synced_link, wait_until};
use loglink::display::DisplayState;
use loglink::link::codec::{encode_command, Command, MessageKind};
use loglink::link::control::{ACK, ENQ, NAK, SOH, VERSION};

fn fill(log: &loglink::bridge::LogHandle, n: usize) {
    for i in 0..n {
        log.info("app", &format!("entry {i}"), &format!("details for entry {i}"));
    }
}

#[test]
fn page_command_sends_requested_window() {
    let (link, probe, _) = synced_link(19);
    let log = link.handle();
    fill(&log, 5);
    assert!(wait_until(|| link.metrics().messages_delivered == 5));
    probe.clear_writes();

    probe.inject(&Command::Page { start: 1, count: 2 }.encode());
    assert!(wait_until(|| link.metrics().messages_delivered == 7));
    assert_eq!(log.display_state(), DisplayState::Page);

    let writes = probe.writes();
    assert_eq!(writes[0], vec![ACK]);
    assert_eq!(writes[1], vec![ACK]);
    let ids: Vec<u16> = message_headers(&probe).iter().map(|h| h.id).collect();
    assert_eq!(ids, vec![1, 2]);

    // New entries stay off the page view.
    log.warn_short("app", "while paging");
    std::thread::sleep(std::time::Duration::from_millis(30));
    assert_eq!(log.pending(), 0);
    assert_eq!(message_headers(&probe).len(), 2);
}

#[test]
fn page_past_end_sends_nothing() {
    let (link, probe, _) = synced_link(19);
    let log = link.handle();
    fill(&log, 2);
    assert!(wait_until(|| link.metrics().messages_delivered == 2));
    probe.clear_writes();

    probe.inject(&Command::Page { start: 9, count: 4 }.encode());
    assert!(wait_until(|| link.metrics().commands_handled == 1));
    assert_eq!(log.display_state(), DisplayState::Page);
    assert!(message_headers(&probe).is_empty());
}

#[test]
fn expand_sends_long_text_and_clamps_id() {
    let (link, probe, _) = synced_link(19);
    let log = link.handle();
    fill(&log, 3);
    assert!(wait_until(|| link.metrics().messages_delivered == 3));
    probe.clear_writes();

    probe.inject(&Command::Expand { id: 40 }.encode());
    assert!(wait_until(|| link.metrics().messages_delivered == 4));
    assert_eq!(log.display_state(), DisplayState::Expanded);

    let headers = message_headers(&probe);
    assert_eq!(headers.len(), 1);
    assert_eq!(headers[0].kind, MessageKind::Expanded);
    assert_eq!(headers[0].id, 2);
    let body = probe.writes().last().cloned().unwrap();
    assert_eq!(&body[1..body.len() - 2], b"app-entry 2: details for entry 2");
}

#[test]
fn single_text_entry_expands_to_its_message() {
    let (link, probe, _) = synced_link(19);
    let log = link.handle();
    assert_eq!(log.info_short("app", "hello"), 0);
    assert!(wait_until(|| link.metrics().messages_delivered == 1));
    probe.clear_writes();

    probe.inject(&Command::Expand { id: 0 }.encode());
    assert!(wait_until(|| link.metrics().messages_delivered == 2));
    let headers = message_headers(&probe);
    assert_eq!(headers[0].kind, MessageKind::Expanded);
    let body = probe.writes().last().cloned().unwrap();
    assert_eq!(&body[1..body.len() - 2], b"app-hello: hello");
}

#[test]
fn resume_restarts_scroll_from_newest() {
    let (link, probe, _) = synced_link(19);
    let log = link.handle();
    fill(&log, 3);
    assert!(wait_until(|| link.metrics().messages_delivered == 3));

    probe.inject(&Command::Expand { id: 0 }.encode());
    assert!(wait_until(|| link.metrics().messages_delivered == 4));
    probe.clear_writes();

    probe.inject(&Command::Resume.encode());
    assert!(wait_until(|| link.metrics().messages_delivered == 5));
    assert_eq!(log.display_state(), DisplayState::Scroll);
    let headers = message_headers(&probe);
    assert_eq!(headers.len(), 1);
    assert_eq!(headers[0].id, 2);
    assert_eq!(headers[0].kind, MessageKind::Short);

    log.info_short("app", "live again");
    assert!(wait_until(|| link.metrics().messages_delivered == 6));
}

#[test]
fn unknown_command_is_acknowledged() {
    let (link, probe, _) = synced_link(19);
    probe.clear_writes();
    probe.inject(&encode_command(b'Z', &[7]).unwrap());
    assert!(wait_until(|| link.metrics().commands_handled == 1));
    assert_eq!(probe.writes(), vec![vec![ACK], vec![ACK]]);
    assert_eq!(link.handle().display_state(), DisplayState::Scroll);
}

#[test]
fn malformed_command_is_nacked() {
    let (link, probe, _) = synced_link(19);
    probe.clear_writes();
    // Header terminated by the wrong octet.
    probe.inject(&[SOH, VERSION, b'P', 3, 0x00]);
    assert!(wait_until(|| link.metrics().naks_sent == 1));
    assert_eq!(probe.writes(), vec![vec![NAK]]);
    assert_eq!(link.metrics().commands_handled, 0);
}

#[test]
fn enq_mid_session_renegotiates_line_length() {
    let (link, probe, line_len) = synced_link(19);
    let log = link.handle();
    fill(&log, 2);
    assert!(wait_until(|| link.metrics().messages_delivered == 2));
    probe.inject(&Command::Page { start: 0, count: 2 }.encode());
    assert!(wait_until(|| link.metrics().messages_delivered == 4));

    line_len.store(8, Ordering::SeqCst);
    probe.inject(&[ENQ]);
    assert!(wait_until(|| link.metrics().syncs_completed == 2));
    assert_eq!(log.line_len(), 8);
    assert_eq!(log.display_state(), DisplayState::Scroll);

    probe.clear_writes();
    log.info_short("app", "after resync");
    assert!(wait_until(|| link.metrics().messages_delivered == 5));
    let headers = message_headers(&probe);
    assert_eq!(headers[0].payload_len, 8);
}
