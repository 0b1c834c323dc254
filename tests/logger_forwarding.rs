// Integration: the global `log` backend mirrors application records into the device log.
mod common;

use common::fast_config;
use loglink::bridge::DeviceLog;
use loglink::link::MockTransport;
use loglink::logger;
use loglink::store::Severity;

// One test per binary: the global logger can only be installed once.
#[test]
fn records_are_forwarded_except_library_targets() {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(log::LevelFilter::Debug);
    let sink = logger::install(&mut builder, true).unwrap();

    log::info!(target: "boot", "before attach");

    let link = DeviceLog::start(MockTransport::new(), fast_config()).unwrap();
    let handle = link.handle();
    assert!(sink.attach(handle.clone()));
    assert!(!sink.attach(handle.clone()));

    log::warn!(target: "pump", "pressure low\ninlet at 0.4 bar");
    log::trace!(target: "pump", "filtered out by level");
    log::debug!(target: "loglink::link::engine", "engine chatter");
    log::error!(target: "db", "write failed");

    assert_eq!(handle.len(), 2);
    let first = handle.entry(0).unwrap();
    assert_eq!(first.tag, "pump");
    assert_eq!(first.severity, Severity::Warn);
    assert_eq!(first.short_msg, "pressure low");
    assert_eq!(first.long_msg, "pressure low\ninlet at 0.4 bar");

    let second = handle.entry(1).unwrap();
    assert_eq!(second.tag, "db");
    assert_eq!(second.severity, Severity::Error);
    assert_eq!(second.short_msg, "write failed");
    assert_eq!(second.long_msg, "write failed");

    link.shutdown();
}
