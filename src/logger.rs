//! `log` integration: mirror the process's own log records onto the device.
//!
//! [`DeviceLogger`] wraps an `env_logger` logger, so console/file output is
//! unchanged, and additionally appends each enabled record to the device log
//! once a [`LogHandle`] has been attached through the returned [`DeviceSink`].
//! Records from this library's modules are never forwarded, so the protocol
//! engine cannot feed its own trace back into the link.
use std::sync::{Arc, OnceLock};

use log::{Level, Log, Metadata, Record, SetLoggerError};

use crate::bridge::LogHandle;
use crate::store::Severity;

const LIBRARY_TARGET_PREFIX: &str = "loglink::";

/// Map a `log` level onto the four device severities. Trace folds into Debug.
pub fn severity_for(level: Level) -> Severity {
    match level {
        Level::Error => Severity::Error,
        Level::Warn => Severity::Warn,
        Level::Info => Severity::Info,
        Level::Debug | Level::Trace => Severity::Debug,
    }
}

fn is_library_target(target: &str) -> bool {
    target.starts_with(LIBRARY_TARGET_PREFIX)
}

/// Late-bound destination for forwarded records.
#[derive(Clone, Default)]
pub struct DeviceSink {
    handle: Arc<OnceLock<LogHandle>>,
}

impl DeviceSink {
    /// Attach the link. Returns false if one was already attached.
    pub fn attach(&self, handle: LogHandle) -> bool {
        self.handle.set(handle).is_ok()
    }

    pub fn is_attached(&self) -> bool {
        self.handle.get().is_some()
    }
}

pub struct DeviceLogger {
    inner: env_logger::Logger,
    sink: DeviceSink,
    forward: bool,
}

impl DeviceLogger {
    pub fn new(inner: env_logger::Logger, forward: bool) -> (Self, DeviceSink) {
        let sink = DeviceSink::default();
        let logger = Self {
            inner,
            sink: sink.clone(),
            forward,
        };
        (logger, sink)
    }

    fn forward(&self, record: &Record) {
        if !self.forward || is_library_target(record.target()) {
            return;
        }
        let Some(handle) = self.sink.handle.get() else {
            return;
        };
        let text = record.args().to_string();
        let short = text.lines().next().unwrap_or_default();
        handle.append(record.target(), short, &text, severity_for(record.level()));
    }
}

impl Log for DeviceLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if !self.inner.matches(record) {
            return;
        }
        self.inner.log(record);
        self.forward(record);
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Build the logger from `builder` and install it as the global `log` backend.
pub fn install(builder: &mut env_logger::Builder, forward: bool) -> Result<DeviceSink, SetLoggerError> {
    let inner = builder.build();
    let max_level = inner.filter();
    let (logger, sink) = DeviceLogger::new(inner, forward);
    log::set_boxed_logger(Box::new(logger))?;
    log::set_max_level(max_level);
    Ok(sink)
}

/// One line of `X/tag: message` input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine<'a> {
    pub severity: Severity,
    pub tag: &'a str,
    pub message: &'a str,
}

/// Parse a logcat-style line such as `E/Sensor: overheat`.
///
/// The severity letter must be one of `E W I D V` (uppercase). A trailing
/// `(pid)` on the tag is dropped. Anything else yields `None`.
pub fn parse_line(line: &str) -> Option<ParsedLine<'_>> {
    let mut chars = line.chars();
    let letter = chars.next()?;
    if !letter.is_ascii_uppercase() || chars.next()? != '/' {
        return None;
    }
    let severity = Severity::from_letter(letter)?;
    let (tag, message) = line[2..].split_once(':')?;
    let tag = match tag.find('(') {
        Some(paren) if tag.trim_end().ends_with(')') => &tag[..paren],
        _ => tag,
    };
    let tag = tag.trim();
    if tag.is_empty() {
        return None;
    }
    Some(ParsedLine {
        severity,
        tag,
        message: message.trim(),
    })
}
