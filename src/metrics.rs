//! Per-link counters.
//! Cheap atomics bumped by the engine thread and read from anywhere.
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct LinkMetrics {
    messages_sent: AtomicU64,
    messages_delivered: AtomicU64,
    messages_cancelled: AtomicU64,
    messages_dropped: AtomicU64,
    retransmits: AtomicU64,
    naks_sent: AtomicU64,
    commands_handled: AtomicU64,
    syncs_completed: AtomicU64,
    io_errors: AtomicU64,
}

/// Point-in-time copy of [`LinkMetrics`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub messages_sent: u64,
    pub messages_delivered: u64,
    pub messages_cancelled: u64,
    /// Messages given up after hitting the retransmit cap.
    pub messages_dropped: u64,
    pub retransmits: u64,
    pub naks_sent: u64,
    pub commands_handled: u64,
    pub syncs_completed: u64,
    pub io_errors: u64,
}

impl LinkMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_delivered(&self) {
        self.messages_delivered.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_cancelled(&self) {
        self.messages_cancelled.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_retransmits(&self) {
        self.retransmits.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_naks(&self) {
        self.naks_sent.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_commands(&self) {
        self.commands_handled.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_syncs(&self) {
        self.syncs_completed.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_io_errors(&self) {
        self.io_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            messages_cancelled: self.messages_cancelled.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            retransmits: self.retransmits.load(Ordering::Relaxed),
            naks_sent: self.naks_sent.load(Ordering::Relaxed),
            commands_handled: self.commands_handled.load(Ordering::Relaxed),
            syncs_completed: self.syncs_completed.load(Ordering::Relaxed),
            io_errors: self.io_errors.load(Ordering::Relaxed),
        }
    }
}
