//! Display state tracking and the state-tagged send queue.
//!
//! The device chooses what it is showing (live scroll, a page of entries, or
//! one expanded entry). Every queued entry remembers the view it was queued
//! for; an entry is only handed to the transmitter while the device is still
//! in that view, and every view change empties the queue so nothing stale is
//! delivered late.
//!
//! [`LinkState`] bundles the store, the queue and the session flags behind a
//! single lock so application appends and page enumeration never interleave.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use crate::store::{LogEntry, LogStore, Severity};

/// Viewing mode selected by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DisplayState {
    /// Newest entries are pushed as they arrive.
    #[default]
    Scroll,
    /// A fixed window of entries requested by the device.
    Page,
    /// A single entry with its long message.
    Expanded,
}

impl fmt::Display for DisplayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DisplayState::Scroll => "scroll",
            DisplayState::Page => "page",
            DisplayState::Expanded => "expanded",
        };
        f.write_str(name)
    }
}

/// An entry waiting for transmission, tagged with the view it was queued for.
#[derive(Debug, Clone)]
pub struct QueuedEntry {
    pub entry: Arc<LogEntry>,
    pub tag: DisplayState,
}

/// FIFO of entries awaiting transmission.
#[derive(Debug, Default)]
pub struct SendQueue {
    items: VecDeque<QueuedEntry>,
}

impl SendQueue {
    pub fn push(&mut self, entry: Arc<LogEntry>, tag: DisplayState) {
        self.items.push_back(QueuedEntry { entry, tag });
    }

    pub fn pop(&mut self) -> Option<QueuedEntry> {
        self.items.pop_front()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedEntry> {
        self.items.iter()
    }
}

/// Authoritative display state plus the queue it gates.
#[derive(Debug, Default)]
pub struct DisplayStateMachine {
    state: DisplayState,
    queue: SendQueue,
}

impl DisplayStateMachine {
    pub fn state(&self) -> DisplayState {
        self.state
    }

    /// Enter `next`, discarding everything queued so far.
    pub fn transition(&mut self, next: DisplayState) {
        self.state = next;
        self.queue.clear();
    }

    /// Queue `entry` for the `tag` view. Ignored unless the device is in that view.
    pub fn offer(&mut self, entry: Arc<LogEntry>, tag: DisplayState) -> bool {
        if self.state != tag {
            return false;
        }
        self.queue.push(entry, tag);
        true
    }

    /// Next entry to transmit. Entries tagged for another view are dropped.
    pub fn next_outgoing(&mut self) -> Option<Arc<LogEntry>> {
        while let Some(item) = self.queue.pop() {
            if item.tag == self.state {
                return Some(item.entry);
            }
        }
        None
    }

    pub fn clear_queue(&mut self) {
        self.queue.clear();
    }

    pub fn queue(&self) -> &SendQueue {
        &self.queue
    }
}

/// Everything the application threads and the engine thread share.
#[derive(Debug)]
pub struct LinkState {
    pub store: LogStore,
    pub display: DisplayStateMachine,
    /// True once a handshake completed and the device accepts messages.
    pub ready: bool,
    /// Line length negotiated during the handshake.
    pub line_len: u8,
}

impl LinkState {
    pub fn new(default_line_len: u8) -> Self {
        Self {
            store: LogStore::new(),
            display: DisplayStateMachine::default(),
            ready: false,
            line_len: default_line_len,
        }
    }

    /// Store a new entry and, when the link is synced, offer it to the scroll view.
    pub fn append(&mut self, tag: &str, short_msg: &str, long_msg: &str, severity: Severity) -> u16 {
        let entry = self.store.append(tag, short_msg, long_msg, severity);
        let id = entry.id;
        if self.ready {
            self.display.offer(entry, DisplayState::Scroll);
        }
        id
    }

    /// Switch to the page view and queue `[start, start + count)`.
    pub fn enter_page(&mut self, start: u16, count: u8) -> usize {
        self.display.transition(DisplayState::Page);
        let page: Vec<Arc<LogEntry>> = self
            .store
            .page(start as usize, count as usize)
            .to_vec();
        let queued = page.len();
        for entry in page {
            self.display.offer(entry, DisplayState::Page);
        }
        queued
    }

    /// Switch to the expanded view and return the entry the device should see.
    pub fn enter_expanded(&mut self, id: u16) -> Option<Arc<LogEntry>> {
        self.display.transition(DisplayState::Expanded);
        self.store.resolve_expanded(id).cloned()
    }

    /// Switch back to scrolling, restarting from the newest entry.
    pub fn resume_scroll(&mut self) -> bool {
        self.display.transition(DisplayState::Scroll);
        match self.store.last().cloned() {
            Some(last) => self.display.offer(last, DisplayState::Scroll),
            None => false,
        }
    }

    /// Drop session state ahead of a (re)handshake.
    pub fn reset_session(&mut self) {
        self.ready = false;
        self.display.clear_queue();
    }

    /// Mark the session established with the negotiated line length.
    pub fn mark_synced(&mut self, line_len: u8) {
        self.line_len = line_len;
        self.ready = true;
        self.display.transition(DisplayState::Scroll);
    }
}
