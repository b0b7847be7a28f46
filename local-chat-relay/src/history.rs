//! Ordered message history kept by each client session.
//!
//! Entries are stored oldest to newest in a `VecDeque`, so appends and
//! transient trimming are O(1) at either end. Deletions go through
//! `retain` or an index found by a reverse scan, which means no caller ever
//! holds a position across a mutation.

use std::collections::VecDeque;

use crate::message::{AuthorId, Frame, FrameKind};

/// Number of entries kept under transient retention.
pub const TRANSIENT_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Retention {
    #[default]
    Unbounded,
    Transient,
}

/// Who an entry belongs to, from the local user's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Own,
    Other,
    Notice,
}

impl Origin {
    pub fn classify(frame: &Frame, own_id: AuthorId) -> Self {
        match frame.kind {
            FrameKind::Normal if own_id != 0 && frame.author_id == own_id => Origin::Own,
            FrameKind::Normal => Origin::Other,
            _ => Origin::Notice,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub seq: u64,
    pub origin: Origin,
    pub frame: Frame,
}

#[derive(Debug, Default)]
pub struct History {
    entries: VecDeque<Entry>,
    retention: Retention,
    next_seq: u64,
}

impl History {
    pub fn new(retention: Retention) -> Self {
        Self {
            retention,
            ..Self::default()
        }
    }

    pub fn retention(&self) -> Retention {
        self.retention
    }

    /// Copies `frame` to the tail, then trims to `TRANSIENT_LIMIT` entries
    /// if retention is transient.
    pub fn append(&mut self, frame: Frame, origin: Origin) {
        self.next_seq += 1;
        self.entries.push_back(Entry {
            seq: self.next_seq,
            origin,
            frame,
        });

        if self.retention == Retention::Transient {
            while self.entries.len() > TRANSIENT_LIMIT {
                self.entries.pop_front();
            }
        }
    }

    /// Deletes the newest chat entry written by `author_id`.
    ///
    /// Returns whether anything was removed.
    pub fn redact(&mut self, author_id: AuthorId) -> bool {
        let found = self
            .entries
            .iter()
            .rposition(|entry| entry.frame.kind == FrameKind::Normal && entry.frame.author_id == author_id);

        match found {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Deletes every divider entry and returns how many were dropped.
    pub fn remove_marks(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.frame.kind != FrameKind::Mark);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&Entry> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Entry> {
        self.entries.iter()
    }

    /// The newest `count` entries, oldest first.
    pub fn window(&self, count: usize) -> impl Iterator<Item = &Entry> {
        self.entries.iter().skip(self.entries.len().saturating_sub(count))
    }
}
