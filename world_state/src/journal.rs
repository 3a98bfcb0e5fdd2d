//! Append-only mutation journals with cursor-based snapshots.
//!
//! A journal is a flat list of tagged records; the inverse of each record is
//! defined on the record type itself, so restoring never needs dynamic
//! dispatch. A snapshot is just the journal length at the time it was taken.

use crate::error::{StateError, StateResult};

/// An append-only journal of mutation records.
#[derive(Debug)]
pub struct Journal<E> {
    entries: Vec<E>,
}

impl<E> Default for Journal<E> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<E> Journal<E> {
    /// An empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current cursor, to be restored to later.
    pub fn checkpoint(&self) -> usize {
        self.entries.len()
    }

    /// The number of live records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the journal holds no records.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends a record.
    pub fn record(&mut self, entry: E) {
        self.entries.push(entry);
    }

    /// Cuts the journal back to `mark`, returning the removed tail in
    /// recording order. Callers must undo the tail strictly in reverse.
    pub fn truncate_to(&mut self, mark: usize) -> StateResult<Vec<E>> {
        if mark > self.entries.len() {
            return Err(StateError::InvalidSnapshot {
                requested: mark,
                current: self.entries.len(),
            });
        }

        Ok(self.entries.split_off(mark))
    }

    /// Drops every record, committing the mutations they described.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
