//! The replicated log.
//!
//! Indices start at 1; `get(0)` returns the synthetic sentinel `{index: 0,
//! term: 0}`. Entries are append-only from the Consensus Core's point of
//! view — truncation is only ever issued at positions strictly greater than
//! `commitIndex`, and that invariant lives in `server::mod`, not here.

use serde::{Deserialize, Serialize};

/// A single log entry. `command` carries the application payload verbatim —
/// the consensus core never inspects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub index: u64,
    pub term: u64,
    pub command: serde_json::Value,
}

impl Entry {
    pub fn sentinel() -> Entry {
        Entry {
            index: 0,
            term: 0,
            command: serde_json::Value::Null,
        }
    }
}

/// An in-memory, append-mostly sequence of [`Entry`] values.
///
/// Durable storage is out of scope, so this is the only implementation;
/// the three methods below that mutate `entries` are the natural hook
/// points for a future persistent backing store.
#[derive(Debug, Default, Clone)]
pub struct Log {
    entries: Vec<Entry>,
}

impl Log {
    pub fn new() -> Log {
        Log { entries: Vec::new() }
    }

    /// Appends `entries` to the tail of the log. Callers are responsible for
    /// giving them dense, monotonic indices starting at `last_index() + 1`.
    ///
    /// Hook point for persistence: a durable backing store would flush
    /// term/vote changes before this is invoked and persist the append
    /// itself here.
    pub fn append(&mut self, entries: Vec<Entry>) {
        self.entries.extend(entries);
    }

    /// Removes `index` and every entry after it.
    ///
    /// Hook point for persistence: a durable truncate would happen here.
    ///
    /// # Panics
    /// Panics if `index` is 0 — the sentinel is never a real log position.
    pub fn truncate_from(&mut self, index: u64) {
        assert!(index > 0, "cannot truncate the sentinel index");
        let keep = (index - 1) as usize;
        self.entries.truncate(keep.min(self.entries.len()));
    }

    /// Returns the entry at `index`, or the sentinel for index 0.
    pub fn get(&self, index: u64) -> Option<Entry> {
        if index == 0 {
            return Some(Entry::sentinel());
        }
        self.entries.get((index - 1) as usize).cloned()
    }

    /// Returns entries `(from, to]`, i.e. `from` is exclusive.
    pub fn range(&self, from: u64, to: u64) -> Vec<Entry> {
        if to <= from {
            return Vec::new();
        }
        let start = from as usize;
        let end = (to as usize).min(self.entries.len());
        if start >= end {
            return Vec::new();
        }
        self.entries[start..end].to_vec()
    }

    /// All entries strictly after `from` (exclusive), to the end of the log.
    pub fn entries_from(&self, from: u64) -> Vec<Entry> {
        self.range(from, self.last_index())
    }

    pub fn last_index(&self) -> u64 {
        self.entries.len() as u64
    }

    pub fn last_term(&self) -> u64 {
        self.entries.last().map(|e| e.term).unwrap_or(0)
    }

    pub fn term_at(&self, index: u64) -> Option<u64> {
        self.get(index).map(|e| e.term)
    }

    /// True if a candidate whose log ends at `(candidate_last_term,
    /// candidate_last_index)` is at least as up to date as this log: a
    /// higher last term wins outright, and a tied term falls back to
    /// comparing last index.
    pub fn is_candidate_log_up_to_date(
        &self,
        candidate_last_term: u64,
        candidate_last_index: u64,
    ) -> bool {
        let (my_term, my_index) = (self.last_term(), self.last_index());
        match candidate_last_term.cmp(&my_term) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => candidate_last_index >= my_index,
        }
    }

    /// Merges `entries` starting at `prev_index + 1`, truncating on conflict.
    /// Returns the index of the last entry now in the log covering this
    /// batch (used to compute `matchIndex` in the AppendEntries reply).
    ///
    /// Idempotent: reapplying the same `(prev_index, entries)` twice leaves
    /// the log unchanged the second time.
    pub fn merge(&mut self, prev_index: u64, entries: &[Entry]) -> u64 {
        let mut index = prev_index;
        for (offset, incoming) in entries.iter().enumerate() {
            let target_index = prev_index + offset as u64 + 1;
            match self.get(target_index) {
                Some(existing) if existing.term == incoming.term => {
                    // Already present and matching; leave it alone.
                }
                Some(_) => {
                    self.truncate_from(target_index);
                    self.append(vec![incoming.clone()]);
                }
                None => {
                    self.append(vec![incoming.clone()]);
                }
            }
            index = target_index;
        }
        index.max(prev_index)
    }
}

#[cfg(test)]
pub mod mocks {
    use super::{Entry, Log};
    use serde_json::json;

    pub fn entry_with_term(index: u64, term: u64) -> Entry {
        Entry {
            index,
            term,
            command: json!({"type": "chat", "user": "u", "text": "t", "room": "general", "id": index.to_string()}),
        }
    }

    pub fn entries_with_term(count: u64, start_index: u64, term: u64) -> Vec<Entry> {
        (0..count).map(|i| entry_with_term(start_index + i, term)).collect()
    }

    pub fn log_with_terms(terms: &[u64]) -> Log {
        let mut log = Log::new();
        let entries: Vec<Entry> = terms
            .iter()
            .enumerate()
            .map(|(i, &term)| entry_with_term(i as u64 + 1, term))
            .collect();
        log.append(entries);
        log
    }
}
