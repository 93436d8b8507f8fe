//! Usage counts of operator edits.
//!
//! Every manual edit bumps the count for its `(file, name, value)` triple.
//! The most used triples can be re-applied without retyping them. Scripted
//! precondition steps are not counted.

use std::collections::HashMap;

use serde::Serialize;

use super::model::InterfaceId;

/// How many entries [`MessageHistory::top`] returns by default.
pub const TOP_MESSAGES: usize = 10;

/// One remembered edit and how often it was made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    /// Module the value belongs to.
    pub file: String,
    /// Value name.
    pub name: String,
    /// Value text as the operator typed it.
    pub value: String,
    /// Times this exact edit was made.
    pub count: u64,
}

impl HistoryEntry {
    /// Identity of the edited value.
    #[must_use]
    pub fn id(&self) -> InterfaceId {
        InterfaceId::new(&self.file, &self.name)
    }
}

/// Edit usage counts, first-seen order kept for ties.
#[derive(Debug, Clone, Default)]
pub struct MessageHistory {
    entries: Vec<HistoryEntry>,
    index: HashMap<(String, String, String), usize>,
}

impl MessageHistory {
    /// Empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one edit. Returns the new count for it.
    pub fn record(&mut self, file: &str, name: &str, value: &str) -> u64 {
        let key = (file.to_owned(), name.to_owned(), value.to_owned());
        if let Some(&slot) = self.index.get(&key) {
            let entry = &mut self.entries[slot];
            entry.count += 1;
            return entry.count;
        }
        self.index.insert(key, self.entries.len());
        self.entries.push(HistoryEntry {
            file: file.to_owned(),
            name: name.to_owned(),
            value: value.to_owned(),
            count: 1,
        });
        1
    }

    /// The `limit` most used edits, highest count first.
    #[must_use]
    pub fn top(&self, limit: usize) -> Vec<HistoryEntry> {
        let mut ranked = self.entries.clone();
        ranked.sort_by(|a, b| b.count.cmp(&a.count));
        ranked.truncate(limit);
        ranked
    }

    /// Forget everything. Returns how many distinct edits were dropped.
    pub fn clear(&mut self) -> usize {
        self.index.clear();
        let removed = self.entries.len();
        self.entries.clear();
        removed
    }

    /// Distinct edits remembered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
