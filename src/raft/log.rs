use serde::{Deserialize, Serialize};

/// A single entry in the Raft log. Its index is its position in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: u64,
    pub command: Vec<u8>,
}

impl LogEntry {
    pub fn new(term: u64, command: impl Into<Vec<u8>>) -> Self {
        Self {
            term,
            command: command.into(),
        }
    }

    fn sentinel() -> Self {
        Self {
            term: 0,
            command: Vec::new(),
        }
    }
}

/// In-memory ordered log.
///
/// Position 0 always holds a sentinel entry with term 0, so the entry
/// "before" index 1 exists and `prev_log_index = 0` needs no special case.
/// Real entries start at index 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaftLog {
    entries: Vec<LogEntry>,
}

impl RaftLog {
    pub fn new() -> Self {
        Self {
            entries: vec![LogEntry::sentinel()],
        }
    }

    /// Rebuild a log from its real entries (index 1 onwards).
    pub fn from_entries(entries: Vec<LogEntry>) -> Self {
        let mut log = Self::new();
        log.entries.extend(entries);
        log
    }

    pub fn last_index(&self) -> u64 {
        (self.entries.len() - 1) as u64
    }

    pub fn last_term(&self) -> u64 {
        self.entries.last().map(|e| e.term).unwrap_or(0)
    }

    /// Number of real entries, sentinel excluded.
    pub fn len(&self) -> usize {
        self.entries.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: u64) -> Option<&LogEntry> {
        self.entries.get(index as usize)
    }

    /// Term of the entry at `index`. Index 0 is the sentinel (term 0).
    pub fn term_at(&self, index: u64) -> Option<u64> {
        self.get(index).map(|e| e.term)
    }

    /// Whether the log holds an entry at `index` created in `term`.
    pub fn contains(&self, index: u64, term: u64) -> bool {
        self.term_at(index) == Some(term)
    }

    /// Append one entry and return its index.
    pub fn append(&mut self, entry: LogEntry) -> u64 {
        self.entries.push(entry);
        self.last_index()
    }

    /// Up to `limit` entries starting at `start` (inclusive). Never returns the sentinel.
    pub fn entries_from(&self, start: u64, limit: usize) -> Vec<LogEntry> {
        let start = start.max(1) as usize;
        if start >= self.entries.len() {
            return Vec::new();
        }
        self.entries[start..].iter().take(limit).cloned().collect()
    }

    /// Real entries, index 1 onwards.
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries[1..]
    }

    /// Drop every entry at `index` and beyond. The sentinel is never removed.
    pub fn truncate(&mut self, index: u64) {
        let keep = index.max(1) as usize;
        if keep < self.entries.len() {
            self.entries.truncate(keep);
        }
    }

    /// Place `entries` right after `prev_index`.
    ///
    /// Entries that already match by term are skipped; the log is cut at the
    /// first index whose term differs and the rest is appended. A retransmitted
    /// or reordered request therefore never removes entries it agrees with.
    /// Returns true if the log changed.
    pub fn merge(&mut self, prev_index: u64, entries: &[LogEntry]) -> bool {
        for (offset, entry) in entries.iter().enumerate() {
            let index = prev_index + 1 + offset as u64;
            match self.term_at(index) {
                Some(term) if term == entry.term => continue,
                Some(_) => {
                    self.truncate(index);
                    self.entries.extend_from_slice(&entries[offset..]);
                    return true;
                }
                None => {
                    self.entries.extend_from_slice(&entries[offset..]);
                    return true;
                }
            }
        }
        false
    }

    /// First index holding `term`, searching backwards from `from`.
    pub fn first_index_of_term(&self, term: u64, from: u64) -> u64 {
        let mut index = from.min(self.last_index());
        while index > 1 && self.term_at(index - 1) == Some(term) {
            index -= 1;
        }
        index.max(1)
    }
}

impl Default for RaftLog {
    fn default() -> Self {
        Self::new()
    }
}
