//! Append-only conversation log.
//!
//! Entries are never removed. At most one entry is in flight at a time; only
//! that entry accepts streamed text, and once it is finalized it is immutable.

use serde::{Deserialize, Serialize};

/// Trailing marker shown after an entry that is still streaming.
pub const PROGRESS_MARKER: &str = "...";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(u64);

impl EntryId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    User,
    Agent,
    Thought,
    ToolCall,
    ToolResult,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub id: EntryId,
    pub kind: EntryKind,
    pub text: String,
}

/// Entry as a front end should draw it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RenderedEntry {
    pub id: EntryId,
    pub kind: EntryKind,
    pub text: String,
    pub in_flight: bool,
}

#[derive(Debug)]
pub struct ConversationLog {
    entries: Vec<ConversationEntry>,
    next_id: u64,
    in_flight: Option<EntryId>,
    marker: String,
}

impl Default for ConversationLog {
    fn default() -> Self {
        Self::with_marker(PROGRESS_MARKER)
    }
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_marker(marker: impl Into<String>) -> Self {
        Self {
            entries: Vec::new(),
            next_id: 1,
            in_flight: None,
            marker: marker.into(),
        }
    }

    pub fn entries(&self) -> &[ConversationEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&ConversationEntry> {
        self.entries.last()
    }

    pub fn get(&self, id: EntryId) -> Option<&ConversationEntry> {
        self.position(id).map(|index| &self.entries[index])
    }

    pub fn in_flight(&self) -> Option<EntryId> {
        self.in_flight
    }

    pub fn append(&mut self, kind: EntryKind, text: impl Into<String>) -> EntryId {
        let id = EntryId(self.next_id);
        self.next_id += 1;
        self.entries.push(ConversationEntry {
            id,
            kind,
            text: text.into(),
        });
        id
    }

    /// Appends an empty `agent` entry that receives streamed text.
    ///
    /// Any entry already in flight is finalized first.
    pub fn begin_stream(&mut self) -> EntryId {
        self.finalize();
        let id = self.append(EntryKind::Agent, String::new());
        self.in_flight = Some(id);
        id
    }

    /// Appends a chunk to the in-flight entry. Returns `false` when `id` is
    /// not the entry currently streaming.
    pub fn append_chunk(&mut self, id: EntryId, chunk: &str) -> bool {
        if self.in_flight != Some(id) {
            return false;
        }
        match self.position(id) {
            Some(index) => {
                self.entries[index].text.push_str(chunk);
                true
            }
            None => false,
        }
    }

    /// Freezes the in-flight entry with the text accumulated so far.
    pub fn finalize(&mut self) -> Option<EntryId> {
        self.in_flight.take()
    }

    /// Replaces the in-flight entry with an `error` entry under the same id.
    /// Falls back to appending when nothing is streaming.
    pub fn fail_in_flight(&mut self, message: impl Into<String>) -> EntryId {
        let message = message.into();
        let Some(id) = self.in_flight.take() else {
            return self.append(EntryKind::Error, message);
        };

        match self.position(id) {
            Some(index) => {
                self.entries[index] = ConversationEntry {
                    id,
                    kind: EntryKind::Error,
                    text: message,
                };
                id
            }
            None => self.append(EntryKind::Error, message),
        }
    }

    pub fn display_text(&self, entry: &ConversationEntry) -> String {
        if self.in_flight == Some(entry.id) {
            format!("{}{}", entry.text, self.marker)
        } else {
            entry.text.clone()
        }
    }

    pub fn render(&self) -> Vec<RenderedEntry> {
        self.render_from(0)
    }

    /// Renders entries from position `start` on. Only the in-flight entry
    /// ever changes, so a caller holding an earlier rendering can keep its
    /// finalized prefix and re-render the tail.
    pub fn render_from(&self, start: usize) -> Vec<RenderedEntry> {
        self.entries
            .get(start..)
            .unwrap_or_default()
            .iter()
            .map(|entry| RenderedEntry {
                id: entry.id,
                kind: entry.kind,
                text: self.display_text(entry),
                in_flight: self.in_flight == Some(entry.id),
            })
            .collect()
    }

    fn position(&self, id: EntryId) -> Option<usize> {
        // ids are assigned in push order
        self.entries.binary_search_by_key(&id, |entry| entry.id).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_from_returns_only_the_tail() {
        let mut log = ConversationLog::new();
        log.append(EntryKind::User, "hi");
        let id = log.begin_stream();
        log.append_chunk(id, "Hel");

        let tail = log.render_from(1);
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].id, id);
        assert_eq!(tail[0].text, "Hel...");
        assert!(log.render_from(5).is_empty());
    }

    #[test]
    fn ids_increase_in_creation_order() {
        let mut log = ConversationLog::new();
        let first = log.append(EntryKind::User, "hi");
        let second = log.append(EntryKind::Agent, "hello");

        assert!(first < second);
        assert_eq!(log.get(second).map(|entry| entry.text.as_str()), Some("hello"));
    }

    #[test]
    fn marker_is_display_only() {
        let mut log = ConversationLog::new();
        let id = log.begin_stream();
        assert!(log.append_chunk(id, "Hel"));
        assert!(log.append_chunk(id, "lo"));

        let rendered = log.render();
        assert_eq!(rendered[0].text, "Hello...");
        assert!(rendered[0].in_flight);
        assert_eq!(log.entries()[0].text, "Hello");

        assert_eq!(log.finalize(), Some(id));
        assert_eq!(log.render()[0].text, "Hello");
        assert!(!log.append_chunk(id, "!"), "finalized entries are immutable");
        assert_eq!(log.entries()[0].text, "Hello");
    }

    #[test]
    fn fail_in_flight_keeps_entry_id() {
        let mut log = ConversationLog::new();
        log.append(EntryKind::User, "question");
        let id = log.begin_stream();
        log.append_chunk(id, "partial");

        let failed = log.fail_in_flight("stream dropped");

        assert_eq!(failed, id);
        assert_eq!(log.len(), 2);
        let last = log.last().expect("has entries");
        assert_eq!(last.kind, EntryKind::Error);
        assert_eq!(last.text, "stream dropped");
        assert_eq!(log.in_flight(), None);
    }

    #[test]
    fn fail_without_stream_appends() {
        let mut log = ConversationLog::new();
        log.append(EntryKind::User, "question");

        let id = log.fail_in_flight("quota exceeded");

        assert_eq!(log.len(), 2);
        assert_eq!(log.get(id).map(|entry| entry.kind), Some(EntryKind::Error));
    }

    #[test]
    fn chunks_only_reach_the_streaming_entry() {
        let mut log = ConversationLog::new();
        let user = log.append(EntryKind::User, "q");
        let stream = log.begin_stream();

        assert!(!log.append_chunk(user, "x"));
        assert!(log.append_chunk(stream, "a"));
        assert_eq!(log.entries()[0].text, "q");
    }

    #[test]
    fn kinds_serialize_in_snake_case() {
        let value = serde_json::to_value(EntryKind::ToolResult).expect("serializes");
        assert_eq!(value, "tool_result");
    }
}
