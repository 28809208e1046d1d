use serde::{Deserialize, Serialize};

use crate::sandbox::{ConsoleSink, Evaluation};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "text", rename_all = "snake_case")]
pub enum TranscriptEntry {
    /// A line the user submitted.
    Command(String),
    /// Console output or an error report.
    Output(String),
    /// Completion value of a submitted line.
    Result(String),
}

impl TranscriptEntry {
    pub fn text(&self) -> &str {
        match self {
            TranscriptEntry::Command(text)
            | TranscriptEntry::Output(text)
            | TranscriptEntry::Result(text) => text,
        }
    }

    pub fn render(&self) -> String {
        match self {
            TranscriptEntry::Command(line) => format!("> {line}"),
            TranscriptEntry::Output(text) | TranscriptEntry::Result(text) => text.clone(),
        }
    }
}

/// Append-only record of the terminal session, in submission order.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends an entry; empty texts are dropped.
    pub fn push(&mut self, entry: TranscriptEntry) {
        if entry.text().is_empty() {
            return;
        }
        self.entries.push(entry);
    }

    pub fn push_output_lines(&mut self, lines: impl IntoIterator<Item = String>) {
        for line in lines {
            self.push(TranscriptEntry::Output(line));
        }
    }

    /// Records the value or error that ended an evaluated terminal line.
    /// Console output is expected to have been appended already.
    pub fn record_evaluation(&mut self, evaluation: Evaluation) {
        match evaluation {
            Evaluation::Returned(Some(value)) => self.push(TranscriptEntry::Result(value)),
            Evaluation::Returned(None) => {}
            Evaluation::Thrown(message) => {
                self.push(TranscriptEntry::Output(format!("Error: {message}")))
            }
        }
    }

    /// Rendered lines, one per entry.
    pub fn lines(&self) -> Vec<String> {
        self.entries.iter().map(TranscriptEntry::render).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl ConsoleSink for Transcript {
    fn line(&mut self, line: String) {
        self.push(TranscriptEntry::Output(line));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_lines_then_result() {
        let mut transcript = Transcript::new();
        transcript.push(TranscriptEntry::Command("console.log('a'); 1 + 1".to_string()));
        transcript.line("a".to_string());
        transcript.record_evaluation(Evaluation::Returned(Some("2".to_string())));
        assert_eq!(transcript.lines(), vec!["> console.log('a'); 1 + 1", "a", "2"]);
    }

    #[test]
    fn test_error_is_recorded_as_output() {
        let mut transcript = Transcript::new();
        transcript.push(TranscriptEntry::Command("boom()".to_string()));
        transcript.record_evaluation(Evaluation::Thrown("boom is not defined".into()));
        assert_eq!(
            transcript.entries(),
            &[
                TranscriptEntry::Command("boom()".to_string()),
                TranscriptEntry::Output("Error: boom is not defined".to_string()),
            ]
        );
    }

    #[test]
    fn test_empty_texts_are_dropped() {
        let mut transcript = Transcript::new();
        transcript.push_output_lines(vec![String::new(), "x".to_string()]);
        transcript.record_evaluation(Evaluation::Returned(Some(String::new())));
        transcript.record_evaluation(Evaluation::Returned(None));
        assert_eq!(transcript.lines(), vec!["x"]);
    }

    #[test]
    fn test_entries_serialize_with_kind_tag() {
        let value = serde_json::to_value(TranscriptEntry::Command("1+1".into())).unwrap();
        assert_eq!(value, serde_json::json!({ "type": "command", "text": "1+1" }));
    }
}
