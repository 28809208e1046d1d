//! The editor boundary.
//!
//! The session only talks to an editor through [`EditorSurface`]. Positions
//! are 1-based; columns count characters, not bytes. [`TextBuffer`] is the
//! in-memory implementation used by the shell and the tests.

use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub const START: Position = Position { line: 1, column: 1 };

    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Position {
    fn cmp(&self, other: &Self) -> Ordering {
        self.line
            .cmp(&other.line)
            .then(self.column.cmp(&other.column))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    /// Builds a range, swapping the ends if they are given backwards.
    pub fn new(a: Position, b: Position) -> Self {
        if a <= b {
            Self { start: a, end: b }
        } else {
            Self { start: b, end: a }
        }
    }

    /// Empty range at `position`.
    pub fn caret(position: Position) -> Self {
        Self {
            start: position,
            end: position,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEdit {
    pub range: Range,
    pub text: String,
}

impl TextEdit {
    pub fn new(range: Range, text: impl Into<String>) -> Self {
        Self {
            range,
            text: text.into(),
        }
    }
}

pub trait EditorSurface {
    fn get_value(&self) -> String;

    /// The current selection, or `None` when nothing is selected.
    fn get_selection(&self) -> Option<Range>;

    fn get_value_in_range(&self, range: Range) -> String;

    /// Applies `edits` as one undoable step. `edit_id` names the source of
    /// the change.
    fn execute_edits(&mut self, edit_id: &str, edits: &[TextEdit]);

    fn get_position(&self) -> Position;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferSnapshot {
    pub text: String,
    pub cursor: usize,
}

#[derive(Debug, Default)]
pub struct TextBuffer {
    text: String,
    /// Byte offset, always on a char boundary.
    cursor: usize,
    /// Other end of the selection, if any.
    anchor: Option<usize>,
    undo_stack: Vec<BufferSnapshot>,
    redo_stack: Vec<BufferSnapshot>,
    last_edit_id: Option<String>,
}

impl TextBuffer {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn line_count(&self) -> usize {
        self.text.split('\n').count()
    }

    pub fn last_edit_id(&self) -> Option<&str> {
        self.last_edit_id.as_deref()
    }

    /// Replaces the whole document as one undoable step.
    pub fn set_value(&mut self, text: impl Into<String>) {
        self.push_undo();
        self.text = text.into();
        self.cursor = 0;
        self.anchor = None;
    }

    /// Replaces the document and forgets the undo history.
    pub fn reset(&mut self, text: impl Into<String>) {
        self.text = text.into();
        self.cursor = 0;
        self.anchor = None;
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.last_edit_id = None;
    }

    pub fn set_position(&mut self, position: Position) {
        self.cursor = self.offset_of(position);
        self.anchor = None;
    }

    pub fn set_selection(&mut self, range: Range) {
        let start = self.offset_of(range.start);
        let end = self.offset_of(range.end);
        self.anchor = (start != end).then_some(start);
        self.cursor = end;
    }

    pub fn clear_selection(&mut self) {
        self.anchor = None;
    }

    pub fn undo(&mut self) -> bool {
        let Some(previous) = self.undo_stack.pop() else {
            return false;
        };
        self.redo_stack.push(self.snapshot());
        self.restore(previous);
        true
    }

    pub fn redo(&mut self) -> bool {
        let Some(next) = self.redo_stack.pop() else {
            return false;
        };
        self.undo_stack.push(self.snapshot());
        self.restore(next);
        true
    }

    /// Byte offset for a position, clamped into the document.
    pub fn offset_of(&self, position: Position) -> usize {
        if position.line == 0 {
            return 0;
        }
        let target = position.line - 1;
        let mut line_start = 0;
        for (index, line) in self.text.split('\n').enumerate() {
            if index == target {
                let column = position.column.max(1) - 1;
                let within = line
                    .char_indices()
                    .nth(column)
                    .map(|(offset, _)| offset)
                    .unwrap_or(line.len());
                return line_start + within;
            }
            line_start += line.len() + 1;
        }
        self.text.len()
    }

    pub fn position_of(&self, offset: usize) -> Position {
        let offset = self.clamp_to_boundary_left(offset);
        let before = &self.text[..offset];
        let line = before.matches('\n').count() + 1;
        let line_start = before.rfind('\n').map_or(0, |at| at + 1);
        let column = before[line_start..].chars().count() + 1;
        Position::new(line, column)
    }

    fn clamp_to_boundary_left(&self, mut idx: usize) -> usize {
        idx = idx.min(self.text.len());
        while idx > 0 && !self.text.is_char_boundary(idx) {
            idx -= 1;
        }
        idx
    }

    fn snapshot(&self) -> BufferSnapshot {
        BufferSnapshot {
            text: self.text.clone(),
            cursor: self.cursor,
        }
    }

    fn push_undo(&mut self) {
        self.undo_stack.push(self.snapshot());
        self.redo_stack.clear();
    }

    fn restore(&mut self, snap: BufferSnapshot) {
        self.text = snap.text;
        self.cursor = self.clamp_to_boundary_left(snap.cursor);
        self.anchor = None;
    }
}

impl EditorSurface for TextBuffer {
    fn get_value(&self) -> String {
        self.text.clone()
    }

    fn get_selection(&self) -> Option<Range> {
        let anchor = self.anchor?;
        if anchor == self.cursor {
            return None;
        }
        Some(Range::new(
            self.position_of(anchor),
            self.position_of(self.cursor),
        ))
    }

    fn get_value_in_range(&self, range: Range) -> String {
        let range = Range::new(range.start, range.end);
        let start = self.offset_of(range.start);
        let end = self.offset_of(range.end);
        self.text[start..end].to_string()
    }

    fn execute_edits(&mut self, edit_id: &str, edits: &[TextEdit]) {
        if edits.is_empty() {
            return;
        }
        self.push_undo();

        let mut resolved: Vec<(usize, usize, &str)> = edits
            .iter()
            .map(|edit| {
                let range = Range::new(edit.range.start, edit.range.end);
                (self.offset_of(range.start), self.offset_of(range.end), edit.text.as_str())
            })
            .collect();
        // Apply back to front so earlier offsets stay valid.
        resolved.sort_by(|a, b| b.0.cmp(&a.0));

        // The cursor lands after the last edit in the document, tracked as a
        // distance from the end since earlier edits shift its offset.
        let mut from_end = None;
        for (start, end, text) in resolved {
            self.text.replace_range(start..end, text);
            from_end.get_or_insert(self.text.len() - (start + text.len()));
        }
        if let Some(from_end) = from_end {
            self.cursor = self.text.len() - from_end;
        }
        self.anchor = None;
        self.last_edit_id = Some(edit_id.to_string());
        tracing::debug!(edit_id, count = edits.len(), "applied editor edits");
    }

    fn get_position(&self) -> Position {
        self.position_of(self.cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positions_count_characters() {
        let buffer = TextBuffer::new("héllo\nwörld");
        assert_eq!(buffer.offset_of(Position::new(1, 3)), 3);
        assert_eq!(buffer.offset_of(Position::new(2, 3)), 10);
        assert_eq!(buffer.position_of(10), Position::new(2, 3));
        assert_eq!(buffer.line_count(), 2);
    }

    #[test]
    fn test_positions_are_clamped() {
        let buffer = TextBuffer::new("ab\ncd");
        assert_eq!(buffer.offset_of(Position::new(1, 99)), 2);
        assert_eq!(buffer.offset_of(Position::new(9, 1)), 5);
        assert_eq!(buffer.offset_of(Position::new(0, 4)), 0);
        assert_eq!(buffer.position_of(99), Position::new(2, 3));
    }

    #[test]
    fn test_selection_roundtrip_and_empty_selection() {
        let mut buffer = TextBuffer::new("let a = 1;\nlet b = 2;");
        assert_eq!(buffer.get_selection(), None);

        buffer.set_selection(Range::new(Position::new(2, 5), Position::new(1, 5)));
        let selection = buffer.get_selection().expect("selection set");
        assert_eq!(selection.start, Position::new(1, 5));
        assert_eq!(buffer.get_value_in_range(selection), "a = 1;\nlet ");

        buffer.set_selection(Range::caret(Position::new(1, 2)));
        assert_eq!(buffer.get_selection(), None);
        assert_eq!(buffer.get_position(), Position::new(1, 2));
    }

    #[test]
    fn test_execute_edits_is_one_undo_step() {
        let mut buffer = TextBuffer::new("console.log(");
        buffer.set_position(Position::new(1, 13));
        buffer.execute_edits(
            "ai-autocomplete",
            &[TextEdit::new(Range::caret(buffer.get_position()), "'hi');")],
        );
        assert_eq!(buffer.text(), "console.log('hi');");
        assert_eq!(buffer.get_position(), Position::new(1, 19));
        assert_eq!(buffer.last_edit_id(), Some("ai-autocomplete"));

        assert!(buffer.undo());
        assert_eq!(buffer.text(), "console.log(");
        assert!(buffer.redo());
        assert_eq!(buffer.text(), "console.log('hi');");
        assert!(!buffer.redo());
    }

    #[test]
    fn test_multiple_edits_apply_against_original_positions() {
        let mut buffer = TextBuffer::new("a b c");
        buffer.execute_edits(
            "test",
            &[
                TextEdit::new(Range::new(Position::new(1, 1), Position::new(1, 2)), "x"),
                TextEdit::new(Range::new(Position::new(1, 5), Position::new(1, 6)), "zz"),
            ],
        );
        assert_eq!(buffer.text(), "x b zz");
        assert_eq!(buffer.get_position(), Position::new(1, 7));
    }

    #[test]
    fn test_set_value_is_undoable_but_reset_is_not() {
        let mut buffer = TextBuffer::new("one");
        buffer.set_value("two");
        assert!(buffer.undo());
        assert_eq!(buffer.text(), "one");

        buffer.reset("three");
        assert!(!buffer.undo());
        assert_eq!(buffer.get_position(), Position::START);
    }
}
