use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Widget},
};
use unicode_width::UnicodeWidthChar;

/// Result returned when the user interacts with the composer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComposerResult {
    /// The field now holds this text
    Changed(String),
    /// Enter was pressed
    Submit,
    None,
}

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

/// Single-line input field.
///
/// The text itself belongs to the transcript draft; the composer only keeps
/// the cursor and turns key presses into the field's next full value.
#[derive(Debug, Clone, Default)]
pub struct ConversationComposer {
    /// Cursor position in characters
    cursor: usize,
}

impl ConversationComposer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Handle key input against the current field text
    pub fn handle_key(&mut self, text: &str, key: KeyEvent) -> ComposerResult {
        if key.kind != KeyEventKind::Press {
            return ComposerResult::None;
        }
        self.clamp(text);
        let len = text.chars().count();

        match key.code {
            KeyCode::Enter => ComposerResult::Submit,
            KeyCode::Char(c)
                if !key
                    .modifiers
                    .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT) =>
            {
                self.insert(text, &c.to_string())
            }
            KeyCode::Backspace => {
                if self.cursor == 0 {
                    return ComposerResult::None;
                }
                self.cursor -= 1;
                ComposerResult::Changed(Self::remove_at(text, self.cursor))
            }
            KeyCode::Delete => {
                if self.cursor >= len {
                    return ComposerResult::None;
                }
                ComposerResult::Changed(Self::remove_at(text, self.cursor))
            }
            KeyCode::Left => {
                self.cursor = self.cursor.saturating_sub(1);
                ComposerResult::None
            }
            KeyCode::Right => {
                self.cursor = (self.cursor + 1).min(len);
                ComposerResult::None
            }
            KeyCode::Home => {
                self.cursor = 0;
                ComposerResult::None
            }
            KeyCode::End => {
                self.cursor = len;
                ComposerResult::None
            }
            _ => ComposerResult::None,
        }
    }

    /// Insert pasted text; the field is single-line so newlines become spaces
    pub fn handle_paste(&mut self, text: &str, pasted: &str) -> ComposerResult {
        self.clamp(text);
        let flattened: String = pasted
            .chars()
            .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
            .collect();
        if flattened.is_empty() {
            return ComposerResult::None;
        }
        self.insert(text, &flattened)
    }

    /// Keep the cursor inside the text, e.g. after the draft was cleared
    pub fn clamp(&mut self, text: &str) {
        self.cursor = self.cursor.min(text.chars().count());
    }

    fn insert(&mut self, text: &str, inserted: &str) -> ComposerResult {
        let mut next = text.to_string();
        next.insert_str(char_to_byte_index(text, self.cursor), inserted);
        self.cursor += inserted.chars().count();
        ComposerResult::Changed(next)
    }

    fn remove_at(text: &str, char_idx: usize) -> String {
        let mut next = text.to_string();
        next.remove(char_to_byte_index(text, char_idx));
        next
    }
}

/// First char to show so that everything from there up to and including
/// the cursor cell fits in `width` display columns
fn scroll_start(chars: &[char], cursor: usize, width: usize) -> usize {
    let cell_width = |c: &char| c.width().unwrap_or(0);
    let mut used = chars.get(cursor).map_or(1, cell_width);
    let mut start = cursor.min(chars.len());

    while start > 0 {
        let w = cell_width(&chars[start - 1]);
        if used + w > width {
            break;
        }
        used += w;
        start -= 1;
    }
    start
}

/// Renders the input field for a given draft
pub struct ComposerView<'a> {
    pub text: &'a str,
    pub cursor: usize,
    pub placeholder: &'a str,
    pub title: &'a str,
    pub has_focus: bool,
}

impl Widget for ComposerView<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let block = Block::default()
            .borders(Borders::ALL)
            .title(self.title)
            .style(if self.has_focus {
                Style::default().fg(Color::Green)
            } else {
                Style::default().fg(Color::Gray)
            });

        let inner_area = block.inner(area);
        block.render(area, buf);

        if self.text.is_empty() {
            let mut spans = Vec::new();
            if self.has_focus {
                spans.push(Span::raw("▌"));
            }
            spans.push(Span::styled(
                self.placeholder,
                Style::default().fg(Color::DarkGray),
            ));
            buf.set_line(inner_area.x, inner_area.y, &Line::from(spans), inner_area.width);
            return;
        }

        let mut content = self.text.to_string();
        if self.has_focus {
            content.insert(char_to_byte_index(self.text, self.cursor), '▌');
        }

        // keep the cursor visible on long input
        let chars: Vec<char> = content.chars().collect();
        let skip = scroll_start(&chars, self.cursor, inner_area.width as usize);
        let visible: String = chars[skip..].iter().collect();
        buf.set_line(
            inner_area.x,
            inner_area.y,
            &Line::from(vec![Span::styled(visible, Style::default().fg(Color::White))]),
            inner_area.width,
        );
    }
}
