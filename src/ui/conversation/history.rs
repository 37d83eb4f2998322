//! Conversation history display component

use crate::events::Role;
use crate::transcript::{Message, TranscriptSnapshot};
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Widget},
};
use unicode_width::UnicodeWidthChar;

const STREAM_CURSOR: &str = "▋";

/// Conversation history display component
pub struct ConversationHistory<'a> {
    snapshot: &'a TranscriptSnapshot,
}

impl<'a> ConversationHistory<'a> {
    pub fn new(snapshot: &'a TranscriptSnapshot) -> Self {
        Self { snapshot }
    }
}

/// One entry per message: the role label, then the content verbatim.
/// Embedded newlines continue on the following lines without a label.
pub fn transcript_lines(snapshot: &TranscriptSnapshot) -> Vec<Line<'static>> {
    snapshot
        .messages
        .iter()
        .flat_map(|message| message_lines(message, snapshot.is_open(message)))
        .collect()
}

fn message_lines(message: &Message, is_open: bool) -> Vec<Line<'static>> {
    let label_style = match message.role() {
        Role::User => Style::default().fg(Color::Blue).add_modifier(Modifier::BOLD),
        Role::Assistant => Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
    };

    let mut lines: Vec<Line<'static>> = message
        .content()
        .split('\n')
        .enumerate()
        .map(|(i, text)| {
            let mut spans = Vec::with_capacity(2);
            if i == 0 {
                spans.push(Span::styled(message.role().label(), label_style));
            }
            spans.push(Span::raw(text.to_string()));
            Line::from(spans)
        })
        .collect();

    if is_open {
        if let Some(last) = lines.last_mut() {
            last.spans.push(Span::styled(
                STREAM_CURSOR,
                Style::default().fg(Color::Yellow),
            ));
        }
    }

    lines
}

fn char_width(c: char) -> usize {
    c.width().unwrap_or(0)
}

/// Break a styled line into rows no wider than `width` columns.
///
/// Breaks fall between words where possible; a word wider than a whole row
/// is split between characters. Leading indentation is kept and whitespace
/// at a break is dropped.
pub fn wrap_line(line: &Line<'_>, width: usize) -> Vec<Line<'static>> {
    let cells: Vec<(char, Style)> = line
        .spans
        .iter()
        .flat_map(|span| span.content.chars().map(move |c| (c, span.style)))
        .collect();
    if width == 0 {
        return vec![row_line(&cells)];
    }

    let mut rows = Vec::new();
    let mut row: Vec<(char, Style)> = Vec::new();
    let mut row_width = 0;
    let mut start = 0;

    while start < cells.len() {
        let is_space = cells[start].0.is_whitespace();
        let end = cells[start..]
            .iter()
            .position(|(c, _)| c.is_whitespace() != is_space)
            .map_or(cells.len(), |n| start + n);
        let token = &cells[start..end];
        start = end;

        let token_width: usize = token.iter().map(|(c, _)| char_width(*c)).sum();
        if row_width + token_width <= width {
            row.extend_from_slice(token);
            row_width += token_width;
        } else if is_space {
            if !row.is_empty() {
                rows.push(row_line(&std::mem::take(&mut row)));
                row_width = 0;
            }
        } else if token_width <= width {
            rows.push(row_line(&std::mem::take(&mut row)));
            row.extend_from_slice(token);
            row_width = token_width;
        } else {
            for &cell in token {
                let w = char_width(cell.0);
                if row_width + w > width && !row.is_empty() {
                    rows.push(row_line(&std::mem::take(&mut row)));
                    row_width = 0;
                }
                row.push(cell);
                row_width += w;
            }
        }
    }

    if !row.is_empty() || rows.is_empty() {
        rows.push(row_line(&row));
    }
    rows
}

/// Join consecutive cells of the same style back into spans
fn row_line(cells: &[(char, Style)]) -> Line<'static> {
    let mut spans = Vec::new();
    let mut current: Option<(String, Style)> = None;

    for &(c, style) in cells {
        if let Some((text, current_style)) = current.as_mut() {
            if *current_style == style {
                text.push(c);
                continue;
            }
        }
        if let Some((text, current_style)) = current.take() {
            spans.push(Span::styled(text, current_style));
        }
        current = Some((c.to_string(), style));
    }
    if let Some((text, style)) = current {
        spans.push(Span::styled(text, style));
    }

    Line::from(spans)
}

/// Scroll offset that keeps the newest rows in view
fn bottom_scroll(rows: usize, height: u16) -> u16 {
    u16::try_from(rows.saturating_sub(height as usize)).unwrap_or(u16::MAX)
}

impl Widget for ConversationHistory<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let block = Block::default().borders(Borders::ALL).title("Conversation");
        let inner_area = block.inner(area);

        let lines = transcript_lines(self.snapshot);
        if lines.is_empty() {
            block.render(area, buf);
            let hint = Line::from(vec![Span::styled(
                "Type a message below and press Enter.",
                Style::default().fg(Color::DarkGray),
            )]);
            buf.set_line(inner_area.x, inner_area.y, &hint, inner_area.width);
            return;
        }

        let rows: Vec<Line<'static>> = lines
            .iter()
            .flat_map(|line| wrap_line(line, inner_area.width as usize))
            .collect();
        let scroll = bottom_scroll(rows.len(), inner_area.height);
        Paragraph::new(rows)
            .block(block)
            .scroll((scroll, 0))
            .render(area, buf);
    }
}
