use crate::transcript::TranscriptSnapshot;
use crate::ui::conversation::ConversationHistory;
use crate::ui::conversation::composer::ComposerView;
use ratatui::{
    buffer::Buffer,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Style},
    text::{Line, Span},
    widgets::Widget,
};

/// Session state shown under the input field
#[derive(Debug, Clone, Default)]
pub struct StatusInfo<'a> {
    pub model: &'a str,
    pub streaming: bool,
    pub last_error: Option<&'a str>,
}

/// Whole chat screen: history on top, composer and status line below
pub struct ConversationView<'a> {
    pub snapshot: &'a TranscriptSnapshot,
    pub cursor: usize,
    pub placeholder: &'a str,
    pub status: StatusInfo<'a>,
}

impl ConversationView<'_> {
    fn status_line(&self) -> Line<'_> {
        let mut spans = vec![Span::styled(
            format!(" {} ", self.status.model),
            Style::default().fg(Color::Black).bg(Color::Cyan),
        )];

        if self.status.streaming {
            spans.push(Span::styled(
                " streaming… (Esc to stop)",
                Style::default().fg(Color::Yellow),
            ));
        }

        if let Some(error) = self.status.last_error {
            spans.push(Span::styled(
                format!(" ❌ {}", error),
                Style::default().fg(Color::Red),
            ));
        } else if !self.status.streaming {
            spans.push(Span::styled(
                " Enter send · Ctrl+L new chat · Ctrl+C quit",
                Style::default().fg(Color::DarkGray),
            ));
        }

        Line::from(spans)
    }
}

impl Widget for ConversationView<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(3),    // History
                Constraint::Length(3), // Composer
                Constraint::Length(1), // Status
            ])
            .split(area);

        ConversationHistory::new(self.snapshot).render(chunks[0], buf);

        ComposerView {
            text: &self.snapshot.draft,
            cursor: self.cursor,
            placeholder: self.placeholder,
            title: "Message",
            has_focus: true,
        }
        .render(chunks[1], buf);

        let status = self.status_line();
        buf.set_line(chunks[2].x, chunks[2].y, &status, chunks[2].width);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::TranscriptController;

    fn screen_text(buf: &Buffer) -> String {
        let area = buf.area;
        (area.top()..area.bottom())
            .map(|y| {
                (area.left()..area.right())
                    .map(|x| buf.get(x, y).symbol().to_string())
                    .collect::<String>()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn shows_placeholder_messages_and_error() {
        let mut transcript = TranscriptController::new();
        let area = Rect::new(0, 0, 60, 10);

        let mut buf = Buffer::empty(area);
        ConversationView {
            snapshot: &transcript.current_snapshot(),
            cursor: 0,
            placeholder: "Say something...",
            status: StatusInfo {
                model: "echo",
                ..StatusInfo::default()
            },
        }
        .render(area, &mut buf);
        let text = screen_text(&buf);
        assert!(text.contains("Say something..."));
        assert!(text.contains("echo"));

        transcript.update_draft("Hi");
        transcript.submit_draft().unwrap();
        transcript.cancel_stream();

        let mut buf = Buffer::empty(area);
        ConversationView {
            snapshot: &transcript.current_snapshot(),
            cursor: 0,
            placeholder: "Say something...",
            status: StatusInfo {
                model: "echo",
                streaming: false,
                last_error: Some("network down"),
            },
        }
        .render(area, &mut buf);
        let text = screen_text(&buf);
        assert!(text.contains("User: Hi"));
        assert!(text.contains("AI: "));
        assert!(text.contains("network down"));
    }
}
