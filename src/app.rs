use crate::events::TuiEvent;
use crate::llm::CompletionProvider;
use crate::session::ChatSession;
use crate::transcript::TranscriptError;
use crate::tui::{EventHandler, Tui};
use crate::ui::conversation::{ComposerResult, ConversationComposer, ConversationView, StatusInfo};
use anyhow::{Context, Result};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::Frame;
use tokio::time::Duration;

/// Interactive chat application state
pub struct App<P> {
    session: ChatSession<P>,
    composer: ConversationComposer,
    placeholder: String,
    should_quit: bool,
}

impl<P: CompletionProvider> App<P> {
    pub fn new(session: ChatSession<P>, placeholder: String) -> Self {
        Self {
            session,
            composer: ConversationComposer::new(),
            placeholder,
            should_quit: false,
        }
    }

    /// Run until the user quits
    pub async fn run(&mut self, terminal: &mut Tui, tick_rate: Duration) -> Result<()> {
        let mut events = EventHandler::new(tick_rate);
        tracing::info!(model = self.session.model_name(), "chat UI started");

        while !self.should_quit {
            terminal
                .draw(|frame| self.draw(frame))
                .context("Failed to draw frame")?;

            let Some(event) = events.next().await else {
                break;
            };
            self.handle_event(event);
        }

        self.session.cancel();
        tracing::info!("chat UI stopped");
        Ok(())
    }

    pub fn handle_event(&mut self, event: TuiEvent) {
        match event {
            TuiEvent::Key(key) => self.handle_key(key),
            TuiEvent::Paste(text) => {
                let result = self.composer.handle_paste(self.session.draft(), &text);
                self.apply_composer(result);
            }
            TuiEvent::Resize | TuiEvent::Tick => {}
        }

        self.session.pump();
    }

    fn handle_key(&mut self, key: KeyEvent) {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Char('c') if ctrl => self.should_quit = true,
            KeyCode::Char('l') if ctrl => {
                self.session.reset();
                self.composer.clamp("");
            }
            KeyCode::Esc => {
                self.session.cancel();
            }
            _ => {
                let result = self.composer.handle_key(self.session.draft(), key);
                self.apply_composer(result);
            }
        }
    }

    fn apply_composer(&mut self, result: ComposerResult) {
        match result {
            ComposerResult::Changed(text) => self.session.update_draft(text),
            ComposerResult::Submit => match self.session.submit() {
                Ok(message_id) => {
                    tracing::debug!(%message_id, "draft submitted");
                    self.composer.clamp("");
                }
                Err(TranscriptError::EmptyDraft | TranscriptError::StreamInProgress) => {}
                Err(e) => tracing::warn!(error = %e, "submit failed"),
            },
            ComposerResult::None => {}
        }
    }

    pub fn draw(&self, frame: &mut Frame) {
        let snapshot = self.session.snapshot();
        let view = ConversationView {
            snapshot: &snapshot,
            cursor: self.composer.cursor(),
            placeholder: &self.placeholder,
            status: StatusInfo {
                model: self.session.model_name(),
                streaming: self.session.is_streaming(),
                last_error: self.session.last_error(),
            },
        };
        frame.render_widget(view, frame.size());
    }

    #[allow(dead_code)]
    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    #[allow(dead_code)]
    pub fn session(&self) -> &ChatSession<P> {
        &self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::EchoProvider;
    use ratatui::{Terminal, backend::TestBackend};

    fn key(code: KeyCode) -> TuiEvent {
        TuiEvent::Key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn ctrl(c: char) -> TuiEvent {
        TuiEvent::Key(KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL))
    }

    fn echo_app() -> App<EchoProvider> {
        App::new(
            ChatSession::new(EchoProvider::new(Duration::ZERO)),
            "Say something...".to_string(),
        )
    }

    fn type_str(app: &mut App<EchoProvider>, text: &str) {
        for c in text.chars() {
            app.handle_event(key(KeyCode::Char(c)));
        }
    }

    /// Tick until the echo reply has fully arrived
    async fn settle(app: &mut App<EchoProvider>) {
        for _ in 0..100 {
            if !app.session().is_streaming() {
                return;
            }
            tokio::task::yield_now().await;
            app.handle_event(TuiEvent::Tick);
        }
        panic!("reply never completed");
    }

    #[tokio::test]
    async fn typing_and_enter_round_trip() {
        let mut app = echo_app();
        type_str(&mut app, "Hi there");
        assert_eq!(app.session().draft(), "Hi there");

        app.handle_event(key(KeyCode::Enter));
        assert_eq!(app.session().draft(), "");
        settle(&mut app).await;

        let snapshot = app.session().snapshot();
        assert_eq!(snapshot.messages.len(), 2);
        assert_eq!(snapshot.messages[0].content(), "Hi there");
        assert_eq!(snapshot.messages[1].content(), "Hi there");
    }

    #[tokio::test]
    async fn enter_on_empty_draft_does_nothing() {
        let mut app = echo_app();
        app.handle_event(key(KeyCode::Enter));
        type_str(&mut app, "   ");
        app.handle_event(key(KeyCode::Enter));

        assert!(app.session().snapshot().messages.is_empty());
        assert_eq!(app.session().draft(), "   ");
    }

    #[tokio::test]
    async fn paste_then_ctrl_l_resets() {
        let mut app = echo_app();
        app.handle_event(TuiEvent::Paste("a\nb".to_string()));
        assert_eq!(app.session().draft(), "a b");

        app.handle_event(key(KeyCode::Enter));
        settle(&mut app).await;
        app.handle_event(ctrl('l'));

        assert!(app.session().snapshot().messages.is_empty());
        assert_eq!(app.session().draft(), "");
    }

    #[test]
    fn ctrl_c_quits() {
        let mut app = echo_app();
        app.handle_event(ctrl('c'));
        assert!(app.should_quit());
        assert_eq!(app.session().draft(), "");
    }

    #[test]
    fn draws_placeholder_on_test_backend() {
        let app = echo_app();
        let mut terminal = Terminal::new(TestBackend::new(50, 10)).unwrap();
        terminal.draw(|frame| app.draw(frame)).unwrap();

        let buffer = terminal.backend().buffer();
        let text: String = buffer.content.iter().map(|cell| cell.symbol()).collect();
        assert!(text.contains("Say something..."));
    }
}
