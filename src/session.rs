use anyhow::Result;
use tokio::sync::mpsc::{self, error::TryRecvError};

use crate::llm::{CompletionProvider, LlmEvent, LlmRequest};
use crate::transcript::{MessageId, TranscriptController, TranscriptError, TranscriptSnapshot};

/// What happened when a provider event was applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamUpdate {
    Fragment(String),
    Completed(MessageId),
    Failed(String),
}

/// Receiver for the reply currently being streamed
struct ActiveStream {
    message_id: MessageId,
    rx: mpsc::Receiver<LlmEvent>,
}

/// Couples the transcript to a completion provider.
///
/// Provider events arrive on a channel and are applied to the transcript
/// in order, either drained without blocking by [`ChatSession::pump`] or
/// awaited one at a time with [`ChatSession::next_update`].
pub struct ChatSession<P> {
    transcript: TranscriptController,
    provider: P,
    stream: Option<ActiveStream>,
    last_error: Option<String>,
}

impl<P: CompletionProvider> ChatSession<P> {
    pub fn new(provider: P) -> Self {
        Self {
            transcript: TranscriptController::new(),
            provider,
            stream: None,
            last_error: None,
        }
    }

    pub fn update_draft(&mut self, text: impl Into<String>) {
        self.transcript.update_draft(text);
    }

    /// Submit the current draft and start streaming the reply.
    ///
    /// Rejected drafts leave everything untouched. A provider that cannot
    /// start leaves an empty, closed reply and records the error.
    pub fn submit(&mut self) -> Result<MessageId, TranscriptError> {
        let request = self.transcript.submit_draft()?;
        let message_id = request.response_id;
        self.last_error = None;

        let llm_request = LlmRequest::from_transcript(&request.context);
        match self.provider.start_stream(llm_request) {
            Ok(rx) => {
                let sent_at = request.context.last().map(|m| m.created_at().to_rfc3339());
                tracing::debug!(
                    %message_id,
                    sent_at = sent_at.as_deref().unwrap_or_default(),
                    context = request.context.len(),
                    "reply stream opened"
                );
                self.stream = Some(ActiveStream { message_id, rx });
            }
            Err(e) => {
                tracing::warn!(%message_id, error = %e, "failed to start completion stream");
                self.fail(format!("{:#}", e));
            }
        }

        Ok(message_id)
    }

    /// Apply every event already waiting in the channel.
    /// Returns true if the transcript changed.
    pub fn pump(&mut self) -> bool {
        let mut changed = false;

        while let Some(stream) = self.stream.as_mut() {
            let event = match stream.rx.try_recv() {
                Ok(event) => event,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.finish_disconnected();
                    changed = true;
                    break;
                }
            };
            changed |= self.apply(event).is_some();
        }

        changed
    }

    /// Wait for the next provider event and apply it.
    /// Returns `None` once no stream is open.
    pub async fn next_update(&mut self) -> Option<StreamUpdate> {
        loop {
            let stream = self.stream.as_mut()?;
            let event = stream.rx.recv().await;
            match event {
                Some(event) => {
                    if let Some(update) = self.apply(event) {
                        return Some(update);
                    }
                }
                None => return Some(self.finish_disconnected()),
            }
        }
    }

    /// Stop the open reply, keeping the text received so far
    pub fn cancel(&mut self) -> Option<MessageId> {
        let stream = self.stream.take()?;
        drop(stream.rx);
        let closed = self.transcript.cancel_stream();
        tracing::info!(message_id = %stream.message_id, "reply stream cancelled");
        closed
    }

    /// Drop everything and start a fresh transcript
    pub fn reset(&mut self) {
        self.cancel();
        self.transcript.reset();
        self.last_error = None;
    }

    pub fn draft(&self) -> &str {
        self.transcript.draft()
    }

    pub fn snapshot(&self) -> TranscriptSnapshot {
        self.transcript.current_snapshot()
    }

    pub fn is_streaming(&self) -> bool {
        self.transcript.is_streaming()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    fn apply(&mut self, event: LlmEvent) -> Option<StreamUpdate> {
        match event {
            LlmEvent::TextDelta(fragment) => {
                if let Err(e) = self.transcript.on_fragment_received(&fragment) {
                    tracing::warn!(error = %e, "dropping fragment");
                    return None;
                }
                Some(StreamUpdate::Fragment(fragment))
            }
            LlmEvent::ReasoningDelta(delta) => {
                tracing::trace!(len = delta.len(), "ignoring reasoning delta");
                None
            }
            LlmEvent::StreamComplete => {
                self.stream = None;
                let id = self.transcript.on_stream_complete().ok()?;
                tracing::debug!(message_id = %id, "reply complete");
                Some(StreamUpdate::Completed(id))
            }
            LlmEvent::Error(message) => {
                tracing::warn!(error = %message, "provider reported an error");
                Some(self.fail(message))
            }
        }
    }

    /// Close the open reply after the provider went away without finishing
    fn finish_disconnected(&mut self) -> StreamUpdate {
        tracing::warn!("provider closed the stream without completing");
        self.fail("stream ended unexpectedly".to_string())
    }

    fn fail(&mut self, message: String) -> StreamUpdate {
        self.stream = None;
        self.transcript.cancel_stream();
        self.last_error = Some(message.clone());
        StreamUpdate::Failed(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Role;
    use crate::llm::EchoProvider;
    use anyhow::anyhow;
    use std::sync::{Arc, Mutex};
    use tokio::time::Duration;

    /// Hands out a receiver whose sender the test drives by hand
    #[derive(Clone, Default)]
    struct ManualProvider {
        senders: Arc<Mutex<Vec<mpsc::Sender<LlmEvent>>>>,
        requests: Arc<Mutex<Vec<LlmRequest>>>,
    }

    impl ManualProvider {
        fn sender(&self) -> mpsc::Sender<LlmEvent> {
            self.senders.lock().unwrap().last().cloned().unwrap()
        }
    }

    impl CompletionProvider for ManualProvider {
        fn start_stream(&self, request: LlmRequest) -> Result<mpsc::Receiver<LlmEvent>> {
            let (tx, rx) = mpsc::channel(16);
            self.senders.lock().unwrap().push(tx);
            self.requests.lock().unwrap().push(request);
            Ok(rx)
        }

        fn model_name(&self) -> &str {
            "manual"
        }
    }

    struct BrokenProvider;

    impl CompletionProvider for BrokenProvider {
        fn start_stream(&self, _request: LlmRequest) -> Result<mpsc::Receiver<LlmEvent>> {
            Err(anyhow!("network unavailable"))
        }

        fn model_name(&self) -> &str {
            "broken"
        }
    }

    fn text(s: &str) -> LlmEvent {
        LlmEvent::TextDelta(s.to_string())
    }

    #[tokio::test]
    async fn pump_applies_buffered_fragments_in_order() {
        let provider = ManualProvider::default();
        let mut session = ChatSession::new(provider.clone());
        session.update_draft("Hi");
        session.submit().unwrap();

        let tx = provider.sender();
        tx.send(text("Hello")).await.unwrap();
        tx.send(text(" there")).await.unwrap();
        assert!(session.pump());
        assert!(session.is_streaming());
        assert_eq!(session.snapshot().messages[1].content(), "Hello there");

        assert!(!session.pump());

        tx.send(LlmEvent::StreamComplete).await.unwrap();
        assert!(session.pump());
        assert!(!session.is_streaming());
        assert_eq!(session.last_error(), None);
    }

    #[tokio::test]
    async fn provider_sees_context_without_the_empty_reply() {
        let provider = ManualProvider::default();
        let mut session = ChatSession::new(provider.clone());
        session.update_draft("first");
        session.submit().unwrap();
        provider.sender().send(text("one")).await.unwrap();
        provider.sender().send(LlmEvent::StreamComplete).await.unwrap();
        session.pump();

        session.update_draft("second");
        session.submit().unwrap();

        let requests = provider.requests.lock().unwrap();
        let roles: Vec<_> = requests[1].messages.iter().map(|m| m.role.as_str()).collect();
        let contents: Vec<_> = requests[1].messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(roles, ["user", "assistant", "user"]);
        assert_eq!(contents, ["first", "one", "second"]);
    }

    #[tokio::test]
    async fn submit_while_streaming_is_rejected() {
        let provider = ManualProvider::default();
        let mut session = ChatSession::new(provider.clone());
        session.update_draft("a");
        session.submit().unwrap();

        session.update_draft("b");
        assert_eq!(session.submit(), Err(TranscriptError::StreamInProgress));
        assert_eq!(session.snapshot().draft, "b");
        assert_eq!(provider.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_draft_never_reaches_provider() {
        let provider = ManualProvider::default();
        let mut session = ChatSession::new(provider.clone());
        session.update_draft("   ");
        assert_eq!(session.submit(), Err(TranscriptError::EmptyDraft));
        assert!(provider.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn start_failure_closes_reply_and_records_error() {
        let mut session = ChatSession::new(BrokenProvider);
        session.update_draft("hello");
        session.submit().unwrap();

        let snapshot = session.snapshot();
        assert_eq!(snapshot.messages.len(), 2);
        assert_eq!(snapshot.messages[1].content(), "");
        assert_eq!(snapshot.open_message, None);
        assert_eq!(session.last_error(), Some("network unavailable"));

        session.update_draft("again");
        assert!(session.submit().is_ok());
    }

    #[tokio::test]
    async fn mid_stream_error_keeps_partial_text() {
        let provider = ManualProvider::default();
        let mut session = ChatSession::new(provider.clone());
        session.update_draft("q");
        session.submit().unwrap();

        let tx = provider.sender();
        tx.send(text("partial")).await.unwrap();
        tx.send(LlmEvent::Error("boom".to_string())).await.unwrap();

        assert_eq!(session.next_update().await, Some(StreamUpdate::Fragment("partial".into())));
        assert_eq!(session.next_update().await, Some(StreamUpdate::Failed("boom".into())));
        assert_eq!(session.next_update().await, None);
        assert_eq!(session.snapshot().messages[1].content(), "partial");
        assert!(!session.is_streaming());
    }

    #[tokio::test]
    async fn dropped_sender_closes_reply() {
        let provider = ManualProvider::default();
        let mut session = ChatSession::new(provider.clone());
        session.update_draft("q");
        session.submit().unwrap();
        provider.senders.lock().unwrap().clear();

        assert!(session.pump());
        assert!(!session.is_streaming());
        assert_eq!(session.last_error(), Some("stream ended unexpectedly"));
    }

    #[tokio::test]
    async fn cancel_stops_delivery_to_the_closed_reply() {
        let provider = ManualProvider::default();
        let mut session = ChatSession::new(provider.clone());
        session.update_draft("q");
        let id = session.submit().unwrap();

        let tx = provider.sender();
        tx.send(text("kept")).await.unwrap();
        session.pump();

        assert_eq!(session.cancel(), Some(id));
        assert!(tx.send(text("lost")).await.is_err());
        assert!(!session.pump());
        assert_eq!(session.snapshot().messages[1].content(), "kept");
        assert_eq!(session.cancel(), None);
    }

    #[tokio::test]
    async fn reset_clears_transcript_and_error() {
        let mut session = ChatSession::new(BrokenProvider);
        session.update_draft("x");
        session.submit().unwrap();
        session.update_draft("draft");

        session.reset();
        assert_eq!(session.snapshot(), TranscriptSnapshot::default());
        assert_eq!(session.last_error(), None);
    }

    #[tokio::test]
    async fn echo_session_end_to_end() {
        let mut session = ChatSession::new(EchoProvider::new(Duration::ZERO));
        session.update_draft("Hello there");
        let id = session.submit().unwrap();

        let mut fragments = Vec::new();
        while let Some(update) = session.next_update().await {
            match update {
                StreamUpdate::Fragment(f) => fragments.push(f),
                StreamUpdate::Completed(done) => assert_eq!(done, id),
                StreamUpdate::Failed(e) => panic!("unexpected failure: {e}"),
            }
        }

        assert_eq!(fragments, ["Hello", " there"]);
        let snapshot = session.snapshot();
        assert_eq!(snapshot.messages[1].role(), Role::Assistant);
        assert_eq!(snapshot.messages[1].content(), "Hello there");
        assert_eq!(snapshot.open_message, None);
    }
}
