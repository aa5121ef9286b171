//! Interactive loop binding one [`Session`] to one [`Channel`].

use std::fmt::Write as _;

use chrono::Local;
use medbot_llm::{Embedder, LlmProvider};
use medbot_memory::TurnRole;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::channel::{Channel, ChannelError};
use crate::error::TurnError;
use crate::session::{Answer, DisplayedTurn, Session, TurnStatus};

const HELP: &str = "Commands:
  /history  show the conversation with timestamps
  /sources  toggle listing the documents each answer used
  /clear    permanently forget this conversation
  /help     show this message
  exit      leave the chat";

pub struct ChatLoop<C, P, E> {
    channel: C,
    session: Session<P, E>,
    shutdown: watch::Receiver<bool>,
    status_rx: Option<mpsc::UnboundedReceiver<String>>,
    show_sources: bool,
}

impl<C, P, E> ChatLoop<C, P, E>
where
    C: Channel,
    P: LlmProvider,
    E: Embedder,
{
    #[must_use]
    pub fn new(channel: C, session: Session<P, E>, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            channel,
            session,
            shutdown,
            status_rx: None,
            show_sources: false,
        }
    }

    /// Forward provider status updates (rate-limit waits) to the channel while a turn runs.
    #[must_use]
    pub fn with_status_rx(mut self, rx: mpsc::UnboundedReceiver<String>) -> Self {
        self.status_rx = Some(rx);
        self
    }

    #[must_use]
    pub fn with_sources(mut self, show: bool) -> Self {
        self.show_sources = show;
        self
    }

    #[must_use]
    pub fn session(&self) -> &Session<P, E> {
        &self.session
    }

    #[must_use]
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Read and answer messages until the channel closes or shutdown is signalled.
    ///
    /// Turn failures are reported on the channel and do not end the loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel itself fails.
    pub async fn run(&mut self) -> Result<(), ChannelError> {
        loop {
            let incoming = tokio::select! {
                result = self.channel.recv() => result?,
                () = shutdown_signal(&mut self.shutdown) => {
                    tracing::info!("shutting down");
                    break;
                }
            };
            let Some(msg) = incoming else { break };
            self.handle(&msg.text).await?;

            if *self.shutdown.borrow() {
                break;
            }
        }
        Ok(())
    }

    async fn handle(&mut self, text: &str) -> Result<(), ChannelError> {
        match text.trim() {
            "/clear" => self.clear().await,
            "/history" => {
                let rendered = format_transcript(self.session.transcript());
                self.channel.send(&rendered).await
            }
            "/sources" => {
                self.show_sources = !self.show_sources;
                let state = if self.show_sources { "on" } else { "off" };
                self.channel.send(&format!("Source listing {state}.")).await
            }
            "/help" => self.channel.send(HELP).await,
            _ => self.turn(text).await,
        }
    }

    async fn clear(&mut self) -> Result<(), ChannelError> {
        if self.session.memory().is_empty() && self.session.transcript().is_empty() {
            return self.channel.send("Nothing to clear.").await;
        }
        if self
            .channel
            .confirm("Clear the whole conversation? This cannot be undone.")
            .await?
        {
            self.session.clear();
            self.channel.send("Conversation cleared.").await
        } else {
            self.channel.send("Kept the conversation.").await
        }
    }

    async fn turn(&mut self, text: &str) -> Result<(), ChannelError> {
        if text.trim().is_empty() {
            let err = TurnError::Validation("message is empty".into());
            return self.channel.send(err.user_message()).await;
        }

        self.channel.send_typing().await?;
        let cancel = CancellationToken::new();
        let result = {
            let turn = self.session.submit(text, &cancel);
            tokio::pin!(turn);
            loop {
                tokio::select! {
                    result = &mut turn => break result,
                    Some(status) = recv_status(&mut self.status_rx) => {
                        self.channel.send_status(&status).await?;
                    }
                    () = shutdown_signal(&mut self.shutdown), if !cancel.is_cancelled() => {
                        tracing::info!("shutdown requested, cancelling turn");
                        cancel.cancel();
                    }
                }
            }
        };
        self.channel.send_status("").await?;

        match result {
            Ok(answer) => {
                self.channel.send(&answer.text).await?;
                if self.show_sources && !answer.sources.is_empty() {
                    self.channel.send(&format_sources(&answer)).await?;
                }
            }
            Err(e) => self.channel.send(e.user_message()).await?,
        }
        Ok(())
    }
}

/// One line per turn: `[HH:MM] You: ...` / `[HH:MM] MedBot: ...`, local time.
#[must_use]
pub fn format_transcript(transcript: &[DisplayedTurn]) -> String {
    if transcript.is_empty() {
        return "No messages yet.".into();
    }
    let mut out = String::new();
    for entry in transcript {
        let time = entry.turn.created_at().with_timezone(&Local).format("%H:%M");
        let who = match entry.turn.role() {
            TurnRole::User => "You",
            TurnRole::Assistant => "MedBot",
        };
        let _ = write!(out, "[{time}] {who}: {}", entry.turn.content());
        if entry.status == TurnStatus::Failed {
            out.push_str("  (not answered)");
        }
        out.push('\n');
    }
    out.pop();
    out
}

#[must_use]
pub fn format_sources(answer: &Answer) -> String {
    let list = answer
        .sources
        .iter()
        .map(|s| format!("{} #{} ({:.2})", s.source, s.chunk_index, s.score))
        .collect::<Vec<_>>()
        .join(", ");
    format!("Sources: {list}")
}

pub(crate) async fn shutdown_signal(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn recv_status(rx: &mut Option<mpsc::UnboundedReceiver<String>>) -> Option<String> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use medbot_llm::mock::{MockEmbedder, MockProvider};
    use medbot_memory::{ChunkId, DocumentChunk, SessionId, VectorIndex};

    use super::*;
    use crate::channel::ChannelMessage;
    use crate::rag::{RagPipeline, Retriever};
    use crate::session::SourceRef;

    #[derive(Default)]
    struct MockChannel {
        inputs: VecDeque<String>,
        sent: Arc<Mutex<Vec<String>>>,
        statuses: Arc<Mutex<Vec<String>>>,
        typing: Arc<Mutex<usize>>,
        confirm: bool,
    }

    impl MockChannel {
        fn new(inputs: &[&str]) -> Self {
            Self {
                inputs: inputs.iter().map(|s| (*s).to_owned()).collect(),
                confirm: true,
                ..Self::default()
            }
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Channel for MockChannel {
        async fn recv(&mut self) -> Result<Option<ChannelMessage>, ChannelError> {
            Ok(self.inputs.pop_front().map(|text| ChannelMessage { text }))
        }

        async fn send(&mut self, text: &str) -> Result<(), ChannelError> {
            self.sent.lock().unwrap().push(text.to_owned());
            Ok(())
        }

        async fn send_typing(&mut self) -> Result<(), ChannelError> {
            *self.typing.lock().unwrap() += 1;
            Ok(())
        }

        async fn send_status(&mut self, text: &str) -> Result<(), ChannelError> {
            self.statuses.lock().unwrap().push(text.to_owned());
            Ok(())
        }

        async fn confirm(&mut self, _prompt: &str) -> Result<bool, ChannelError> {
            Ok(self.confirm)
        }
    }

    fn session(provider: MockProvider) -> Session<MockProvider, MockEmbedder> {
        let embedder = MockEmbedder::new(64);
        let chunks = vec![DocumentChunk {
            id: ChunkId(0),
            source: "flu.txt".into(),
            chunk_index: 0,
            content: "Flu causes fever and cough".into(),
            embedding: embedder.vector("Flu causes fever and cough"),
        }];
        let index = Arc::new(VectorIndex::from_chunks("mock-embed", chunks).unwrap());
        let pipeline = RagPipeline::new(provider, Retriever::new(embedder, index, 3));
        Session::new(SessionId::generate(), Arc::new(pipeline))
    }

    fn chat_loop(
        channel: MockChannel,
        provider: MockProvider,
    ) -> (ChatLoop<MockChannel, MockProvider, MockEmbedder>, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        (ChatLoop::new(channel, session(provider), rx), tx)
    }

    #[tokio::test]
    async fn answers_each_message_and_shows_typing() {
        let channel = MockChannel::new(&["What is flu?", "How is it spread?"]);
        let typing = Arc::clone(&channel.typing);
        let provider = MockProvider::with_responses(vec![
            "Flu is a viral infection.".into(),
            "How is flu spread?".into(),
            "Through droplets.".into(),
        ]);
        let (mut chat, _tx) = chat_loop(channel, provider);

        chat.run().await.unwrap();

        assert_eq!(
            chat.channel().sent(),
            vec!["Flu is a viral infection.", "Through droplets."]
        );
        assert_eq!(*typing.lock().unwrap(), 2);
        assert_eq!(chat.session().memory().len(), 4);
    }

    #[tokio::test]
    async fn failed_turn_is_reported_and_loop_continues() {
        let channel = MockChannel::new(&["What is flu?", "What is flu?"]);
        let provider = MockProvider::default();
        provider.push_response(Err("connection reset".into()));
        provider.push_response(Ok("A viral infection.".into()));
        let (mut chat, _tx) = chat_loop(channel, provider);

        chat.run().await.unwrap();

        let sent = chat.channel().sent();
        assert_eq!(sent[0], "I couldn't generate an answer. Please try again.");
        assert_eq!(sent[1], "A viral infection.");
        assert_eq!(chat.session().memory().len(), 2);
    }

    #[tokio::test]
    async fn blank_message_gets_validation_reply_without_typing() {
        let channel = MockChannel::new(&["   "]);
        let typing = Arc::clone(&channel.typing);
        let provider = MockProvider::default();
        let (mut chat, _tx) = chat_loop(channel, provider.clone());

        chat.run().await.unwrap();

        assert_eq!(chat.channel().sent(), vec!["Please type a question first."]);
        assert_eq!(*typing.lock().unwrap(), 0);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn clear_requires_confirmation() {
        let mut channel = MockChannel::new(&["What is flu?", "/clear"]);
        channel.confirm = false;
        let (mut chat, _tx) = chat_loop(channel, MockProvider::default());

        chat.run().await.unwrap();

        assert_eq!(chat.channel().sent().last().unwrap(), "Kept the conversation.");
        assert_eq!(chat.session().memory().len(), 2);
    }

    #[tokio::test]
    async fn confirmed_clear_empties_session() {
        let channel = MockChannel::new(&["What is flu?", "/clear", "/history"]);
        let (mut chat, _tx) = chat_loop(channel, MockProvider::default());

        chat.run().await.unwrap();

        let sent = chat.channel().sent();
        assert_eq!(sent[1], "Conversation cleared.");
        assert_eq!(sent[2], "No messages yet.");
        assert!(chat.session().memory().is_empty());
    }

    #[tokio::test]
    async fn history_lists_turns_with_times() {
        let channel = MockChannel::new(&["What is flu?", "/history"]);
        let (mut chat, _tx) = chat_loop(channel, MockProvider::default());

        chat.run().await.unwrap();

        let history = chat.channel().sent().pop().unwrap();
        let lines: Vec<_> = history.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("] You: What is flu?"), "{history}");
        assert!(lines[1].ends_with("] MedBot: mock response"), "{history}");
        assert_eq!(&lines[0][0..1], "[");
        assert_eq!(&lines[0][3..4], ":");
    }

    #[tokio::test]
    async fn sources_toggle_appends_source_line() {
        let channel = MockChannel::new(&["/sources", "What is flu?"]);
        let (mut chat, _tx) = chat_loop(channel, MockProvider::default());

        chat.run().await.unwrap();

        let sent = chat.channel().sent();
        assert_eq!(sent[0], "Source listing on.");
        assert_eq!(sent[1], "mock response");
        assert!(sent[2].starts_with("Sources: flu.txt #0 ("), "{sent:?}");
    }

    #[tokio::test]
    async fn shutdown_before_start_exits_immediately() {
        let channel = MockChannel::new(&["What is flu?"]);
        let provider = MockProvider::default();
        let (mut chat, tx) = chat_loop(channel, provider.clone());
        tx.send(true).unwrap();

        chat.run().await.unwrap();
        // recv and shutdown race in select; either way no more than one turn runs
        assert!(provider.call_count() <= 1);
    }

    #[tokio::test]
    async fn status_updates_are_forwarded() {
        let channel = MockChannel::new(&["What is flu?"]);
        let statuses = Arc::clone(&channel.statuses);
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let provider = MockProvider::default().with_delay(50);
        let (chat, _tx) = chat_loop(channel, provider);
        let mut chat = chat.with_status_rx(status_rx);

        status_tx.send("groq rate limited, retrying in 1s".into()).unwrap();
        chat.run().await.unwrap();

        let statuses = statuses.lock().unwrap().clone();
        assert_eq!(statuses.first().unwrap(), "groq rate limited, retrying in 1s");
        assert_eq!(statuses.last().unwrap(), "");
    }

    #[test]
    fn format_sources_lists_each_hit() {
        let answer = Answer {
            text: "x".into(),
            standalone_question: "q".into(),
            sources: vec![
                SourceRef {
                    id: ChunkId(3),
                    source: "flu.txt".into(),
                    chunk_index: 1,
                    score: 0.876,
                },
                SourceRef {
                    id: ChunkId(7),
                    source: "cold.md".into(),
                    chunk_index: 0,
                    score: 0.5,
                },
            ],
        };
        assert_eq!(
            format_sources(&answer),
            "Sources: flu.txt #1 (0.88), cold.md #0 (0.50)"
        );
    }

    #[tokio::test]
    async fn shutdown_signal_returns_on_true() {
        let (tx, mut rx) = watch::channel(false);
        let handle = tokio::spawn(async move { shutdown_signal(&mut rx).await });
        tx.send(true).unwrap();
        let result = tokio::time::timeout(std::time::Duration::from_millis(100), handle).await;
        assert!(result.is_ok());
    }
}
