//! Per-session turn orchestration and the multi-session manager.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use medbot_llm::{Embedder, LlmProvider};
use medbot_memory::{ChunkId, ConversationMemory, ScoredChunk, SessionId, Turn};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock, watch};
use tokio_util::sync::CancellationToken;

use crate::error::TurnError;
use crate::rag::RagPipeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    /// Submitted, not yet committed to memory.
    Pending,
    Answered,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    #[default]
    Idle,
    AwaitingResponse,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayedTurn {
    #[serde(flatten)]
    pub turn: Turn,
    pub status: TurnStatus,
}

/// What the surface renders: the transcript and whether a response is being generated.
///
/// The transcript may contain failed user turns that never reached memory.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionState {
    transcript: Vec<DisplayedTurn>,
    phase: TurnPhase,
}

impl SessionState {
    #[must_use]
    pub fn transcript(&self) -> &[DisplayedTurn] {
        &self.transcript
    }

    #[must_use]
    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    #[must_use]
    pub fn is_generating(&self) -> bool {
        self.phase == TurnPhase::AwaitingResponse
    }

    fn begin(&mut self, input: &str) -> usize {
        self.transcript.push(DisplayedTurn {
            turn: Turn::user(input),
            status: TurnStatus::Pending,
        });
        self.phase = TurnPhase::AwaitingResponse;
        self.transcript.len() - 1
    }

    fn finish(&mut self, pending: usize, reply: Option<&str>) {
        let status = if reply.is_some() {
            TurnStatus::Answered
        } else {
            TurnStatus::Failed
        };
        if let Some(entry) = self.transcript.get_mut(pending) {
            entry.status = status;
        }
        if let Some(text) = reply {
            self.transcript.push(DisplayedTurn {
                turn: Turn::assistant(text),
                status: TurnStatus::Answered,
            });
        }
        self.phase = TurnPhase::Idle;
    }

    /// Fail any turn left pending by a submission whose future was dropped.
    fn recover_interrupted(&mut self) {
        if self.phase == TurnPhase::AwaitingResponse {
            for entry in &mut self.transcript {
                if entry.status == TurnStatus::Pending {
                    entry.status = TurnStatus::Failed;
                }
            }
            self.phase = TurnPhase::Idle;
            tracing::warn!("previous turn was interrupted, marked as failed");
        }
    }

    fn clear(&mut self) {
        self.transcript.clear();
        self.phase = TurnPhase::Idle;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRef {
    pub id: ChunkId,
    pub source: String,
    pub chunk_index: usize,
    pub score: f32,
}

impl From<&ScoredChunk> for SourceRef {
    fn from(hit: &ScoredChunk) -> Self {
        Self {
            id: hit.chunk.id,
            source: hit.chunk.source.clone(),
            chunk_index: hit.chunk.chunk_index,
            score: hit.score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub text: String,
    pub standalone_question: String,
    pub sources: Vec<SourceRef>,
}

/// One user's conversation: its memory, its visible transcript and the shared pipeline.
pub struct Session<P, E> {
    id: SessionId,
    pipeline: Arc<RagPipeline<P, E>>,
    memory: ConversationMemory,
    state: SessionState,
    view: watch::Sender<SessionSnapshot>,
}

impl<P: LlmProvider, E: Embedder> Session<P, E> {
    #[must_use]
    pub fn new(id: SessionId, pipeline: Arc<RagPipeline<P, E>>) -> Self {
        let (view, _) = watch::channel(SessionSnapshot {
            id: id.clone(),
            generating: false,
            exchanges: 0,
            transcript: Vec::new(),
        });
        Self {
            id,
            pipeline,
            memory: ConversationMemory::new(),
            state: SessionState::default(),
            view,
        }
    }

    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    #[must_use]
    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    #[must_use]
    pub fn transcript(&self) -> &[DisplayedTurn] {
        self.state.transcript()
    }

    #[must_use]
    pub fn phase(&self) -> TurnPhase {
        self.state.phase()
    }

    #[must_use]
    pub fn is_generating(&self) -> bool {
        self.state.is_generating()
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            generating: self.state.is_generating(),
            exchanges: self.memory.exchanges(),
            transcript: self.state.transcript().to_vec(),
        }
    }

    /// Follow the session's snapshot as turns start, finish and are cleared. Readers never
    /// wait for a running turn.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.view.subscribe()
    }

    fn publish(&self) {
        self.view.send_replace(self.snapshot());
    }

    /// Run one turn: reformulate, retrieve, generate, then commit the exchange to memory.
    ///
    /// Memory is only written after every stage succeeded. Cancellation is checked
    /// between stages; a stage already in flight runs to completion.
    ///
    /// # Errors
    ///
    /// Returns [`TurnError::Validation`] for blank input (nothing is recorded), or the
    /// error of the first failing stage (the pending turn is marked failed).
    pub async fn submit(
        &mut self,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<Answer, TurnError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(TurnError::Validation("message is empty".into()));
        }

        self.state.recover_interrupted();
        let pending = self.state.begin(input);
        self.publish();
        tracing::info!(session = %self.id, exchanges = self.memory.exchanges(), "turn started");

        let outcome = self.run_pipeline(input, cancel).await;
        let outcome = outcome.and_then(|answer| {
            self.memory
                .append(input, answer.text.as_str())
                .map_err(|e| TurnError::Validation(e.to_string()))?;
            Ok(answer)
        });

        match &outcome {
            Ok(answer) => {
                self.state.finish(pending, Some(&answer.text));
                tracing::info!(
                    session = %self.id,
                    sources = answer.sources.len(),
                    exchanges = self.memory.exchanges(),
                    "turn answered"
                );
            }
            Err(e) => {
                self.state.finish(pending, None);
                tracing::warn!(
                    session = %self.id,
                    error = %e,
                    retryable = e.is_retryable(),
                    "turn failed"
                );
            }
        }
        self.publish();
        outcome
    }

    async fn run_pipeline(
        &self,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<Answer, TurnError> {
        let history = self.memory.read();

        ensure_active(cancel)?;
        let standalone = self.pipeline.reformulate(history, input).await?;

        ensure_active(cancel)?;
        let context = self.pipeline.retrieve(&standalone).await?;

        ensure_active(cancel)?;
        let text = self.pipeline.generate(history, &standalone, &context).await?;

        Ok(Answer {
            text,
            standalone_question: standalone,
            sources: context.iter().map(SourceRef::from).collect(),
        })
    }

    /// Forget the whole conversation. Irreversible.
    pub fn clear(&mut self) {
        self.memory.clear();
        self.state.clear();
        self.publish();
        tracing::info!(session = %self.id, "session cleared");
    }
}

fn ensure_active(cancel: &CancellationToken) -> Result<(), TurnError> {
    if cancel.is_cancelled() {
        Err(TurnError::Cancelled)
    } else {
        Ok(())
    }
}

/// Read-only view of a session for rendering.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub generating: bool,
    pub exchanges: usize,
    pub transcript: Vec<DisplayedTurn>,
}

/// Chat operations keyed by session, as consumed by network surfaces.
pub trait ChatBackend: Send + Sync {
    fn submit<'a>(
        &'a self,
        session: &'a SessionId,
        text: &'a str,
    ) -> BoxFuture<'a, Result<Answer, TurnError>>;

    /// `Ok(None)` for an unknown session. A running turn shows as `generating` with its
    /// user line still pending.
    fn snapshot<'a>(
        &'a self,
        session: &'a SessionId,
    ) -> BoxFuture<'a, Result<Option<SessionSnapshot>, TurnError>>;

    /// Drop the session and its memory. Returns whether the session existed.
    fn remove<'a>(&'a self, session: &'a SessionId) -> BoxFuture<'a, Result<bool, TurnError>>;

    fn session_count(&self) -> BoxFuture<'_, usize>;
}

struct Slot<P, E> {
    session: Arc<Mutex<Session<P, E>>>,
    view: watch::Receiver<SessionSnapshot>,
}

type SessionSlot<P, E> = Arc<Slot<P, E>>;

/// Isolated sessions over one shared pipeline. Each session has its own lock, so
/// different users never wait on each other, and a second message to a session that is
/// still generating is rejected with [`TurnError::Busy`].
pub struct SessionManager<P, E> {
    pipeline: Arc<RagPipeline<P, E>>,
    sessions: RwLock<HashMap<SessionId, SessionSlot<P, E>>>,
    shutdown: CancellationToken,
}

impl<P, E> SessionManager<P, E>
where
    P: LlmProvider + 'static,
    E: Embedder + 'static,
{
    #[must_use]
    pub fn new(pipeline: Arc<RagPipeline<P, E>>, shutdown: CancellationToken) -> Self {
        Self {
            pipeline,
            sessions: RwLock::new(HashMap::new()),
            shutdown,
        }
    }

    async fn get(&self, id: &SessionId) -> Option<SessionSlot<P, E>> {
        self.sessions.read().await.get(id).cloned()
    }

    async fn get_or_create(&self, id: &SessionId) -> SessionSlot<P, E> {
        if let Some(slot) = self.get(id).await {
            return slot;
        }
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(id.clone())
            .or_insert_with(|| {
                tracing::debug!(session = %id, "session created");
                let session = Session::new(id.clone(), Arc::clone(&self.pipeline));
                Arc::new(Slot {
                    view: session.subscribe(),
                    session: Arc::new(Mutex::new(session)),
                })
            })
            .clone()
    }

    /// Run a turn on `id`, creating the session on first use.
    ///
    /// The turn runs on its own task so that it completes and commits even if the
    /// caller stops waiting.
    ///
    /// # Errors
    ///
    /// Returns [`TurnError::Busy`] if the session is already generating, otherwise the
    /// turn's own error.
    pub async fn submit(&self, id: &SessionId, input: &str) -> Result<Answer, TurnError> {
        if input.trim().is_empty() {
            return Err(TurnError::Validation("message is empty".into()));
        }
        let slot = self.get_or_create(id).await;
        let mut session = Arc::clone(&slot.session)
            .try_lock_owned()
            .map_err(|_| TurnError::Busy)?;

        let input = input.to_owned();
        let cancel = self.shutdown.child_token();
        let handle = tokio::spawn(async move { session.submit(&input, &cancel).await });
        handle.await.unwrap_or_else(|e| {
            tracing::error!(session = %id, "turn task failed: {e}");
            Err(TurnError::Cancelled)
        })
    }

    /// Latest published state of `id`, available while a turn is running.
    pub async fn snapshot(&self, id: &SessionId) -> Option<SessionSnapshot> {
        let slot = self.get(id).await?;
        let snapshot = slot.view.borrow().clone();
        Some(snapshot)
    }

    /// Drop a session and its memory entirely.
    ///
    /// # Errors
    ///
    /// Returns [`TurnError::Busy`] while the session is generating.
    pub async fn remove(&self, id: &SessionId) -> Result<bool, TurnError> {
        let mut sessions = self.sessions.write().await;
        let busy = match sessions.get(id) {
            None => return Ok(false),
            Some(slot) => slot.session.try_lock().is_err(),
        };
        if busy {
            return Err(TurnError::Busy);
        }
        sessions.remove(id);
        tracing::debug!(session = %id, "session removed");
        Ok(true)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

impl<P, E> ChatBackend for SessionManager<P, E>
where
    P: LlmProvider + 'static,
    E: Embedder + 'static,
{
    fn submit<'a>(
        &'a self,
        session: &'a SessionId,
        text: &'a str,
    ) -> BoxFuture<'a, Result<Answer, TurnError>> {
        Box::pin(SessionManager::submit(self, session, text))
    }

    fn snapshot<'a>(
        &'a self,
        session: &'a SessionId,
    ) -> BoxFuture<'a, Result<Option<SessionSnapshot>, TurnError>> {
        Box::pin(async move { Ok(SessionManager::snapshot(self, session).await) })
    }

    fn remove<'a>(&'a self, session: &'a SessionId) -> BoxFuture<'a, Result<bool, TurnError>> {
        Box::pin(SessionManager::remove(self, session))
    }

    fn session_count(&self) -> BoxFuture<'_, usize> {
        Box::pin(self.len())
    }
}
