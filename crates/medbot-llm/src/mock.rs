//! Test-only mock chat and embedding providers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::LlmError;
use crate::provider::{Embedder, LlmProvider, Message};

/// Scripted chat provider. Replies are consumed front to back, then `default_response`.
///
/// Every request is recorded so tests can assert on the exact message list sent.
#[derive(Debug, Clone)]
pub struct MockProvider {
    responses: Arc<Mutex<VecDeque<Result<String, String>>>>,
    requests: Arc<Mutex<Vec<Vec<Message>>>>,
    pub default_response: String,
    pub fail_chat: bool,
    /// Milliseconds to sleep before returning a response.
    pub delay_ms: u64,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
            default_response: "mock response".into(),
            fail_chat: false,
            delay_ms: 0,
        }
    }
}

impl MockProvider {
    #[must_use]
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into_iter().map(Ok).collect())),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail_chat: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    /// Queue a reply; `Err` replies surface as `LlmError::Other`.
    pub fn push_response(&self, response: Result<String, String>) {
        self.responses.lock().unwrap().push_back(response);
    }

    /// Number of `chat` calls made so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Messages passed to every `chat` call, oldest first.
    #[must_use]
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }
}

impl LlmProvider for MockProvider {
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "mock"
    }

    async fn chat(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.requests.lock().unwrap().push(messages.to_vec());
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        if self.fail_chat {
            return Err(LlmError::Other("mock LLM error".into()));
        }
        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(e)) => Err(LlmError::Other(e)),
            None => Ok(self.default_response.clone()),
        }
    }
}

/// Deterministic embedder: a bag-of-words hash projected into `dimension` buckets.
///
/// Texts sharing words land close together, which is enough for ranking tests.
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    pub dimension: usize,
    pub fail: bool,
    calls: Arc<AtomicUsize>,
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

impl MockEmbedder {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            fail: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    /// Synchronous variant of [`Embedder::embed`] for building fixtures.
    #[must_use]
    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension.max(1)];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 2)
        {
            let hash = fnv1a(&word.to_lowercase());
            let len = v.len();
            v[hash % len] += 1.0;
        }
        v
    }
}

fn fnv1a(word: &str) -> usize {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in word.bytes() {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    usize::try_from(hash % (u64::from(u32::MAX))).unwrap_or(0)
}

impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.fail {
            return Err(LlmError::Other("mock embedding error".into()));
        }
        Ok(self.vector(text))
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn model_name(&self) -> &str {
        "mock-embed"
    }
}
