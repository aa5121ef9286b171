//! Append-only conversation log for a single chat session.

use std::fmt;

use chrono::{DateTime, Utc};
use medbot_llm::Message;
use serde::{Deserialize, Serialize};

use crate::error::MemoryError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for TurnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One utterance. Fields are private so a turn cannot change after creation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    role: TurnRole,
    content: String,
    created_at: DateTime<Utc>,
}

impl Turn {
    #[must_use]
    pub fn new(role: TurnRole, content: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at,
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(TurnRole::User, content, Utc::now())
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(TurnRole::Assistant, content, Utc::now())
    }

    #[must_use]
    pub fn role(&self) -> TurnRole {
        self.role
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn to_message(&self) -> Message {
        match self.role {
            TurnRole::User => Message::user(self.content.clone()),
            TurnRole::Assistant => Message::assistant(self.content.clone()),
        }
    }
}

/// Completed exchanges, stored as strictly alternating user/assistant turns.
///
/// The log grows without bound and lives as long as its owning session.
#[derive(Clone, Debug, Default)]
pub struct ConversationMemory {
    turns: Vec<Turn>,
}

impl ConversationMemory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed exchange.
    ///
    /// Both turns share a single timestamp taken at call time. The log is left untouched
    /// when either side is empty.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::EmptyContent`] if either text is empty or whitespace-only.
    pub fn append(
        &mut self,
        user_text: impl Into<String>,
        assistant_text: impl Into<String>,
    ) -> Result<(), MemoryError> {
        let user_text = user_text.into();
        let assistant_text = assistant_text.into();
        if user_text.trim().is_empty() {
            return Err(MemoryError::EmptyContent {
                role: TurnRole::User,
            });
        }
        if assistant_text.trim().is_empty() {
            return Err(MemoryError::EmptyContent {
                role: TurnRole::Assistant,
            });
        }

        let now = Utc::now();
        self.turns.reserve(2);
        self.turns.push(Turn::new(TurnRole::User, user_text, now));
        self.turns
            .push(Turn::new(TurnRole::Assistant, assistant_text, now));
        Ok(())
    }

    #[must_use]
    pub fn read(&self) -> &[Turn] {
        &self.turns
    }

    pub fn clear(&mut self) {
        let dropped = self.turns.len();
        self.turns.clear();
        tracing::debug!(dropped, "conversation memory cleared");
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Number of completed user/assistant pairs.
    #[must_use]
    pub fn exchanges(&self) -> usize {
        self.turns.len() / 2
    }

    #[must_use]
    pub fn to_messages(&self) -> Vec<Message> {
        self.turns.iter().map(Turn::to_message).collect()
    }
}

#[cfg(test)]
mod tests {
    use medbot_llm::Role;
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn append_adds_user_then_assistant() {
        let mut memory = ConversationMemory::new();
        memory
            .append("What are symptoms of the flu?", "Fever, cough, aches.")
            .unwrap();

        let turns = memory.read();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role(), TurnRole::User);
        assert_eq!(turns[0].content(), "What are symptoms of the flu?");
        assert_eq!(turns[1].role(), TurnRole::Assistant);
        assert_eq!(turns[0].created_at(), turns[1].created_at());
        assert_eq!(memory.exchanges(), 1);
    }

    #[test]
    fn append_rejects_empty_user_text() {
        let mut memory = ConversationMemory::new();
        let err = memory.append("   ", "answer").unwrap_err();
        assert!(matches!(
            err,
            MemoryError::EmptyContent {
                role: TurnRole::User
            }
        ));
        assert!(memory.is_empty());
    }

    #[test]
    fn append_rejects_empty_assistant_text() {
        let mut memory = ConversationMemory::new();
        memory.append("q1", "a1").unwrap();
        let err = memory.append("q2", "").unwrap_err();
        assert!(matches!(
            err,
            MemoryError::EmptyContent {
                role: TurnRole::Assistant
            }
        ));
        assert_eq!(memory.len(), 2);
    }

    #[test]
    fn read_does_not_mutate() {
        let mut memory = ConversationMemory::new();
        memory.append("q", "a").unwrap();
        let first = memory.read().to_vec();
        let second = memory.read().to_vec();
        assert_eq!(first, second);
    }

    #[test]
    fn to_messages_maps_roles() {
        let mut memory = ConversationMemory::new();
        memory.append("q", "a").unwrap();
        let messages = memory.to_messages();
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "a");
    }

    #[test]
    fn turn_role_display() {
        assert_eq!(TurnRole::User.to_string(), "user");
        assert_eq!(TurnRole::Assistant.to_string(), "assistant");
    }

    #[test]
    fn turn_serializes_with_timestamp() {
        let turn = Turn::user("hello");
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "hello");
        assert!(json["created_at"].is_string());
    }

    proptest! {
        #[test]
        fn n_exchanges_give_2n_alternating_turns(
            pairs in proptest::collection::vec(("[a-z]{1,20}", "[a-z]{1,20}"), 0..40)
        ) {
            let mut memory = ConversationMemory::new();
            for (q, a) in &pairs {
                memory.append(q.as_str(), a.as_str()).unwrap();
            }
            prop_assert_eq!(memory.len(), pairs.len() * 2);
            for (i, turn) in memory.read().iter().enumerate() {
                let expected = if i % 2 == 0 { TurnRole::User } else { TurnRole::Assistant };
                prop_assert_eq!(turn.role(), expected);
            }
        }

        #[test]
        fn clear_always_empties(n in 0usize..50) {
            let mut memory = ConversationMemory::new();
            for i in 0..n {
                memory.append(format!("q{i}"), format!("a{i}")).unwrap();
            }
            memory.clear();
            prop_assert!(memory.read().is_empty());
            prop_assert_eq!(memory.exchanges(), 0);
        }
    }
}
