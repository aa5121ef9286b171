use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Key that scopes a conversation to one user session.
///
/// Generated ids are UUID v4; callers may also bring their own opaque key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid session id: {0:?}")]
pub struct InvalidSessionId(pub String);

impl FromStr for SessionId {
    type Err = InvalidSessionId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = !s.is_empty()
            && s.len() <= 128
            && s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if valid {
            Ok(Self(s.to_owned()))
        } else {
            Err(InvalidSessionId(s.to_owned()))
        }
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique_uuids() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
        assert!(uuid::Uuid::parse_str(a.as_str()).is_ok());
    }

    #[test]
    fn parse_accepts_opaque_keys() {
        let id: SessionId = "user-42_web.1".parse().unwrap();
        assert_eq!(id.to_string(), "user-42_web.1");
    }

    #[test]
    fn parse_rejects_empty_and_unsafe() {
        assert!("".parse::<SessionId>().is_err());
        assert!("a/b".parse::<SessionId>().is_err());
        assert!("x".repeat(129).parse::<SessionId>().is_err());
    }
}
