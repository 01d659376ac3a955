use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Deserialize, Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    #[serde(alias = "ai")]
    Assistant,
}

/// One message of a chat exchange, as carried in the request payload.
#[derive(Deserialize, Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
        }
    }
}

impl fmt::Display for TurnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnRole::User => write!(f, "User"),
            TurnRole::Assistant => write!(f, "Assistant"),
        }
    }
}

impl fmt::Display for ConversationTurn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.role, self.content)
    }
}

pub fn format_history(history: &[ConversationTurn]) -> String {
    history
        .iter()
        .map(|turn| format!("{turn}"))
        .collect::<Vec<String>>()
        .join("\n")
}
