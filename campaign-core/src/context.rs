//! Session context: the append-only narrative log of a campaign.
//!
//! The stored form is a role-tagged message list:
//!
//! ```json
//! {"messages": [{"role": "system", "content": "..."}, {"role": "user", "content": "..."}]}
//! ```
//!
//! Older rows use `{"history": [{"player": "...", "dm": "..."}]}`. That shape
//! is still read, and is replaced by the message list the next time the
//! context is written.

use serde::{Deserialize, Serialize};

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    #[serde(alias = "player")]
    User,
    #[serde(alias = "dm")]
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One entry in the context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextMessage {
    pub role: Role,
    pub content: String,
}

impl ContextMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A player input and the narrator's reply, if there was one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub player: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dm: Option<String>,
}

impl Turn {
    pub fn new(player: impl Into<String>, dm: impl Into<String>) -> Self {
        Self {
            player: player.into(),
            dm: Some(dm.into()),
        }
    }

    /// A turn the narrator never answered.
    pub fn unanswered(player: impl Into<String>) -> Self {
        Self {
            player: player.into(),
            dm: None,
        }
    }
}

/// The conversational state of one campaign.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StoredContext")]
pub struct SessionContext {
    messages: Vec<ContextMessage>,
}

impl SessionContext {
    /// A context with no messages at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A fresh campaign context holding only the system preamble.
    pub fn with_preamble(text: impl Into<String>) -> Self {
        Self {
            messages: vec![ContextMessage::system(text)],
        }
    }

    /// Return a copy of this context with `turn` appended.
    pub fn append(&self, turn: &Turn) -> SessionContext {
        let mut next = self.clone();
        next.push_turn(turn.clone());
        next
    }

    /// Append a turn in place.
    ///
    /// A blank reply is never stored; the turn is recorded as unanswered.
    pub fn push_turn(&mut self, turn: Turn) {
        self.messages.push(ContextMessage::user(turn.player));
        if let Some(dm) = turn.dm.filter(|dm| !dm.trim().is_empty()) {
            self.messages.push(ContextMessage::assistant(dm));
        }
    }

    pub fn messages(&self) -> &[ContextMessage] {
        &self.messages
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// System messages, in order.
    pub fn preamble(&self) -> impl Iterator<Item = &ContextMessage> {
        self.messages.iter().filter(|m| m.role == Role::System)
    }

    /// Player and narrator messages, in order.
    pub fn history(&self) -> impl Iterator<Item = &ContextMessage> {
        self.messages.iter().filter(|m| m.role != Role::System)
    }

    /// Group the history into turns.
    ///
    /// Each user message opens a turn and the assistant message after it
    /// fills the reply. An assistant message with no open turn (narration
    /// before the first input) becomes a turn with an empty `player`.
    pub fn turns(&self) -> Vec<Turn> {
        let mut turns: Vec<Turn> = Vec::new();
        for message in self.history() {
            match message.role {
                Role::User => turns.push(Turn::unanswered(message.content.clone())),
                Role::Assistant => match turns.last_mut() {
                    Some(last) if last.dm.is_none() => last.dm = Some(message.content.clone()),
                    _ => turns.push(Turn {
                        player: String::new(),
                        dm: Some(message.content.clone()),
                    }),
                },
                Role::System => {}
            }
        }
        turns
    }

    pub fn turn_count(&self) -> usize {
        self.turns().len()
    }

    /// The last `n` turns in their original order.
    pub fn tail(&self, n: usize) -> Vec<Turn> {
        let mut turns = self.turns();
        let skip = turns.len().saturating_sub(n);
        turns.split_off(skip)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Every shape a stored context has had.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredContext {
    Legacy { history: Vec<LegacyTurn> },
    Messages { messages: Vec<ContextMessage> },
}

#[derive(Deserialize)]
struct LegacyTurn {
    #[serde(default)]
    player: String,
    #[serde(default)]
    dm: Option<String>,
}

impl From<StoredContext> for SessionContext {
    fn from(stored: StoredContext) -> Self {
        match stored {
            StoredContext::Messages { messages } => Self { messages },
            StoredContext::Legacy { history } => {
                let mut context = Self::empty();
                for entry in history {
                    context.push_turn(Turn {
                        player: entry.player,
                        dm: entry.dm,
                    });
                }
                context
            }
        }
    }
}
