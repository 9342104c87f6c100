use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::{RagError, RagResult};

/// The role of the participant that authored a [`Message`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A human end-user.
    User,
    /// The AI assistant.
    Assistant,
    /// A system-level instruction or prompt.
    System,
    /// Output produced by a tool invocation.
    Tool,
}

impl Role {
    /// Lowercase wire name of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }

    /// Parses a lowercase role name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            "tool" => Some(Role::Tool),
            _ => None,
        }
    }
}

/// A single message within a conversation.
///
/// `order` is the monotonic order key assigned by the history store when the
/// message is appended; it is `0` until then.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier for this message.
    pub id: Uuid,
    /// The role of the message author.
    pub role: Role,
    /// The textual content of the message.
    pub content: String,
    /// The conversation this message belongs to.
    pub conversation_id: String,
    /// Position of the message within its conversation.
    #[serde(default)]
    pub order: i64,
    /// UTC timestamp of when the message was created.
    pub timestamp: DateTime<Utc>,
    /// Arbitrary key-value metadata attached to the message.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Message {
    /// Creates a new message with the given role, content, and conversation ID.
    pub fn new(role: Role, content: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            conversation_id: conversation_id.into(),
            order: 0,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Creates a new message with [`Role::User`].
    pub fn user(content: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self::new(Role::User, content, conversation_id)
    }

    /// Creates a new message with [`Role::Assistant`].
    pub fn assistant(content: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content, conversation_id)
    }

    /// Creates a new message with [`Role::System`].
    pub fn system(content: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self::new(Role::System, content, conversation_id)
    }
}

/// One piece of a streamed assistant message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    /// Role announced by this fragment, usually only on the first one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    /// Text delta carried by this fragment.
    #[serde(default)]
    pub content: String,
}

impl Fragment {
    /// A text delta without a role.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            role: None,
            content: content.into(),
        }
    }

    /// A text delta that announces the assistant role.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Some(Role::Assistant),
            content: content.into(),
        }
    }
}

/// Merges streamed fragments into one fragment.
///
/// The role of the first fragment carrying one wins (assistant if none do);
/// content is concatenated in receipt order.
pub fn concat_fragments<I>(fragments: I) -> RagResult<Fragment>
where
    I: IntoIterator<Item = Fragment>,
{
    let mut role = None;
    let mut content = String::new();
    let mut seen = 0usize;
    for fragment in fragments {
        seen += 1;
        if role.is_none() {
            role = fragment.role;
        }
        content.push_str(&fragment.content);
    }
    if seen == 0 {
        return Err(RagError::Validation(
            "cannot concatenate an empty fragment list".into(),
        ));
    }
    Ok(Fragment {
        role: Some(role.unwrap_or(Role::Assistant)),
        content,
    })
}
