//! Conversation types flowing into the pipeline.
//!
//! [`Message`] mirrors the `{role, content}` shape used by most chat-style
//! LLM APIs; a [`Role::Tool`] message additionally carries the
//! `tool_use_id` it answers. The pipeline treats [`Content`] — an opaque
//! `String` — as the unit every detector ultimately inspects; [`Message`]
//! and the conversation-level helpers build on top of it.

use serde::{Deserialize, Serialize};

// ── Role ───────────────────────────────────────────────────────────────

/// Who authored a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// A human or upstream caller.
    User,
    /// The protected model's own output.
    Assistant,
    /// A system/developer instruction.
    System,
    /// A tool invocation result.
    Tool,
}

impl Role {
    /// Whether this role originates from the untrusted data plane.
    ///
    /// `User`, `Tool`, and `System` messages are untrusted inputs per §4.9;
    /// only an `Assistant` message halts the pre-inference wrapper's
    /// backward scan.
    #[must_use]
    pub fn is_untrusted(self) -> bool {
        !matches!(self, Self::Assistant)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::System => write!(f, "system"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

// ── Message ────────────────────────────────────────────────────────────

/// A single turn in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who authored the message.
    pub role: Role,
    /// Textual content.
    pub content: String,
    /// Tool name, present on some `Tool` messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Identifier correlating a `Tool` message with the call it answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
}

impl Message {
    /// Construct a message with no `name`/`tool_use_id`.
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            tool_use_id: None,
        }
    }

    /// Shorthand for a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Shorthand for an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Shorthand for a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Shorthand for a tool-result message.
    #[must_use]
    pub fn tool(content: impl Into<String>, tool_use_id: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            name: None,
            tool_use_id: Some(tool_use_id.into()),
        }
    }

    /// Attach a tool/participant name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Join a sequence of content items with the pipeline's boundary sentinel
/// (`"\n---\n"`, per `evaluate_context`/CCFC sandwich construction).
#[must_use]
pub fn join_with_boundary<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items
        .into_iter()
        .map(|s| s.as_ref().to_string())
        .collect::<Vec<_>>()
        .join("\n---\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untrusted_roles() {
        assert!(Role::User.is_untrusted());
        assert!(Role::Tool.is_untrusted());
        assert!(!Role::Assistant.is_untrusted());
        assert!(Role::System.is_untrusted());
    }

    #[test]
    fn message_constructors() {
        let m = Message::user("hi");
        assert_eq!(m.role, Role::User);
        assert_eq!(m.content, "hi");
        assert!(m.tool_use_id.is_none());

        let t = Message::tool("72F", "call-1");
        assert_eq!(t.role, Role::Tool);
        assert_eq!(t.tool_use_id.as_deref(), Some("call-1"));
    }

    #[test]
    fn boundary_join() {
        let joined = join_with_boundary(["a", "b", "c"]);
        assert_eq!(joined, "a\n---\nb\n---\nc");
    }

    #[test]
    fn message_round_trips_json() {
        let m = Message::assistant("hello").with_name("bot");
        let json = serde_json::to_string(&m).unwrap();
        let restored: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, m);
    }
}
