//! UI-agnostic conversation state types
//!
//! These are the records persisted to the blob store and shared between the
//! controller and whichever front end renders them.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Title used when the first message of a conversation carries only images.
pub const IMAGE_ONLY_TITLE: &str = "Image Query";

const TITLE_MAX_CHARS: usize = 40;
const TITLE_TRUNCATED_CHARS: usize = 37;

/// Opaque, never-reused conversation identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn generate() -> Self {
        Self(format!("chat_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConversationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// One turn in a conversation.
///
/// `images` holds `data:<mime>;base64,<data>` URLs so the content type
/// survives a round trip through storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
}

impl Message {
    pub fn user(text: impl Into<String>, images: Vec<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            images: if images.is_empty() { None } else { Some(images) },
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
            images: None,
        }
    }

    pub fn image_count(&self) -> usize {
        self.images.as_ref().map_or(0, Vec::len)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub title: String,
    pub messages: Vec<Message>,
}

impl Conversation {
    /// Start a thread from its first message. The title is fixed here and
    /// never recomputed.
    pub fn start(first_message: Message) -> Self {
        Self {
            id: ConversationId::generate(),
            title: derive_title(&first_message.text),
            messages: vec![first_message],
        }
    }
}

/// Derive a conversation title from the first user message.
pub fn derive_title(text: &str) -> String {
    if text.is_empty() {
        return IMAGE_ONLY_TITLE.to_string();
    }
    if text.chars().count() > TITLE_MAX_CHARS {
        let mut title: String = text.chars().take(TITLE_TRUNCATED_CHARS).collect();
        title.push_str("...");
        title
    } else {
        text.to_string()
    }
}

/// Per-session pointers owned by the controller. Not persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub active_conversation_id: Option<ConversationId>,
    pub in_flight: bool,
    pub draft: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_short_text_kept() {
        assert_eq!(derive_title("2+2?"), "2+2?");
    }

    #[test]
    fn test_title_exactly_forty_chars_kept() {
        let text = "a".repeat(40);
        assert_eq!(derive_title(&text), text);
    }

    #[test]
    fn test_title_long_text_truncated() {
        let text = "Explain the difference between mitosis and meiosis in detail";
        let title = derive_title(text);
        assert_eq!(title, "Explain the difference between mitosi...");
        assert_eq!(title.chars().count(), 40);
    }

    #[test]
    fn test_title_counts_chars_not_bytes() {
        let text = "é".repeat(41);
        let title = derive_title(&text);
        assert_eq!(title, format!("{}...", "é".repeat(37)));
    }

    #[test]
    fn test_title_empty_text_uses_placeholder() {
        assert_eq!(derive_title(""), IMAGE_ONLY_TITLE);
    }

    #[test]
    fn test_message_json_shape() {
        let msg = Message::model("4");
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"role":"model","text":"4"}"#);

        let user = Message::user("", vec!["data:image/png;base64,AAAA".to_string()]);
        let json = serde_json::to_string(&user).unwrap();
        assert_eq!(
            json,
            r#"{"role":"user","text":"","images":["data:image/png;base64,AAAA"]}"#
        );
    }

    #[test]
    fn test_generated_ids_are_distinct() {
        let a = ConversationId::generate();
        let b = ConversationId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("chat_"));
    }
}
