//! Conversation messages exchanged with chat models.
//!
//! Content is a list of parts rather than a bare string so that tool
//! results can carry images (chart review), humans can attach documents
//! (PDF summarization) and any message can carry a cache-point hint.
//! Providers that do not understand a part ignore it.

use serde::{Deserialize, Serialize};

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id, echoed back in the tool result.
    pub id: String,
    /// Tool name as declared to the model.
    pub name: String,
    /// Arguments conforming to the tool's input schema.
    pub args: serde_json::Value,
}

/// One piece of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ContentPart {
    /// Plain text.
    Text {
        /// The text itself.
        text: String,
    },
    /// Inline image, e.g. a rendered chart handed back for visual review.
    Image {
        /// Media type such as `image/png`.
        media_type: String,
        /// Raw image bytes.
        #[serde(with = "serde_bytes_base64")]
        data: Vec<u8>,
    },
    /// An opaque document payload (PDF summarization input).
    Document {
        /// Sanitized file name presented to the provider.
        name: String,
        /// Raw document bytes.
        #[serde(with = "serde_bytes_base64")]
        data: Vec<u8>,
    },
    /// Cache-point hint for prefix reuse. Carries no payload; providers
    /// without prompt caching must skip it.
    CachePoint,
}

/// Base64 (de)serialization for binary parts so transcripts stay JSON.
mod serde_bytes_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

/// Ordered list of content parts forming one message body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageContent {
    /// The parts in presentation order.
    pub parts: Vec<ContentPart>,
}

impl MessageContent {
    /// Content consisting of a single text part.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![ContentPart::Text { text: text.into() }],
        }
    }

    /// Append a part.
    pub fn push(&mut self, part: ContentPart) {
        self.parts.push(part);
    }

    /// Concatenation of all text parts.
    pub fn as_text(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if let ContentPart::Text { text } = part {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }

    /// True when any part is a cache-point hint.
    pub fn has_cache_point(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, ContentPart::CachePoint))
    }

    /// True when there are no parts, or all text parts are empty.
    pub fn is_empty(&self) -> bool {
        self.as_text().is_empty()
            && !self
                .parts
                .iter()
                .any(|p| matches!(p, ContentPart::Image { .. } | ContentPart::Document { .. }))
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        MessageContent::text(text)
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        MessageContent::text(text)
    }
}

/// A single conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// System instructions.
    System {
        /// Message body.
        content: MessageContent,
    },
    /// A human/user turn.
    Human {
        /// Message body.
        content: MessageContent,
    },
    /// An assistant turn, possibly requesting tool invocations.
    Ai {
        /// Message body.
        content: MessageContent,
        /// Tool invocations requested alongside the text.
        tool_calls: Vec<ToolCall>,
    },
    /// The result of a tool invocation, linked to its originating call.
    Tool {
        /// Result body (text, possibly images).
        content: MessageContent,
        /// Id of the [`ToolCall`] this result answers.
        tool_call_id: String,
        /// Name of the tool that produced the result.
        tool_name: String,
    },
}

impl Message {
    /// Build a system message from text.
    pub fn system(text: impl Into<String>) -> Self {
        Message::System {
            content: MessageContent::text(text),
        }
    }

    /// Build a human message from text.
    pub fn human(text: impl Into<String>) -> Self {
        Message::Human {
            content: MessageContent::text(text),
        }
    }

    /// Build an assistant message from text with no tool calls.
    pub fn ai(text: impl Into<String>) -> Self {
        Message::Ai {
            content: MessageContent::text(text),
            tool_calls: Vec::new(),
        }
    }

    /// Build a tool-result message.
    pub fn tool(
        content: impl Into<MessageContent>,
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
    ) -> Self {
        Message::Tool {
            content: content.into(),
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
        }
    }

    /// The message body.
    pub fn content(&self) -> &MessageContent {
        match self {
            Message::System { content }
            | Message::Human { content }
            | Message::Ai { content, .. }
            | Message::Tool { content, .. } => content,
        }
    }

    /// Mutable access to the message body.
    pub fn content_mut(&mut self) -> &mut MessageContent {
        match self {
            Message::System { content }
            | Message::Human { content }
            | Message::Ai { content, .. }
            | Message::Tool { content, .. } => content,
        }
    }

    /// Concatenated text of the body.
    pub fn as_text(&self) -> String {
        self.content().as_text()
    }

    /// True for [`Message::Tool`].
    pub fn is_tool_result(&self) -> bool {
        matches!(self, Message::Tool { .. })
    }

    /// Short tag used in logs and transcripts.
    pub fn role(&self) -> &'static str {
        match self {
            Message::System { .. } => "system",
            Message::Human { .. } => "human",
            Message::Ai { .. } => "ai",
            Message::Tool { .. } => "tool",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_roundtrip() {
        let msg = Message::human("hello");
        assert_eq!(msg.as_text(), "hello");
        assert_eq!(msg.role(), "human");
    }

    #[test]
    fn cache_point_detection() {
        let mut msg = Message::ai("answer");
        assert!(!msg.content().has_cache_point());
        msg.content_mut().push(ContentPart::CachePoint);
        assert!(msg.content().has_cache_point());
        assert_eq!(msg.as_text(), "answer");
    }

    #[test]
    fn binary_parts_serialize_as_base64() {
        let content = MessageContent {
            parts: vec![ContentPart::Image {
                media_type: "image/png".to_string(),
                data: vec![0x89, 0x50, 0x4e, 0x47],
            }],
        };
        let json = serde_json::to_string(&content).unwrap();
        assert!(json.contains("iVBORw"));
        let back: MessageContent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, content);
    }

    #[test]
    fn multi_part_text_joins_with_newline() {
        let content = MessageContent {
            parts: vec![
                ContentPart::Text {
                    text: "a".to_string(),
                },
                ContentPart::CachePoint,
                ContentPart::Text {
                    text: "b".to_string(),
                },
            ],
        };
        assert_eq!(content.as_text(), "a\nb");
    }
}
