//! Conversation messages.
//!
//! The serialized shape mirrors the assistant wire format so that history can
//! be handed to the network API and to the session store without conversion.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human user
    User,
    /// The assistant
    Assistant,
}

/// Base64 image payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSource {
    /// Always `"base64"`
    #[serde(rename = "type")]
    pub kind: String,
    /// MIME type, e.g. `image/png`
    pub media_type: String,
    /// Base64-encoded bytes
    pub data: String,
}

/// One block of structured message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text
    Text {
        /// The text
        text: String,
    },
    /// Inline image
    Image {
        /// Image payload
        source: ImageSource,
    },
    /// Tool invocation requested by the assistant
    ToolUse {
        /// Tool call id
        id: String,
        /// Tool name
        name: String,
        /// Tool arguments
        input: serde_json::Value,
    },
    /// Result of a tool invocation
    ToolResult {
        /// Id of the matching tool call
        tool_use_id: String,
        /// Result payload
        #[serde(default)]
        content: serde_json::Value,
        /// Whether the tool failed
        #[serde(default)]
        is_error: bool,
    },
}

/// Message content: plain text or an ordered block sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text
    Text(String),
    /// Structured blocks
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// Concatenated text of the content, ignoring non-text blocks.
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    /// True for empty plain text or an empty block list.
    pub fn is_empty(&self) -> bool {
        match self {
            MessageContent::Text(t) => t.is_empty(),
            MessageContent::Blocks(blocks) => blocks.is_empty(),
        }
    }
}

/// A single conversation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Optional stable identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Author
    pub role: Role,
    /// Content
    pub content: MessageContent,
}

impl Message {
    /// User message with plain text.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: Some(uuid::Uuid::new_v4().to_string()),
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    /// Assistant message with plain text.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            id: Some(uuid::Uuid::new_v4().to_string()),
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    /// Plain text of the message.
    pub fn text(&self) -> String {
        self.content.text()
    }
}

/// Image attached to a user prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    /// MIME type
    pub media_type: String,
    /// Base64-encoded bytes
    pub data: String,
}

impl ImageAttachment {
    /// Read and encode an image file, deriving the MIME type from its extension.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or its extension is not
    /// a supported image type.
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;
        use base64::Engine;

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let media_type = match ext.as_str() {
            "png" => "image/png",
            "jpg" | "jpeg" => "image/jpeg",
            "gif" => "image/gif",
            "webp" => "image/webp",
            other => anyhow::bail!("unsupported image type '{other}' for {}", path.display()),
        };
        let bytes =
            std::fs::read(path).with_context(|| format!("reading image {}", path.display()))?;
        Ok(Self {
            media_type: media_type.to_string(),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        })
    }

    /// Content block for this image.
    pub fn to_block(&self) -> ContentBlock {
        ContentBlock::Image {
            source: ImageSource {
                kind: "base64".to_string(),
                media_type: self.media_type.clone(),
                data: self.data.clone(),
            },
        }
    }
}

/// Input to a single request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserInput {
    /// Prompt text
    pub text: String,
    /// Attached images, in order
    pub images: Vec<ImageAttachment>,
}

impl UserInput {
    /// Text-only input.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            images: Vec::new(),
        }
    }

    /// The user [`Message`] recorded in history: plain text, or image blocks
    /// followed by a text block.
    pub fn to_message(&self) -> Message {
        if self.images.is_empty() {
            return Message::user(self.text.clone());
        }
        let mut blocks: Vec<ContentBlock> = self.images.iter().map(|i| i.to_block()).collect();
        blocks.push(ContentBlock::Text {
            text: self.text.clone(),
        });
        Message {
            id: Some(uuid::Uuid::new_v4().to_string()),
            role: Role::User,
            content: MessageContent::Blocks(blocks),
        }
    }
}

impl From<&str> for UserInput {
    fn from(text: &str) -> Self {
        UserInput::text(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_message_serializes_as_string_content() {
        let msg = Message {
            id: None,
            role: Role::User,
            content: MessageContent::Text("hello".into()),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"role": "user", "content": "hello"})
        );
    }

    #[test]
    fn block_content_parses_wire_shape() {
        let value = json!({
            "role": "assistant",
            "content": [
                {"type": "text", "text": "Reading"},
                {"type": "tool_use", "id": "t1", "name": "Read", "input": {"file_path": "/a"}},
                {"type": "tool_result", "tool_use_id": "t1", "content": "ok"}
            ]
        });
        let msg: Message = serde_json::from_value(value).unwrap();
        match &msg.content {
            MessageContent::Blocks(blocks) => {
                assert_eq!(blocks.len(), 3);
                assert!(matches!(&blocks[1], ContentBlock::ToolUse { name, .. } if name == "Read"));
                assert!(matches!(&blocks[2], ContentBlock::ToolResult { is_error: false, .. }));
            }
            other => panic!("expected blocks, got {other:?}"),
        }
        assert_eq!(msg.text(), "Reading");
    }

    #[test]
    fn input_with_images_puts_images_before_text() {
        let input = UserInput {
            text: "what is this?".into(),
            images: vec![ImageAttachment {
                media_type: "image/png".into(),
                data: "AAAA".into(),
            }],
        };
        let msg = input.to_message();
        let MessageContent::Blocks(blocks) = msg.content else {
            panic!("expected blocks");
        };
        assert!(matches!(blocks[0], ContentBlock::Image { .. }));
        assert!(matches!(&blocks[1], ContentBlock::Text { text } if text == "what is this?"));
    }

    #[test]
    fn image_from_path_detects_media_type() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("shot.PNG");
        std::fs::write(&path, [0x89, b'P', b'N', b'G']).unwrap();
        let image = ImageAttachment::from_path(&path).unwrap();
        assert_eq!(image.media_type, "image/png");
        assert_eq!(image.data, "iVBORw==");

        let bad = dir.path().join("notes.txt");
        std::fs::write(&bad, "x").unwrap();
        assert!(ImageAttachment::from_path(&bad).is_err());
    }
}
