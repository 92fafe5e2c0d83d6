//! Chat-template formatting.
//!
//! The template substitution itself belongs to the model backend; this
//! module only carries the message type and checks the request.

use crate::backend::BackendError;
use crate::error::{GenerateError, Result};
use serde::{Deserialize, Serialize};

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Something that can render a message list into a prompt string.
pub trait ChatTemplater {
    /// Apply `template`, or the model's built-in template when `None`.
    ///
    /// With `add_assistant` the output ends with the opening of an
    /// assistant turn, ready for generation.
    fn apply_chat_template(
        &self,
        messages: &[ChatMessage],
        template: Option<&str>,
        add_assistant: bool,
    ) -> std::result::Result<String, BackendError>;
}

/// Validate `messages` and format them with `templater`.
pub fn format_chat<T: ChatTemplater + ?Sized>(
    templater: &T,
    messages: &[ChatMessage],
    template: Option<&str>,
    add_assistant: bool,
) -> Result<String> {
    if let Some(i) = messages.iter().position(|m| m.role.trim().is_empty()) {
        return Err(GenerateError::InvalidRequest(format!(
            "message {i} has an empty role"
        )));
    }
    let template = template.filter(|t| !t.is_empty());
    Ok(templater.apply_chat_template(messages, template, add_assistant)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `<|role|>content` per message, `<|assistant|>` on request.
    struct Tagged;

    impl ChatTemplater for Tagged {
        fn apply_chat_template(
            &self,
            messages: &[ChatMessage],
            template: Option<&str>,
            add_assistant: bool,
        ) -> std::result::Result<String, BackendError> {
            if template == Some("broken") {
                return Err(BackendError::ChatTemplateError("unsupported template".into()));
            }
            let mut out: String = messages
                .iter()
                .map(|m| format!("<|{}|>{}", m.role, m.content))
                .collect();
            if add_assistant {
                out.push_str("<|assistant|>");
            }
            Ok(out)
        }
    }

    #[test]
    fn formats_in_order() {
        let msgs = [ChatMessage::new("system", "be brief"), ChatMessage::new("user", "hi")];
        let out = format_chat(&Tagged, &msgs, None, true).unwrap();
        assert_eq!(out, "<|system|>be brief<|user|>hi<|assistant|>");
    }

    #[test]
    fn empty_role_rejected() {
        let msgs = [ChatMessage::new("user", "hi"), ChatMessage::new(" ", "x")];
        let err = format_chat(&Tagged, &msgs, None, false).unwrap_err();
        assert!(matches!(err, GenerateError::InvalidRequest(m) if m.contains("message 1")));
    }

    #[test]
    fn template_errors_surface_as_backend_errors() {
        let msgs = [ChatMessage::new("user", "hi")];
        let err = format_chat(&Tagged, &msgs, Some("broken"), false).unwrap_err();
        assert!(matches!(err, GenerateError::Backend(BackendError::ChatTemplateError(_))));
    }

    #[test]
    fn messages_deserialize_without_content() {
        let msg: ChatMessage = serde_json::from_str(r#"{"role":"user"}"#).unwrap();
        assert_eq!(msg, ChatMessage::new("user", ""));
    }
}
