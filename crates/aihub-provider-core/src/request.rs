use serde::{Deserialize, Serialize};

/// Message roles of the OpenAI-compatible canonical shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ChatMessage {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Canonical completion request. Callers speak this shape regardless of the
/// upstream wire protocol; adapters translate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl ChatRequest {
    /// Split the system prompt out for providers that carry it separately.
    pub fn split_system(&self) -> (Option<String>, Vec<&ChatMessage>) {
        let mut system = None;
        let mut rest = Vec::with_capacity(self.messages.len());
        for message in &self.messages {
            match message.role {
                Role::System => system = Some(message.content.clone()),
                _ => rest.push(message),
            }
        }
        (system, rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_system_extracts_and_preserves_order() {
        let request = ChatRequest {
            model: "claude-3-5-haiku".to_string(),
            messages: vec![
                ChatMessage::user("first"),
                ChatMessage::system("you are terse"),
                ChatMessage::assistant("ok"),
                ChatMessage::user("second"),
            ],
            max_tokens: 64,
            temperature: 0.7,
        };
        let (system, rest) = request.split_system();
        assert_eq!(system.as_deref(), Some("you are terse"));
        let contents: Vec<&str> = rest.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "ok", "second"]);
    }

    #[test]
    fn role_serialises_lowercase() {
        let json = serde_json::to_string(&ChatMessage::user("hi")).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"hi"}"#);
    }
}
