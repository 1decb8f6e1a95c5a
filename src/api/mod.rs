//! Request/response payloads for OpenAI-compatible chat completion APIs,
//! and the streaming service that turns them into completed assistant turns.

pub mod stream;

use serde::{Deserialize, Serialize};

use crate::core::message::{Message, Role};
use crate::core::profile::Profile;

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
}

impl ChatRequest {
    /// Build the wire payload for one completion round trip: the profile's
    /// system prompt first (when present), then the conversation in order.
    pub fn from_context(profile: &Profile, messages: &[Message]) -> Self {
        let mut api_messages = Vec::with_capacity(messages.len() + 1);
        if let Some(system) = profile.system_prompt.as_deref() {
            if !system.trim().is_empty() {
                api_messages.push(ChatMessage {
                    role: Role::System.as_str().to_string(),
                    content: system.to_string(),
                });
            }
        }
        for message in messages {
            api_messages.push(ChatMessage {
                role: message.role.as_str().to_string(),
                content: message.content.clone(),
            });
        }
        Self {
            model: profile.model.clone(),
            messages: api_messages,
            stream: true,
            temperature: profile.temperature,
            max_tokens: profile.max_tokens,
            top_p: profile.top_p,
        }
    }
}

#[derive(Deserialize)]
pub struct ChatResponseDelta {
    pub content: Option<String>,
}

#[derive(Deserialize)]
pub struct ChatResponseChoice {
    pub delta: ChatResponseDelta,
}

#[derive(Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<ChatResponseChoice>,
}
