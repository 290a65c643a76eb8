use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{ChatParameters, Message, ToolCall};

#[derive(Serialize, Clone, Debug)]
pub struct RequestBody {
    pub model: String,
    pub messages: Vec<Message>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
}

impl RequestBody {
    /// Snapshots the session's parameters and history into one request.
    pub fn build(parameters: &ChatParameters, messages: &[Message], stream: bool) -> Self {
        Self {
            model: parameters.model.clone(),
            messages: messages.to_vec(),
            stream,
            temperature: parameters.temperature,
            max_tokens: parameters.max_tokens,
            top_p: parameters.top_p,
            frequency_penalty: parameters.frequency_penalty,
            presence_penalty: parameters.presence_penalty,
            stop: parameters.stop.clone(),
            tools: parameters.tools.clone(),
        }
    }
}

// Non-streaming response shapes.

#[derive(Deserialize, Debug)]
pub struct ChatResponse {
    pub choices: Option<Vec<ChatChoice>>,
}

#[derive(Deserialize, Debug)]
pub struct ChatChoice {
    pub message: Option<ResponseMessage>,
    pub finish_reason: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ResponseMessage {
    pub role: Option<String>,
    pub content: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
}

// Streaming chunk shapes. Tool-call arguments arrive as argument-string
// deltas grouped by `index` within the turn's batch.

#[derive(Deserialize, Debug)]
pub struct StreamChunk {
    pub choices: Option<Vec<StreamChoice>>,
}

#[derive(Deserialize, Debug)]
pub struct StreamChoice {
    pub delta: Option<Delta>,
    pub finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct Delta {
    pub role: Option<String>,
    pub content: Option<String>,
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Deserialize, Debug)]
pub struct ToolCallDelta {
    pub index: usize,
    pub id: Option<String>,
    pub function: Option<FunctionDelta>,
}

#[derive(Deserialize, Debug)]
pub struct FunctionDelta {
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// The standard `{"error": {...}}` envelope carried by non-success responses.
#[derive(Deserialize, Debug)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Deserialize, Debug)]
pub struct ErrorBody {
    pub message: Option<String>,
    #[serde(rename = "type")]
    pub error_type: Option<String>,
    pub param: Option<String>,
    pub code: Option<String>,
}
