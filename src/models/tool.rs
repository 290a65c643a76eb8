use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Wire shape of a model-requested tool call on an assistant message.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionCall,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    /// Raw JSON argument payload, kept serialized as the model sent it.
    pub arguments: String,
}

/// Approval lifecycle of a pending call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalState {
    Unset,
    Approved,
    Rejected,
}

/// A tool call the model asked for, tracked from creation through the
/// approval gate to execution. Mutated exactly once to approved or rejected
/// (setting `processed`), then consumed by the pipeline and discarded with
/// its turn.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub id: String,
    pub tool_name: String,
    pub arguments: String,
    pub approval: ApprovalState,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
    pub result: Option<ToolOutput>,
}

impl ToolCallRequest {
    pub fn new(tool_name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), tool_name, arguments)
    }

    /// Keeps the model-assigned call id so tool results can be linked back.
    pub fn with_id(
        id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            arguments: arguments.into(),
            approval: ApprovalState::Unset,
            processed: false,
            created_at: Utc::now(),
            result: None,
        }
    }

    pub fn from_wire(call: &ToolCall) -> Self {
        Self::with_id(&call.id, &call.function.name, &call.function.arguments)
    }

    pub fn approve(&mut self) {
        self.approval = ApprovalState::Approved;
        self.processed = true;
    }

    pub fn reject(&mut self, reason: impl Into<String>) {
        self.approval = ApprovalState::Rejected;
        self.processed = true;
        self.result = Some(ToolOutput::failure(&self.tool_name, &self.arguments, reason));
    }

    pub fn is_approved(&self) -> bool {
        self.approval == ApprovalState::Approved
    }
}

/// Result of running one tool call, in the shape external tool
/// implementations return and the engine feeds back to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolOutput {
    pub tool_name: String,
    /// Serialized argument payload the call ran with, kept for traceability.
    pub arguments: String,
    pub text: String,
    /// Host-only text never sent back to the model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_text: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ToolOutput {
    pub fn success(
        tool_name: impl Into<String>,
        arguments: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments: arguments.into(),
            text: text.into(),
            private_text: None,
            success: true,
            error_message: None,
        }
    }

    pub fn failure(
        tool_name: impl Into<String>,
        arguments: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let error = error.into();
        Self {
            tool_name: tool_name.into(),
            arguments: arguments.into(),
            text: format!("Error: {}", error),
            private_text: None,
            success: false,
            error_message: Some(error),
        }
    }

    pub fn with_private_text(mut self, text: impl Into<String>) -> Self {
        self.private_text = Some(text.into());
        self
    }
}
