use crate::api::models::{ChatChoice, ChatResponse, ResponseMessage};
use crate::error::{ChatLoopError, Result};
use crate::models::{Message, ToolCallRequest};

/// Pulls the first choice out of a buffered response, failing on the shapes
/// the engine treats as fatal.
pub fn first_choice(response: &ChatResponse) -> Result<&ChatChoice> {
    response
        .choices
        .as_ref()
        .filter(|choices| !choices.is_empty())
        .and_then(|choices| choices.first())
        .ok_or_else(|| ChatLoopError::MalformedResponse("no choices in response".to_string()))
}

pub fn first_message(response: &ChatResponse) -> Result<&ResponseMessage> {
    first_choice(response)?
        .message
        .as_ref()
        .ok_or_else(|| ChatLoopError::MalformedResponse("no message in response".to_string()))
}

pub fn finish_reason(response: &ChatResponse) -> Option<&str> {
    response
        .choices
        .as_ref()
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.finish_reason.as_deref())
}

/// Converts the returned message into a history entry, keeping the wire role
/// (assistant when absent).
pub fn to_history_message(message: &ResponseMessage) -> Message {
    let mut entry = Message::assistant_with_tool_calls(
        message.content.clone(),
        message.tool_calls.clone().unwrap_or_default(),
    );
    if let Some(role) = &message.role {
        entry.role = role.clone();
    }
    entry
}

/// Pending-call records for every tool call the message carries.
pub fn tool_call_requests(message: &ResponseMessage) -> Vec<ToolCallRequest> {
    message
        .tool_calls
        .as_ref()
        .map(|calls| calls.iter().map(ToolCallRequest::from_wire).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> ChatResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn missing_choices_is_malformed() {
        let response = parse(json!({}));
        assert!(matches!(
            first_choice(&response),
            Err(ChatLoopError::MalformedResponse(_))
        ));

        let response = parse(json!({"choices": []}));
        assert!(matches!(
            first_choice(&response),
            Err(ChatLoopError::MalformedResponse(_))
        ));
    }

    #[test]
    fn missing_message_is_malformed() {
        let response = parse(json!({"choices": [{"finish_reason": "stop"}]}));
        assert!(matches!(
            first_message(&response),
            Err(ChatLoopError::MalformedResponse(_))
        ));
    }

    #[test]
    fn extracts_content_and_finish_reason() {
        let response = parse(json!({
            "choices": [{
                "message": {"role": "assistant", "content": "Hello"},
                "finish_reason": "stop"
            }]
        }));
        let message = first_message(&response).unwrap();
        assert_eq!(message.content.as_deref(), Some("Hello"));
        assert_eq!(finish_reason(&response), Some("stop"));
        assert!(tool_call_requests(message).is_empty());
    }

    #[test]
    fn history_message_keeps_wire_role() {
        let response = parse(json!({
            "choices": [{"message": {"role": "developer", "content": "note"}}]
        }));
        let entry = to_history_message(first_message(&response).unwrap());
        assert_eq!(entry.role, "developer");
        assert_eq!(entry.content_text(), "note");

        let response = parse(json!({"choices": [{"message": {"content": "hi"}}]}));
        let entry = to_history_message(first_message(&response).unwrap());
        assert_eq!(entry.role, "assistant");
    }

    #[test]
    fn extracts_tool_call_requests() {
        let response = parse(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "ls", "arguments": "{\"dirPath\":\".\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }));
        let message = first_message(&response).unwrap();
        let calls = tool_call_requests(message);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].tool_name, "ls");
        assert_eq!(calls[0].arguments, "{\"dirPath\":\".\"}");
    }
}
