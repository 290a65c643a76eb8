use futures::StreamExt;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::models::ChatResponse;
use crate::api::{response, ApiClient, RequestBody, SseDecoder, SseEvent, StreamChunk};
use crate::approval::ApprovalGate;
use crate::error::{ChatLoopError, Result};
use crate::executor;
use crate::models::{ChatParameters, Message, MessageContent, ToolCallRequest};
use crate::tools::ToolRegistry;

/// Outcome of one streamed turn: the accumulated text (already emitted
/// incrementally through the caller's sink) and any reconstructed tool calls.
#[derive(Debug)]
pub struct StreamedTurn {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
}

/// Reconstruction buffer for one tool call fragmented across stream chunks,
/// keyed by the delta's batch index. Argument deltas are concatenated in
/// arrival order; the buffer is final only once the turn's finish reason says
/// the tool calls are complete.
#[derive(Default)]
struct ToolCallFragment {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

#[derive(Default)]
struct StreamState {
    role: Option<String>,
    content: String,
    fragments: BTreeMap<usize, ToolCallFragment>,
    tool_calls: Vec<ToolCallRequest>,
    first_payload_seen: bool,
}

/// One conversation with the completion service.
///
/// Owns the ordered message history and the request parameters; no two turns
/// run concurrently against the same session.
pub struct ChatSession {
    client: ApiClient,
    history: Vec<Message>,
    parameters: ChatParameters,
}

impl ChatSession {
    pub fn new(client: ApiClient, parameters: ChatParameters) -> Self {
        Self {
            client,
            history: Vec::new(),
            parameters,
        }
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn push_message(&mut self, message: Message) {
        self.history.push(message);
    }

    pub fn parameters(&self) -> &ChatParameters {
        &self.parameters
    }

    pub fn parameters_mut(&mut self) -> &mut ChatParameters {
        &mut self.parameters
    }

    /// Advertises the registry's enabled tools on subsequent requests.
    pub fn advertise_tools(&mut self, registry: &ToolRegistry) {
        let definitions = registry.definitions_for_request();
        self.parameters.tools = if definitions.is_empty() {
            None
        } else {
            Some(definitions)
        };
    }

    /// Removes the oldest non-system message. Returns false once only system
    /// messages (or nothing) remain.
    pub fn truncate_history(&mut self) -> bool {
        match self.history.iter().position(|m| m.role != "system") {
            Some(index) => {
                let removed = self.history.remove(index);
                debug!(role = %removed.role, "truncated oldest history message");
                true
            }
            None => false,
        }
    }

    /// Sends one buffered (non-streaming) turn.
    ///
    /// Recovers locally from context-window overflow by truncating history
    /// and re-sending; a cancellation observation permits exactly one extra
    /// attempt before becoming fatal. On success the assistant message is
    /// appended to history and returned.
    pub async fn send_turn(&mut self, cancel: &CancellationToken) -> Result<Message> {
        let mut cancel_retry_used = false;

        loop {
            let body = RequestBody::build(&self.parameters, &self.history, false);
            let response = match self.race_request(&body, cancel).await {
                Ok(response) => response,
                Err(ChatLoopError::Canceled) if !cancel_retry_used => {
                    cancel_retry_used = true;
                    warn!("request canceled; permitting one more attempt");
                    continue;
                }
                Err(e) if e.is_context_length_exceeded() => {
                    if self.truncate_history() {
                        continue;
                    }
                    return Err(e);
                }
                Err(e) => return Err(e),
            };

            let text = response.text().await?;
            let parsed: ChatResponse = serde_json::from_str(&text)?;
            let finish = response::finish_reason(&parsed).map(|s| s.to_string());
            let message = response::first_message(&parsed)?;

            let has_content = message
                .content
                .as_ref()
                .is_some_and(|content| !content.is_empty());
            let has_tool_calls = message
                .tool_calls
                .as_ref()
                .is_some_and(|calls| !calls.is_empty());

            if !has_content && !has_tool_calls {
                if finish.as_deref() == Some("length") {
                    if self.truncate_history() {
                        continue;
                    }
                    return Err(ChatLoopError::ContextLengthExhausted);
                }
                return Err(ChatLoopError::MalformedResponse(
                    "message has neither content nor tool calls".to_string(),
                ));
            }

            let history_message = response::to_history_message(message);
            self.history.push(history_message.clone());
            return Ok(history_message);
        }
    }

    /// Sends one streamed turn, emitting each content delta through
    /// `on_delta` in arrival order.
    ///
    /// Context-window overflow at stream open truncates and retries; a
    /// malformed stream falls back to a single non-streaming call whose text
    /// is emitted as one delta. The assistant message is appended to history
    /// only if the stream carried a role.
    pub async fn send_turn_streaming(
        &mut self,
        cancel: &CancellationToken,
        on_delta: &mut (dyn FnMut(&str) + Send),
    ) -> Result<StreamedTurn> {
        loop {
            let body = RequestBody::build(&self.parameters, &self.history, true);
            let response = match self.race_request(&body, cancel).await {
                Ok(response) => response,
                Err(e) if e.is_context_length_exceeded() => {
                    if self.truncate_history() {
                        continue;
                    }
                    return Err(e);
                }
                Err(e) => return Err(e),
            };

            return match self.consume_stream(response, cancel, on_delta).await {
                Ok(turn) => Ok(turn),
                Err(ChatLoopError::StreamDecode(message)) => {
                    warn!(error = %message, "malformed stream; falling back to one buffered request");
                    let fallback = self.send_turn(cancel).await?;
                    let content = fallback.content_text();
                    if !content.is_empty() {
                        on_delta(&content);
                    }
                    let tool_calls = fallback
                        .tool_calls
                        .as_ref()
                        .map(|calls| calls.iter().map(ToolCallRequest::from_wire).collect())
                        .unwrap_or_default();
                    Ok(StreamedTurn {
                        content,
                        tool_calls,
                    })
                }
                Err(e) => Err(e),
            };
        }
    }

    /// Drives turns to completion: send, gate the requested calls, execute
    /// the approved ones, feed results back as tool messages, repeat until a
    /// turn produces only text. An explicit loop, so a pathological chain of
    /// tool-call turns cannot grow the call stack.
    pub async fn run_until_text(
        &mut self,
        registry: &ToolRegistry,
        gate: &ApprovalGate,
        cancel: &CancellationToken,
    ) -> Result<Message> {
        loop {
            self.advertise_tools(registry);
            let message = self.send_turn(cancel).await?;

            let requested: Vec<ToolCallRequest> = message
                .tool_calls
                .as_ref()
                .map(|calls| calls.iter().map(ToolCallRequest::from_wire).collect())
                .unwrap_or_default();
            if requested.is_empty() {
                return Ok(message);
            }

            let resolve = gate.resolve(requested, registry);
            tokio::pin!(resolve);
            let approved = tokio::select! {
                resolved = &mut resolve => resolved?,
                _ = cancel.cancelled() => {
                    gate.cancel_all_pending().await;
                    (&mut resolve).await?
                }
            };

            // Every requested call rejected or dropped: nothing to feed back,
            // so the turn ends with the assistant message as-is.
            if approved.is_empty() {
                return Ok(message);
            }

            let results = executor::execute_all(registry, approved).await;
            for (_, output) in &results {
                gate.notify_payload(serde_json::to_value(output)?);
            }
            for tool_message in executor::results_to_messages(&results) {
                self.history.push(tool_message);
            }
        }
    }

    /// Races the transport call against the cancellation token and the soft
    /// request deadline. A losing transport future is dropped, which tears
    /// the connection down rather than abandoning it.
    async fn race_request(
        &self,
        body: &RequestBody,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response> {
        let deadline = Duration::from_secs(self.client.config().request_timeout_secs);
        tokio::select! {
            result = self.client.send(body) => result,
            _ = cancel.cancelled() => Err(ChatLoopError::Canceled),
            _ = tokio::time::sleep(deadline) => Err(ChatLoopError::Canceled),
        }
    }

    async fn consume_stream(
        &mut self,
        response: reqwest::Response,
        cancel: &CancellationToken,
        on_delta: &mut (dyn FnMut(&str) + Send),
    ) -> Result<StreamedTurn> {
        let idle = Duration::from_secs(self.client.config().stream_idle_timeout_secs);
        let mut stream = response.bytes_stream();
        let mut decoder = SseDecoder::new();
        let mut state = StreamState::default();

        'read: loop {
            let next = tokio::select! {
                next = timeout(idle, stream.next()) => next,
                _ = cancel.cancelled() => break 'read,
            };

            let chunk = match next {
                Ok(Some(Ok(chunk))) => chunk,
                Ok(Some(Err(e))) => return Err(ChatLoopError::NetworkError(e)),
                Ok(None) => break,
                Err(_) => {
                    warn!(idle_secs = idle.as_secs(), "no stream data within idle timeout");
                    return Err(ChatLoopError::Canceled);
                }
            };

            for event in decoder.feed(&chunk) {
                match event {
                    SseEvent::Done => break 'read,
                    SseEvent::Data(payload) => {
                        apply_payload(&payload, &mut state, on_delta)?;
                    }
                }
            }
            if decoder.is_done() {
                break;
            }
        }

        if let Some(SseEvent::Data(payload)) = decoder.finish() {
            apply_payload(&payload, &mut state, on_delta)?;
        }

        // An aborted stream that never carried a role leaves history untouched.
        if let Some(role) = state.role.take() {
            let wire_calls: Vec<crate::models::ToolCall> = state
                .tool_calls
                .iter()
                .map(|call| crate::models::ToolCall {
                    id: call.id.clone(),
                    tool_type: "function".to_string(),
                    function: crate::models::FunctionCall {
                        name: call.tool_name.clone(),
                        arguments: call.arguments.clone(),
                    },
                })
                .collect();
            self.history.push(Message {
                role,
                content: if state.content.is_empty() {
                    None
                } else {
                    Some(MessageContent::Text(state.content.clone()))
                },
                name: None,
                tool_calls: if wire_calls.is_empty() {
                    None
                } else {
                    Some(wire_calls)
                },
                tool_call_id: None,
            });
        }

        Ok(StreamedTurn {
            content: state.content,
            tool_calls: state.tool_calls,
        })
    }
}

fn apply_payload(
    payload: &str,
    state: &mut StreamState,
    on_delta: &mut (dyn FnMut(&str) + Send),
) -> Result<()> {
    let chunk: StreamChunk = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(e) => {
            if !state.first_payload_seen {
                return Err(ChatLoopError::StreamDecode(format!(
                    "undecodable first chunk: {}",
                    e
                )));
            }
            warn!(error = %e, "skipping undecodable stream chunk");
            return Ok(());
        }
    };
    state.first_payload_seen = true;

    let Some(choices) = chunk.choices else {
        return Ok(());
    };
    for choice in choices {
        if let Some(delta) = choice.delta {
            if let Some(role) = delta.role {
                state.role.get_or_insert(role);
            }
            if let Some(content) = delta.content {
                if !content.is_empty() {
                    state.content.push_str(&content);
                    on_delta(&content);
                }
            }
            if let Some(tool_deltas) = delta.tool_calls {
                for tool_delta in tool_deltas {
                    let fragment = state.fragments.entry(tool_delta.index).or_default();
                    if let Some(id) = tool_delta.id {
                        fragment.id.get_or_insert(id);
                    }
                    if let Some(function) = tool_delta.function {
                        if let Some(name) = function.name {
                            fragment.name.get_or_insert(name);
                        }
                        if let Some(arguments) = function.arguments {
                            fragment.arguments.push_str(&arguments);
                        }
                    }
                }
            }
        }
        if choice.finish_reason.as_deref() == Some("tool_calls") && !state.fragments.is_empty() {
            finalize_fragments(state);
        }
    }
    Ok(())
}

fn finalize_fragments(state: &mut StreamState) {
    for (index, fragment) in std::mem::take(&mut state.fragments) {
        let Some(name) = fragment.name else {
            warn!(index, "dropping tool call fragment without a name");
            continue;
        };
        let call = match fragment.id {
            Some(id) => ToolCallRequest::with_id(id, name, fragment.arguments),
            None => ToolCallRequest::new(name, fragment.arguments),
        };
        state.tool_calls.push(call);
    }
}
