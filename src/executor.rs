use futures::stream::{Stream, StreamExt};
use futures::stream;
use serde_json::Value;
use tracing::debug;

use crate::models::{Message, ToolCallRequest, ToolOutput};
use crate::tools::ToolRegistry;

/// Runs approved calls in order, yielding each `(call, output)` pair as it
/// completes so a caller can show partial progress. The stream is finite and
/// preserves the input order; a failing call becomes a failure output and
/// never aborts the rest of the batch.
pub fn execute<'a>(
    registry: &'a ToolRegistry,
    calls: Vec<ToolCallRequest>,
) -> impl Stream<Item = (ToolCallRequest, ToolOutput)> + 'a {
    stream::iter(calls).then(move |call| async move {
        let output = run_one(registry, &call).await;
        (call, output)
    })
}

/// Drains [`execute`] into a vector.
pub async fn execute_all(
    registry: &ToolRegistry,
    calls: Vec<ToolCallRequest>,
) -> Vec<(ToolCallRequest, ToolOutput)> {
    execute(registry, calls).collect().await
}

/// Converts execution results into tool-role history messages, each linked
/// back to its request by call id.
pub fn results_to_messages(results: &[(ToolCallRequest, ToolOutput)]) -> Vec<Message> {
    results
        .iter()
        .map(|(call, output)| Message::tool(output.text.clone(), call.id.clone()))
        .collect()
}

async fn run_one(registry: &ToolRegistry, call: &ToolCallRequest) -> ToolOutput {
    debug!(tool = %call.tool_name, call_id = %call.id, "executing tool call");

    let definition = match registry.get(&call.tool_name) {
        Some(definition) if definition.enabled => definition,
        Some(_) => {
            return ToolOutput::failure(
                &call.tool_name,
                &call.arguments,
                format!("Tool '{}' is disabled", call.tool_name),
            )
        }
        None => {
            return ToolOutput::failure(
                &call.tool_name,
                &call.arguments,
                format!("Tool '{}' not found", call.tool_name),
            )
        }
    };

    let arguments: Value = match serde_json::from_str(&call.arguments) {
        Ok(value) => value,
        Err(e) => {
            return ToolOutput::failure(
                &call.tool_name,
                &call.arguments,
                format!("Failed to parse arguments: {}", e),
            )
        }
    };

    if let Err(e) = registry.validate_arguments(&call.tool_name, &arguments) {
        return ToolOutput::failure(&call.tool_name, &call.arguments, e);
    }

    let Some(handler) = definition.handler.as_ref() else {
        // Registration rejects contract-less definitions, so this is
        // unreachable through the registry's public surface.
        return ToolOutput::failure(
            &call.tool_name,
            &call.arguments,
            format!("Tool '{}' has no execution contract", call.tool_name),
        );
    };

    match handler(arguments).await {
        Ok(reply) => {
            let mut output = ToolOutput::success(&call.tool_name, &call.arguments, reply.text);
            output.private_text = reply.private_text;
            output
        }
        Err(message) => ToolOutput::failure(&call.tool_name, &call.arguments, message),
    }
}
