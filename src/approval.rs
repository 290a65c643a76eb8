use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};

use crate::error::{ChatLoopError, Result};
use crate::models::ToolCallRequest;
use crate::tools::{ApprovalKind, RiskLevel, ToolRegistry};

/// Everything the approver needs to decide on one pending call. This is the
/// only value the gate pushes to the notification channel; rendering it is
/// the host's business.
#[derive(Debug, Clone, Serialize)]
pub struct PendingApproval {
    pub id: String,
    pub tool_name: String,
    pub category: String,
    pub risk: RiskLevel,
    pub parameters: Value,
    pub rationale: Option<String>,
    pub requested_at: DateTime<Utc>,
}

/// Payloads delivered to the host over the notification channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HostNotification {
    /// The gate has started waiting on these calls.
    PendingApprovals(Vec<PendingApproval>),
    /// Free-form payload the host may choose to render.
    Payload(Value),
}

struct GateState {
    pending: HashMap<String, ToolCallRequest>,
    /// One-shot completion signal for the current wait; the payload says
    /// whether the wait ended by cancellation.
    waiter: Option<oneshot::Sender<bool>>,
}

/// Arbitrates execution of side-effecting tool calls.
///
/// [`ApprovalGate::resolve`] partitions a turn's calls, suspends until every
/// call requiring confirmation is processed, and returns the approved set.
/// [`ApprovalGate::approve`], [`ApprovalGate::reject`] and
/// [`ApprovalGate::cancel_all_pending`] may be called from any task while the
/// wait is outstanding; the state lives behind a mutex and the completion
/// signal fires exactly once, so the decision paths are safe to race.
pub struct ApprovalGate {
    state: Arc<Mutex<GateState>>,
    notifications: mpsc::UnboundedSender<HostNotification>,
}

impl ApprovalGate {
    pub fn new(notifications: mpsc::UnboundedSender<HostNotification>) -> Self {
        Self {
            state: Arc::new(Mutex::new(GateState {
                pending: HashMap::new(),
                waiter: None,
            })),
            notifications,
        }
    }

    /// Convenience constructor returning the gate together with the host's
    /// receiving end of the notification channel.
    pub fn with_channel() -> (Self, mpsc::UnboundedReceiver<HostNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Runs a turn's requested calls through the gate and returns the
    /// approved ones, in the order they were requested.
    ///
    /// AutoApprove calls (and calls whose tool the registry does not know,
    /// which the pipeline turns into failure results) pass straight through.
    /// Ask calls suspend this future until each one is approved or rejected,
    /// or the whole wait is cancelled; cancellation drops every ask call for
    /// the turn.
    pub async fn resolve(
        &self,
        calls: Vec<ToolCallRequest>,
        registry: &ToolRegistry,
    ) -> Result<Vec<ToolCallRequest>> {
        let order: Vec<String> = calls.iter().map(|c| c.id.clone()).collect();
        let mut auto: HashMap<String, ToolCallRequest> = HashMap::new();
        let mut ask: Vec<ToolCallRequest> = Vec::new();

        for mut call in calls {
            let needs_approval = registry
                .get(&call.tool_name)
                .map(|def| def.approval == ApprovalKind::Ask)
                .unwrap_or(false);
            if needs_approval {
                ask.push(call);
            } else {
                call.approve();
                auto.insert(call.id.clone(), call);
            }
        }

        if ask.is_empty() {
            return Ok(order.into_iter().filter_map(|id| auto.remove(&id)).collect());
        }

        let descriptors: Vec<PendingApproval> = ask
            .iter()
            .map(|call| self.describe(call, registry))
            .collect();

        let receiver = {
            let mut state = self.state.lock().await;
            if state.waiter.is_some() {
                return Err(ChatLoopError::Other(
                    "an approval wait is already in progress".to_string(),
                ));
            }
            for call in ask {
                state.pending.insert(call.id.clone(), call);
            }
            let (tx, rx) = oneshot::channel();
            state.waiter = Some(tx);
            rx
        };

        debug!(pending = descriptors.len(), "waiting for tool call approval");
        if self
            .notifications
            .send(HostNotification::PendingApprovals(descriptors))
            .is_err()
        {
            warn!("approval notification channel closed; waiting on direct decisions");
        }

        // Dropped sender means no decision can ever arrive; treat as cancel.
        let cancelled = receiver.await.unwrap_or(true);

        let mut state = self.state.lock().await;
        let mut decided: HashMap<String, ToolCallRequest> = state.pending.drain().collect();
        state.waiter = None;
        drop(state);

        let approved = order
            .into_iter()
            .filter_map(|id| {
                if let Some(call) = auto.remove(&id) {
                    return Some(call);
                }
                if cancelled {
                    return None;
                }
                decided.remove(&id).filter(|call| call.is_approved())
            })
            .collect();
        Ok(approved)
    }

    /// Approves a pending call, optionally overwriting its argument payload,
    /// and unblocks the wait once every pending call is processed.
    pub async fn approve(&self, call_id: &str, modified_arguments: Option<Value>) {
        let mut state = self.state.lock().await;
        if let Some(call) = state.pending.get_mut(call_id) {
            if let Some(arguments) = modified_arguments {
                call.arguments = arguments.to_string();
            }
            call.approve();
            debug!(call_id, tool = %call.tool_name, "tool call approved");
        }
        Self::signal_if_all_processed(&mut state);
    }

    /// Rejects a pending call with a reason recorded on its result.
    pub async fn reject(&self, call_id: &str, reason: &str) {
        let mut state = self.state.lock().await;
        if let Some(call) = state.pending.get_mut(call_id) {
            call.reject(reason);
            debug!(call_id, tool = %call.tool_name, reason, "tool call rejected");
        }
        Self::signal_if_all_processed(&mut state);
    }

    /// Rejects every still-undecided call and unblocks the wait immediately.
    /// The resolved set will contain only the auto-approved calls.
    pub async fn cancel_all_pending(&self) {
        let mut state = self.state.lock().await;
        for call in state.pending.values_mut() {
            if !call.processed {
                call.reject("canceled by user");
            }
        }
        if let Some(waiter) = state.waiter.take() {
            let _ = waiter.send(true);
        } else {
            // No wait outstanding; nothing will drain the map.
            state.pending.clear();
        }
    }

    /// Pushes a free-form payload to the host.
    pub fn notify_payload(&self, payload: Value) {
        let _ = self.notifications.send(HostNotification::Payload(payload));
    }

    fn signal_if_all_processed(state: &mut GateState) {
        if !state.pending.is_empty() && state.pending.values().all(|call| call.processed) {
            if let Some(waiter) = state.waiter.take() {
                let _ = waiter.send(false);
            }
        }
    }

    fn describe(&self, call: &ToolCallRequest, registry: &ToolRegistry) -> PendingApproval {
        let parameters: Value = serde_json::from_str(&call.arguments)
            .unwrap_or_else(|_| Value::String(call.arguments.clone()));
        let rationale = parameters
            .get("rationale")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let (category, risk) = registry
            .get(&call.tool_name)
            .map(|def| (def.category.clone(), def.risk))
            .unwrap_or_else(|| ("unknown".to_string(), RiskLevel::High));

        PendingApproval {
            id: call.id.clone(),
            tool_name: call.tool_name.clone(),
            category,
            risk,
            parameters,
            rationale,
            requested_at: call.created_at,
        }
    }
}
