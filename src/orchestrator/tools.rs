//! Dispatch for the fixed telephony tool table (spec §9 REDESIGN FLAGS).
//! [`crate::tools::ToolCall`] defines the table; this module is the single
//! place that matches on it and drives the same side effects a hand-written
//! LLM reply or a direct digit-capture entry point would.

use super::types::ClosingReason;
use super::Orchestrator;
use crate::digit::CollectionRequest;
use crate::tools::ToolCall;
use crate::types::CallId;
use std::sync::Arc;
use tracing::{info, warn};

impl Orchestrator {
    /// Dispatch one LLM-invoked tool call by name, gated by the session's
    /// [`crate::tools::ToolPolicy`] (spec §9: "optional tools ... gated by a
    /// boolean per-call policy").
    pub(crate) async fn handle_tool_call(self: &Arc<Self>, call: &CallId, tool_call: ToolCall) {
        let Some(handle) = self.registry.get(call) else { return };
        let policy = handle.lock().config.tool_policy;
        if !tool_call.permitted(&policy) {
            warn!(call_id = %call, tool = tool_call.name(), "tool_call_rejected_by_policy");
            return;
        }
        info!(call_id = %call, tool = tool_call.name(), "tool_call_dispatched");
        drop(handle);

        match tool_call {
            ToolCall::ConfirmIdentity => {
                // Nothing follows in this arm, so a closed-call `false` needs no handling here.
                let _ = self.speak_digit_prompt(call, "Can you please confirm your name and date of birth?").await;
            }
            ToolCall::RouteToAgent { reason } => {
                self.close_call(call, ClosingReason::RiskEscalation, reason).await;
            }
            ToolCall::CollectDigits { profile, prompt_text, end_call_on_success } => {
                self.start_digit_capture(
                    call,
                    CollectionRequest { profile, prompt_text, end_call_on_success, ..Default::default() },
                )
                .await;
            }
            ToolCall::CollectMultipleDigits { steps, capture_mode, end_call_on_success } => {
                self.start_digit_plan_capture(call, steps, capture_mode, end_call_on_success).await;
            }
            ToolCall::PlayDisclosure { text } => {
                let _ = self.speak_digit_prompt(call, &text).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::fakes::*;
    use crate::config::OrchestratorConfig;
    use crate::console::Direction;
    use crate::orchestrator::types::SessionConfig;
    use crate::orchestrator::Dependencies;
    use crate::persistence::InMemoryCallStore;
    use crate::tools::ToolPolicy;
    use crate::types::{ChatId, ProviderKind};

    fn deps() -> Dependencies {
        Dependencies {
            store: Arc::new(InMemoryCallStore::new()),
            stt: Arc::new(FakeSttAdapter::default()),
            llm: Arc::new(FakeLlmAdapter::default()),
            tts: Arc::new(FakeTtsAdapter::default()),
            sms: Arc::new(FakeSmsAdapter::default()),
            chat: Arc::new(FakeChatAdapter::default()),
            telephony: Arc::new(FakeTelephonyAdapter::default()),
            config: OrchestratorConfig::default(),
        }
    }

    #[tokio::test]
    async fn route_to_agent_is_rejected_without_policy() {
        let orch = Orchestrator::spawn(deps());
        let call = CallId::new("call-tool-1");
        orch.accept_call(call.clone(), ProviderKind::Twilio, ChatId::new("chat-1"), Direction::Inbound, None, SessionConfig::default()).await;

        orch.handle_tool_call(&call, ToolCall::RouteToAgent { reason: None }).await;
        assert!(orch.registry.get(&call).is_some(), "call should not have been closed");
        orch.shutdown();
    }

    #[tokio::test]
    async fn route_to_agent_closes_the_call_when_permitted() {
        let orch = Orchestrator::spawn(deps());
        let call = CallId::new("call-tool-2");
        let config = SessionConfig { tool_policy: ToolPolicy::all_allowed(), ..Default::default() };
        orch.accept_call(call.clone(), ProviderKind::Twilio, ChatId::new("chat-2"), Direction::Inbound, None, config).await;

        orch.handle_tool_call(&call, ToolCall::RouteToAgent { reason: Some("caller requested".into()) }).await;
        assert!(orch.registry.get(&call).is_none());
    }

    #[tokio::test]
    async fn collect_digits_starts_digit_capture_when_permitted() {
        let orch = Orchestrator::spawn(deps());
        let call = CallId::new("call-tool-3");
        let config = SessionConfig { tool_policy: ToolPolicy::all_allowed(), ..Default::default() };
        orch.accept_call(call.clone(), ProviderKind::Twilio, ChatId::new("chat-3"), Direction::Inbound, None, config).await;

        orch.handle_tool_call(
            &call,
            ToolCall::CollectDigits { profile: Some("pin".into()), prompt_text: None, end_call_on_success: false },
        )
        .await;
        assert!(orch.digit_engine.has_expectation(&call));
        orch.shutdown();
    }
}
