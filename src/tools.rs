//! Telephony tool-calling table for the LLM adapter (spec §9 REDESIGN FLAGS:
//! "Dynamic, loosely-typed function tables for LLM tool-calling ... register
//! a fixed set of telephony tools (confirm_identity, route_to_agent,
//! collect_digits, collect_multiple_digits, play_disclosure) per call and
//! dispatch by name. Strategy: tagged variants with compile-time-known
//! names; optional tools (transfer, digit-collection) gated by a boolean
//! per-call policy"). This module only defines the table; dispatch lives in
//! [`crate::orchestrator::tools`].

use crate::digit::{CaptureMode, PlanStep};

/// Per-call gate on optional tools (spec §9: "optional tools (transfer,
/// digit-collection) gated by a boolean per-call policy").
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolPolicy {
    pub allow_transfer: bool,
    pub allow_digit_collection: bool,
}

impl ToolPolicy {
    pub fn all_allowed() -> Self {
        Self { allow_transfer: true, allow_digit_collection: true }
    }
}

/// The fixed set of telephony tools an LLM turn may invoke, represented as
/// tagged variants with compile-time-known names rather than a dynamic
/// function table (spec §9 REDESIGN FLAGS).
#[derive(Debug, Clone)]
pub enum ToolCall {
    /// Ask the caller to confirm their identity verbally; no digit
    /// expectation is installed by this tool alone.
    ConfirmIdentity,
    /// Hand the call off to a human agent, ending the orchestrator's
    /// involvement.
    RouteToAgent { reason: Option<String> },
    /// Start a single digit expectation (spec §4.2 `request digit
    /// collection`).
    CollectDigits { profile: Option<String>, prompt_text: Option<String>, end_call_on_success: bool },
    /// Start a multi-step digit plan (spec §4.2 `request digit collection
    /// plan`).
    CollectMultipleDigits { steps: Vec<PlanStep>, capture_mode: CaptureMode, end_call_on_success: bool },
    /// Speak a fixed disclosure line verbatim (e.g. a recording notice).
    PlayDisclosure { text: String },
}

impl ToolCall {
    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::ConfirmIdentity => "confirm_identity",
            ToolCall::RouteToAgent { .. } => "route_to_agent",
            ToolCall::CollectDigits { .. } => "collect_digits",
            ToolCall::CollectMultipleDigits { .. } => "collect_multiple_digits",
            ToolCall::PlayDisclosure { .. } => "play_disclosure",
        }
    }

    /// Whether `policy` permits this call right now. `confirm_identity` and
    /// `play_disclosure` are always on; `route_to_agent` and the two
    /// digit-collection tools are the "optional tools" spec §9 calls out as
    /// gated.
    pub fn permitted(&self, policy: &ToolPolicy) -> bool {
        match self {
            ToolCall::RouteToAgent { .. } => policy.allow_transfer,
            ToolCall::CollectDigits { .. } | ToolCall::CollectMultipleDigits { .. } => policy.allow_digit_collection,
            ToolCall::ConfirmIdentity | ToolCall::PlayDisclosure { .. } => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_match_the_fixed_tool_table() {
        assert_eq!(ToolCall::ConfirmIdentity.name(), "confirm_identity");
        assert_eq!(ToolCall::RouteToAgent { reason: None }.name(), "route_to_agent");
        assert_eq!(
            ToolCall::CollectDigits { profile: None, prompt_text: None, end_call_on_success: false }.name(),
            "collect_digits"
        );
        assert_eq!(
            ToolCall::CollectMultipleDigits { steps: vec![], capture_mode: CaptureMode::Stream, end_call_on_success: false }.name(),
            "collect_multiple_digits"
        );
        assert_eq!(ToolCall::PlayDisclosure { text: String::new() }.name(), "play_disclosure");
    }

    #[test]
    fn optional_tools_are_gated_by_policy() {
        let closed = ToolPolicy::default();
        assert!(!ToolCall::RouteToAgent { reason: None }.permitted(&closed));
        assert!(!ToolCall::CollectDigits { profile: None, prompt_text: None, end_call_on_success: false }.permitted(&closed));
        assert!(ToolCall::ConfirmIdentity.permitted(&closed));

        let open = ToolPolicy::all_allowed();
        assert!(ToolCall::RouteToAgent { reason: None }.permitted(&open));
        assert!(ToolCall::CollectDigits { profile: None, prompt_text: None, end_call_on_success: false }.permitted(&open));
    }
}
