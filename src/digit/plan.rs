//! Digit plans: an ordered sequence of expectations executed back-to-back
//! under a shared policy (spec §3 Digit Plan, §4.2 Group resolution / Plan
//! execution).

use crate::digit::expectation::ExpectationParams;
use chrono::{DateTime, Utc};

/// A named, well-known plan template (spec glossary: "Group").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Group {
    Banking,
    Card,
}

impl Group {
    /// Fixed ordered step profiles for each group (spec §4.2 Group
    /// resolution).
    pub fn steps(self) -> &'static [&'static str] {
        match self {
            Group::Banking => &["routing_number", "account_number"],
            Group::Card => &["card_number", "card_expiry", "zip", "cvv"],
        }
    }
}

/// How digits are captured for the active plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    Stream,
    IvrGather,
}

/// Coarse plan progress, observable for tests (spec §8 scenario 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanState {
    Init,
    PlayFirstMessage,
    CollectStep,
    Advance,
    Complete,
    Fail,
}

/// A single plan step: a partial expectation template plus the profile id
/// that step must collect.
#[derive(Debug, Clone)]
pub struct PlanStep {
    pub profile: String,
    pub params: ExpectationParams,
}

/// An active multi-step plan for one call (spec §3 Digit Plan).
#[derive(Debug, Clone)]
pub struct DigitPlan {
    pub plan_id: String,
    pub steps: Vec<PlanStep>,
    pub index: usize,
    pub active: bool,
    pub group: Option<Group>,
    pub capture_mode: CaptureMode,
    pub end_call_on_success: bool,
    pub completion_message: Option<String>,
    pub state: PlanState,
    pub last_fingerprint: Option<(String, DateTime<Utc>)>,
}

impl DigitPlan {
    pub fn new(plan_id: impl Into<String>, steps: Vec<PlanStep>) -> Self {
        Self {
            plan_id: plan_id.into(),
            steps,
            index: 0,
            active: true,
            group: None,
            capture_mode: CaptureMode::Stream,
            end_call_on_success: true,
            completion_message: None,
            state: PlanState::Init,
            last_fingerprint: None,
        }
    }

    pub fn for_group(plan_id: impl Into<String>, group: Group) -> Self {
        let steps = group
            .steps()
            .iter()
            .map(|p| PlanStep {
                profile: p.to_string(),
                params: ExpectationParams { profile: Some(p.to_string()), ..Default::default() },
            })
            .collect();
        let mut plan = Self::new(plan_id, steps);
        plan.group = Some(group);
        plan
    }

    pub fn current_step(&self) -> Option<&PlanStep> {
        self.steps.get(self.index)
    }

    pub fn total_steps(&self) -> u32 {
        self.steps.len() as u32
    }

    /// 1-based step index for the currently active expectation (spec §3
    /// invariant: "Expectation.plan_step_index = k+1" when the plan is at
    /// step k, k being 0-based here).
    pub fn step_index_1based(&self) -> u32 {
        self.index as u32 + 1
    }

    pub fn has_more_steps(&self) -> bool {
        self.index + 1 < self.steps.len()
    }

    pub fn advance(&mut self) {
        self.index += 1;
    }
}

/// Positive/negative keyword weights used to derive a group from a prompt
/// (spec §4.2 Group resolution).
const BANKING_POSITIVES: &[&str] = &["routing", "aba", "checking", "savings"];
const CARD_POSITIVES: &[&str] = &["card number", "cvv", "expiry", "zip"];

/// Infer a group from a free-text prompt. Returns `None` ("mode remains
/// normal") when neither group scores higher than the other, including a
/// tie between two nonzero scores.
pub fn infer_group(prompt: &str) -> Option<Group> {
    let lower = prompt.to_ascii_lowercase();
    let banking_score = BANKING_POSITIVES.iter().filter(|k| lower.contains(*k)).count();
    let card_score = CARD_POSITIVES.iter().filter(|k| lower.contains(*k)).count();
    match banking_score.cmp(&card_score) {
        std::cmp::Ordering::Greater if banking_score > 0 => Some(Group::Banking),
        std::cmp::Ordering::Less if card_score > 0 => Some(Group::Card),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn banking_prompt_resolves_to_banking_group() {
        let g = infer_group("Please enter your routing number and then your account number");
        assert_eq!(g, Some(Group::Banking));
    }

    #[test]
    fn card_prompt_resolves_to_card_group() {
        let g = infer_group("Please provide your card number, expiry, zip, and cvv");
        assert_eq!(g, Some(Group::Card));
    }

    #[test]
    fn ambiguous_prompt_resolves_to_no_group() {
        // no keywords at all
        assert_eq!(infer_group("Please enter your information"), None);
    }

    #[test]
    fn banking_plan_has_two_ordered_steps() {
        let plan = DigitPlan::for_group("p1", Group::Banking);
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].profile, "routing_number");
        assert_eq!(plan.steps[1].profile, "account_number");
    }
}
