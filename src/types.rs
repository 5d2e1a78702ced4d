//! Shared identifiers and small value types used across every subsystem.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! opaque_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

opaque_id!(CallId, "Opaque call identifier assigned by the telephony provider.");
opaque_id!(ChatId, "Operator chat/channel identifier owning a call's console entry.");
opaque_id!(MessageId, "Chat-API message identifier for an edited console bubble.");

/// Which telephony provider originated a call. Only used to pick wire-format
/// adapters; the provider's own protocol internals are out of scope (spec §1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderKind {
    Twilio,
    Vonage,
    Telnyx,
    Generic,
}

/// Coarse-to-fine call phase, used for display and for gating behavior
/// (spec §3 Call Session / state).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Waiting,
    Listening,
    UserSpeaking,
    Thinking,
    AgentResponding,
    AgentSpeaking,
    Interrupted,
    Ending,
    Ended,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Ended)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Waiting => "waiting",
            Phase::Listening => "listening",
            Phase::UserSpeaking => "user_speaking",
            Phase::Thinking => "thinking",
            Phase::AgentResponding => "agent_responding",
            Phase::AgentSpeaking => "agent_speaking",
            Phase::Interrupted => "interrupted",
            Phase::Ending => "ending",
            Phase::Ended => "ended",
        };
        write!(f, "{s}")
    }
}

/// Speaker attribution for a transcript row (spec §6 Persisted state).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Speaker {
    User,
    Ai,
}
