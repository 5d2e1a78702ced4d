//! Owns every live [`CallSession`] behind a handle, the component spec §9
//! calls for directly: "a single `SessionRegistry` component owns all
//! per-call substructures; external components receive handles, not map
//! references." Other per-call subsystems (digit engine, LLM queue, timers,
//! console) stay separately keyed by call-id, each already its own
//! `DashMap`-backed component; `SessionRegistry` is only responsible for the
//! `CallSession` itself.

use crate::orchestrator::types::CallSession;
use crate::types::CallId;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

pub type SessionHandle = Arc<Mutex<CallSession>>;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<CallId, SessionHandle>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a freshly constructed session, returning the handle callers use
    /// from then on (spec §9: "external components receive handles, not map
    /// references").
    pub fn insert(&self, session: CallSession) -> SessionHandle {
        let handle: SessionHandle = Arc::new(Mutex::new(session));
        self.sessions.insert(handle.lock().call_id.clone(), handle.clone());
        handle
    }

    pub fn get(&self, call: &CallId) -> Option<SessionHandle> {
        self.sessions.get(call).map(|entry| entry.clone())
    }

    /// Remove and return the handle so the caller can run teardown against
    /// the last-known state without racing a concurrent lookup.
    pub fn remove(&self, call: &CallId) -> Option<SessionHandle> {
        self.sessions.remove(call).map(|(_, handle)| handle)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::types::SessionConfig;
    use crate::types::{ChatId, ProviderKind};
    use chrono::Utc;

    #[test]
    fn insert_then_get_returns_same_handle() {
        let registry = SessionRegistry::new();
        let call = CallId::new("call-1");
        let session = CallSession::new(
            call.clone(),
            ProviderKind::Twilio,
            ChatId::new("chat-1"),
            crate::console::Direction::Outbound,
            SessionConfig::default(),
            Utc::now(),
        );
        let handle = registry.insert(session);
        let fetched = registry.get(&call).expect("session present");
        assert!(Arc::ptr_eq(&handle, &fetched));
    }

    #[test]
    fn remove_drops_it_from_the_registry() {
        let registry = SessionRegistry::new();
        let call = CallId::new("call-1");
        let session = CallSession::new(
            call.clone(),
            ProviderKind::Twilio,
            ChatId::new("chat-1"),
            crate::console::Direction::Outbound,
            SessionConfig::default(),
            Utc::now(),
        );
        registry.insert(session);
        assert!(registry.remove(&call).is_some());
        assert!(registry.get(&call).is_none());
    }
}
