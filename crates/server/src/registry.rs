//! Session Registry.
//!
//! Maps session ids to sessions. Sessions are created on the first join to
//! an unseen id and removed once nobody is left in them.

use std::collections::HashMap;

use rookery_rules::RulesEngine;
use tracing::info;

use crate::session::{Session, SessionId};

/// Owned, lifecycle-scoped session store.
#[derive(Debug)]
pub struct SessionRegistry<R> {
    sessions: HashMap<SessionId, Session<R>>,
    initial_clock_ms: u64,
}

impl<R: RulesEngine> SessionRegistry<R> {
    pub fn new(initial_clock_ms: u64) -> Self {
        Self {
            sessions: HashMap::new(),
            initial_clock_ms,
        }
    }

    /// Existing session, or a fresh one. Never fails.
    pub fn get_or_create(&mut self, id: &SessionId) -> &mut Session<R> {
        let initial_clock_ms = self.initial_clock_ms;
        self.sessions.entry(id.clone()).or_insert_with(|| {
            info!(session = %id, "session created");
            Session::new(id.clone(), initial_clock_ms)
        })
    }

    pub fn get(&self, id: &SessionId) -> Option<&Session<R>> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &SessionId) -> Option<&mut Session<R>> {
        self.sessions.get_mut(id)
    }

    /// Idempotent.
    pub fn remove(&mut self, id: &SessionId) -> Option<Session<R>> {
        let removed = self.sessions.remove(id);
        if removed.is_some() {
            info!(session = %id, "session removed");
        }
        removed
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
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
    use crate::session::PlayerIdentity;
    use rookery_rules::ChessRules;

    fn id(raw: &str) -> SessionId {
        SessionId::parse(raw).unwrap()
    }

    #[test]
    fn test_get_or_create_is_lazy_and_stable() {
        let mut registry = SessionRegistry::<ChessRules>::new(1_000);
        assert!(registry.is_empty());

        registry.get_or_create(&id("abc")).admit(1, PlayerIdentity::default());
        assert_eq!(registry.len(), 1);

        // Same id returns the same session.
        let session = registry.get_or_create(&id("abc"));
        assert_eq!(session.holder(rookery_rules::Side::White), Some(1));
        assert_eq!(session.clock().allotment(), 1_000);
        assert_eq!(registry.len(), 1);

        registry.get_or_create(&id("xyz"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut registry = SessionRegistry::<ChessRules>::new(1_000);
        registry.get_or_create(&id("abc"));

        assert!(registry.remove(&id("abc")).is_some());
        assert!(registry.remove(&id("abc")).is_none());
        assert!(!registry.contains(&id("abc")));
    }
}
