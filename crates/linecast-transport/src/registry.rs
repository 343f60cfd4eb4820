//! SessionRegistry — the live session map.
//!
//! Written by the accept loop (insert) and by receive loops (remove),
//! read by sends. Uses a parking_lot::RwLock that is never held across an
//! await; broadcast works on a [`snapshot`](SessionRegistry::snapshot).

use std::collections::HashMap;
use std::sync::Arc;

use linecast_protocol::SessionId;
use parking_lot::RwLock;

use crate::session::{SessionHandle, SessionInfo};

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. Returns `false` (and leaves the map untouched)
    /// if its id is already present.
    pub fn insert(&self, session: Arc<SessionHandle>) -> bool {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&session.id()) {
            return false;
        }
        sessions.insert(session.id(), session);
        true
    }

    /// Remove a session. Only the first caller for a given id gets it back.
    pub fn remove(&self, id: &SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.write().remove(id)
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.read().get(id).cloned()
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.read().contains_key(id)
    }

    /// All sessions registered at this instant.
    pub fn snapshot(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions.read().values().cloned().collect()
    }

    /// Display info for every session, oldest first.
    pub fn infos(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self.sessions.read().values().map(|s| s.info()).collect();
        infos.sort_by_key(|info| info.connected_at);
        infos
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Empty the registry, returning whatever was still in it.
    pub fn clear(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions.write().drain().map(|(_, session)| session).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::test_support::loopback_session;

    #[tokio::test]
    async fn insert_get_remove() {
        let registry = SessionRegistry::new();
        let (session, _reader, _client) = loopback_session().await;
        let id = session.id();

        assert!(registry.insert(session.clone()));
        assert!(registry.contains(&id));
        assert_eq!(registry.get(&id).unwrap().id(), id);
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(&id).is_some());
        assert!(registry.remove(&id).is_none(), "removal must happen once");
        assert!(registry.get(&id).is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn duplicate_id_rejected() {
        let registry = SessionRegistry::new();
        let (session, _reader, _client) = loopback_session().await;
        assert!(registry.insert(session.clone()));
        assert!(!registry.insert(session));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn snapshot_unaffected_by_later_removal() {
        let registry = SessionRegistry::new();
        let (a, _ra, _ca) = loopback_session().await;
        let (b, _rb, _cb) = loopback_session().await;
        registry.insert(a.clone());
        registry.insert(b.clone());

        let snapshot = registry.snapshot();
        registry.remove(&a.id());
        assert_eq!(snapshot.len(), 2);
        let remaining: Vec<SessionId> = registry.snapshot().iter().map(|s| s.id()).collect();
        assert_eq!(remaining, vec![b.id()]);
    }

    #[tokio::test]
    async fn infos_sorted_by_connect_time() {
        let registry = SessionRegistry::new();
        let (a, _ra, _ca) = loopback_session().await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let (b, _rb, _cb) = loopback_session().await;
        registry.insert(b.clone());
        registry.insert(a.clone());

        let ids: Vec<SessionId> = registry.infos().iter().map(|i| i.session_id).collect();
        assert_eq!(ids, vec![a.id(), b.id()]);
    }

    #[tokio::test]
    async fn clear_drains_everything() {
        let registry = SessionRegistry::new();
        let (a, _ra, _ca) = loopback_session().await;
        let (b, _rb, _cb) = loopback_session().await;
        registry.insert(a);
        registry.insert(b);

        let drained = registry.clear();
        assert_eq!(drained.len(), 2);
        assert!(registry.is_empty());
        assert!(registry.clear().is_empty());
    }
}
