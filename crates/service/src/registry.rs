//! The process-wide session registry: the single source of truth for who
//! is authorized, with which session identifier, and in what phase.
//!
//! Every operation locks the same [`parking_lot::Mutex`] and returns; there
//! is no operation that suspends while holding the lock, so coarse locking
//! costs nothing beyond hashtable-sized critical sections.

use ahash::AHashMap;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::types::{NodeInfo, NodeSession, SessionError, UserSession, UserSessionId};

struct Inner {
    users: AHashMap<String, UserSession>,
    user_sid_index: AHashMap<UserSessionId, String>,
    next_user_sid: UserSessionId,
    nodes: AHashMap<String, NodeSession>,
    node_order: Vec<String>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            users: AHashMap::with_capacity(1024),
            user_sid_index: AHashMap::with_capacity(1024),
            next_user_sid: 0,
            nodes: AHashMap::with_capacity(32),
            node_order: Vec::with_capacity(32),
        }
    }
}

/// The session registry. Cheap to construct, expected to be held behind an
/// `Arc` and shared by every accepted connection.
#[derive(Default)]
pub struct Registry(Mutex<Inner>);

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the existing session id for `username` if already present,
    /// otherwise allocates a fresh one and inserts a new, inactive session.
    ///
    /// # Test
    ///
    /// ```
    /// use auth_server_service::Registry;
    ///
    /// let registry = Registry::new();
    ///
    /// let first = registry.authorize_user("alice").unwrap();
    /// let second = registry.authorize_user("alice").unwrap();
    /// assert_eq!(first, second);
    /// ```
    pub fn authorize_user(&self, username: &str) -> Result<UserSessionId, SessionError> {
        let mut inner = self.0.lock();

        if let Some(existing) = inner.users.get(username) {
            return Ok(existing.session_id);
        }

        let session_id = Self::allocate_user_session_id(&mut inner)?;
        inner.users.insert(
            username.to_string(),
            UserSession {
                username: username.to_string(),
                session_id,
                is_activated: false,
                bound_node: None,
            },
        );
        inner.user_sid_index.insert(session_id, username.to_string());

        Ok(session_id)
    }

    /// Rotating allocator over `[0, 32767]`: starts from the last returned
    /// value, advances and wraps, returns the first id not already live.
    /// Fails only once every one of the 32768 slots is occupied.
    fn allocate_user_session_id(inner: &mut Inner) -> Result<UserSessionId, SessionError> {
        let start = inner.next_user_sid;
        let mut candidate = start;

        loop {
            if !inner.user_sid_index.contains_key(&candidate) {
                inner.next_user_sid = Self::next_sid(candidate);
                return Ok(candidate);
            }

            candidate = Self::next_sid(candidate);
            if candidate == start {
                return Err(SessionError::NoSessionIdAvailable);
            }
        }
    }

    fn next_sid(sid: UserSessionId) -> UserSessionId {
        if sid == 32767 { 0 } else { sid + 1 }
    }

    /// Returns the existing opaque id for `info.node_id` if already
    /// present, otherwise allocates a fresh random UUID and inserts.
    ///
    /// # Test
    ///
    /// ```
    /// use auth_server_service::{Registry, NodeInfo, ServerType};
    ///
    /// let registry = Registry::new();
    /// let info = NodeInfo {
    ///     node_id: "n1".to_string(),
    ///     name: "Alpha".to_string(),
    ///     address: "127.0.0.1".to_string(),
    ///     port: 9000,
    ///     current_players: 0,
    ///     max_players: 100,
    ///     server_type: ServerType::Entire,
    /// };
    ///
    /// let first = registry.authorize_server(info.clone());
    /// let second = registry.authorize_server(info);
    /// assert_eq!(first, second);
    /// ```
    pub fn authorize_server(&self, info: NodeInfo) -> String {
        let mut inner = self.0.lock();

        if let Some(existing) = inner.nodes.get(&info.node_id) {
            return existing.session_id.clone();
        }

        let session_id = Uuid::new_v4().to_string();
        inner.node_order.push(info.node_id.clone());
        inner.nodes.insert(
            info.node_id.clone(),
            NodeSession { session_id: session_id.clone(), info },
        );

        session_id
    }

    /// Removes the UserSession for `username`, if present. Silent on
    /// absent.
    pub fn unauthorize_user(&self, username: &str) {
        let mut inner = self.0.lock();
        if let Some(session) = inner.users.remove(username) {
            inner.user_sid_index.remove(&session.session_id);
        }
    }

    /// Removes the NodeSession for `node_id`, and with it, in the same
    /// critical section, every UserSession whose `bound_node` equals the
    /// removed node's session id. Silent on absent.
    ///
    /// # Test
    ///
    /// ```
    /// use auth_server_service::{Registry, NodeInfo, ServerType};
    ///
    /// let registry = Registry::new();
    /// let info = NodeInfo {
    ///     node_id: "n1".to_string(),
    ///     name: "Alpha".to_string(),
    ///     address: "127.0.0.1".to_string(),
    ///     port: 9000,
    ///     current_players: 0,
    ///     max_players: 100,
    ///     server_type: ServerType::Entire,
    /// };
    ///
    /// let node_sid = registry.authorize_server(info);
    /// let user_sid = registry.authorize_user("bob").unwrap();
    /// registry.activate_user_session(user_sid, &node_sid);
    ///
    /// registry.unauthorize_server("n1");
    ///
    /// assert_eq!(registry.authorized_server_count(), 0);
    /// assert!(!registry.is_user_authorized("bob"));
    /// ```
    pub fn unauthorize_server(&self, node_id: &str) {
        let mut inner = self.0.lock();

        let Some(node_session) = inner.nodes.remove(node_id) else {
            return;
        };

        inner.node_order.retain(|id| id != node_id);

        let bound_sid = node_session.session_id;
        let orphaned: Vec<String> = inner
            .users
            .iter()
            .filter(|(_, session)| session.bound_node.as_deref() == Some(bound_sid.as_str()))
            .map(|(username, _)| username.clone())
            .collect();

        for username in orphaned {
            if let Some(session) = inner.users.remove(&username) {
                inner.user_sid_index.remove(&session.session_id);
            }
        }
    }

    pub fn is_user_authorized(&self, username: &str) -> bool {
        self.0.lock().users.contains_key(username)
    }

    pub fn is_server_authorized(&self, node_id: &str) -> bool {
        self.0.lock().nodes.contains_key(node_id)
    }

    pub fn get_user_session_id(&self, username: &str) -> Option<UserSessionId> {
        self.0.lock().users.get(username).map(|session| session.session_id)
    }

    pub fn get_server_session_id(&self, node_id: &str) -> Option<String> {
        self.0.lock().nodes.get(node_id).map(|session| session.session_id.clone())
    }

    pub fn get_user_by_session_id(&self, session_id: UserSessionId) -> Option<UserSession> {
        let inner = self.0.lock();
        inner
            .user_sid_index
            .get(&session_id)
            .and_then(|username| inner.users.get(username))
            .cloned()
    }

    /// Marks the user session identified by `user_session_id` as
    /// activated and bound to `bound_node_session_id`. Returns whether a
    /// matching session existed.
    pub fn activate_user_session(
        &self,
        user_session_id: UserSessionId,
        bound_node_session_id: &str,
    ) -> bool {
        let mut inner = self.0.lock();

        let Some(username) = inner.user_sid_index.get(&user_session_id).cloned() else {
            return false;
        };

        let Some(session) = inner.users.get_mut(&username) else {
            return false;
        };

        session.is_activated = true;
        session.bound_node = Some(bound_node_session_id.to_string());
        true
    }

    pub fn is_user_session_activated(&self, session_id: UserSessionId) -> bool {
        let inner = self.0.lock();
        inner
            .user_sid_index
            .get(&session_id)
            .and_then(|username| inner.users.get(username))
            .map(|session| session.is_activated)
            .unwrap_or(false)
    }

    pub fn authorized_user_count(&self) -> usize {
        self.0.lock().users.len()
    }

    pub fn authorized_server_count(&self) -> usize {
        self.0.lock().nodes.len()
    }

    /// A stable, insertion-ordered snapshot of every currently authorized
    /// node, for inclusion in ServerList success replies.
    pub fn snapshot_authorized_servers(&self) -> Vec<NodeInfo> {
        let inner = self.0.lock();
        inner
            .node_order
            .iter()
            .filter_map(|node_id| inner.nodes.get(node_id).map(|session| session.info.clone()))
            .collect()
    }

    /// Updates the cached `current_players` for an authorized node, driven
    /// by the GameServerStatus heartbeat. Silent if the node is not
    /// authorized.
    pub fn update_server_status(&self, node_id: &str, current_players: u32) {
        let mut inner = self.0.lock();
        if let Some(session) = inner.nodes.get_mut(node_id) {
            session.info.current_players = current_players;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ServerType;

    fn node(id: &str) -> NodeInfo {
        NodeInfo {
            node_id: id.to_string(),
            name: "Alpha".to_string(),
            address: "127.0.0.1".to_string(),
            port: 9000,
            current_players: 0,
            max_players: 100,
            server_type: ServerType::Entire,
        }
    }

    #[test]
    fn user_session_ids_are_unique_and_bounded() {
        let registry = Registry::new();
        let mut seen = std::collections::HashSet::new();

        for i in 0..100 {
            let sid = registry.authorize_user(&format!("user{i}")).unwrap();
            assert!(seen.insert(sid), "duplicate session id {sid}");
        }

        assert_eq!(registry.authorized_user_count(), 100);
    }

    #[test]
    fn authorize_user_is_idempotent_for_same_username() {
        let registry = Registry::new();
        let first = registry.authorize_user("alice").unwrap();
        let second = registry.authorize_user("alice").unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.authorized_user_count(), 1);
    }

    #[test]
    fn node_cap_is_respected_by_callers_checking_count_first() {
        let registry = Registry::new();
        for i in 0..31 {
            registry.authorize_server(node(&format!("n{i}")));
        }
        assert_eq!(registry.authorized_server_count(), 31);
    }

    #[test]
    fn unauthorize_server_cascades_bound_user_sessions() {
        let registry = Registry::new();
        let node_sid = registry.authorize_server(node("n1"));

        let bob_sid = registry.authorize_user("bob").unwrap();
        let carol_sid = registry.authorize_user("carol").unwrap();
        registry.activate_user_session(bob_sid, &node_sid);
        registry.activate_user_session(carol_sid, &node_sid);

        registry.unauthorize_server("n1");

        assert_eq!(registry.authorized_server_count(), 0);
        assert_eq!(registry.authorized_user_count(), 0);
        assert!(!registry.is_user_authorized("bob"));
        assert!(!registry.is_user_authorized("carol"));
    }

    #[test]
    fn unauthorize_server_does_not_touch_unrelated_sessions() {
        let registry = Registry::new();
        let n1_sid = registry.authorize_server(node("n1"));
        registry.authorize_server(node("n2"));

        let bob_sid = registry.authorize_user("bob").unwrap();
        registry.activate_user_session(bob_sid, &n1_sid);

        registry.unauthorize_server("n2");

        assert_eq!(registry.authorized_server_count(), 1);
        assert!(registry.is_user_authorized("bob"));
        assert!(registry.is_user_session_activated(bob_sid));
    }

    #[test]
    fn activation_is_tracked_until_explicit_unauthorize() {
        let registry = Registry::new();
        let node_sid = registry.authorize_server(node("n1"));
        let sid = registry.authorize_user("dave").unwrap();

        assert!(!registry.is_user_session_activated(sid));
        assert!(registry.activate_user_session(sid, &node_sid));
        assert!(registry.is_user_session_activated(sid));

        registry.unauthorize_user("dave");
        assert!(!registry.is_user_session_activated(sid));
    }

    #[test]
    fn snapshot_preserves_insertion_order() {
        let registry = Registry::new();
        registry.authorize_server(node("n1"));
        registry.authorize_server(node("n2"));
        registry.authorize_server(node("n3"));

        let ids: Vec<String> = registry
            .snapshot_authorized_servers()
            .into_iter()
            .map(|info| info.node_id)
            .collect();

        assert_eq!(ids, vec!["n1".to_string(), "n2".to_string(), "n3".to_string()]);
    }
}
