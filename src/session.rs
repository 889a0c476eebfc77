//! Connection → user identity map.
//!
//! A connection is bound to a user on the first event carrying a `userId`;
//! a reconnecting user simply binds a fresh connection id. The participant
//! slot rebind itself happens in the room registry.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::types::{ConnId, UserId};

pub struct SessionMap {
    inner: Mutex<HashMap<ConnId, UserId>>,
}

impl SessionMap {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn bind(&self, conn: &str, user_id: &str) {
        let mut inner = self.inner.lock().expect("session lock");
        inner.insert(conn.to_string(), user_id.to_string());
    }

    pub fn user_of(&self, conn: &str) -> Option<UserId> {
        let inner = self.inner.lock().expect("session lock");
        inner.get(conn).cloned()
    }

    pub fn unbind(&self, conn: &str) {
        let mut inner = self.inner.lock().expect("session lock");
        inner.remove(conn);
    }
}

impl Default for SessionMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rebinding_replaces_user() {
        let sessions = SessionMap::new();
        sessions.bind("c1", "u1");
        assert_eq!(sessions.user_of("c1").as_deref(), Some("u1"));
        sessions.bind("c1", "u2");
        assert_eq!(sessions.user_of("c1").as_deref(), Some("u2"));
        sessions.unbind("c1");
        assert!(sessions.user_of("c1").is_none());
    }
}
