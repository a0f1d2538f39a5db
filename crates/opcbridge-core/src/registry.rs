// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Session registry.
//!
//! The connection owns its sessions through this registry, keyed by [`SessionId`].
//! Sessions only carry the id of their connection, never a pointer back to it.
//!
//! The registry is closed while the connection is not usable: inserts are refused and a
//! drain hands every registered session to the caller exactly once.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::types::SessionId;

struct RegistryInner<S> {
    sessions: BTreeMap<SessionId, S>,
    open: bool,
}

/// Arena of live sessions keyed by id.
pub struct SessionRegistry<S> {
    inner: Mutex<RegistryInner<S>>,
}

impl<S: Clone> SessionRegistry<S> {
    /// Creates a closed, empty registry.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                sessions: BTreeMap::new(),
                open: false,
            }),
        }
    }

    /// Starts accepting sessions.
    pub fn open(&self) {
        self.inner.lock().open = true;
    }

    /// Returns `true` while sessions are accepted.
    pub fn is_open(&self) -> bool {
        self.inner.lock().open
    }

    /// Registers a session. Hands it back if the registry is closed.
    pub fn insert(&self, id: SessionId, session: S) -> Result<(), S> {
        let mut inner = self.inner.lock();
        if !inner.open {
            return Err(session);
        }
        inner.sessions.insert(id, session);
        Ok(())
    }

    /// Removes a session. Returns `None` if it was already gone.
    pub fn remove(&self, id: SessionId) -> Option<S> {
        self.inner.lock().sessions.remove(&id)
    }

    /// Looks a session up.
    pub fn get(&self, id: SessionId) -> Option<S> {
        self.inner.lock().sessions.get(&id).cloned()
    }

    /// Closes the registry and returns every session, in id order.
    pub fn drain(&self) -> Vec<S> {
        let mut inner = self.inner.lock();
        inner.open = false;
        std::mem::take(&mut inner.sessions).into_values().collect()
    }

    /// Ids of the registered sessions.
    pub fn ids(&self) -> Vec<SessionId> {
        self.inner.lock().sessions.keys().copied().collect()
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    /// Returns `true` if no session is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<S: Clone> Default for SessionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_registry_refuses() {
        let registry: SessionRegistry<&str> = SessionRegistry::new();
        assert_eq!(registry.insert(SessionId(1), "a"), Err("a"));

        registry.open();
        assert!(registry.insert(SessionId(1), "a").is_ok());
        assert_eq!(registry.get(SessionId(1)), Some("a"));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = SessionRegistry::new();
        registry.open();
        registry.insert(SessionId(3), 3u32).unwrap();

        assert_eq!(registry.remove(SessionId(3)), Some(3));
        assert_eq!(registry.remove(SessionId(3)), None);
    }

    #[test]
    fn test_drain_closes_and_empties() {
        let registry = SessionRegistry::new();
        registry.open();
        registry.insert(SessionId(2), "b").unwrap();
        registry.insert(SessionId(1), "a").unwrap();

        assert_eq!(registry.drain(), vec!["a", "b"]);
        assert!(registry.is_empty());
        assert!(!registry.is_open());
        assert!(registry.insert(SessionId(4), "c").is_err());
    }
}
