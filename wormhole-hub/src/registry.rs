use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::Session;

/// The live sessions, keyed by agent identifier.
///
/// At most one session per identifier at any instant; replacing an entry
/// displaces the previous session. One mutex around the map is enough, every
/// operation is O(1) and brief.
#[derive(Clone, Default)]
pub struct Registry {
    sessions: Arc<Mutex<HashMap<String, Session>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a session, returning the one it displaced (if any).
    pub fn insert(&self, identifier: &str, session: Session) -> Option<Session> {
        self.sessions
            .lock()
            .unwrap()
            .insert(identifier.to_string(), session)
    }

    /// Remove the entry for `identifier`, but only if it still is `session`.
    ///
    /// A terminating session must not evict the replacement that displaced it.
    pub fn remove(&self, identifier: &str, session: &Session) -> bool {
        let mut sessions = self.sessions.lock().unwrap();
        match sessions.get(identifier) {
            Some(current) if current == session => {
                sessions.remove(identifier);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, identifier: &str) -> Option<Session> {
        self.sessions.lock().unwrap().get(identifier).cloned()
    }

    pub fn snapshot(&self) -> Vec<(String, Session)> {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .map(|(identifier, session)| (identifier.clone(), session.clone()))
            .collect()
    }
}
