use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use thiserror::Error;
use uuid::Uuid;

/// Operator-registered metadata for an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    #[serde(default)]
    pub name: String,

    /// Assigned by the store on registration.
    #[serde(default)]
    pub identifier: String,

    #[serde(default)]
    pub description: String,
}

/// An inward service exposed through an agent: requests for `name` go to
/// `127.0.0.1:{port}{path}` on the agent's side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Middleware {
    pub name: String,
    pub path: String,
    pub port: u16,
}

impl Middleware {
    fn is_valid(&self) -> bool {
        !self.name.is_empty() && !self.path.is_empty() && self.port != 0
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("not valid node settings: a name is required")]
    InvalidAgent,

    #[error("an identifier is expected")]
    IdentifierExpected,

    #[error("not valid middleware settings: name, path and port are required")]
    InvalidMiddleware,

    #[error("cannot find middlewares for id {0}")]
    UnknownAgent(String),

    #[error("cannot find the middleware with name {0}")]
    UnknownMiddleware(String),
}

/// In-memory CRUD for agent and middleware metadata. Nothing here survives a
/// restart.
#[derive(Clone, Default)]
pub struct Store {
    agents: Arc<Mutex<HashMap<String, Agent>>>,
    middlewares: Arc<Mutex<HashMap<String, Vec<Middleware>>>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list_agents(&self) -> Vec<Agent> {
        self.agents.lock().unwrap().values().cloned().collect()
    }

    pub fn get_agent(&self, identifier: &str) -> Option<Agent> {
        self.agents.lock().unwrap().get(identifier).cloned()
    }

    /// Register an agent; the identifier is assigned here.
    pub fn add_agent(&self, mut agent: Agent) -> Agent {
        agent.identifier = Uuid::new_v4().to_string();
        self.agents
            .lock()
            .unwrap()
            .insert(agent.identifier.clone(), agent.clone());
        agent
    }

    pub fn update_agent(&self, agent: Agent) -> Result<Agent, StoreError> {
        if agent.name.is_empty() {
            return Err(StoreError::InvalidAgent);
        }
        if agent.identifier.is_empty() {
            return Err(StoreError::IdentifierExpected);
        }

        self.agents
            .lock()
            .unwrap()
            .insert(agent.identifier.clone(), agent.clone());
        Ok(agent)
    }

    pub fn delete_agent(&self, identifier: &str) -> Result<(), StoreError> {
        if identifier.is_empty() {
            return Err(StoreError::IdentifierExpected);
        }

        self.agents.lock().unwrap().remove(identifier);
        Ok(())
    }

    pub fn list_middlewares(&self, identifier: &str) -> Result<Vec<Middleware>, StoreError> {
        self.middlewares
            .lock()
            .unwrap()
            .get(identifier)
            .cloned()
            .ok_or_else(|| StoreError::UnknownAgent(identifier.to_string()))
    }

    pub fn get_middleware(&self, identifier: &str, name: &str) -> Option<Middleware> {
        self.middlewares
            .lock()
            .unwrap()
            .get(identifier)?
            .iter()
            .find(|middleware| middleware.name == name)
            .cloned()
    }

    pub fn add_middleware(
        &self,
        identifier: &str,
        middleware: Middleware,
    ) -> Result<Middleware, StoreError> {
        if !middleware.is_valid() {
            return Err(StoreError::InvalidMiddleware);
        }

        self.middlewares
            .lock()
            .unwrap()
            .entry(identifier.to_string())
            .or_default()
            .push(middleware.clone());
        Ok(middleware)
    }

    pub fn update_middleware(
        &self,
        identifier: &str,
        middleware: Middleware,
    ) -> Result<Middleware, StoreError> {
        if !middleware.is_valid() {
            return Err(StoreError::InvalidMiddleware);
        }

        let mut middlewares = self.middlewares.lock().unwrap();
        let entries = middlewares
            .get_mut(identifier)
            .ok_or_else(|| StoreError::UnknownAgent(identifier.to_string()))?;

        match entries.iter_mut().find(|entry| entry.name == middleware.name) {
            Some(entry) => {
                *entry = middleware.clone();
                Ok(middleware)
            }
            None => Err(StoreError::UnknownMiddleware(middleware.name.clone())),
        }
    }

    pub fn delete_middleware(&self, identifier: &str, name: &str) -> Result<(), StoreError> {
        if identifier.is_empty() || name.is_empty() {
            return Err(StoreError::IdentifierExpected);
        }

        let mut middlewares = self.middlewares.lock().unwrap();
        let entries = middlewares
            .get_mut(identifier)
            .ok_or_else(|| StoreError::UnknownAgent(identifier.to_string()))?;

        match entries.iter().position(|entry| entry.name == name) {
            Some(index) => {
                entries.remove(index);
                Ok(())
            }
            None => Err(StoreError::UnknownMiddleware(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn middleware(name: &str) -> Middleware {
        Middleware {
            name: name.to_string(),
            path: "/api".to_string(),
            port: 9081,
        }
    }

    #[test]
    fn test_agent_lifecycle() {
        let store = Store::new();

        let added = store.add_agent(Agent {
            name: "edge-1".to_string(),
            identifier: String::new(),
            description: "factory floor".to_string(),
        });
        assert!(!added.identifier.is_empty());
        assert_eq!(store.list_agents().len(), 1);

        let mut updated = added.clone();
        updated.description = "moved".to_string();
        store.update_agent(updated.clone()).unwrap();
        assert_eq!(
            store.get_agent(&added.identifier).unwrap().description,
            "moved"
        );

        store.delete_agent(&added.identifier).unwrap();
        assert!(store.get_agent(&added.identifier).is_none());
    }

    #[test]
    fn test_update_requires_name_and_identifier() {
        let store = Store::new();

        let missing_name = Agent {
            name: String::new(),
            identifier: "x".to_string(),
            description: String::new(),
        };
        assert!(matches!(
            store.update_agent(missing_name),
            Err(StoreError::InvalidAgent)
        ));

        let missing_id = Agent {
            name: "edge-1".to_string(),
            identifier: String::new(),
            description: String::new(),
        };
        assert!(matches!(
            store.update_agent(missing_id),
            Err(StoreError::IdentifierExpected)
        ));
    }

    #[test]
    fn test_middleware_lifecycle() {
        let store = Store::new();

        store.add_middleware("a1", middleware("svc")).unwrap();
        assert_eq!(store.get_middleware("a1", "svc"), Some(middleware("svc")));

        let mut changed = middleware("svc");
        changed.port = 8080;
        store.update_middleware("a1", changed.clone()).unwrap();
        assert_eq!(store.get_middleware("a1", "svc"), Some(changed));

        store.delete_middleware("a1", "svc").unwrap();
        assert!(store.get_middleware("a1", "svc").is_none());
    }

    #[test]
    fn test_middleware_validation() {
        let store = Store::new();

        let no_port = Middleware {
            name: "svc".to_string(),
            path: "/api".to_string(),
            port: 0,
        };
        assert!(matches!(
            store.add_middleware("a1", no_port),
            Err(StoreError::InvalidMiddleware)
        ));

        assert!(matches!(
            store.update_middleware("ghost", middleware("svc")),
            Err(StoreError::UnknownAgent(_))
        ));
    }
}
