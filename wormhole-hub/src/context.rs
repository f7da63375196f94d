use std::sync::Arc;
use std::time::Duration;

use crate::{Registry, Sequencer, Store};

/// How long a tunneled call waits for the agent's answer by default.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Application-wide state, shared by the QUIC accept loop and the HTTP
/// control plane.
///
/// There are no process-level singletons: tests build an isolated context per
/// scenario and everything downstream receives a clone.
#[derive(Clone)]
pub struct Context {
    pub registry: Registry,
    pub sequencer: Arc<Sequencer>,
    pub store: Store,
    pub command_timeout: Duration,
}

impl Context {
    pub fn new(command_timeout: Duration) -> Self {
        Self {
            registry: Registry::new(),
            sequencer: Arc::new(Sequencer::new()),
            store: Store::new(),
            command_timeout,
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_TIMEOUT)
    }
}
