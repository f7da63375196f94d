//! The hub: accepts long-lived QUIC connections from agents, binds each to
//! its self-declared identifier, and bridges public HTTP calls through the
//! right agent session.
//!
//! The pieces, leaves first: [`Sequencer`] hands out correlation keys,
//! [`Registry`] maps identifiers to live [`Session`]s, [`Session`] owns one
//! QUIC stream (reader task, correlator, serialized writer), and the bridge
//! in [`bridge`] turns `POST /wh/{agent}/{middleware}/{rest}` into a framed
//! command and the agent's answer back into the HTTP response.

mod context;
pub use context::*;

mod registry;
pub use registry::*;

mod sequence;
pub use sequence::*;

mod server;
pub use server::*;

mod session;
pub use session::*;

mod store;
pub use store::*;

pub mod bridge;
