//! The wormhole wire protocol: a length-prefixed binary frame carrying a JSON
//! payload, exchanged over a single bidirectional QUIC stream.
//!
//! Every frame starts with a fixed 10-byte header ([`PackageHeader`]) followed
//! by the payload. The payload is a tagged JSON object: either a [`Command`]
//! sent by the hub (or the agent's initial registration) or a [`Response`]
//! sent back by the agent. Frames are correlated by the `Sequence` field; the
//! hub allocates sequences and the agent echoes them.
//!
//! This crate is transport-agnostic. [`FrameReader`] and [`FrameWriter`] work
//! over anything implementing tokio's `AsyncRead`/`AsyncWrite`, which includes
//! quinn's stream halves.

mod codec;
pub use codec::*;

mod header;
pub use header::*;

mod message;
pub use message::*;

/// The ALPN token required when negotiating a hub/agent QUIC connection.
pub static ALPN: &[u8] = b"emqx-wormhole";
