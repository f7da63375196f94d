use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{oneshot, Mutex as AsyncMutex};

use wormhole_proto::{
    BasicResponse, Command, FrameError, FrameReader, FrameWriter, HttpCommand, HttpRequest,
    Message, Response, ResponseCode, REGISTER_SEQUENCE,
};

use crate::{Context, Sequencer};

// Application close codes on the QUIC connection.
const CLOSE_OK: u32 = 0;
const CLOSE_PROTOCOL: u32 = 1;
const CLOSE_DISPLACED: u32 = 2;

/// An error terminating a hub-side session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("connection error: {0}")]
    Connection(#[from] quinn::ConnectionError),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("message error: {0}")]
    Message(#[from] wormhole_proto::MessageError),
}

/// The outcome of [`Session::dispatch`] when no response made it back.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("failed to encode the command: {0}")]
    Encode(#[from] wormhole_proto::MessageError),

    #[error("failed to send the command to the agent: {0}")]
    SendFailed(#[source] FrameError),

    #[error("timed out waiting for the agent response")]
    Timeout,

    #[error("the agent session was lost")]
    SessionLost,
}

/// One registered agent stream on the hub.
///
/// The session owns the read half through its reader task; the write half is
/// serialized behind a mutex held across each full frame. In-flight waiters
/// live in the correlator map, keyed by sequence, and are failed as a group
/// when the session terminates.
#[derive(Clone)]
pub struct Session {
    identifier: String,
    conn: quinn::Connection,
    sequencer: Arc<Sequencer>,
    timeout: Duration,
    shared: Arc<Shared>,
}

struct Shared {
    writer: AsyncMutex<FrameWriter<quinn::SendStream>>,

    // The correlator. `None` marks a terminated session: dispatch refuses to
    // park a waiter that nothing would ever resolve.
    waiters: Mutex<Option<HashMap<u64, oneshot::Sender<Response>>>>,
}

impl Session {
    fn new(
        identifier: String,
        conn: quinn::Connection,
        writer: FrameWriter<quinn::SendStream>,
        sequencer: Arc<Sequencer>,
        timeout: Duration,
    ) -> Self {
        Self {
            identifier,
            conn,
            sequencer,
            timeout,
            shared: Arc::new(Shared {
                writer: AsyncMutex::new(writer),
                waiters: Mutex::new(Some(HashMap::new())),
            }),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Send a tunneled HTTP request through this session and wait for the
    /// agent's answer.
    ///
    /// Allocates the correlation sequence, parks a waiter under it, writes the
    /// framed command, and resolves when the response arrives or the deadline
    /// elapses. A late response after [`DispatchError::Timeout`] is dropped by
    /// the correlator; the session itself stays healthy.
    pub async fn dispatch(&self, request: HttpRequest) -> Result<Response, DispatchError> {
        let sequence = self.sequencer.next();
        let command = Command::Http(HttpCommand::new(self.identifier.clone(), sequence, request));
        let payload = command.encode()?;

        let (tx, rx) = oneshot::channel();
        {
            let mut waiters = self.shared.waiters.lock().unwrap();
            match waiters.as_mut() {
                Some(waiters) => waiters.insert(sequence, tx),
                None => return Err(DispatchError::SessionLost),
            };
        }

        // The lock spans header and payload: frames from concurrent
        // dispatches never interleave.
        let written = self.shared.writer.lock().await.write(&payload).await;
        if let Err(err) = written {
            // A dead write side means a dead session; every other waiter is
            // failed along with this one.
            self.fail_waiters();
            self.conn.close(CLOSE_PROTOCOL.into(), b"write failed");
            return Err(DispatchError::SendFailed(err));
        }

        log::debug!(
            "session {}: dispatched command with sequence {sequence}",
            self.identifier
        );

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(DispatchError::SessionLost),
            Err(_) => {
                self.remove_waiter(sequence);
                Err(DispatchError::Timeout)
            }
        }
    }

    /// Tear the session down, failing every in-flight waiter.
    pub fn terminate(&self, reason: &str) {
        self.fail_waiters();
        self.conn.close(CLOSE_DISPLACED.into(), reason.as_bytes());
    }

    /// Close the connection without a fault, e.g. at process shutdown.
    pub fn shutdown(&self) {
        self.fail_waiters();
        self.conn.close(CLOSE_OK.into(), b"hub is shutting down");
    }

    // Hand a decoded response to whichever dispatch is waiting on it.
    // Delivery is at-most-once; anything unmatched is dropped.
    fn deliver(&self, response: Response) {
        let sequence = response.sequence();

        let waiter = match self.shared.waiters.lock().unwrap().as_mut() {
            Some(waiters) => waiters.remove(&sequence),
            None => None,
        };

        match waiter {
            Some(tx) => {
                if tx.send(response).is_err() {
                    // The dispatch timed out between lookup and delivery.
                    log::debug!(
                        "session {}: dropping late response for sequence {sequence}",
                        self.identifier
                    );
                }
            }
            None => log::warn!(
                "session {}: no waiter for sequence {sequence}, dropping response",
                self.identifier
            ),
        }
    }

    fn remove_waiter(&self, sequence: u64) {
        if let Some(waiters) = self.shared.waiters.lock().unwrap().as_mut() {
            waiters.remove(&sequence);
        }
    }

    // Drop every parked waiter (their receivers observe SessionLost) and
    // refuse any new ones.
    fn fail_waiters(&self) {
        self.shared.waiters.lock().unwrap().take();
    }

    // Pump frames off the stream until it dies. Per-frame decode faults are
    // dropped; framing faults end the session.
    async fn run(&self, mut reader: FrameReader<quinn::RecvStream>) -> Result<(), SessionError> {
        loop {
            let payload = match reader.read().await {
                Ok(Some(payload)) => payload,
                Ok(None) => return Ok(()),
                Err(err) => return Err(err.into()),
            };

            match Message::decode(&payload) {
                Ok(Message::Response(response)) => self.deliver(response),
                Ok(Message::Command(command)) => {
                    // The hub does not take commands from agents.
                    log::warn!(
                        "session {}: dropping unsolicited command with sequence {}",
                        self.identifier,
                        command.sequence()
                    );
                }
                Err(err) => {
                    log::warn!(
                        "session {}: dropping undecodable frame: {err}",
                        self.identifier
                    );
                }
            }
        }
    }

    async fn send(&self, response: Response) -> Result<(), SessionError> {
        let payload = response.encode()?;
        self.shared.writer.lock().await.write(&payload).await?;
        Ok(())
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        self.conn.stable_id() == other.conn.stable_id()
    }
}

impl Eq for Session {}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("identifier", &self.identifier)
            .field("conn", &self.conn.stable_id())
            .finish()
    }
}

/// Serve one accepted agent connection: registration handshake, then the
/// read loop, then cleanup.
pub(crate) async fn serve(conn: quinn::Connection, ctx: Context) -> Result<(), SessionError> {
    let (send, recv) = conn.accept_bi().await?;
    let mut reader = FrameReader::new(recv);
    let mut writer = FrameWriter::new(send);

    // AwaitingRegister: the first frame must be a valid registration.
    let Some(payload) = reader.read().await? else {
        log::debug!("stream closed before registration");
        return Ok(());
    };

    let identifier = match Message::decode(&payload) {
        Ok(Message::Command(Command::Register(register))) => {
            if register.identifier.is_empty() {
                reject(
                    &conn,
                    &mut writer,
                    "Identifier is required for registration.",
                )
                .await;
                return Ok(());
            }
            register.identifier
        }
        Ok(_) | Err(_) => {
            reject(&conn, &mut writer, "A registration command is expected.").await;
            return Ok(());
        }
    };

    let session = Session::new(
        identifier.clone(),
        conn,
        writer,
        ctx.sequencer.clone(),
        ctx.command_timeout,
    );

    // Install before acking so a racing request can already route here. Any
    // previous holder of the identifier is displaced.
    if let Some(displaced) = ctx.registry.insert(&identifier, session.clone()) {
        log::warn!("agent {identifier} reconnected, displacing its previous session");
        displaced.terminate("displaced by a new registration");
    }

    let ack = Response::Basic(BasicResponse::new(
        identifier.clone(),
        REGISTER_SEQUENCE,
        ResponseCode::Ok,
        "registered",
    ));

    let result = match session.send(ack).await {
        Ok(()) => {
            log::info!("agent {identifier} registered");
            session.run(reader).await
        }
        Err(err) => Err(err),
    };

    // Registered → Terminated: drop the entry (unless a newer session already
    // took the identifier) and fail whatever is still waiting.
    ctx.registry.remove(&identifier, &session);
    session.fail_waiters();
    session
        .conn
        .close(CLOSE_OK.into(), b"session terminated");

    match &result {
        Ok(()) => log::info!("agent {identifier} disconnected"),
        Err(err) => log::warn!("agent {identifier} session failed: {err}"),
    }
    result
}

// Answer a bad registration on the wire, then drop the connection.
async fn reject(
    conn: &quinn::Connection,
    writer: &mut FrameWriter<quinn::SendStream>,
    description: &str,
) {
    let response = Response::Basic(BasicResponse::new(
        "",
        REGISTER_SEQUENCE,
        ResponseCode::BadRequest,
        description,
    ));

    match response.encode() {
        Ok(payload) => {
            if let Err(err) = writer.write(&payload).await {
                log::debug!("failed to answer a bad registration: {err}");
            }
        }
        Err(err) => log::error!("failed to encode a registration rejection: {err}"),
    }

    // Closing right away could discard the verdict before it is delivered.
    // A well-behaved peer hangs up first; a stuck one gets cut off.
    let _ = tokio::time::timeout(Duration::from_secs(3), conn.closed()).await;
    conn.close(CLOSE_PROTOCOL.into(), description.as_bytes());
}
