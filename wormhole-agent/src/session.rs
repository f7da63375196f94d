use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinSet;
use url::Url;

use wormhole_proto::{
    Command, FrameError, FrameReader, FrameWriter, Message, MessageError, RegisterCommand,
    Response, ResponseCode, REGISTER_SEQUENCE,
};

use crate::{Client, ClientError, Executor};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("client error: {0}")]
    Client(#[from] ClientError),

    #[error("connection error: {0}")]
    Connection(#[from] quinn::ConnectionError),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("message error: {0}")]
    Message(#[from] MessageError),

    #[error("the hub closed the stream during registration")]
    ClosedDuringRegistration,

    #[error("registration rejected: {0}")]
    Rejected(String),
}

/// The agent's end of the tunnel: one bidirectional stream to the hub.
///
/// Construction runs the registration handshake; [`Session::run`] then serves
/// commands until the hub goes away. Each command executes on its own task,
/// so responses may return out of order; the sequence field keeps them
/// correlated.
pub struct Session {
    identifier: String,

    // Dropping the last connection handle would close it, so the session
    // holds on to it for its whole life.
    #[allow(dead_code)]
    conn: quinn::Connection,

    reader: FrameReader<quinn::RecvStream>,
    writer: Arc<AsyncMutex<FrameWriter<quinn::SendStream>>>,
    executor: Executor,
}

impl Session {
    /// Dial the hub, open the command stream, and complete registration.
    pub async fn connect(
        client: &Client,
        url: &Url,
        identifier: &str,
        executor: Executor,
    ) -> Result<Self, SessionError> {
        let conn = client.connect(url).await?;
        let (send, recv) = conn.open_bi().await?;

        let mut reader = FrameReader::new(recv);
        let mut writer = FrameWriter::new(send);

        // Registering: announce the identifier, then wait for the verdict.
        let register = Command::Register(RegisterCommand::new(identifier));
        writer.write(&register.encode()?).await?;

        loop {
            let Some(payload) = reader.read().await? else {
                return Err(SessionError::ClosedDuringRegistration);
            };

            match Message::decode(&payload) {
                Ok(Message::Response(Response::Basic(ack)))
                    if ack.sequence == REGISTER_SEQUENCE =>
                {
                    match ack.code {
                        ResponseCode::Ok => {
                            log::info!("registered with the hub as {identifier}");
                            break;
                        }
                        _ => return Err(SessionError::Rejected(ack.description)),
                    }
                }
                Ok(_) => log::warn!("dropping an unexpected message while registering"),
                Err(err) => log::warn!("dropping an undecodable frame while registering: {err}"),
            }
        }

        Ok(Self {
            identifier: identifier.to_string(),
            conn,
            reader,
            writer: Arc::new(AsyncMutex::new(writer)),
            executor,
        })
    }

    /// Serve tunneled commands until the stream dies.
    ///
    /// Termination cancels whatever inward calls are still in flight.
    pub async fn run(mut self) -> Result<(), SessionError> {
        let mut tasks = JoinSet::new();

        let result = loop {
            tokio::select! {
                frame = self.reader.read() => {
                    match frame {
                        Ok(Some(payload)) => self.handle(&payload, &mut tasks),
                        Ok(None) => break Ok(()),
                        Err(err) => break Err(err.into()),
                    }
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(err) = joined {
                        log::error!("executor task failed: {err}");
                    }
                }
            }
        };

        tasks.abort_all();
        result
    }

    fn handle(&self, payload: &[u8], tasks: &mut JoinSet<()>) {
        match Message::decode(payload) {
            Ok(Message::Command(command)) => {
                if let Err(err) = command.validate() {
                    log::warn!("dropping an invalid command: {err}");
                    return;
                }

                match command {
                    Command::Http(command) => {
                        let identifier = self.identifier.clone();
                        let writer = self.writer.clone();
                        let executor = self.executor.clone();

                        tasks.spawn(async move {
                            let sequence = command.sequence;
                            let response = executor.execute(&identifier, command).await;

                            let payload = match response.encode() {
                                Ok(payload) => payload,
                                Err(err) => {
                                    log::error!(
                                        "failed to encode the response for sequence {sequence}: {err}"
                                    );
                                    return;
                                }
                            };

                            if let Err(err) = writer.lock().await.write(&payload).await {
                                log::warn!(
                                    "failed to send the response for sequence {sequence}: {err}"
                                );
                            }
                        });
                    }
                    Command::Register(_) => {
                        log::warn!("dropping a register command from the hub");
                    }
                }
            }
            // The agent initiates no correlated commands, so no response
            // arriving here has a consumer.
            Ok(Message::Response(response)) => {
                log::debug!("dropping a response with sequence {}", response.sequence());
            }
            Err(err) => log::warn!("dropping an undecodable frame: {err}"),
        }
    }
}
