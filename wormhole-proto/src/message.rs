use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use thiserror::Error;

/// The reserved sequence value: never allocated, used by responses that are
/// not correlated to a dispatched command (registration outcomes).
pub const REGISTER_SEQUENCE: u64 = 0;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown tag {0}")]
pub struct UnknownTag(pub u8);

macro_rules! tag_enum {
    ($name:ident { $($variant:ident = $val:literal,)* }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(into = "u8", try_from = "u8")]
        pub enum $name {
            $($variant = $val,)*
        }

        impl From<$name> for u8 {
            fn from(v: $name) -> u8 {
                v as u8
            }
        }

        impl TryFrom<u8> for $name {
            type Error = UnknownTag;

            fn try_from(v: u8) -> Result<Self, UnknownTag> {
                match v {
                    $($val => Ok($name::$variant),)*
                    other => Err(UnknownTag(other)),
                }
            }
        }
    };
}

// The numeric tags are wire-compatible and must not be renumbered.
tag_enum!(CmdType {
    Register = 1,
    Http = 2,
});

tag_enum!(ResponseType {
    Basic = 0,
    Http = 1,
});

tag_enum!(ResponseCode {
    Ok = 0,
    BadRequest = 1,
    ErrorFound = 2,
});

/// A fault decoding or validating a payload.
///
/// Unlike [`crate::FrameError`], these are per-frame: the stream stays in
/// sync, so readers log the fault and drop the frame.
#[derive(Error, Debug)]
pub enum MessageError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("message carries neither a command nor a response tag")]
    Untagged,

    #[error("unknown command type {0}")]
    UnknownCommand(u64),

    #[error("unknown response type {0}")]
    UnknownResponse(u64),

    #[error("a non-empty identifier is required")]
    IdentifierRequired,

    #[error("sequence {0} is reserved")]
    ReservedSequence(u64),
}

/// The inward HTTP call an agent is asked to perform.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HttpRequest {
    /// `"http"` or `"https"`.
    pub schema: String,

    pub method: String,

    /// Empty means the agent's loopback address.
    pub host: String,

    pub port: u16,

    /// Prefix registered with the middleware entry.
    pub base_path: String,

    /// Remainder of the public URL, appended after `base_path`.
    pub path: String,

    #[serde(default)]
    pub headers: HashMap<String, Vec<String>>,

    #[serde(with = "base64_bytes", default)]
    pub body: Vec<u8>,
}

/// The first command on every stream: binds the agent's identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RegisterCommand {
    pub identifier: String,

    c_type: CmdType,

    #[serde(default)]
    pub sequence: u64,
}

impl RegisterCommand {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            c_type: CmdType::Register,
            sequence: REGISTER_SEQUENCE,
        }
    }
}

/// A tunneled HTTP call, stamped with a hub-allocated sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HttpCommand {
    pub identifier: String,

    c_type: CmdType,

    pub sequence: u64,

    #[serde(flatten)]
    pub request: HttpRequest,
}

impl HttpCommand {
    pub fn new(identifier: impl Into<String>, sequence: u64, request: HttpRequest) -> Self {
        Self {
            identifier: identifier.into(),
            c_type: CmdType::Http,
            sequence,
            request,
        }
    }
}

/// Status plus description, used for registration outcomes and failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BasicResponse {
    response_type: ResponseType,

    pub identifier: String,

    #[serde(default)]
    pub sequence: u64,

    pub code: ResponseCode,

    #[serde(default)]
    pub description: String,
}

impl BasicResponse {
    pub fn new(
        identifier: impl Into<String>,
        sequence: u64,
        code: ResponseCode,
        description: impl Into<String>,
    ) -> Self {
        Self {
            response_type: ResponseType::Basic,
            identifier: identifier.into(),
            sequence,
            code,
            description: description.into(),
        }
    }
}

/// A completed inward HTTP call, carried back to the hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HttpResponse {
    response_type: ResponseType,

    pub identifier: String,

    pub sequence: u64,

    pub code: ResponseCode,

    #[serde(default)]
    pub description: String,

    /// Response headers of the inward call. The wire key is singular.
    #[serde(default)]
    pub header: HashMap<String, Vec<String>>,

    pub http_response_code: u16,

    #[serde(default)]
    pub http_response_text: String,

    #[serde(with = "base64_bytes", default)]
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(
        identifier: impl Into<String>,
        sequence: u64,
        header: HashMap<String, Vec<String>>,
        http_response_code: u16,
        http_response_text: impl Into<String>,
        body: Vec<u8>,
    ) -> Self {
        Self {
            response_type: ResponseType::Http,
            identifier: identifier.into(),
            sequence,
            code: ResponseCode::Ok,
            description: String::new(),
            header,
            http_response_code,
            http_response_text: http_response_text.into(),
            body,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Command {
    Register(RegisterCommand),
    Http(HttpCommand),
}

impl Command {
    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        let payload = match self {
            Command::Register(cmd) => serde_json::to_vec(cmd)?,
            Command::Http(cmd) => serde_json::to_vec(cmd)?,
        };
        Ok(payload)
    }

    pub fn identifier(&self) -> &str {
        match self {
            Command::Register(cmd) => &cmd.identifier,
            Command::Http(cmd) => &cmd.identifier,
        }
    }

    pub fn sequence(&self) -> u64 {
        match self {
            Command::Register(cmd) => cmd.sequence,
            Command::Http(cmd) => cmd.sequence,
        }
    }

    /// Registration always requires an identifier; any other command needs
    /// one as soon as it is request-scoped (non-zero sequence).
    pub fn validate(&self) -> Result<(), MessageError> {
        match self {
            Command::Register(cmd) if cmd.identifier.is_empty() => {
                Err(MessageError::IdentifierRequired)
            }
            Command::Http(cmd) if cmd.sequence != REGISTER_SEQUENCE && cmd.identifier.is_empty() => {
                Err(MessageError::IdentifierRequired)
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Response {
    Basic(BasicResponse),
    Http(HttpResponse),
}

impl Response {
    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        let payload = match self {
            Response::Basic(res) => serde_json::to_vec(res)?,
            Response::Http(res) => serde_json::to_vec(res)?,
        };
        Ok(payload)
    }

    pub fn identifier(&self) -> &str {
        match self {
            Response::Basic(res) => &res.identifier,
            Response::Http(res) => &res.identifier,
        }
    }

    pub fn sequence(&self) -> u64 {
        match self {
            Response::Basic(res) => res.sequence,
            Response::Http(res) => res.sequence,
        }
    }

    pub fn code(&self) -> ResponseCode {
        match self {
            Response::Basic(res) => res.code,
            Response::Http(res) => res.code,
        }
    }

    /// The reserved sequence is only carried by registration outcomes.
    pub fn validate(&self) -> Result<(), MessageError> {
        if self.sequence() != REGISTER_SEQUENCE {
            return Ok(());
        }

        match self {
            Response::Basic(res)
                if matches!(res.code, ResponseCode::Ok | ResponseCode::BadRequest) =>
            {
                Ok(())
            }
            _ => Err(MessageError::ReservedSequence(REGISTER_SEQUENCE)),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Message {
    Command(Command),
    Response(Response),
}

impl Message {
    /// Decode one frame payload into a typed message.
    ///
    /// The probe order is load-bearing for wire compatibility: a payload
    /// carrying both `ResponseType` and `Code` is a response, otherwise a
    /// `CType` makes it a command.
    pub fn decode(payload: &[u8]) -> Result<Self, MessageError> {
        let value: serde_json::Value = serde_json::from_slice(payload)?;

        if value.get("ResponseType").is_some() && value.get("Code").is_some() {
            let tag = value
                .get("ResponseType")
                .and_then(|tag| tag.as_u64())
                .ok_or(MessageError::Untagged)?;

            let response = match tag {
                0 => Response::Basic(serde_json::from_value(value)?),
                1 => Response::Http(serde_json::from_value(value)?),
                other => return Err(MessageError::UnknownResponse(other)),
            };
            response.validate()?;

            return Ok(Message::Response(response));
        }

        if let Some(tag) = value.get("CType") {
            let tag = tag.as_u64().ok_or(MessageError::Untagged)?;

            let command = match tag {
                1 => Command::Register(serde_json::from_value(value)?),
                2 => Command::Http(serde_json::from_value(value)?),
                other => return Err(MessageError::UnknownCommand(other)),
            };

            // Identifier validation is left to the session: the hub answers a
            // bad registration on the wire instead of dropping it.
            return Ok(Message::Command(command));
        }

        Err(MessageError::Untagged)
    }
}

/// Go's `encoding/json` encodes `[]byte` as a base64 string; these payloads
/// keep that representation.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(Vec::new()),
            Some(encoded) => STANDARD.decode(encoded).map_err(serde::de::Error::custom),
        }
    }
}
