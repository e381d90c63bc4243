//! Wire protocol between the build cache and a persistent worker.
//!
//! Every message is an envelope `{"type": <code>, "data": <payload>}`:
//! - `0` VersionQuery (cache -> worker), no payload
//! - `1` VersionReply (worker -> cache), `{"version": <int>}`
//! - `2` BuildRequest (cache -> worker), [`BuildRequest`] payload
//! - `3` BuildResult (worker -> cache), [`BuildResult`] payload
//!
//! Codes outside this table decode to `None` so newer caches can talk to
//! older workers.

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use crate::build_state::{BuildRequest, BuildResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    VersionQuery,
    VersionReply,
    BuildRequest,
    BuildResult,
}

impl MessageType {
    pub fn code(self) -> u64 {
        match self {
            Self::VersionQuery => 0,
            Self::VersionReply => 1,
            Self::BuildRequest => 2,
            Self::BuildResult => 3,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Self::VersionQuery),
            1 => Some(Self::VersionReply),
            2 => Some(Self::BuildRequest),
            3 => Some(Self::BuildResult),
            _ => None,
        }
    }
}

/// `VersionReply` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionData {
    pub version: u32,
}

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    VersionQuery,
    VersionReply(VersionData),
    BuildRequest(BuildRequest),
    BuildResult(BuildResult),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::VersionQuery => MessageType::VersionQuery,
            Self::VersionReply(_) => MessageType::VersionReply,
            Self::BuildRequest(_) => MessageType::BuildRequest,
            Self::BuildResult(_) => MessageType::BuildResult,
        }
    }

    pub fn version_reply(version: u32) -> Self {
        Self::VersionReply(VersionData { version })
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut envelope = serializer.serialize_struct("Message", 2)?;
        envelope.serialize_field("type", &self.message_type().code())?;
        match self {
            Self::VersionQuery => envelope.skip_field("data")?,
            Self::VersionReply(data) => envelope.serialize_field("data", data)?,
            Self::BuildRequest(request) => envelope.serialize_field("data", request)?,
            Self::BuildResult(result) => envelope.serialize_field("data", result)?,
        }
        envelope.end()
    }
}

/// Raw inbound envelope, before the type code is interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub code: u64,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

/// A known message type whose payload does not match its contract.
#[derive(Debug, thiserror::Error)]
#[error("malformed {message_type:?} payload: {source}")]
pub struct ProtocolError {
    pub message_type: MessageType,
    #[source]
    pub source: serde_json::Error,
}

impl Envelope {
    /// Interpret the envelope. `Ok(None)` means the type code is unknown.
    pub fn decode(self) -> Result<Option<Message>, ProtocolError> {
        let Some(message_type) = MessageType::from_code(self.code) else {
            return Ok(None);
        };

        let malformed = |source| ProtocolError {
            message_type,
            source,
        };
        let message = match message_type {
            MessageType::VersionQuery => Message::VersionQuery,
            MessageType::VersionReply => {
                Message::VersionReply(serde_json::from_value(self.data).map_err(malformed)?)
            }
            MessageType::BuildRequest => {
                Message::BuildRequest(serde_json::from_value(self.data).map_err(malformed)?)
            }
            MessageType::BuildResult => {
                Message::BuildResult(serde_json::from_value(self.data).map_err(malformed)?)
            }
        };
        Ok(Some(message))
    }
}
