//! Wire-visible types for the master's request plane: identifiers,
//! media types, and the call/event/response model carried over HTTP.
//!
//! The encodings themselves are opaque to the rest of the crate: JSON
//! via serde_json and a compact binary encoding behind the
//! `application/x-protobuf` media tag. `application/recordio` is not an
//! encoding of a single message but the framed streaming wrapper; see
//! `crate::recordio`.

mod call;
mod event;

pub use call::{
    Accept, Acknowledge, AcknowledgeOperationStatus, Decline, Filters, InverseOfferIds, Kill,
    MasterCall, Message, OfferOperation, Reconcile, ReconcileOperations, ReconcileOperationsEntry,
    ReconcileTask, ResourceRequest, SchedulerCall, SchedulerCallKind, Shutdown, Subscribe,
    DEFAULT_REFUSE_SECONDS,
};
pub use event::{
    AgentInfo, AgentSummary, ClusterStatus, DrainingMachine, ExecutorInfo, ExecutorSummary,
    FileInfo, FrameworkSummary, GetAgents, GetExecutors, GetFrameworks, GetState, GetTasks,
    InverseOffer, MasterEvent, MasterInfo, MasterResponse, Offer, OperationSnapshot,
    OperationState, OperationStatus, Role, SchedulerEvent, SchedulerResponse, Task, TaskInfo,
    TaskState, TaskStatus,
};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

pub const APPLICATION_JSON: &str = "application/json";
pub const APPLICATION_PROTOBUF: &str = "application/x-protobuf";
pub const APPLICATION_RECORDIO: &str = "application/recordio";

/// Negotiable media types. `RecordIo` is the only streaming media; it
/// frames records whose individual encoding is chosen by the secondary
/// message headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Json,
    Protobuf,
    RecordIo,
}

impl ContentType {
    pub fn from_media_type(value: &str) -> Option<ContentType> {
        match value {
            APPLICATION_JSON => Some(ContentType::Json),
            APPLICATION_PROTOBUF => Some(ContentType::Protobuf),
            APPLICATION_RECORDIO => Some(ContentType::RecordIo),
            _ => None,
        }
    }

    pub fn is_streaming(self) -> bool {
        matches!(self, ContentType::RecordIo)
    }

    pub fn as_media_type(self) -> &'static str {
        match self {
            ContentType::Json => APPLICATION_JSON,
            ContentType::Protobuf => APPLICATION_PROTOBUF,
            ContentType::RecordIo => APPLICATION_RECORDIO,
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_media_type())
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode as JSON: {0}")]
    JsonEncode(#[source] serde_json::Error),
    #[error("failed to decode JSON: {0}")]
    JsonDecode(#[source] serde_json::Error),
    #[error("failed to encode binary message: {0}")]
    BinaryEncode(#[source] bincode::Error),
    #[error("failed to decode binary message: {0}")]
    BinaryDecode(#[source] bincode::Error),
    #[error("{0} is not a message encoding")]
    NotMessageEncoding(ContentType),
}

/// Serializes one message in the given (non-streaming) media type.
pub fn serialize<T: Serialize>(
    content_type: ContentType,
    value: &T,
) -> Result<Vec<u8>, CodecError> {
    match content_type {
        ContentType::Json => serde_json::to_vec(value).map_err(CodecError::JsonEncode),
        ContentType::Protobuf => bincode::serialize(value).map_err(CodecError::BinaryEncode),
        ContentType::RecordIo => Err(CodecError::NotMessageEncoding(content_type)),
    }
}

/// Deserializes one message in the given (non-streaming) media type.
pub fn deserialize<T: DeserializeOwned>(
    content_type: ContentType,
    bytes: &[u8],
) -> Result<T, CodecError> {
    match content_type {
        ContentType::Json => serde_json::from_slice(bytes).map_err(CodecError::JsonDecode),
        ContentType::Protobuf => bincode::deserialize(bytes).map_err(CodecError::BinaryDecode),
        ContentType::RecordIo => Err(CodecError::NotMessageEncoding(content_type)),
    }
}

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                $name(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                $name(value.to_string())
            }
        }
    };
}

string_id!(
    /// Identifies an agent for its whole registered lifetime.
    AgentId
);
string_id!(
    /// Identifies a framework across subscriptions.
    FrameworkId
);
string_id!(OfferId);
string_id!(
    /// Framework-supplied identity of an operation.
    OperationId
);
string_id!(TaskId);
string_id!(ExecutorId);
string_id!(ResourceProviderId);

/// Opaque token identifying one live HTTP subscription. Minted at
/// SUBSCRIBE; every later call from the same framework must echo it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(Uuid);

impl StreamId {
    pub fn random() -> StreamId {
        StreamId(Uuid::new_v4())
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for StreamId {
    type Err = uuid::Error;

    fn from_str(value: &str) -> Result<StreamId, uuid::Error> {
        Ok(StreamId(Uuid::parse_str(value)?))
    }
}

/// Static description a framework registers under.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameworkInfo {
    pub name: String,
    #[serde(default)]
    pub id: Option<FrameworkId>,
    #[serde(default)]
    pub principal: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_type_round_trip() {
        for content_type in [ContentType::Json, ContentType::Protobuf, ContentType::RecordIo] {
            assert_eq!(
                Some(content_type),
                ContentType::from_media_type(content_type.as_media_type())
            );
        }
        assert_eq!(None, ContentType::from_media_type("text/html"));
        assert!(ContentType::RecordIo.is_streaming());
        assert!(!ContentType::Json.is_streaming());
    }

    #[test]
    fn codec_round_trip() {
        let info = FrameworkInfo {
            name: "analytics".to_string(),
            id: Some(FrameworkId::from("fw-1")),
            principal: Some("ops".to_string()),
            roles: vec!["batch".to_string()],
            capabilities: vec![],
        };
        for content_type in [ContentType::Json, ContentType::Protobuf] {
            let bytes = serialize(content_type, &info).unwrap();
            let decoded: FrameworkInfo = deserialize(content_type, &bytes).unwrap();
            assert_eq!(info, decoded);
        }
    }

    #[test]
    fn recordio_is_not_a_message_encoding() {
        assert!(matches!(
            serialize(ContentType::RecordIo, &1u32),
            Err(CodecError::NotMessageEncoding(ContentType::RecordIo))
        ));
    }
}
