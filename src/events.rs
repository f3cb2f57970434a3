//! Event codec (component H): a small tagged union round-tripping through the
//! mailbox's `{offset, type, value}` element shape (spec §3, §4.H).
//!
//! Every event carries a correlating `id` (the offset the mailbox reserved for it).
//! `r#type` is the mailbox element's stable tag; `value` is the event's own JSON,
//! serialized once more to a string so `Element::value` stays a plain string
//! regardless of payload shape.

use serde::{Deserialize, Serialize};

use crate::sliding_window::Element;

/// Encodes raw bytes the way the spec's examples show: `0x`-prefixed lowercase hex.
pub fn hex_encode(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCause {
    pub code: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataEvent {
    pub id: u64,
    pub data: String,
    pub topics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub id: u64,
    pub cause: ErrorCause,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteServiceEvent {
    pub id: u64,
    pub address: String,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployServiceEvent {
    pub id: u64,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetPublicKeyEvent {
    pub id: u64,
    pub address: String,
    #[serde(rename = "publicKey")]
    pub public_key: String,
    pub timestamp: u64,
    pub signature: String,
}

/// The closed set of events the gateway ever inserts into a mailbox.
///
/// `Serialize` (internally tagged by `type`) is used only for the HTTP poll
/// response body; the mailbox's own wire format goes through `encode`/`decode`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    Data(DataEvent),
    Error(ErrorEvent),
    ExecuteService(ExecuteServiceEvent),
    DeployService(DeployServiceEvent),
    GetPublicKey(GetPublicKeyEvent),
}

/// Stable tags used as the mailbox element's `type` field.
pub mod tag {
    pub const DATA: &str = "DataEvent";
    pub const ERROR: &str = "ErrorEvent";
    pub const EXECUTE_SERVICE: &str = "ExecuteServiceEvent";
    pub const DEPLOY_SERVICE: &str = "DeployServiceEvent";
    pub const GET_PUBLIC_KEY: &str = "GetPublicKeyEvent";
}

#[derive(Debug, thiserror::Error)]
pub enum EventCodecError {
    #[error("unknown event type tag: {0:?}")]
    UnknownTag(String),
    #[error("failed to deserialize {0} payload: {1}")]
    Malformed(&'static str, #[source] serde_json::Error),
    #[error("failed to serialize event payload: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl Event {
    pub fn id(&self) -> u64 {
        match self {
            Event::Data(e) => e.id,
            Event::Error(e) => e.id,
            Event::ExecuteService(e) => e.id,
            Event::DeployService(e) => e.id,
            Event::GetPublicKey(e) => e.id,
        }
    }

    fn tag(&self) -> &'static str {
        match self {
            Event::Data(_) => tag::DATA,
            Event::Error(_) => tag::ERROR,
            Event::ExecuteService(_) => tag::EXECUTE_SERVICE,
            Event::DeployService(_) => tag::DEPLOY_SERVICE,
            Event::GetPublicKey(_) => tag::GET_PUBLIC_KEY,
        }
    }

    /// Serializes to the `(type, value)` pair a mailbox element stores.
    pub fn encode(&self) -> Result<(&'static str, String), EventCodecError> {
        let value = match self {
            Event::Data(e) => serde_json::to_string(e),
            Event::Error(e) => serde_json::to_string(e),
            Event::ExecuteService(e) => serde_json::to_string(e),
            Event::DeployService(e) => serde_json::to_string(e),
            Event::GetPublicKey(e) => serde_json::to_string(e),
        }
        .map_err(EventCodecError::Serialize)?;
        Ok((self.tag(), value))
    }

    /// Decodes a mailbox element back into its typed event.
    pub fn decode(r#type: &str, value: &str) -> Result<Event, EventCodecError> {
        match r#type {
            tag::DATA => serde_json::from_str(value)
                .map(Event::Data)
                .map_err(|e| EventCodecError::Malformed("DataEvent", e)),
            tag::ERROR => serde_json::from_str(value)
                .map(Event::Error)
                .map_err(|e| EventCodecError::Malformed("ErrorEvent", e)),
            tag::EXECUTE_SERVICE => serde_json::from_str(value)
                .map(Event::ExecuteService)
                .map_err(|e| EventCodecError::Malformed("ExecuteServiceEvent", e)),
            tag::DEPLOY_SERVICE => serde_json::from_str(value)
                .map(Event::DeployService)
                .map_err(|e| EventCodecError::Malformed("DeployServiceEvent", e)),
            tag::GET_PUBLIC_KEY => serde_json::from_str(value)
                .map(Event::GetPublicKey)
                .map_err(|e| EventCodecError::Malformed("GetPublicKeyEvent", e)),
            other => Err(EventCodecError::UnknownTag(other.to_string())),
        }
    }

    pub fn try_from_element(element: &Element) -> Result<Event, EventCodecError> {
        Event::decode(&element.r#type, &element.value)
    }
}
