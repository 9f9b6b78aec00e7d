//! Wire constants shared by the host and the content-side bootstrap script.

use serde::{Deserialize, Serialize};

/// Value of the `bridge` field every envelope must carry.
pub const NAME: &str = "soul-bridge";
/// Protocol revision; inbound envelopes with any other value are rejected.
pub const VERSION: i64 = 1;
/// Acknowledgment body for fire-and-forget inbound messages.
pub const EMPTY_RESPONSE: &str = "{}";
/// Global function installed by the bootstrap script to receive host envelopes.
pub const RECEIVE_FN: &str = "__soulBridgeReceiveFromHost";
/// Prefix of host-originated request ids.
pub const REQUEST_ID_PREFIX: &str = "host-";

pub mod kinds {
    pub const READY: &str = "ready";
    pub const EVENT: &str = "event";
    pub const REQUEST: &str = "request";
    pub const RESPONSE: &str = "response";
}

/// Error codes carried in `error.code` of failed response envelopes.
pub mod codes {
    pub const INVALID_REQUEST: &str = "invalid_request";
    pub const HANDLER_NOT_FOUND: &str = "handler_not_found";
    /// Kept verbatim for compatibility with deployed content scripts.
    pub const HOST_HANDLER_ERROR: &str = "java_handler_error";
    pub const INVALID_RESPONSE: &str = "invalid_response";
    pub const BRIDGE_ERROR: &str = "bridge_error";
}

/// Failure codes handed to `QueryCallback::failure`.
pub mod status {
    pub const BAD_REQUEST: i32 = 400;
    pub const UNSUPPORTED_VERSION: i32 = 422;
}

pub const DEFAULT_ERROR_MESSAGE: &str = "Bridge request failed";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    Ready,
    Event,
    Request,
    Response,
}

impl Kind {
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Ready => kinds::READY,
            Kind::Event => kinds::EVENT,
            Kind::Request => kinds::REQUEST,
            Kind::Response => kinds::RESPONSE,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            kinds::READY => Some(Kind::Ready),
            kinds::EVENT => Some(Kind::Event),
            kinds::REQUEST => Some(Kind::Request),
            kinds::RESPONSE => Some(Kind::Response),
            _ => None,
        }
    }
}

/// `error` object of a failed response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub code: String,
    pub message: String,
}

impl WireError {
    pub fn new(code: Option<&str>, message: Option<&str>) -> Self {
        Self {
            code: code.unwrap_or(codes::BRIDGE_ERROR).to_string(),
            message: message.unwrap_or(DEFAULT_ERROR_MESSAGE).to_string(),
        }
    }
}

/// A classified inbound envelope. Blank ids and channels are normalized to `None`.
#[derive(Clone, Debug, PartialEq)]
pub enum Envelope {
    Ready,
    Event {
        channel: Option<String>,
        payload: serde_json::Value,
    },
    Request {
        id: Option<String>,
        channel: Option<String>,
        payload: serde_json::Value,
    },
    Response {
        id: Option<String>,
        channel: Option<String>,
        ok: Option<bool>,
        payload: serde_json::Value,
        error: Option<WireError>,
    },
}

impl Envelope {
    pub fn kind(&self) -> Kind {
        match self {
            Envelope::Ready => Kind::Ready,
            Envelope::Event { .. } => Kind::Event,
            Envelope::Request { .. } => Kind::Request,
            Envelope::Response { .. } => Kind::Response,
        }
    }
}
