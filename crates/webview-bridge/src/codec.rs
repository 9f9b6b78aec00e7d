//! Envelope parsing and construction. Pure functions, no state.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::trace;

use crate::error::{BridgeError, BridgeResult};
use crate::protocol::{self, status, Envelope, Kind, WireError};

/// An inbound frame that carried our protocol name but has not been validated yet.
#[derive(Clone, Debug, Deserialize)]
pub struct Packet {
    #[serde(default)]
    pub version: Option<i64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub channel: Option<String>,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub ok: Option<bool>,
    #[serde(default)]
    pub error: Option<RawWireError>,
}

/// Accepts scalars where a string is expected; numbers and booleans keep their JSON text.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(text)),
        Some(Value::Number(number)) => Ok(Some(number.to_string())),
        Some(Value::Bool(flag)) => Ok(Some(flag.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a string, found {other}"
        ))),
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RawWireError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Reasons a packet with our protocol name is refused at the transport layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
    UnsupportedVersion(i64),
    MissingKind,
    UnknownKind(String),
}

impl Rejection {
    pub fn status(&self) -> i32 {
        match self {
            Rejection::UnsupportedVersion(_) => status::UNSUPPORTED_VERSION,
            Rejection::MissingKind | Rejection::UnknownKind(_) => status::BAD_REQUEST,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Rejection::UnsupportedVersion(version) => {
                format!("Unsupported bridge protocol version: {version}")
            }
            Rejection::MissingKind => "Bridge message is missing kind".to_string(),
            Rejection::UnknownKind(kind) => format!("Unknown bridge message kind: {kind}"),
        }
    }
}

impl Packet {
    pub fn classify(self) -> Result<Envelope, Rejection> {
        // An absent version means the current one.
        let version = self.version.unwrap_or(protocol::VERSION);
        if version != protocol::VERSION {
            return Err(Rejection::UnsupportedVersion(version));
        }

        let kind = match self.kind.as_deref().map(str::trim) {
            None | Some("") => return Err(Rejection::MissingKind),
            Some(raw) => Kind::parse(raw).ok_or_else(|| Rejection::UnknownKind(raw.to_string()))?,
        };

        let id = non_blank(self.id);
        let channel = non_blank(self.channel);
        let envelope = match kind {
            Kind::Ready => Envelope::Ready,
            Kind::Event => Envelope::Event {
                channel,
                payload: self.payload,
            },
            Kind::Request => Envelope::Request {
                id,
                channel,
                payload: self.payload,
            },
            Kind::Response => Envelope::Response {
                id,
                channel,
                ok: self.ok,
                payload: self.payload,
                error: self
                    .error
                    .map(|raw| WireError::new(raw.code.as_deref(), raw.message.as_deref())),
            },
        };
        Ok(envelope)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Parses raw query text. Returns `None` for blank input, malformed JSON, or a
/// `bridge` field that is not ours, so other consumers of the transport can try it.
pub fn parse(text: &str) -> Option<Packet> {
    if text.trim().is_empty() {
        return None;
    }

    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(err) => {
            trace!(target: "bridge-codec", %err, "inbound text is not json");
            return None;
        }
    };

    match value.get("bridge").and_then(Value::as_str) {
        Some(name) if name == protocol::NAME => {}
        _ => return None,
    }

    match serde_json::from_value::<Packet>(value) {
        Ok(packet) => Some(packet),
        Err(err) => {
            trace!(target: "bridge-codec", %err, "bridge packet has malformed fields");
            None
        }
    }
}

/// Parses a payload supplied as JSON text.
pub fn parse_payload(json: &str) -> BridgeResult<Value> {
    serde_json::from_str(json).map_err(|err| {
        BridgeError::invalid_payload(format!("payload must be a valid JSON value: {err}"))
    })
}

pub fn payload_to_json(payload: &Value) -> String {
    // Serializing a `Value` cannot fail: all map keys are strings.
    serde_json::to_string(payload).unwrap_or_else(|_| "null".to_string())
}

#[derive(Serialize)]
struct OutboundFrame<'a> {
    bridge: &'static str,
    version: i64,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ok: Option<bool>,
    payload: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a WireError>,
}

impl<'a> OutboundFrame<'a> {
    fn new(kind: Kind, id: Option<&'a str>, channel: Option<&'a str>, payload: &'a Value) -> Self {
        Self {
            bridge: protocol::NAME,
            version: protocol::VERSION,
            kind: kind.as_str(),
            id,
            channel,
            ok: None,
            payload,
            error: None,
        }
    }

    fn encode(&self) -> BridgeResult<String> {
        serde_json::to_string(self)
            .map_err(|err| BridgeError::Internal(format!("failed to encode envelope: {err}")))
    }
}

pub fn build_envelope(
    kind: Kind,
    id: Option<&str>,
    channel: &str,
    payload: &Value,
) -> BridgeResult<String> {
    OutboundFrame::new(kind, id, Some(channel), payload).encode()
}

pub fn build_success(id: Option<&str>, channel: Option<&str>, payload: &Value) -> BridgeResult<String> {
    let mut frame = OutboundFrame::new(Kind::Response, id, channel, payload);
    frame.ok = Some(true);
    frame.encode()
}

pub fn build_error(
    id: Option<&str>,
    channel: Option<&str>,
    code: Option<&str>,
    message: Option<&str>,
) -> BridgeResult<String> {
    let error = WireError::new(code, message);
    let payload = Value::Null;
    let mut frame = OutboundFrame::new(Kind::Response, id, channel, &payload);
    frame.ok = Some(false);
    frame.error = Some(&error);
    frame.encode()
}

/// Quotes `value` as a JS string literal for embedding in injected script text.
/// U+2028/U+2029 are valid inside JSON strings but terminate lines in older JS engines.
pub fn quote_js_string(value: &str) -> String {
    let quoted = serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string());
    quoted.replace('\u{2028}', "\\u2028").replace('\u{2029}', "\\u2029")
}

/// Script that hands one serialized envelope to the content-side receive function.
pub fn dispatch_script(envelope_json: &str) -> String {
    format!(
        "window.{}({});",
        protocol::RECEIVE_FN,
        quote_js_string(envelope_json)
    )
}
