//! serde helpers behind the typed endpoint API.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{BridgeError, BridgeResult};

pub fn to_json<T: Serialize + ?Sized>(value: &T) -> BridgeResult<String> {
    serde_json::to_string(value)
        .map_err(|err| BridgeError::invalid_payload(format!("failed to serialize payload: {err}")))
}

pub fn from_json<T: DeserializeOwned>(json: &str) -> BridgeResult<T> {
    serde_json::from_str(json).map_err(|err| {
        BridgeError::invalid_payload(format!(
            "failed to deserialize payload as {}: {err}",
            std::any::type_name::<T>()
        ))
    })
}
