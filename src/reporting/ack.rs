use crate::workflow::document::{FIELD_FILE_URLS, FIELD_UPDATE_MANIFEST_SIGNATURE};
use crate::workflow::ParseError;
use serde::Serialize;
use serde_json::Value;

pub const ACK_STATUS_OK: u16 = 200;

#[derive(Debug, Serialize)]
struct AckEnvelope {
    value: Value,
    ac: u16,
    av: i64,
}

/// Echoes a received instruction back with its secrets nulled out.
pub fn build_ack(raw: &str, version: i64) -> Result<String, ParseError> {
    let mut value: Value =
        serde_json::from_str(raw).map_err(|err| ParseError::MalformedJson(err.to_string()))?;
    let object = value
        .as_object_mut()
        .ok_or_else(|| ParseError::MalformedJson("instruction root is not an object".into()))?;
    object.insert(FIELD_UPDATE_MANIFEST_SIGNATURE.to_string(), Value::Null);
    object.insert(FIELD_FILE_URLS.to_string(), Value::Null);

    serde_json::to_string(&AckEnvelope {
        value,
        ac: ACK_STATUS_OK,
        av: version,
    })
    .map_err(|err| ParseError::MalformedJson(err.to_string()))
}
