//! CBOR encoding for handshake messages. WebSocket frames already carry
//! message boundaries, so there is no length prefix.

use crate::error::GateResult;
use std::io::Cursor;

/// Encode a serializable value as CBOR.
pub fn cbor_encode<T: serde::Serialize>(value: &T) -> GateResult<Vec<u8>> {
    let mut payload = Vec::new();
    ciborium::into_writer(value, &mut payload)?;
    Ok(payload)
}

/// Decode a CBOR payload into a typed value.
pub fn cbor_decode<T: serde::de::DeserializeOwned>(data: &[u8]) -> GateResult<T> {
    let value: T = ciborium::from_reader(Cursor::new(data))?;
    Ok(value)
}
