//! Shared row-decoding rules.
//!
//! Each relational driver walks its own cursor type, but the byte-level
//! decisions (JSON payloads, binary-as-text, the base64 last resort) and
//! the `total_count` extraction live here so all dialects report data the
//! same way.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::DbError;

/// One decoded result row: ordered column name to JSON value.
pub type Row = serde_json::Map<String, Value>;

/// A filtered data fetch: the page of rows plus the total match count
/// recovered from the dialect's count expression.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataPage {
    pub data: Vec<Row>,
    pub count: Option<i64>,
}

/// Synthetic column every dialect's count expression is aliased to. It is
/// pulled out of the row data and reported as the aggregate count.
pub const TOTAL_COUNT_COLUMN: &str = "total_count";

/// Decodes a binary column payload. Types whose declared name mentions
/// `json` are parsed as structured JSON; everything else is treated as
/// UTF-8 text. Payloads that are neither fall through to the base64 last
/// resort.
pub(crate) fn decode_bytes(column: &str, type_name: &str, bytes: &[u8]) -> Result<Value, DbError> {
    if type_name.to_ascii_lowercase().contains("json") {
        return serde_json::from_slice(bytes).map_err(|err| {
            DbError::Decode(format!("column {}: malformed json payload: {}", column, err))
        });
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => Ok(Value::String(text.to_string())),
        Err(_) => decode_opaque(column, &String::from_utf8_lossy(bytes)),
    }
}

/// Last-resort decode for representations no typed path recognized. This
/// should not trigger for well-typed drivers, so a hit is logged as a
/// latent-bug flag before the base64 attempt.
pub(crate) fn decode_opaque(column: &str, representation: &str) -> Result<Value, DbError> {
    warn!(
        "column {}: unrecognized representation, attempting base64 decode",
        column
    );
    match BASE64.decode(representation.trim()) {
        Ok(bytes) => Ok(Value::String(String::from_utf8_lossy(&bytes).into_owned())),
        Err(err) => Err(DbError::Decode(format!(
            "column {}: unrecognized representation: {}",
            column, err
        ))),
    }
}

/// Moves the synthetic count column out of a decoded row, returning its
/// value when present.
pub(crate) fn take_total_count(row: &mut Row) -> Option<i64> {
    row.remove(TOTAL_COUNT_COLUMN).and_then(|value| match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    })
}
