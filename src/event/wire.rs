//! NDJSON wire decoding for transport-delivered events.
//!
//! Each line is `{"type": <kind>, "timestamp": <ms | RFC3339>, "data": <any>}`.
//! Only a line that is not a JSON object is an error; every other shape
//! problem degrades to a default (unknown kind, ingestion time, null payload).

use chrono::DateTime;
use serde_json::{Map, Value};
use thiserror::Error;

use super::{Event, SourceKind};

/// Errors that can occur while decoding an event line.
#[derive(Error, Debug)]
pub enum WireError {
    #[error("event line is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("event line is not a JSON object")]
    NotAnObject,
}

/// Decode one NDJSON line into an [`Event`].
///
/// `received_ms` is used when the line carries no usable timestamp.
pub fn decode_line(line: &str, received_ms: i64) -> Result<Event, WireError> {
    let value: Value = serde_json::from_str(line)?;
    let Value::Object(mut obj) = value else {
        return Err(WireError::NotAnObject);
    };

    let kind = obj
        .get("type")
        .and_then(Value::as_str)
        .map(SourceKind::from_name)
        .unwrap_or(SourceKind::Unknown);

    let timestamp_ms = timestamp_from(&obj).unwrap_or(received_ms);
    let payload = take_payload(&mut obj);

    Ok(Event {
        timestamp_ms,
        kind,
        payload,
    })
}

fn take_payload(obj: &mut Map<String, Value>) -> Value {
    obj.remove("data")
        .or_else(|| obj.remove("payload"))
        .unwrap_or(Value::Null)
}

/// Reads `timestamp` as epoch milliseconds or an RFC3339 string.
fn timestamp_from(obj: &Map<String, Value>) -> Option<i64> {
    match obj.get("timestamp")? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.timestamp_millis())
            .or_else(|| s.parse::<i64>().ok()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_numeric_timestamp() {
        let ev = decode_line(
            r#"{"type":"systemMetrics","timestamp":1700000000000,"data":{"cpu":{"usage":12}}}"#,
            5,
        )
        .expect("decodes");
        assert_eq!(ev.kind, SourceKind::SystemMetrics);
        assert_eq!(ev.timestamp_ms, 1_700_000_000_000);
        assert_eq!(ev.number("cpu.usage"), Some(12.0));
    }

    #[test]
    fn test_decode_rfc3339_timestamp() {
        let ev = decode_line(
            r#"{"type":"log","timestamp":"2024-01-01T00:00:01Z","data":"http request done"}"#,
            5,
        )
        .expect("decodes");
        assert_eq!(ev.kind, SourceKind::Log);
        assert_eq!(ev.timestamp_ms, 1_704_067_201_000);
    }

    #[test]
    fn test_decode_degrades_missing_fields() {
        let ev = decode_line(r#"{"timestamp":"yesterday"}"#, 777).expect("decodes");
        assert_eq!(ev.kind, SourceKind::Unknown);
        assert_eq!(ev.timestamp_ms, 777);
        assert_eq!(ev.payload, Value::Null);
    }

    #[test]
    fn test_decode_rejects_non_object() {
        assert!(matches!(
            decode_line("[1,2,3]", 0),
            Err(WireError::NotAnObject)
        ));
        assert!(matches!(decode_line("not json", 0), Err(WireError::Json(_))));
    }
}
