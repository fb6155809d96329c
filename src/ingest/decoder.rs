//! Turns request parameters into records.

use std::ops::ControlFlow;

use serde_json::{Map, Number, Value};
use thiserror::Error;

use crate::error::IngestError;
use crate::http::params::Params;
use crate::ingest::format::FormatParser;
use crate::ingest::router::{EventTime, Record};

/// Parameter carrying the raw body when a pluggable format is configured.
pub const EVENT_RECORD_PARAMETER: &str = "_event_record";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("'json' or 'msgpack' parameter is required")]
    MissingPayload,

    #[error("'{0}' parameter is required")]
    MissingParameter(&'static str),

    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid msgpack: {0}")]
    Msgpack(#[from] rmpv::decode::Error),

    #[error("Received event is not {format}: {content}")]
    FormatMismatch { format: String, content: String },

    #[error("{format} parser failed: {reason}")]
    Format { format: String, reason: String },

    #[error("record must be a map or an array of maps, got {0}")]
    InvalidRecord(&'static str),
}

impl From<DecodeError> for IngestError {
    fn from(err: DecodeError) -> Self {
        IngestError::BadRequest(err.to_string())
    }
}

/// What a request carried.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Single(Record),
    Batch(Vec<Record>),
}

/// Decoder output: a format-supplied time, and the payload if there is one.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Decoded {
    pub time: Option<EventTime>,
    pub payload: Option<Payload>,
}

/// The decoding strategy, chosen once from configuration.
pub enum RecordDecoder {
    /// Expects a `msgpack` or `json` parameter.
    Default,
    /// Hands the `_event_record` parameter to a format parser and keeps the
    /// first pair it yields.
    Pluggable {
        format: String,
        parser: Box<dyn FormatParser>,
    },
}

impl std::fmt::Debug for RecordDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordDecoder::Default => f.write_str("Default"),
            RecordDecoder::Pluggable { format, .. } => {
                f.debug_struct("Pluggable").field("format", format).finish()
            }
        }
    }
}

impl RecordDecoder {
    pub fn pluggable(format: impl Into<String>, parser: Box<dyn FormatParser>) -> Self {
        RecordDecoder::Pluggable {
            format: format.into(),
            parser,
        }
    }

    /// Whether the raw body is passed through under [`EVENT_RECORD_PARAMETER`].
    pub fn wants_raw_body(&self) -> bool {
        matches!(self, RecordDecoder::Pluggable { .. })
    }

    pub fn decode(&self, params: &Params) -> Result<Decoded, DecodeError> {
        match self {
            RecordDecoder::Default => decode_default(params),
            RecordDecoder::Pluggable { format, parser } => decode_with_parser(format, parser.as_ref(), params),
        }
    }
}

fn decode_default(params: &Params) -> Result<Decoded, DecodeError> {
    let value = if let Some(packed) = params.get("msgpack") {
        let value = rmpv::decode::read_value(&mut &packed[..])?;
        msgpack_to_json(value)
    } else if let Some(js) = params.get("json") {
        serde_json::from_slice(js)?
    } else {
        return Err(DecodeError::MissingPayload);
    };

    Ok(Decoded {
        time: None,
        payload: into_payload(value)?,
    })
}

fn decode_with_parser(
    format: &str,
    parser: &dyn FormatParser,
    params: &Params,
) -> Result<Decoded, DecodeError> {
    let content = params
        .get(EVENT_RECORD_PARAMETER)
        .ok_or(DecodeError::MissingParameter(EVENT_RECORD_PARAMETER))?;

    let mut first = None;
    parser
        .parse(content, &mut |time, record| {
            first = Some((time, record));
            ControlFlow::Break(())
        })
        .map_err(|err| DecodeError::Format {
            format: format.to_string(),
            reason: format!("{err:#}"),
        })?;

    match first {
        None | Some((_, None)) => Err(DecodeError::FormatMismatch {
            format: format.to_string(),
            content: String::from_utf8_lossy(content).into_owned(),
        }),
        Some((time, Some(record))) => Ok(Decoded {
            time,
            payload: Some(Payload::Single(record)),
        }),
    }
}

fn into_payload(value: Value) -> Result<Option<Payload>, DecodeError> {
    match value {
        Value::Null => Ok(None),
        Value::Object(record) => Ok(Some(Payload::Single(record))),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(record) => Ok(record),
                other => Err(DecodeError::InvalidRecord(kind_of(&other))),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(|records| Some(Payload::Batch(records))),
        other => Err(DecodeError::InvalidRecord(kind_of(&other))),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "a map",
    }
}

/// Converts a msgpack value into the JSON data model.
///
/// Binary becomes an array of byte values, non-string map keys use their
/// display form, and non-finite floats become null.
pub fn msgpack_to_json(value: rmpv::Value) -> Value {
    match value {
        rmpv::Value::Nil => Value::Null,
        rmpv::Value::Boolean(b) => Value::Bool(b),
        rmpv::Value::Integer(n) => {
            if let Some(v) = n.as_i64() {
                Value::from(v)
            } else if let Some(v) = n.as_u64() {
                Value::from(v)
            } else {
                Value::Null
            }
        }
        rmpv::Value::F32(v) => Number::from_f64(f64::from(v)).map_or(Value::Null, Value::Number),
        rmpv::Value::F64(v) => Number::from_f64(v).map_or(Value::Null, Value::Number),
        rmpv::Value::String(s) => match s.into_str() {
            Some(s) => Value::String(s),
            None => Value::Null,
        },
        rmpv::Value::Binary(bytes) => Value::Array(bytes.into_iter().map(Value::from).collect()),
        rmpv::Value::Array(items) => Value::Array(items.into_iter().map(msgpack_to_json).collect()),
        rmpv::Value::Map(entries) => {
            let mut map = Map::with_capacity(entries.len());
            for (key, value) in entries {
                let key = match key {
                    rmpv::Value::String(s) => s.into_str().unwrap_or_default(),
                    other => other.to_string(),
                };
                map.insert(key, msgpack_to_json(value));
            }
            Value::Object(map)
        }
        rmpv::Value::Ext(_, data) => Value::Array(data.into_iter().map(Value::from).collect()),
    }
}
