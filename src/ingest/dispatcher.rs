//! Glues a completed request to the decoder and the router.

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tracing::{debug, error};

use crate::error::IngestError;
use crate::http::params::Params;
use crate::http::response::Response;
use crate::ingest::decoder::{Payload, RecordDecoder};
use crate::ingest::router::{EventTime, MultiEvent, Record, Router};

/// Dispatcher switches taken from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Copy `HTTP_*` parameters into single records.
    pub add_http_headers: bool,
    /// Copy `REMOTE_ADDR` into single records.
    pub add_remote_addr: bool,
    /// Answer with the tracking pixel instead of an empty body.
    pub respond_with_empty_img: bool,
}

/// A request ready for the router: tag plus timestamped record(s).
enum Emission {
    Single(EventTime, Record),
    Batch(MultiEvent),
}

pub struct Dispatcher {
    settings: DispatchSettings,
    decoder: RecordDecoder,
    router: Box<dyn Router>,
}

impl Dispatcher {
    pub fn new(settings: DispatchSettings, decoder: RecordDecoder, router: Box<dyn Router>) -> Self {
        Self {
            settings,
            decoder,
            router,
        }
    }

    pub fn decoder(&self) -> &RecordDecoder {
        &self.decoder
    }

    /// Handles one request and produces its response.
    pub fn dispatch(&self, path: &str, params: &Params) -> Response {
        let tag = path_to_tag(path);

        let emission = match self.prepare(params) {
            Ok(Some(emission)) => emission,
            Ok(None) => return self.success(),
            Err(err) => {
                debug!(tag = %tag, error = %err, "rejecting request");
                return Response::from_error(&err);
            }
        };

        let result = match emission {
            Emission::Single(time, record) => self.router.emit(&tag, time, record),
            Emission::Batch(events) => self.router.emit_stream(&tag, events),
        };
        if let Err(err) = result {
            error!(tag = %tag, error = %err, "router rejected event");
            return Response::from_error(&IngestError::DownstreamFailure(format!("{err:#}")));
        }

        self.success()
    }

    fn prepare(&self, params: &Params) -> Result<Option<Emission>, IngestError> {
        let decoded = self.decoder.decode(params)?;
        let Some(payload) = decoded.payload else {
            return Ok(None);
        };

        let time = match explicit_time(params)? {
            Some(time) => time,
            None => decoded.time.unwrap_or_else(now),
        };

        let emission = match payload {
            Payload::Batch(records) => {
                let mut events = MultiEvent::new();
                for mut record in records {
                    let own_time = match record.remove("time") {
                        Some(value) => coerce_time(&value)?,
                        None => time,
                    };
                    events.add(own_time, record);
                }
                Emission::Batch(events)
            }
            Payload::Single(mut record) => {
                self.augment(&mut record, params);
                Emission::Single(time, record)
            }
        };
        Ok(Some(emission))
    }

    fn augment(&self, record: &mut Record, params: &Params) {
        if self.settings.add_http_headers {
            for (key, value) in params {
                if key.starts_with("HTTP_") {
                    record.insert(key.clone(), lossy(value));
                }
            }
        }
        if self.settings.add_remote_addr {
            let addr = params.get("REMOTE_ADDR").map_or(Value::Null, |v| lossy(v));
            record.insert("REMOTE_ADDR".to_string(), addr);
        }
    }

    fn success(&self) -> Response {
        if self.settings.respond_with_empty_img {
            Response::pixel()
        } else {
            Response::ok()
        }
    }
}

/// `/a/b` becomes `a.b`. Trailing empty segments are dropped.
pub fn path_to_tag(path: &str) -> String {
    let path = path.strip_prefix('/').unwrap_or(path);
    let mut segments: Vec<&str> = path.split('/').collect();
    while segments.last().is_some_and(|s| s.is_empty()) {
        segments.pop();
    }
    segments.join(".")
}

/// The `time` parameter, if given and non-zero.
fn explicit_time(params: &Params) -> Result<Option<EventTime>, IngestError> {
    let Some(raw) = params.get("time") else {
        return Ok(None);
    };
    let text = String::from_utf8_lossy(raw);
    let time = text
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|t| t.is_finite())
        .ok_or_else(|| IngestError::BadRequest(format!("invalid time parameter: {text:?}")))?;
    Ok((time != 0.0).then_some(time))
}

fn coerce_time(value: &Value) -> Result<EventTime, IngestError> {
    let time = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    time.ok_or_else(|| IngestError::BadRequest(format!("invalid time in record: {value}")))
}

/// Wall-clock time with sub-second precision.
fn now() -> EventTime {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

fn lossy(value: &[u8]) -> Value {
    Value::String(String::from_utf8_lossy(value).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_from_paths() {
        assert_eq!(path_to_tag("/a/b"), "a.b");
        assert_eq!(path_to_tag("/tag1"), "tag1");
        assert_eq!(path_to_tag("/a//b/"), "a..b");
        assert_eq!(path_to_tag("/"), "");
    }

    #[test]
    fn zero_time_falls_back() {
        let params = Params::from([("time".to_string(), "0".into())]);
        assert_eq!(explicit_time(&params).unwrap(), None);

        let params = Params::from([("time".to_string(), "1293974055".into())]);
        assert_eq!(explicit_time(&params).unwrap(), Some(1293974055.0));

        let params = Params::from([("time".to_string(), "soon".into())]);
        assert!(explicit_time(&params).is_err());
    }
}
