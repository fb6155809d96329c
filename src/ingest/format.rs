//! Pluggable body formats.
//!
//! With any `format` other than `default`, the raw request body is handed to
//! a [`FormatParser`], which reports `(time, record)` pairs through a
//! callback. The built-in parsers are line oriented: each non-empty line of
//! the body is one candidate event.

use std::collections::HashMap;
use std::ops::ControlFlow;

use anyhow::{Context, bail};
use regex::Regex;
use serde::Deserialize;
use serde_json::{Number, Value};

use crate::ingest::router::{EventTime, Record};

/// Callback receiving each decoded pair. A record of `None` means the input
/// did not match the format. Returning `Break` stops parsing.
pub type EventSink<'a> = dyn FnMut(Option<EventTime>, Option<Record>) -> ControlFlow<()> + 'a;

/// A body format. Moved onto the event loop thread, hence `Send`.
pub trait FormatParser: Send {
    fn parse(&self, input: &[u8], on_event: &mut EventSink<'_>) -> anyhow::Result<()>;
}

/// Conversion applied to a string field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Float,
    Bool,
}

impl FieldType {
    fn convert(&self, raw: &str) -> Option<Value> {
        match self {
            FieldType::String => Some(Value::String(raw.to_string())),
            FieldType::Integer => raw.trim().parse::<i64>().ok().map(Value::from),
            FieldType::Float => raw
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number),
            FieldType::Bool => match raw.trim() {
                "true" | "yes" | "1" => Some(Value::Bool(true)),
                "false" | "no" | "0" => Some(Value::Bool(false)),
                _ => None,
            },
        }
    }
}

/// Options shared by the built-in parsers.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct FormatOptions {
    /// Field holding the event time; removed from the record when used.
    pub time_key: String,
    /// Column names for `csv`.
    pub keys: Vec<String>,
    /// Pattern with named groups for `regexp`.
    pub expression: Option<String>,
    /// Per-field conversions for string-valued formats.
    pub types: HashMap<String, FieldType>,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            time_key: "time".to_string(),
            keys: Vec::new(),
            expression: None,
            types: HashMap::new(),
        }
    }
}

/// Builds the named built-in parser. A `/.../` format is an inline `regexp`
/// expression.
pub fn build_parser(format: &str, options: &FormatOptions) -> anyhow::Result<Box<dyn FormatParser>> {
    let parser: Box<dyn FormatParser> = match format {
        "json" => Box::new(JsonParser::new(options.clone())),
        "ltsv" => Box::new(LtsvParser::new(options.clone())),
        "csv" => Box::new(CsvParser::new(options.clone())?),
        "regexp" => Box::new(RegexpParser::new(options.clone())?),
        inline if inline.len() > 1 && inline.starts_with('/') && inline.ends_with('/') => {
            Box::new(RegexpParser::new(FormatOptions {
                expression: Some(inline.to_string()),
                ..options.clone()
            })?)
        }
        other => bail!("unknown format {other:?}"),
    };
    Ok(parser)
}

/// Runs `parse_line` over each non-empty line until the sink breaks.
fn each_line<F>(input: &[u8], on_event: &mut EventSink<'_>, mut parse_line: F)
where
    F: FnMut(&str) -> Option<(Option<EventTime>, Record)>,
{
    let text = String::from_utf8_lossy(input);
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let flow = match parse_line(line) {
            Some((time, record)) => on_event(time, Some(record)),
            None => on_event(None, None),
        };
        if flow.is_break() {
            break;
        }
    }
}

/// Removes the time field from `record`. `Err` means it was present but not
/// a timestamp.
fn take_time(record: &mut Record, time_key: &str) -> Result<Option<EventTime>, ()> {
    match record.remove(time_key) {
        None => Ok(None),
        Some(Value::Number(n)) => n.as_f64().map(Some).ok_or(()),
        Some(Value::String(s)) => s.trim().parse::<f64>().map(Some).map_err(|_| ()),
        Some(_) => Err(()),
    }
}

fn typed_value(types: &HashMap<String, FieldType>, key: &str, raw: &str) -> Option<Value> {
    match types.get(key) {
        Some(ty) => ty.convert(raw),
        None => Some(Value::String(raw.to_string())),
    }
}

fn finish(mut record: Record, time_key: &str) -> Option<(Option<EventTime>, Record)> {
    let time = take_time(&mut record, time_key).ok()?;
    Some((time, record))
}

/// One JSON object per line.
#[derive(Debug, Clone)]
pub struct JsonParser {
    options: FormatOptions,
}

impl JsonParser {
    pub fn new(options: FormatOptions) -> Self {
        Self { options }
    }
}

impl FormatParser for JsonParser {
    fn parse(&self, input: &[u8], on_event: &mut EventSink<'_>) -> anyhow::Result<()> {
        each_line(input, on_event, |line| match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(record)) => finish(record, &self.options.time_key),
            _ => None,
        });
        Ok(())
    }
}

/// Labeled tab-separated values: `host:127.0.0.1\tstatus:200`.
#[derive(Debug, Clone)]
pub struct LtsvParser {
    options: FormatOptions,
}

impl LtsvParser {
    pub fn new(options: FormatOptions) -> Self {
        Self { options }
    }
}

impl FormatParser for LtsvParser {
    fn parse(&self, input: &[u8], on_event: &mut EventSink<'_>) -> anyhow::Result<()> {
        each_line(input, on_event, |line| {
            let mut record = Record::new();
            for field in line.split('\t') {
                let (label, value) = field.split_once(':')?;
                let value = typed_value(&self.options.types, label, value)?;
                record.insert(label.to_string(), value);
            }
            finish(record, &self.options.time_key)
        });
        Ok(())
    }
}

/// Comma-separated values mapped onto configured column names.
#[derive(Debug, Clone)]
pub struct CsvParser {
    options: FormatOptions,
}

impl CsvParser {
    pub fn new(options: FormatOptions) -> anyhow::Result<Self> {
        if options.keys.is_empty() {
            bail!("csv format requires 'keys'");
        }
        Ok(Self { options })
    }
}

impl FormatParser for CsvParser {
    fn parse(&self, input: &[u8], on_event: &mut EventSink<'_>) -> anyhow::Result<()> {
        each_line(input, on_event, |line| {
            let fields = split_csv_line(line)?;
            if fields.len() != self.options.keys.len() {
                return None;
            }
            let mut record = Record::new();
            for (key, raw) in self.options.keys.iter().zip(fields) {
                let value = typed_value(&self.options.types, key, &raw)?;
                record.insert(key.clone(), value);
            }
            finish(record, &self.options.time_key)
        });
        Ok(())
    }
}

/// Splits one CSV line, honoring `"quoted, fields"` and `""` escapes.
fn split_csv_line(line: &str) -> Option<Vec<String>> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut chars = line.chars().peekable();
    let mut quoted = false;
    let mut at_field_start = true;

    while let Some(c) = chars.next() {
        match (quoted, c) {
            (false, '"') if at_field_start => {
                quoted = true;
                at_field_start = false;
            }
            (true, '"') => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    quoted = false;
                }
            }
            (false, ',') => {
                fields.push(std::mem::take(&mut field));
                at_field_start = true;
            }
            (_, c) => {
                field.push(c);
                at_field_start = false;
            }
        }
    }
    if quoted {
        return None;
    }
    fields.push(field);
    Some(fields)
}

/// Named capture groups of a regular expression become fields.
#[derive(Debug, Clone)]
pub struct RegexpParser {
    regex: Regex,
    options: FormatOptions,
}

impl RegexpParser {
    pub fn new(options: FormatOptions) -> anyhow::Result<Self> {
        let expression = options
            .expression
            .as_deref()
            .context("regexp format requires 'expression'")?;
        let expression = expression
            .strip_prefix('/')
            .and_then(|e| e.strip_suffix('/'))
            .unwrap_or(expression);
        let regex = Regex::new(expression).with_context(|| format!("invalid expression {expression:?}"))?;
        Ok(Self { regex, options })
    }
}

impl FormatParser for RegexpParser {
    fn parse(&self, input: &[u8], on_event: &mut EventSink<'_>) -> anyhow::Result<()> {
        each_line(input, on_event, |line| {
            let captures = self.regex.captures(line)?;
            let mut record = Record::new();
            for name in self.regex.capture_names().flatten() {
                if let Some(m) = captures.name(name) {
                    let value = typed_value(&self.options.types, name, m.as_str())?;
                    record.insert(name.to_string(), value);
                }
            }
            finish(record, &self.options.time_key)
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn first(parser: &dyn FormatParser, input: &[u8]) -> Option<(Option<EventTime>, Option<Record>)> {
        let mut got = None;
        parser
            .parse(input, &mut |time, record| {
                got = Some((time, record));
                ControlFlow::Break(())
            })
            .unwrap();
        got
    }

    #[test]
    fn csv_handles_quotes() {
        assert_eq!(
            split_csv_line(r#"1,"st""r","a,b""#).unwrap(),
            vec!["1", "st\"r", "a,b"]
        );
        assert!(split_csv_line(r#""open"#).is_none());
    }

    #[test]
    fn regexp_applies_types() {
        let options = FormatOptions {
            expression: Some(r"^(?<field_1>\d+):(?<field_2>\w+)$".to_string()),
            types: HashMap::from([("field_1".to_string(), FieldType::Integer)]),
            ..FormatOptions::default()
        };
        let parser = RegexpParser::new(options).unwrap();

        let (time, record) = first(&parser, b"1:str").unwrap();

        assert_eq!(time, None);
        assert_eq!(Value::Object(record.unwrap()), json!({"field_1": 1, "field_2": "str"}));
    }

    #[test]
    fn json_lines_extract_time() {
        let parser = JsonParser::new(FormatOptions::default());

        let (time, record) = first(&parser, b"\n{\"a\":1,\"time\":\"1293974055\"}\n{\"b\":2}\n").unwrap();

        assert_eq!(time, Some(1293974055.0));
        assert_eq!(Value::Object(record.unwrap()), json!({"a": 1}));
    }

    #[test]
    fn mismatch_reports_absent_record() {
        let parser = LtsvParser::new(FormatOptions::default());

        let (_, record) = first(&parser, b"not ltsv at all").unwrap();

        assert!(record.is_none());
    }

    #[test]
    fn unknown_format_is_rejected() {
        assert!(build_parser("yaml", &FormatOptions::default()).is_err());
        assert!(build_parser("csv", &FormatOptions::default()).is_err());
    }
}
