//! The downstream side: where decoded events go.

use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value, json};

/// Seconds since the Unix epoch, with sub-second precision.
pub type EventTime = f64;

/// One event's payload.
pub type Record = Map<String, Value>;

/// A timestamped record.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub time: EventTime,
    pub record: Record,
}

/// An ordered batch of events sharing one tag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultiEvent {
    events: Vec<Event>,
}

impl MultiEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, time: EventTime, record: Record) {
        self.events.push(Event { time, record });
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }
}

impl IntoIterator for MultiEvent {
    type Item = Event;
    type IntoIter = std::vec::IntoIter<Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.into_iter()
    }
}

/// Accepts events keyed by tag.
///
/// Called only from the event loop thread, so implementations need `Send`
/// to be moved there but never see concurrent calls from the endpoint.
/// An `Err` is reported to the client as `500 Internal Server Error`.
pub trait Router: Send {
    fn emit(&self, tag: &str, time: EventTime, record: Record) -> anyhow::Result<()>;

    fn emit_stream(&self, tag: &str, events: MultiEvent) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
struct MemoryState {
    events: Vec<(String, Event)>,
    batches: usize,
    failure: Option<String>,
}

/// In-memory router. Clones share the same storage, so a clone kept by the
/// host can inspect what the endpoint emitted.
#[derive(Debug, Clone, Default)]
pub struct MemoryRouter {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryRouter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every emitted event with its tag, in emission order.
    pub fn events(&self) -> Vec<(String, Event)> {
        self.lock().events.clone()
    }

    /// Number of `emit_stream` calls received.
    pub fn batch_count(&self) -> usize {
        self.lock().batches
    }

    /// Makes every following emit fail with `message`.
    pub fn fail_with(&self, message: impl Into<String>) {
        self.lock().failure = Some(message.into());
    }

    pub fn recover(&self) {
        self.lock().failure = None;
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.events.clear();
        state.batches = 0;
    }
}

impl Router for MemoryRouter {
    fn emit(&self, tag: &str, time: EventTime, record: Record) -> anyhow::Result<()> {
        let mut state = self.lock();
        if let Some(msg) = &state.failure {
            anyhow::bail!("{msg}");
        }
        state.events.push((tag.to_string(), Event { time, record }));
        Ok(())
    }

    fn emit_stream(&self, tag: &str, events: MultiEvent) -> anyhow::Result<()> {
        let mut state = self.lock();
        if let Some(msg) = &state.failure {
            anyhow::bail!("{msg}");
        }
        state.batches += 1;
        state
            .events
            .extend(events.into_iter().map(|event| (tag.to_string(), event)));
        Ok(())
    }
}

/// Writes each event to stdout as one JSON line.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutRouter;

impl StdoutRouter {
    pub fn new() -> Self {
        Self
    }

    fn write_line(out: &mut impl Write, tag: &str, event: &Event) -> anyhow::Result<()> {
        let line = json!({ "tag": tag, "time": event.time, "record": event.record });
        serde_json::to_writer(&mut *out, &line)?;
        out.write_all(b"\n")?;
        Ok(())
    }
}

impl Router for StdoutRouter {
    fn emit(&self, tag: &str, time: EventTime, record: Record) -> anyhow::Result<()> {
        let mut out = std::io::stdout().lock();
        Self::write_line(&mut out, tag, &Event { time, record })?;
        out.flush()?;
        Ok(())
    }

    fn emit_stream(&self, tag: &str, events: MultiEvent) -> anyhow::Result<()> {
        let mut out = std::io::stdout().lock();
        for event in events.iter() {
            Self::write_line(&mut out, tag, event)?;
        }
        out.flush()?;
        Ok(())
    }
}
