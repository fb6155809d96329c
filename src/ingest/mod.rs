//! Event extraction and routing.
//!
//! A completed request arrives here as `(path, params)`. The [`Dispatcher`]
//! derives the tag from the path, asks the [`RecordDecoder`] for the
//! payload, stamps it with a time and hands it to the [`Router`].

pub mod decoder;
pub mod dispatcher;
pub mod format;
pub mod router;

pub use decoder::{DecodeError, Decoded, Payload, RecordDecoder, EVENT_RECORD_PARAMETER};
pub use dispatcher::{DispatchSettings, Dispatcher, path_to_tag};
pub use format::{FieldType, FormatOptions, FormatParser, build_parser};
pub use router::{Event, EventTime, MemoryRouter, MultiEvent, Record, Router, StdoutRouter};
