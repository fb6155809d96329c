//! Request body framing.
//!
//! Turns the bytes that follow a request head into body chunks, handling
//! both `Content-Length` and `Transfer-Encoding: chunked` framing.

use bytes::{Buf, Bytes, BytesMut};

use crate::http::parser::ParseError;

/// Longest chunk-size or trailer line accepted.
const MAX_CHUNK_LINE: usize = 4096;

/// How a message body is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    /// Exactly this many bytes follow the head
    Fixed(usize),
    /// Chunked transfer coding
    Chunked,
}

/// Result of one decoding step.
#[derive(Debug, PartialEq, Eq)]
pub enum BodyEvent {
    /// A piece of decoded body
    Data(Bytes),
    /// The input buffer holds no further complete piece
    NeedMore,
    /// The body is complete
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Fixed { remaining: usize },
    ChunkSize,
    ChunkData { remaining: usize },
    ChunkDataEnd,
    Trailer,
    Done,
}

/// Incremental body decoder for one message.
#[derive(Debug)]
pub struct BodyDecoder {
    state: State,
}

impl BodyDecoder {
    pub fn new(kind: BodyKind) -> Self {
        let state = match kind {
            BodyKind::Fixed(0) => State::Done,
            BodyKind::Fixed(remaining) => State::Fixed { remaining },
            BodyKind::Chunked => State::ChunkSize,
        };
        Self { state }
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Consumes framing and body bytes from the front of `input`.
    ///
    /// Bytes belonging to the next message are never consumed.
    pub fn decode(&mut self, input: &mut BytesMut) -> Result<BodyEvent, ParseError> {
        loop {
            match self.state {
                State::Done => return Ok(BodyEvent::Done),

                State::Fixed { remaining } => {
                    if input.is_empty() {
                        return Ok(BodyEvent::NeedMore);
                    }
                    let n = remaining.min(input.len());
                    let chunk = input.split_to(n).freeze();
                    self.state = match remaining - n {
                        0 => State::Done,
                        remaining => State::Fixed { remaining },
                    };
                    return Ok(BodyEvent::Data(chunk));
                }

                State::ChunkSize => {
                    let Some(line) = take_line(input)? else {
                        return Ok(BodyEvent::NeedMore);
                    };
                    let size = parse_chunk_size(&line)?;
                    self.state = if size == 0 {
                        State::Trailer
                    } else {
                        State::ChunkData { remaining: size }
                    };
                }

                State::ChunkData { remaining } => {
                    if input.is_empty() {
                        return Ok(BodyEvent::NeedMore);
                    }
                    let n = remaining.min(input.len());
                    let chunk = input.split_to(n).freeze();
                    self.state = match remaining - n {
                        0 => State::ChunkDataEnd,
                        remaining => State::ChunkData { remaining },
                    };
                    return Ok(BodyEvent::Data(chunk));
                }

                State::ChunkDataEnd => {
                    if input.len() < 2 {
                        return Ok(BodyEvent::NeedMore);
                    }
                    if &input[..2] != b"\r\n" {
                        return Err(ParseError::InvalidChunk);
                    }
                    input.advance(2);
                    self.state = State::ChunkSize;
                }

                State::Trailer => {
                    let Some(line) = take_line(input)? else {
                        return Ok(BodyEvent::NeedMore);
                    };
                    // trailer fields are discarded
                    if line.is_empty() {
                        self.state = State::Done;
                    }
                }
            }
        }
    }
}

/// Removes one CRLF-terminated line from `input`, without the terminator.
fn take_line(input: &mut BytesMut) -> Result<Option<BytesMut>, ParseError> {
    match input.windows(2).position(|w| w == b"\r\n") {
        Some(end) => {
            let line = input.split_to(end);
            input.advance(2);
            Ok(Some(line))
        }
        None if input.len() > MAX_CHUNK_LINE => Err(ParseError::InvalidChunk),
        None => Ok(None),
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<usize, ParseError> {
    let line = std::str::from_utf8(line).map_err(|_| ParseError::InvalidChunk)?;
    // chunk extensions are ignored
    let size = line.split(';').next().unwrap_or_default().trim();
    usize::from_str_radix(size, 16).map_err(|_| ParseError::InvalidChunk)
}
