use std::mem;
use std::net::{IpAddr, SocketAddr};
use std::rc::Rc;
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::error::IngestError;
use crate::http::body::{BodyDecoder, BodyEvent};
use crate::http::params::{self, Params};
use crate::http::parser::{MAX_HEAD_SIZE, ParseError, parse_head};
use crate::http::request::{Method, RequestHead};
use crate::http::response::{Response, StatusCode};
use crate::http::writer::serialize_response;
use crate::ingest::decoder::EVENT_RECORD_PARAMETER;
use crate::ingest::dispatcher::Dispatcher;
use crate::server::keepalive::ConnectionSlot;

const READ_BUFFER_SIZE: usize = 8192;

/// What the handler looked like when a message completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSnapshot {
    pub method: Method,
    pub target: String,
    pub content_type: String,
    pub origin: Option<String>,
    pub keep_alive: bool,
}

/// Called at every message-complete, before CORS checks and dispatch.
pub type MessageObserver = Arc<dyn Fn(&MessageSnapshot) + Send + Sync>;

/// Protocol limits shared by every connection of a listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerSettings {
    pub body_size_limit: usize,
    pub cors_allow_origins: Option<Vec<String>>,
}

/// Everything a connection needs besides its socket.
pub struct ConnectionContext {
    settings: HandlerSettings,
    dispatcher: Dispatcher,
    observer: Option<MessageObserver>,
}

impl ConnectionContext {
    pub fn new(settings: HandlerSettings, dispatcher: Dispatcher) -> Self {
        Self {
            settings,
            dispatcher,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: MessageObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    fn origin_allowed(&self, origin: Option<&str>) -> bool {
        match &self.settings.cors_allow_origins {
            Some(allowed) if !allowed.is_empty() => {
                origin.is_some_and(|origin| allowed.iter().any(|a| a == origin))
            }
            _ => true,
        }
    }
}

/// Where the handler is within the current message.
#[derive(Debug)]
enum ParseState {
    AwaitingRequest,
    ReceivingHeaders,
    ReceivingBody(BodyDecoder),
    Closed,
}

/// Per-connection HTTP state machine.
///
/// Fed with raw bytes through [`on_read`](Self::on_read); responses pile up
/// in an output buffer drained with [`take_output`](Self::take_output). It
/// never touches a socket itself.
pub struct ConnectionHandler {
    ctx: Rc<ConnectionContext>,
    remote_addr: Option<IpAddr>,
    state: ParseState,
    input: BytesMut,
    output: BytesMut,
    head: Option<RequestHead>,
    body: BytesMut,
    env: Params,
    keep_alive: bool,
    head_only: bool,
    content_type: String,
    origin: Option<String>,
    request_method: Option<String>,
    request_headers: Option<String>,
    closing: bool,
}

impl ConnectionHandler {
    pub fn new(ctx: Rc<ConnectionContext>, remote_addr: Option<IpAddr>) -> Self {
        Self {
            ctx,
            remote_addr,
            state: ParseState::AwaitingRequest,
            input: BytesMut::with_capacity(4096),
            output: BytesMut::new(),
            head: None,
            body: BytesMut::new(),
            env: Params::new(),
            keep_alive: false,
            head_only: false,
            content_type: String::new(),
            origin: None,
            request_method: None,
            request_headers: None,
            closing: false,
        }
    }

    /// True once a response that ends the connection has been queued.
    pub fn is_closing(&self) -> bool {
        self.closing
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Takes the bytes queued for the client.
    pub fn take_output(&mut self) -> Bytes {
        self.output.split().freeze()
    }

    /// Feeds bytes read from the socket.
    ///
    /// An `Err` means the stream is not HTTP we understand; the connection
    /// must be dropped.
    pub fn on_read(&mut self, data: &[u8]) -> Result<(), ParseError> {
        self.input.extend_from_slice(data);
        loop {
            if self.closing {
                self.input.clear();
                self.state = ParseState::Closed;
                return Ok(());
            }

            match mem::replace(&mut self.state, ParseState::Closed) {
                ParseState::AwaitingRequest | ParseState::ReceivingHeaders => {
                    while self.input.starts_with(b"\r\n") {
                        self.input.advance(2);
                    }
                    if self.input.is_empty() {
                        self.state = ParseState::AwaitingRequest;
                        return Ok(());
                    }
                    match parse_head(&self.input) {
                        Ok((head, consumed)) => {
                            self.input.advance(consumed);
                            let decoder = self.on_headers_complete(head)?;
                            self.state = ParseState::ReceivingBody(decoder);
                        }
                        Err(ParseError::Incomplete) if self.input.len() > MAX_HEAD_SIZE => {
                            return Err(ParseError::HeadTooLarge);
                        }
                        Err(ParseError::Incomplete) => {
                            self.state = ParseState::ReceivingHeaders;
                            return Ok(());
                        }
                        Err(e) => return Err(e),
                    }
                }

                ParseState::ReceivingBody(mut decoder) => match decoder.decode(&mut self.input)? {
                    BodyEvent::Data(chunk) => {
                        self.on_body(&chunk);
                        self.state = ParseState::ReceivingBody(decoder);
                    }
                    BodyEvent::NeedMore => {
                        self.state = ParseState::ReceivingBody(decoder);
                        return Ok(());
                    }
                    BodyEvent::Done => {
                        self.on_message_complete()?;
                        self.state = ParseState::AwaitingRequest;
                    }
                },

                ParseState::Closed => {
                    self.input.clear();
                    return Ok(());
                }
            }
        }
    }

    fn on_headers_complete(&mut self, head: RequestHead) -> Result<BodyDecoder, ParseError> {
        self.body.clear();
        self.env.clear();
        self.keep_alive = head.keep_alive();
        self.head_only = head.method == Method::HEAD;
        self.content_type.clear();
        self.origin = None;
        self.request_method = None;
        self.request_headers = None;

        let mut expect = None;
        for (name, value) in &head.headers {
            self.env.insert(
                params::header_param_name(name),
                Bytes::copy_from_slice(value.as_bytes()),
            );
            let name = name.to_ascii_lowercase();
            match name.as_str() {
                "expect" => expect = Some(value.clone()),
                "content-type" => self.content_type = value.clone(),
                "origin" => self.origin = Some(value.clone()),
                "access-control-request-method" => self.request_method = Some(value.clone()),
                "access-control-request-headers" => self.request_headers = Some(value.clone()),
                _ => {}
            }
        }
        let size = head.content_length()?;
        let decoder = BodyDecoder::new(head.body_kind()?);

        trace!(method = head.method.as_str(), target = %head.target, "headers complete");

        if let Some(expect) = expect {
            if expect.eq_ignore_ascii_case("100-continue") {
                if size.is_none_or(|size| size < self.ctx.settings.body_size_limit) {
                    self.send_interim(StatusCode::Continue);
                } else {
                    self.send_error(&IngestError::PayloadTooLarge);
                }
            } else {
                self.send_error(&IngestError::ExpectationFailed(expect));
            }
        } else if head.method == Method::OPTIONS {
            self.send_response_and_close(Response::ok());
        }

        self.head = Some(head);
        Ok(decoder)
    }

    fn on_body(&mut self, chunk: &[u8]) {
        if self.body.len() + chunk.len() > self.ctx.settings.body_size_limit {
            if !self.closing {
                self.send_error(&IngestError::PayloadTooLarge);
            }
            return;
        }
        self.body.extend_from_slice(chunk);
    }

    fn on_message_complete(&mut self) -> Result<(), ParseError> {
        let Some(head) = self.head.take() else {
            return Ok(());
        };
        if self.closing {
            return Ok(());
        }

        if let Some(observer) = &self.ctx.observer {
            observer(&MessageSnapshot {
                method: head.method.clone(),
                target: head.target.clone(),
                content_type: self.content_type.clone(),
                origin: self.origin.clone(),
                keep_alive: self.keep_alive,
            });
        }

        if !self.ctx.origin_allowed(self.origin.as_deref()) {
            debug!(origin = ?self.origin, "origin not allowed");
            let err = IngestError::Forbidden(self.origin.clone());
            self.send_error(&err);
            return Ok(());
        }

        if let Some(addr) = self.remote_addr {
            self.env
                .insert("REMOTE_ADDR".to_string(), Bytes::from(addr.to_string()));
        }

        let (path, query) = head.path_and_query()?;
        let mut params = query
            .map(|q| params::parse_query(q.as_bytes()))
            .unwrap_or_default();

        let body = self.body.split().freeze();
        let content_type = self.content_type.to_ascii_lowercase();
        if self.ctx.dispatcher.decoder().wants_raw_body() {
            params.insert(EVENT_RECORD_PARAMETER.to_string(), body);
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            params.extend(params::parse_query(&body));
        } else if let Some(boundary) = params::multipart_boundary(&self.content_type) {
            params.extend(params::parse_form_data(&body, &boundary)?);
        } else if content_type.starts_with("application/json") {
            params.insert("json".to_string(), body);
        }

        // header-derived entries override same-named query/body ones
        params.extend(self.env.drain());

        let mut response = self.ctx.dispatcher.dispatch(&path, &params);
        debug!(path = %path, status = response.status.as_u16(), "request handled");

        if self.keep_alive {
            response.set_header("Connection", "Keep-Alive");
            self.send_response(response);
        } else {
            self.send_response_and_close(response);
        }
        Ok(())
    }

    fn send_response(&mut self, mut response: Response) {
        response.apply_defaults(self.request_method.as_deref(), self.request_headers.as_deref());
        if self.head_only {
            // Content-Length still describes the body a GET would get
            response.body = Bytes::new();
        }
        serialize_response(&response, &mut self.output);
    }

    fn send_response_and_close(&mut self, response: Response) {
        self.send_response(response);
        self.closing = true;
    }

    fn send_error(&mut self, err: &IngestError) {
        let response = Response::from_error(err);
        if err.closes_connection() {
            self.send_response_and_close(response);
        } else {
            self.send_response(response);
        }
    }

    fn send_interim(&mut self, status: StatusCode) {
        serialize_response(&Response::interim(status), &mut self.output);
    }
}

/// Drives a [`ConnectionHandler`] over an accepted socket.
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    handler: ConnectionHandler,
    slot: Rc<ConnectionSlot>,
}

impl Connection {
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        ctx: Rc<ConnectionContext>,
        slot: Rc<ConnectionSlot>,
    ) -> Self {
        Self {
            stream,
            peer,
            handler: ConnectionHandler::new(ctx, Some(peer.ip())),
            slot,
        }
    }

    /// Reads, answers and writes until the peer leaves, the handler asks to
    /// close, or the keepalive manager closes the slot.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        let mut temp = [0u8; READ_BUFFER_SIZE];
        loop {
            let n = tokio::select! {
                _ = self.slot.closed() => {
                    debug!(peer = %self.peer, "closing idle connection");
                    break;
                }
                read = self.stream.read(&mut temp) => read?,
            };

            if n == 0 {
                // Client closed connection
                break;
            }
            self.slot.reset_idle();

            if let Err(e) = self.handler.on_read(&temp[..n]) {
                let pending = self.handler.take_output();
                if !pending.is_empty() {
                    self.stream.write_all(&pending).await?;
                }
                return Err(anyhow::anyhow!("HTTP parse error: {}", e));
            }

            let output = self.handler.take_output();
            if !output.is_empty() {
                self.stream.write_all(&output).await?;
            }

            if self.handler.is_closing() {
                if let Err(e) = self.stream.shutdown().await {
                    trace!(peer = %self.peer, error = %e, "shutdown after final response failed");
                }
                break;
            }
        }

        Ok(())
    }
}
