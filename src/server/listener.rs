use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Context;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::task::{self, LocalSet};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::http::connection::{Connection, ConnectionContext, HandlerSettings, MessageObserver};
use crate::ingest::decoder::RecordDecoder;
use crate::ingest::dispatcher::{DispatchSettings, Dispatcher};
use crate::ingest::format::{FormatParser, build_parser};
use crate::ingest::router::Router;
use crate::server::keepalive::{ConnectionId, KEEPALIVE_TICK, KeepaliveManager};

const DEFAULT_BACKLOG: u32 = 1024;

/// An ingestion endpoint that has not been started yet.
pub struct Server {
    config: Config,
    router: Box<dyn Router>,
    parser: Option<Box<dyn FormatParser>>,
    observer: Option<MessageObserver>,
}

impl Server {
    pub fn new(config: Config, router: impl Router + 'static) -> Self {
        Self {
            config,
            router: Box::new(router),
            parser: None,
            observer: None,
        }
    }

    /// Uses `parser` for request bodies instead of a built-in format.
    pub fn with_format_parser(mut self, parser: impl FormatParser + 'static) -> Self {
        self.parser = Some(Box::new(parser));
        self
    }

    pub fn with_observer(mut self, observer: MessageObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Binds the listening socket and starts the event loop on its own
    /// thread. Returns once the socket is listening.
    pub fn start(self) -> anyhow::Result<ServerHandle> {
        self.config.validate()?;

        let decoder = match (self.parser, self.config.format.as_str()) {
            (Some(parser), format) => RecordDecoder::pluggable(format, parser),
            (None, "default") => RecordDecoder::Default,
            (None, format) => RecordDecoder::pluggable(format, build_parser(format, &self.config.format_options)?),
        };
        let dispatcher = Dispatcher::new(
            DispatchSettings {
                add_http_headers: self.config.add_http_headers,
                add_remote_addr: self.config.add_remote_addr,
                respond_with_empty_img: self.config.respond_with_empty_img,
            },
            decoder,
            self.router,
        );

        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel();
        let config = self.config;
        let observer = self.observer;
        let loop_stop = Arc::clone(&stop);

        let thread = thread::Builder::new()
            .name("http-ingest".to_string())
            .spawn(move || run_thread(config, dispatcher, observer, loop_stop, ready_tx))
            .context("spawning event loop thread")?;

        match ready_rx.recv() {
            Ok(Ok(local_addr)) => Ok(ServerHandle {
                local_addr,
                stop,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => match thread.join() {
                Ok(Err(e)) => Err(e),
                _ => anyhow::bail!("event loop thread exited before listening"),
            },
        }
    }
}

/// Control handle of a running endpoint.
///
/// Dropping the handle stops the endpoint too.
pub struct ServerHandle {
    local_addr: SocketAddr,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<anyhow::Result<()>>>,
}

impl ServerHandle {
    /// The address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// True once the event loop has exited, normally or not.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(|t| t.is_finished())
    }

    /// Stops the event loop and waits for its thread.
    ///
    /// No callback runs after this returns. A fatal loop error is returned
    /// here so the host can decide whether to restart.
    pub fn stop(mut self) -> anyhow::Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> anyhow::Result<()> {
        self.stop.store(true, Ordering::Release);
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| anyhow::anyhow!("event loop thread panicked"))?,
            None => Ok(()),
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "event loop ended with an error");
        }
    }
}

fn run_thread(
    config: Config,
    dispatcher: Dispatcher,
    observer: Option<MessageObserver>,
    stop: Arc<AtomicBool>,
    ready: mpsc::Sender<anyhow::Result<SocketAddr>>,
) -> anyhow::Result<()> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            let _ = ready.send(Err(e.into()));
            return Ok(());
        }
    };
    let local = LocalSet::new();

    local.block_on(&runtime, async move {
        let listener = match bind(&config) {
            Ok(listener) => listener,
            Err(e) => {
                let _ = ready.send(Err(e));
                return Ok(());
            }
        };
        let local_addr = listener.local_addr()?;
        info!("Listening on {}", local_addr);
        let _ = ready.send(Ok(local_addr));

        let mut ctx = ConnectionContext::new(
            HandlerSettings {
                body_size_limit: config.body_size_limit,
                cors_allow_origins: config.cors_allow_origins.clone(),
            },
            dispatcher,
        );
        if let Some(observer) = observer {
            ctx = ctx.with_observer(observer);
        }

        let event_loop = EventLoop {
            listener,
            ctx: Rc::new(ctx),
            keepalive: Rc::new(KeepaliveManager::from_timeout(config.keepalive_timeout)),
            stop,
            poll_interval: config.blocking_timeout,
            next_id: 0,
        };
        let result = event_loop.run().await;
        if let Err(e) = &result {
            error!(error = %e, "unexpected error");
        }
        result
    })
}

fn bind(config: &Config) -> anyhow::Result<TcpListener> {
    let addr = config.socket_addr()?;
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket
        .bind(addr)
        .with_context(|| format!("binding {addr}"))?;
    Ok(socket.listen(config.backlog.unwrap_or(DEFAULT_BACKLOG))?)
}

/// Accept failures caused by a single client rather than the listener.
fn is_transient_accept_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

/// The reactor: listener, keepalive timer and connection tasks, all on the
/// current thread.
struct EventLoop {
    listener: TcpListener,
    ctx: Rc<ConnectionContext>,
    keepalive: Rc<KeepaliveManager>,
    stop: Arc<AtomicBool>,
    poll_interval: Duration,
    next_id: u64,
}

impl EventLoop {
    async fn run(mut self) -> anyhow::Result<()> {
        let mut ticker = time::interval_at(Instant::now() + KEEPALIVE_TICK, KEEPALIVE_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.stop.load(Ordering::Acquire) {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((socket, peer)) => self.spawn_connection(socket, peer),
                    Err(e) if is_transient_accept_error(&e) => {
                        warn!(error = %e, "accept failed, continuing");
                    }
                    Err(e) => return Err(e.into()),
                },
                _ = ticker.tick() => {
                    let closed = self.keepalive.on_tick();
                    if !closed.is_empty() {
                        debug!(count = closed.len(), "reaped idle connections");
                    }
                }
                _ = time::sleep(self.poll_interval) => {}
            }
        }

        info!("Listener on {} stopped", self.listener.local_addr()?);
        Ok(())
    }

    fn spawn_connection(&mut self, socket: TcpStream, peer: SocketAddr) {
        self.next_id += 1;
        let id = ConnectionId::new(self.next_id);
        debug!(peer = %peer, conn = %id, "Accepted connection");

        let registration = self.keepalive.register(id);
        let ctx = Rc::clone(&self.ctx);
        task::spawn_local(async move {
            let mut conn = Connection::new(socket, peer, ctx, Rc::clone(registration.slot()));
            if let Err(e) = conn.run().await {
                warn!(peer = %peer, conn = %id, error = %e, "unexpected error");
            }
            drop(registration);
        });
    }
}
