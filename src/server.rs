//! Managed HTTP/HTTPS server lifecycle.
//!
//! # State machine
//!
//! A server is always in exactly one of three states:
//!
//! ```text
//! Stopped ──start_http/start_https──▶ Starting ──listener bound──▶ Running
//!    ▲                                    │                           │
//!    └──────────── accept loop exits ◀────┴──── stop() / bind error ──┘
//! ```
//!
//! `stop()` never sets the status itself: it signals the accept loop and the
//! status becomes `Stopped` only when that loop exits. A stop issued while
//! the server is still `Starting` is honored — the loop re-checks the
//! shutdown flag right after binding and exits without serving.
//!
//! All lifecycle state is guarded by one mutex; every transition runs
//! through a single internal method that holds the lock for the
//! transition-and-notify sequence. The status listener is therefore invoked
//! **while the lock is held**, on whichever task performed the transition.
//! Listener code must not call back into the [`Server`] or it deadlocks.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::Error;
use crate::factory::Service;

/// The lifecycle status of a [`Server`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ServerStatus {
    /// Not listening. The initial state, and the terminal state of every run.
    Stopped,
    /// A start was accepted; the accept loop has not bound its listener yet.
    Starting,
    /// The listener is bound and accepting connections.
    Running,
}

/// Receives `(old, new)` for every status transition.
///
/// Invoked synchronously while the lifecycle lock is held — it must be fast
/// and must not call back into the [`Server`].
pub type StatusListener = Box<dyn Fn(ServerStatus, ServerStatus) + Send + Sync>;

/// A managed HTTP/HTTPS server around a composed
/// [`Service`](crate::Service).
///
/// Cheap to clone; all clones share the same lifecycle state.
///
/// ```rust,no_run
/// use plinth::{Server, ServerConfig, ServiceFactory};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), plinth::Error> {
/// let service = ServiceFactory::new().make(plinth::RouteTable::new())?;
/// let config = ServerConfig::builder().address("0.0.0.0:14002").build()?;
///
/// let server = Server::new(service, config);
/// server.start_http()?;
/// // ... later
/// server.stop().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

struct Inner {
    service: Arc<Service>,
    addr: SocketAddr,
    tls: Option<Arc<rustls::ServerConfig>>,
    shutdown_timeout: Duration,
    state: Mutex<State>,
    /// Mirrors the current status so `stop()` can await `Stopped` without
    /// polling. Transitions send under the state lock, preserving order.
    status_tx: watch::Sender<ServerStatus>,
}

/// Everything the lifecycle lock guards.
struct State {
    status: ServerStatus,
    listener: Option<StatusListener>,
    /// Shutdown signal for the currently running accept loop, if any.
    shutdown_tx: Option<watch::Sender<bool>>,
    /// The actual listener address once bound (differs from the configured
    /// address when binding port 0).
    bound_addr: Option<SocketAddr>,
}

impl Server {
    /// Wraps a composed service in a lifecycle manager. The configuration
    /// was already validated by
    /// [`ServerConfigBuilder::build`](crate::ServerConfigBuilder::build).
    pub fn new(service: Service, config: ServerConfig) -> Self {
        let (status_tx, _) = watch::channel(ServerStatus::Stopped);
        Self {
            inner: Arc::new(Inner {
                service: Arc::new(service),
                addr: config.addr,
                tls: config.tls,
                shutdown_timeout: config.shutdown_timeout,
                state: Mutex::new(State {
                    status: ServerStatus::Stopped,
                    listener: config.status_listener,
                    shutdown_tx: None,
                    bound_addr: None,
                }),
                status_tx,
            }),
        }
    }

    /// The configured endpoint as a URI-like string, e.g.
    /// `http://0.0.0.0:8080`. The scheme is `https` when TLS material is
    /// configured.
    pub fn endpoint(&self) -> String {
        let scheme = if self.inner.tls.is_some() { "https" } else { "http" };
        format!("{scheme}://{}", self.inner.addr)
    }

    /// The actual listener address, available once the server is `Running`.
    pub fn bound_addr(&self) -> Option<SocketAddr> {
        self.inner.state.lock().bound_addr
    }

    /// Replaces the status listener. Takes effect for subsequent
    /// transitions only.
    pub fn status_listener(
        &self,
        listener: impl Fn(ServerStatus, ServerStatus) + Send + Sync + 'static,
    ) {
        self.inner.state.lock().listener = Some(Box::new(listener));
    }

    /// Whether the server is ready to accept requests.
    pub fn is_running(&self) -> bool {
        self.inner.state.lock().status == ServerStatus::Running
    }

    /// Whether the server has ceased listening for requests.
    pub fn is_stopped(&self) -> bool {
        self.inner.state.lock().status == ServerStatus::Stopped
    }

    /// Begins listening for plain-HTTP requests.
    ///
    /// Returns as soon as the start is accepted: the status is `Starting`
    /// on return and becomes `Running` once the accept loop has bound its
    /// listener. Fails with [`Error::AlreadyActive`] unless the current
    /// status is `Stopped`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_http(&self) -> Result<(), Error> {
        self.start(false)
    }

    /// Begins listening for HTTPS requests.
    ///
    /// Same contract as [`Server::start_http`]; additionally fails with
    /// [`Error::TlsNotConfigured`] when no key pair was configured.
    pub fn start_https(&self) -> Result<(), Error> {
        self.start(true)
    }

    fn start(&self, use_tls: bool) -> Result<(), Error> {
        let mut state = self.inner.state.lock();

        if state.status != ServerStatus::Stopped {
            return Err(Error::AlreadyActive(self.endpoint()));
        }

        let tls = if use_tls {
            Some(self.inner.tls.clone().ok_or(Error::TlsNotConfigured)?)
        } else {
            None
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        state.shutdown_tx = Some(shutdown_tx);
        state.bound_addr = None;

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.accept_loop(shutdown_rx, tls).await;
        });

        // Start was initiated; the accept loop moves the status to Running
        // (or back to Stopped on bind failure).
        self.inner.transition(&mut state, ServerStatus::Starting);
        Ok(())
    }

    /// Initiates a bounded graceful shutdown and waits for it to take
    /// effect.
    ///
    /// New connections stop being accepted immediately; in-flight requests
    /// get up to the shutdown timeout to complete before being
    /// force-closed. Fails with [`Error::AlreadyStopped`] when the status
    /// is already `Stopped`. The status transition to `Stopped` is
    /// performed by the accept loop when it exits, never by this method.
    pub async fn stop(&self) -> Result<(), Error> {
        let mut status_rx = {
            let mut state = self.inner.state.lock();

            if state.status == ServerStatus::Stopped {
                return Err(Error::AlreadyStopped(self.endpoint()));
            }

            if let Some(shutdown_tx) = state.shutdown_tx.take() {
                let _ = shutdown_tx.send(true);
            }

            self.inner.status_tx.subscribe()
        };

        // Bounded wait: the loop drains in-flight requests up to the same
        // deadline, so Stopped normally arrives within it.
        let _ = tokio::time::timeout(self.inner.shutdown_timeout, async {
            while *status_rx.borrow_and_update() != ServerStatus::Stopped {
                if status_rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;

        Ok(())
    }

    /// Waits for SIGTERM or Ctrl-C, then stops the server.
    pub async fn stop_on_signal(&self) -> Result<(), Error> {
        shutdown_signal().await;
        info!("shutdown signal received");
        self.stop().await
    }
}

impl Inner {
    /// The single transition point: updates the status, notifies the
    /// listener while the lock is held, and mirrors the status into the
    /// watch channel.
    fn transition(&self, state: &mut State, new: ServerStatus) {
        let old = state.status;
        state.status = new;

        if let Some(listener) = &state.listener {
            listener(old, new);
        }

        // `send` is a no-op while nobody subscribes; `send_replace` updates
        // the value unconditionally so a later `stop()` reads the current
        // status, not a stale one.
        let _ = self.status_tx.send_replace(new);
    }

    /// Owns the listener for one server run. Runs on its own task; every
    /// exit path ends in a transition to `Stopped`.
    async fn accept_loop(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
        tls: Option<Arc<rustls::ServerConfig>>,
    ) {
        let listener = match TcpListener::bind(self.addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(addr = %self.addr, "failed to bind api server listener: {e}");
                let mut state = self.state.lock();
                state.shutdown_tx = None;
                self.transition(&mut state, ServerStatus::Stopped);
                return;
            }
        };

        {
            let mut state = self.state.lock();

            // A stop may have been requested while we were binding; honor it
            // instead of serving a server nobody wants anymore.
            if *shutdown.borrow() {
                state.shutdown_tx = None;
                self.transition(&mut state, ServerStatus::Stopped);
                return;
            }

            state.bound_addr = listener.local_addr().ok();
            self.transition(&mut state, ServerStatus::Running);
        }
        info!(addr = %self.addr, "api server listening");

        let acceptor = tls.map(TlsAcceptor::from);

        // Tracks every connection task so shutdown can drain them.
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                // Check shutdown first so a stop immediately ceases
                // accepting, even with connections queued.
                biased;

                _ = shutdown.changed() => {
                    info!(in_flight = tasks.len(), "api server draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(conn) => conn,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let service = Arc::clone(&self.service);
                    let acceptor = acceptor.clone();
                    let shutdown = shutdown.clone();
                    tasks.spawn(async move {
                        serve_connection(service, stream, remote_addr, acceptor, shutdown).await;
                    });
                }

                // Reap finished connection tasks so the set does not grow
                // without bound on long-running servers.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        // Stop accepting immediately, then drain in-flight connections up
        // to the deadline and force-close the rest.
        drop(listener);
        let drained = tokio::time::timeout(self.shutdown_timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(remaining = tasks.len(), "shutdown timeout elapsed, aborting connections");
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }

        let mut state = self.state.lock();
        state.bound_addr = None;
        state.shutdown_tx = None;
        self.transition(&mut state, ServerStatus::Stopped);
        info!(addr = %self.addr, "api server stopped");
    }
}

/// Serves one connection, with an optional TLS handshake in front.
///
/// The shutdown signal triggers hyper's `graceful_shutdown` on the
/// connection: in-flight requests run to completion, idle keep-alive
/// connections close, and the task exits so the accept loop's drain can
/// finish before its deadline.
async fn serve_connection(
    service: Arc<Service>,
    stream: TcpStream,
    remote_addr: SocketAddr,
    acceptor: Option<TlsAcceptor>,
    mut shutdown: watch::Receiver<bool>,
) {
    let svc = service_fn(move |req| {
        let service = Arc::clone(&service);
        async move { service.dispatch(req, remote_addr).await }
    });
    let builder = ConnBuilder::new(TokioExecutor::new());

    match acceptor {
        Some(acceptor) => {
            let stream = match acceptor.accept(stream).await {
                Ok(stream) => stream,
                Err(e) => {
                    debug!(peer = %remote_addr, "tls handshake failed: {e}");
                    return;
                }
            };
            let conn = builder.serve_connection(TokioIo::new(stream), svc);
            let mut conn = std::pin::pin!(conn);
            tokio::select! {
                res = conn.as_mut() => {
                    if let Err(e) = res {
                        error!(peer = %remote_addr, "connection error: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    conn.as_mut().graceful_shutdown();
                    if let Err(e) = conn.as_mut().await {
                        error!(peer = %remote_addr, "connection error: {e}");
                    }
                }
            }
        }
        None => {
            let conn = builder.serve_connection(TokioIo::new(stream), svc);
            let mut conn = std::pin::pin!(conn);
            tokio::select! {
                res = conn.as_mut() => {
                    if let Err(e) = res {
                        error!(peer = %remote_addr, "connection error: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    conn.as_mut().graceful_shutdown();
                    if let Err(e) = conn.as_mut().await {
                        error!(peer = %remote_addr, "connection error: {e}");
                    }
                }
            }
        }
    }
}

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both SIGTERM (sent by Kubernetes and most
/// supervisors) and SIGINT (Ctrl-C, for local dev). On other platforms only
/// Ctrl-C is available.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let sigterm = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = sigterm => {}
    }
}
