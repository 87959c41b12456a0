//! Listening side of the ledger: lifecycle state, the accept loop, and the
//! state shared by every connection handler.

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::{
    net::{TcpListener, TcpStream},
    select,
    sync::watch,
    time::sleep,
};
use tracing::{info, warn};

use crate::{
    config::ServerConfig, error::StartError, events::EventNotifier, handler::ConnectionHandler,
    registry::UserRegistry,
};

/// Pause after a failed accept so persistent errors such as EMFILE do not
/// spin the loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Listening,
    Stopping,
}

struct LifecycleInner {
    state: ServerState,
    shutdown: Option<watch::Sender<bool>>,
}

/// Run state plus the shutdown signal of the current run. Transitions happen
/// under one lock so a stop can never miss the signal of a start in flight.
struct Lifecycle {
    inner: Mutex<LifecycleInner>,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            inner: Mutex::new(LifecycleInner {
                state: ServerState::Stopped,
                shutdown: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LifecycleInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> ServerState {
        self.lock().state
    }

    /// Stopped -> Listening. Returns the shutdown receiver for the new run.
    fn begin_start(&self) -> Option<watch::Receiver<bool>> {
        let mut inner = self.lock();
        if inner.state != ServerState::Stopped {
            return None;
        }
        let (tx, rx) = watch::channel(false);
        inner.state = ServerState::Listening;
        inner.shutdown = Some(tx);
        Some(rx)
    }

    fn finish_stop(&self) {
        let mut inner = self.lock();
        inner.state = ServerState::Stopped;
        inner.shutdown = None;
    }
}

/// Everything a connection handler touches: the registry, the notifier and
/// the lifecycle it may end with a STOP.
pub struct LedgerState {
    registry: UserRegistry,
    events: EventNotifier,
    lifecycle: Lifecycle,
}

impl Default for LedgerState {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerState {
    pub fn new() -> Self {
        Self {
            registry: UserRegistry::new(),
            events: EventNotifier::new(),
            lifecycle: Lifecycle::new(),
        }
    }

    pub fn registry(&self) -> &UserRegistry {
        &self.registry
    }

    pub fn events(&self) -> &EventNotifier {
        &self.events
    }

    pub fn server_state(&self) -> ServerState {
        self.lifecycle.state()
    }

    /// Stopped -> Listening. Returns the shutdown signal of the new run, or
    /// `None` if a run is already active.
    pub(crate) fn begin_run(&self) -> Option<watch::Receiver<bool>> {
        self.lifecycle.begin_start()
    }

    /// Moves a listening server to stopping, clears the registry and wakes
    /// the accept loop and every handler. No-op unless currently listening.
    pub fn shutdown(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state != ServerState::Listening {
            return false;
        }
        lifecycle.state = ServerState::Stopping;
        let cleared = self.registry.clear();
        info!(cleared, "ledger stopping");
        if let Some(shutdown) = lifecycle.shutdown.take() {
            shutdown.send_replace(true);
        }
        true
    }
}

/// The authority device's listener.
pub struct LedgerServer {
    config: ServerConfig,
    state: Arc<LedgerState>,
}

impl LedgerServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            state: Arc::new(LedgerState::new()),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &UserRegistry {
        self.state.registry()
    }

    pub fn events(&self) -> &EventNotifier {
        self.state.events()
    }

    pub fn state(&self) -> ServerState {
        self.state.server_state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ServerState::Listening
    }

    /// Binds the configured endpoint and runs the accept loop on its own task.
    pub async fn start(&self) -> Result<ServerHandle, StartError> {
        let shutdown = self.state.begin_run().ok_or(StartError::AlreadyRunning)?;

        let addr = self.config.socket_addr();
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(source) => {
                self.state.lifecycle.finish_stop();
                return Err(StartError::Bind { addr, source });
            }
        };
        let local_addr = match listener.local_addr() {
            Ok(local_addr) => local_addr,
            Err(source) => {
                self.state.lifecycle.finish_stop();
                return Err(StartError::Bind { addr, source });
            }
        };

        let (done_tx, done_rx) = watch::channel(false);
        let acceptor = Acceptor {
            listener,
            state: Arc::clone(&self.state),
            config: Arc::new(self.config.clone()),
            shutdown,
        };
        tokio::spawn(async move {
            acceptor.run().await;
            done_tx.send_replace(true);
        });

        Ok(ServerHandle {
            local_addr,
            state: Arc::clone(&self.state),
            done: done_rx,
        })
    }

    /// Cooperative stop; see [`LedgerState::shutdown`].
    pub fn stop(&self) -> bool {
        self.state.shutdown()
    }
}

/// Handle to one run of the accept loop.
pub struct ServerHandle {
    local_addr: SocketAddr,
    state: Arc<LedgerState>,
    done: watch::Receiver<bool>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.state.server_state() == ServerState::Listening
    }

    pub fn stop(&self) -> bool {
        self.state.shutdown()
    }

    /// Resolves once the accept loop has exited and the listener is closed.
    pub async fn stopped(&self) {
        let mut done = self.done.clone();
        // A dropped sender also means the accept task is gone.
        let _ = done.wait_for(|done| *done).await;
    }
}

struct Acceptor {
    listener: TcpListener,
    state: Arc<LedgerState>,
    config: Arc<ServerConfig>,
    shutdown: watch::Receiver<bool>,
}

impl Acceptor {
    async fn run(self) {
        let Acceptor {
            listener,
            state,
            config,
            mut shutdown,
        } = self;
        let handler_shutdown = shutdown.clone();

        loop {
            select! {
                _ = async { shutdown.wait_for(|stop| *stop).await.map(|_| ()) } => break,
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &state, &config, &handler_shutdown).await;
                }
            }
        }

        drop(listener);
        state.lifecycle.finish_stop();
        info!("ledger stopped");
    }
}

async fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    state: &Arc<LedgerState>,
    config: &Arc<ServerConfig>,
    shutdown: &watch::Receiver<bool>,
) {
    match result {
        Ok((stream, peer)) => spawn_connection_handler(stream, peer, state, config, shutdown),
        Err(err) => {
            warn!(error = ?err, "failed to accept connection");
            sleep(ACCEPT_ERROR_BACKOFF).await;
        }
    }
}

fn spawn_connection_handler(
    stream: TcpStream,
    peer: SocketAddr,
    state: &Arc<LedgerState>,
    config: &Arc<ServerConfig>,
    shutdown: &watch::Receiver<bool>,
) {
    let handler = ConnectionHandler::new(
        stream,
        peer,
        Arc::clone(state),
        shutdown.clone(),
        config,
    );
    tokio::spawn(async move {
        if let Err(err) = handler.run().await {
            warn!(peer = %peer, error = ?err, "connection closed with error");
        }
    });
}
