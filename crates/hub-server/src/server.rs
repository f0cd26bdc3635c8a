//! TCP listener for one device channel.

use crate::connection::stop_requested;
use crate::{ConnectionHandler, HubError, HubResult, Registry, Router};
use futures_util::future::join_all;
use hub_protocol::Channel;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Settings for a single channel listener.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub channel: Channel,
    /// `host:port`; port 0 picks an ephemeral port.
    pub bind_addr: String,
    /// Whether the router may broadcast to this channel's devices.
    pub push_enabled: bool,
}

impl ServerConfig {
    pub fn new(channel: Channel, bind_addr: impl Into<String>) -> Self {
        Self {
            channel,
            bind_addr: bind_addr.into(),
            push_enabled: false,
        }
    }

    pub fn with_push(mut self, push_enabled: bool) -> Self {
        self.push_enabled = push_enabled;
        self
    }
}

/// Accepts device connections for one channel and owns their handlers.
pub struct ConnectionServer {
    config: ServerConfig,
    router: Arc<Router>,
    registry: Arc<Registry>,
    shutdown_tx: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<TcpListener>>>,
    local_addr: Mutex<Option<SocketAddr>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl ConnectionServer {
    pub fn new(config: ServerConfig, router: Arc<Router>) -> Self {
        let registry = Arc::new(Registry::new(config.channel.clone()));
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            router,
            registry,
            shutdown_tx,
            accept_task: Mutex::new(None),
            local_addr: Mutex::new(None),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn channel(&self) -> &Channel {
        &self.config.channel
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Bound address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Bind the listener and start accepting in the background.
    ///
    /// A bind failure is returned to the caller and nothing keeps running.
    pub async fn start(&self) -> HubResult<SocketAddr> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(HubError::Stopped(self.config.channel.clone()));
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(HubError::AlreadyStarted(self.config.channel.clone()));
        }

        let channel = self.config.channel.clone();
        let listener = match TcpListener::bind(&self.config.bind_addr).await {
            Ok(listener) => listener,
            Err(source) => {
                error!(
                    channel = %channel,
                    addr = %self.config.bind_addr,
                    error = %source,
                    "Failed to bind channel server"
                );
                self.started.store(false, Ordering::SeqCst);
                return Err(HubError::Bind {
                    channel,
                    addr: self.config.bind_addr.clone(),
                    source,
                });
            }
        };
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock() = Some(local_addr);

        if self.config.push_enabled {
            self.router.enable_push(self.registry.clone());
        }

        let task = tokio::spawn(accept_loop(
            listener,
            self.router.clone(),
            self.registry.clone(),
            self.shutdown_tx.subscribe(),
        ));
        *self.accept_task.lock() = Some(task);

        info!(
            channel = %channel,
            addr = %local_addr,
            push = self.config.push_enabled,
            "Channel server listening"
        );
        Ok(local_addr)
    }

    /// Stop accepting, stop every handler and release the listener.
    ///
    /// Idempotent; later calls return immediately.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            debug!(channel = %self.config.channel, "Server already stopped");
            return;
        }
        info!(channel = %self.config.channel, "Stopping channel server");

        self.shutdown_tx.send_replace(true);
        let accept_task = self.accept_task.lock().take();
        let listener = match accept_task {
            Some(task) => match task.await {
                Ok(listener) => Some(listener),
                Err(e) => {
                    warn!(channel = %self.config.channel, error = %e, "Accept loop ended abnormally");
                    None
                }
            },
            None => None,
        };

        if self.config.push_enabled {
            self.router.disable_push(&self.registry);
        }

        let handles = self.registry.handles();
        join_all(handles.iter().map(|handle| handle.stop())).await;
        self.registry.clear();
        drop(listener);

        info!(
            channel = %self.config.channel,
            connections = handles.len(),
            "Channel server stopped"
        );
    }
}

impl Drop for ConnectionServer {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

async fn accept_loop(
    listener: TcpListener,
    router: Arc<Router>,
    registry: Arc<Registry>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> TcpListener {
    loop {
        tokio::select! {
            _ = stop_requested(&mut shutdown_rx) => {
                debug!(channel = %registry.channel(), "Accept loop shutting down");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => spawn_handler(stream, peer, &router, &registry),
                Err(e) => warn!(channel = %registry.channel(), error = %e, "Failed to accept connection"),
            }
        }
    }
    listener
}

fn spawn_handler(stream: TcpStream, peer: SocketAddr, router: &Arc<Router>, registry: &Arc<Registry>) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
    }

    let (handler, handle) =
        ConnectionHandler::new(registry.channel().clone(), stream, peer, router.clone());
    let connection_id = handle.id();
    registry.insert(handle);
    info!(
        channel = %registry.channel(),
        peer = %peer,
        connection_id = %connection_id,
        clients = registry.len(),
        "Device connected"
    );

    let registry = registry.clone();
    tokio::spawn(async move {
        handler.run().await;
        registry.remove(&connection_id);
        info!(
            channel = %registry.channel(),
            peer = %peer,
            connection_id = %connection_id,
            clients = registry.len(),
            "Device disconnected"
        );
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_reports_bound_address() {
        let server = ConnectionServer::new(
            ServerConfig::new(Channel::cart(), "127.0.0.1:0"),
            Arc::new(Router::new()),
        );
        assert!(server.local_addr().is_none());

        let addr = server.start().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(server.local_addr(), Some(addr));
        server.stop().await;
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let server = ConnectionServer::new(
            ServerConfig::new(Channel::cart(), "127.0.0.1:0"),
            Arc::new(Router::new()),
        );
        server.start().await.unwrap();
        assert!(matches!(server.start().await, Err(HubError::AlreadyStarted(_))));
        server.stop().await;
        assert!(matches!(server.start().await, Err(HubError::Stopped(_))));
    }

    #[tokio::test]
    async fn test_push_registration_follows_lifecycle() {
        let router = Arc::new(Router::new());
        let server = ConnectionServer::new(
            ServerConfig::new(Channel::face(), "127.0.0.1:0").with_push(true),
            router.clone(),
        );
        assert!(!router.supports_push(&Channel::face()));

        server.start().await.unwrap();
        assert!(router.supports_push(&Channel::face()));

        server.stop().await;
        assert!(!router.supports_push(&Channel::face()));
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let server = ConnectionServer::new(
            ServerConfig::new(Channel::face(), "127.0.0.1:0"),
            Arc::new(Router::new()),
        );
        server.stop().await;
        server.stop().await;
        assert_eq!(server.connection_count(), 0);
    }
}
