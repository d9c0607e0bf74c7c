//! Service wiring.
//!
//! Startup order:
//! 1. Bind the listener
//! 2. Start the file watcher (fails fast on a bad path)
//! 3. Spawn the accept loop
//! 4. Push the initial snapshot to whoever is already connected
//! 5. Spawn the change watcher
//!
//! Shutdown reverses it: stop watching, stop accepting, close every client
//! and give the handlers `shutdown_grace_ms` to finish before aborting them.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use confpush_core::SnapshotLoader;
use confpush_hub::{accept_connection, Broadcaster, ClientRegistry, ConnectionContext};
use confpush_watch::{ChangeWatcher, FsWatcher};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::{AppError, AppResult};
use crate::limiter::ConnectionLimiter;

/// Back-off after a failed `accept`, so fd exhaustion doesn't spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// A configured, not yet listening service.
pub struct Service {
    config: ServerConfig,
    registry: Arc<ClientRegistry>,
    loader: SnapshotLoader,
}

impl Service {
    pub fn new(config: ServerConfig) -> AppResult<Self> {
        config.validate()?;
        let loader = SnapshotLoader::new(&config.watch_path);
        Ok(Self {
            config,
            registry: Arc::new(ClientRegistry::new()),
            loader,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<ClientRegistry> {
        self.registry.clone()
    }

    /// Bind the listen address.
    pub async fn bind(self) -> AppResult<BoundService> {
        let addr = self.config.listen_addr();
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(source) => return Err(AppError::Bind { addr, source }),
        };
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "Listening for WebSocket clients");

        Ok(BoundService {
            service: self,
            listener,
            local_addr,
        })
    }
}

/// A service holding its listening socket.
pub struct BoundService {
    service: Service,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl BoundService {
    /// Actual listen address (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> Arc<ClientRegistry> {
        self.service.registry()
    }

    /// Serve until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> AppResult<()> {
        let Self {
            service,
            listener,
            local_addr,
        } = self;
        let Service {
            config,
            registry,
            loader,
        } = service;

        let (fs_watcher, events) =
            FsWatcher::start(loader.path(), config.event_channel_capacity)?;

        let ctx = ConnectionContext {
            registry: registry.clone(),
            loader: loader.clone(),
            shutdown: shutdown.clone(),
            send_timeout: config.send_timeout(),
            handshake_timeout: config.handshake_timeout(),
        };
        let limiter = ConnectionLimiter::new(config.max_clients);
        let accept_task = tokio::spawn(accept_loop(listener, ctx, limiter, shutdown.clone()));

        // Seeded before the initial load so a write landing in between is
        // still picked up by the first change event.
        let broadcaster = Broadcaster::new(registry.clone());
        let change_watcher = ChangeWatcher::new(loader.clone(), broadcaster.clone());

        if let Some(snapshot) = loader.try_load() {
            let report = broadcaster.broadcast(&snapshot).await;
            debug!(?report, "Initial snapshot broadcast");
        }

        let watcher_task = tokio::spawn(change_watcher.run(events, shutdown.clone()));
        info!(
            %local_addr,
            path = %loader.path().display(),
            "confpush running"
        );

        shutdown.cancelled().await;
        info!("Shutting down");

        if let Err(e) = watcher_task.await {
            warn!(error = %e, "Change watcher task failed");
        }
        drop(fs_watcher);

        let mut handlers = accept_task
            .await
            .map_err(|e| AppError::Task(format!("accept loop: {e}")))?;

        registry.close_all().await;

        let grace = config.shutdown_grace();
        let drained = tokio::time::timeout(grace, async {
            while handlers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = handlers.len(),
                grace_ms = grace.as_millis() as u64,
                "Connections did not drain in time, aborting"
            );
            handlers.shutdown().await;
        }

        info!(clients = registry.len(), "confpush stopped");
        Ok(())
    }
}

/// Accept connections until `shutdown` fires. Returns the still-running
/// connection handlers so the caller can drain them.
async fn accept_loop(
    listener: TcpListener,
    ctx: ConnectionContext,
    limiter: Arc<ConnectionLimiter>,
    shutdown: CancellationToken,
) -> JoinSet<()> {
    let mut handlers = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                        continue;
                    }
                };

                let Some(permit) = limiter.try_acquire() else {
                    warn!(%peer, max_clients = limiter.max(), "Client limit reached, dropping connection");
                    continue;
                };

                let ctx = ctx.clone();
                handlers.spawn(async move {
                    let _permit = permit;
                    match accept_connection(stream, ctx).await {
                        Ok(reason) => debug!(%peer, ?reason, "Connection finished"),
                        Err(e) => warn!(%peer, error = %e, "Connection failed"),
                    }
                });
            }
            Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!(error = %e, "Connection handler panicked");
                    }
                }
            }
        }
    }

    debug!(open = handlers.len(), "Accept loop stopped");
    handlers
}
