//! UDP server lifecycle.

use crate::config::{Config, ConfigError, DedupConfig, InvocationSemantics, ReassemblyConfig};
use crate::dedup::DuplicateFilter;
use crate::dispatch::Dispatcher;
use crate::error::ServerError;
use crate::listener::UdpListener;
use crate::reassembly::RequestBuffer;
use crate::router::Router;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Whether duplicate request IDs are suppressed.
    pub semantics: InvocationSemantics,
    /// Request reassembly settings.
    pub reassembly: ReassemblyConfig,
    /// Duplicate filter settings (unused under at-least-once).
    pub dedup: DedupConfig,
    /// Time left for in-flight replies after the listener stops.
    pub grace_period: Duration,
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            semantics: InvocationSemantics::default(),
            reassembly: ReassemblyConfig::default(),
            dedup: DedupConfig::default(),
            grace_period: Duration::from_secs(1),
        }
    }

    /// Builds the runtime configuration from a loaded `Config`.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            bind_addr: config.network.bind_addr()?,
            semantics: config.semantics,
            reassembly: config.reassembly.clone(),
            dedup: config.dedup.clone(),
            grace_period: config.network.grace_period(),
        })
    }

    pub fn with_semantics(mut self, semantics: InvocationSemantics) -> Self {
        self.semantics = semantics;
        self
    }

    pub fn with_reassembly(mut self, reassembly: ReassemblyConfig) -> Self {
        self.reassembly = reassembly;
        self
    }

    pub fn with_dedup(mut self, dedup: DedupConfig) -> Self {
        self.dedup = dedup;
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub datagrams_received: AtomicU64,
    pub requests_dispatched: AtomicU64,
    pub duplicates_dropped: AtomicU64,
    pub packets_sent: AtomicU64,
    pub errors_total: AtomicU64,
}

/// UDP RPC server.
///
/// Owns the socket, the reassembly buffer, the duplicate filter and their
/// sweep tasks. Background tasks start in [`Server::run`] and are joined
/// before it returns.
pub struct Server {
    config: ServerConfig,
    listener: UdpListener,
    buffer: Arc<RequestBuffer>,
    filter: Option<Arc<DuplicateFilter>>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    shutdown_rx: Mutex<Option<broadcast::Receiver<()>>>,
    running: AtomicBool,
}

impl Server {
    /// Binds the socket and assembles the dispatch pipeline.
    pub async fn bind(config: ServerConfig, router: Router) -> Result<Self, ServerError> {
        let socket = Arc::new(UdpSocket::bind(config.bind_addr).await?);
        let stats = Arc::new(ServerStats::default());
        let buffer = Arc::new(RequestBuffer::new(config.reassembly.clone()));
        let filter = config
            .semantics
            .is_at_most_once()
            .then(|| Arc::new(DuplicateFilter::new(config.dedup.clone())));

        let dispatcher = Dispatcher::new(router, buffer.clone(), filter.clone(), stats.clone());
        let listener = UdpListener::new(socket, Arc::new(dispatcher), stats.clone());

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        Ok(Self {
            config,
            listener,
            buffer,
            filter,
            stats,
            shutdown: shutdown_tx,
            shutdown_rx: Mutex::new(Some(shutdown_rx)),
            running: AtomicBool::new(false),
        })
    }

    /// Address the socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Runs the server until [`Server::shutdown`] is called.
    ///
    /// On shutdown the listener stops receiving, both sweeps are closed and
    /// joined, and the grace period elapses so in-flight replies can finish.
    pub async fn run(&self) -> Result<(), ServerError> {
        let local_addr = self.local_addr()?;
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyRunning);
        }
        let shutdown_rx = self
            .shutdown_rx
            .lock()
            .take()
            .unwrap_or_else(|| self.shutdown.subscribe());

        let reassembly_sweep = {
            let buffer = self.buffer.clone();
            tokio::spawn(async move { buffer.run_sweeper().await })
        };
        let dedup_sweep = self.filter.clone().map(|filter| {
            tokio::spawn(async move { filter.run_sweeper().await })
        });

        tracing::info!(
            "Server listening on {} ({})",
            local_addr,
            self.config.semantics
        );

        self.listener.run(shutdown_rx).await;

        if let Some(filter) = &self.filter {
            filter.close();
        }
        self.buffer.close();

        if let Some(handle) = dedup_sweep {
            if let Err(e) = handle.await {
                tracing::warn!("Duplicate filter sweep ended abnormally: {}", e);
            }
        }
        if let Err(e) = reassembly_sweep.await {
            tracing::warn!("Reassembly sweep ended abnormally: {}", e);
        }

        if !self.config.grace_period.is_zero() {
            tracing::info!(
                "Waiting {:?} for in-flight replies",
                self.config.grace_period
            );
            tokio::time::sleep(self.config.grace_period).await;
        }

        self.running.store(false, Ordering::SeqCst);
        tracing::info!("Server stopped");
        Ok(())
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Returns whether the server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    pub fn semantics(&self) -> InvocationSemantics {
        self.config.semantics
    }

    /// Number of requests still waiting for fragments.
    pub fn pending_requests(&self) -> usize {
        self.buffer.pending_count()
    }
}
