//! Transport service - runs the server from bind to exit.
//!
//! For HTTP the order is fixed: bind the port, start answering probes,
//! build the catalog, report ready, then wait for a termination signal and
//! drain. Signal handlers are installed before the catalog build, so a
//! termination request during startup drains instead of killing the
//! process. SIGHUP rebuilds the catalog in place once the server is ready.

use std::fmt;
use std::time::Duration;

use tracing::{error, info, warn};

use super::http::HttpTransport;
use super::{HttpConfig, TransportConfig, TransportError, TransportResult};
use crate::core::McpServer;
use crate::core::error::Result as ServerResult;
use crate::domains::tools::CatalogSummary;

#[cfg(feature = "stdio")]
use super::stdio::StdioTransport;

/// How long the listener may take to close once the process is stopped.
const LISTENER_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Transport service - manages the transport layer for the MCP server.
pub struct TransportService {
    config: TransportConfig,
}

impl TransportService {
    /// Create a new transport service with the given configuration.
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    /// Start the transport with the given MCP server.
    ///
    /// Returns once the server has drained and stopped. A catalog that
    /// fails to build is reported as an error so the process exits non-zero.
    pub async fn run(self, server: McpServer) -> TransportResult<()> {
        info!("Starting transport: {}", self.config.description());
        let mut signals = Signals::install()?;

        match self.config {
            TransportConfig::Http(cfg) => run_http(cfg, server, &mut signals).await,
            #[cfg(feature = "stdio")]
            TransportConfig::Stdio => run_stdio(server, &mut signals).await,
        }
    }
}

// ============================================================================
// Signals
// ============================================================================

/// Process signals the server reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Interrupt,
    Terminate,
    Hangup,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
            Self::Hangup => "SIGHUP",
        })
    }
}

/// Where signals come from.
enum Signals {
    #[cfg(unix)]
    Unix {
        interrupt: tokio::signal::unix::Signal,
        terminate: tokio::signal::unix::Signal,
        hangup: tokio::signal::unix::Signal,
    },
    #[cfg(not(unix))]
    CtrlC,
    #[cfg(test)]
    Channel(tokio::sync::mpsc::UnboundedReceiver<Signal>),
}

impl Signals {
    /// Register with the OS.
    #[cfg(unix)]
    fn install() -> TransportResult<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self::Unix {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    /// Register with the OS.
    #[cfg(not(unix))]
    fn install() -> TransportResult<Self> {
        Ok(Self::CtrlC)
    }

    /// Wait for the next signal.
    async fn recv(&mut self) -> Signal {
        match self {
            #[cfg(unix)]
            Self::Unix {
                interrupt,
                terminate,
                hangup,
            } => tokio::select! {
                Some(()) = interrupt.recv() => Signal::Interrupt,
                Some(()) = terminate.recv() => Signal::Terminate,
                Some(()) = hangup.recv() => Signal::Hangup,
                else => std::future::pending().await,
            },
            #[cfg(not(unix))]
            Self::CtrlC => match tokio::signal::ctrl_c().await {
                Ok(()) => Signal::Interrupt,
                Err(e) => {
                    warn!("Cannot listen for Ctrl+C: {}", e);
                    std::future::pending().await
                }
            },
            #[cfg(test)]
            Self::Channel(rx) => match rx.recv().await {
                Some(signal) => signal,
                None => std::future::pending().await,
            },
        }
    }
}

// ============================================================================
// Phases
// ============================================================================

/// How the startup phase ended.
enum Startup {
    Ready(CatalogSummary),
    Interrupted(Signal),
}

/// Build the catalog while still listening for termination signals.
///
/// SIGHUP is ignored here: the build in progress already reads fresh
/// credentials.
async fn start(server: &McpServer, signals: &mut Signals) -> ServerResult<Startup> {
    let initialize = server.initialize();
    tokio::pin!(initialize);

    loop {
        tokio::select! {
            built = &mut initialize => return built.map(Startup::Ready),
            signal = signals.recv() => match signal {
                Signal::Hangup => info!("Received SIGHUP while starting, ignoring"),
                other => return Ok(Startup::Interrupted(other)),
            },
        }
    }
}

async fn run_http(
    cfg: HttpConfig,
    server: McpServer,
    signals: &mut Signals,
) -> TransportResult<()> {
    let transport = HttpTransport::bind(cfg).await?;
    let mut serving = tokio::spawn(transport.serve(server.clone()));

    match start(&server, signals).await {
        Ok(Startup::Ready(summary)) => info!(
            "Ready: {} tools from {} services",
            summary.tool_count,
            summary.services.len()
        ),
        Ok(Startup::Interrupted(signal)) => {
            info!("Received {} before the catalog was ready, shutting down", signal);
            drain(&server).await;
            close_listener(&mut serving).await;
            return Ok(());
        }
        Err(e) => {
            // Already stopped; let the listener wind down before exiting.
            close_listener(&mut serving).await;
            return Err(TransportError::init(e.to_string()));
        }
    }

    tokio::select! {
        _ = wait_for_shutdown(&server, signals) => {}
        // The listener died underneath us.
        joined = &mut serving => {
            server.lifecycle().begin_draining().ok();
            server.lifecycle().mark_stopped().ok();
            return match joined {
                Ok(result) => result,
                Err(e) => Err(TransportError::http(format!("listener task failed: {}", e))),
            };
        }
    }

    drain(&server).await;
    close_listener(&mut serving).await;
    Ok(())
}

#[cfg(feature = "stdio")]
async fn run_stdio(server: McpServer, signals: &mut Signals) -> TransportResult<()> {
    match start(&server, signals).await {
        Ok(Startup::Ready(summary)) => info!("Ready: {} tools", summary.tool_count),
        Ok(Startup::Interrupted(signal)) => {
            info!("Received {} before the catalog was ready, shutting down", signal);
            drain(&server).await;
            return Ok(());
        }
        Err(e) => return Err(TransportError::init(e.to_string())),
    }

    let result = tokio::select! {
        result = StdioTransport::run(server.clone()) => result,
        _ = wait_for_shutdown(&server, signals) => Ok(()),
    };
    drain(&server).await;
    result
}

/// Block until SIGINT, SIGTERM or an internal stop, reloading on SIGHUP.
async fn wait_for_shutdown(server: &McpServer, signals: &mut Signals) {
    let stopped = server.lifecycle().shutdown_token();

    loop {
        tokio::select! {
            signal = signals.recv() => match signal {
                Signal::Hangup => {
                    info!("Received SIGHUP, reloading catalog");
                    let server = server.clone();
                    // Failures are logged by reload; the old catalog stays live.
                    tokio::spawn(async move { server.reload().await.ok() });
                }
                other => {
                    info!("Received {}, shutting down", other);
                    return;
                }
            },
            _ = stopped.cancelled() => return,
        }
    }
}

/// Stop accepting work, give in-flight calls the grace period, then stop.
async fn drain(server: &McpServer) {
    let lifecycle = server.lifecycle();
    let grace = server.config().lifecycle.shutdown_grace;

    if let Err(e) = lifecycle.begin_draining() {
        warn!("{}", e);
    }
    info!(
        "Draining: {} invocations in flight, grace {}s",
        lifecycle.in_flight(),
        grace.as_secs()
    );

    if !lifecycle.wait_idle(grace).await {
        warn!(
            "Grace period elapsed with {} invocations still running",
            lifecycle.in_flight()
        );
    }

    if let Err(e) = lifecycle.mark_stopped() {
        warn!("{}", e);
    }
    info!("Stopped after {}s", lifecycle.uptime().as_secs());
}

async fn close_listener(serving: &mut tokio::task::JoinHandle<TransportResult<()>>) {
    match tokio::time::timeout(LISTENER_CLOSE_TIMEOUT, &mut *serving).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => error!("HTTP listener failed: {}", e),
        Ok(Err(e)) => error!("HTTP listener task failed: {}", e),
        Err(_) => {
            warn!("HTTP listener did not close in time; aborting open connections");
            serving.abort();
        }
    }
}
