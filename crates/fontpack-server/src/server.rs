//! HTTP/1 accept loop.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::pin;
use std::sync::Arc;

use fontpack_core::{HttpTransport, Pipeline, Transport};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::config::FontpackConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::FontpackHandler;
use crate::shutdown::{ConnectionTracker, ShutdownSignal};

/// The fontpack HTTP server.
#[derive(Debug)]
pub struct FontpackServer<T = HttpTransport> {
    config: Arc<FontpackConfig>,
    handler: Arc<FontpackHandler<T>>,
}

impl FontpackServer<HttpTransport> {
    /// Create a server fetching over HTTP with the configured timeout.
    pub fn new(config: FontpackConfig) -> ServerResult<Self> {
        let transport = HttpTransport::new(config.upstream.timeout)
            .map_err(|e| ServerError::transport(e.to_string()))?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }
}

impl<T: Transport> FontpackServer<T> {
    /// Create a server over an arbitrary transport.
    pub fn with_transport(config: FontpackConfig, transport: Arc<T>) -> Self {
        let pipeline = Pipeline::new(
            transport,
            config.upstream.base_url.clone(),
            config.upstream.concurrency,
        );
        let handler = FontpackHandler::new(
            pipeline,
            config.server.home_url.clone(),
            config.server.request_timeout,
        );
        Self {
            config: Arc::new(config),
            handler: Arc::new(handler),
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &FontpackConfig {
        &self.config
    }

    /// The request handler.
    pub fn handler(&self) -> &Arc<FontpackHandler<T>> {
        &self.handler
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> ServerResult<TcpListener> {
        let addr = self.config.socket_addr()?;
        TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::bind(addr.to_string(), e))
    }

    /// Run until SIGTERM or SIGINT.
    pub async fn run(self) -> ServerResult<()> {
        self.run_with_shutdown(ShutdownSignal::with_os_signals()).await
    }

    /// Bind and run until `shutdown` is triggered.
    pub async fn run_with_shutdown(self, shutdown: ShutdownSignal) -> ServerResult<()> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }

    /// Serve connections from an already bound listener.
    ///
    /// Once `shutdown` fires no new connections are accepted; open ones
    /// finish their current response and the call returns when they have
    /// closed or `shutdown_timeout` elapses.
    pub async fn serve(self, listener: TcpListener, shutdown: ShutdownSignal) -> ServerResult<()> {
        let local_addr = listener.local_addr()?;
        info!("Listening on {}...", local_addr);
        info!(upstream = %self.config.upstream.base_url, concurrency = self.config.upstream.concurrency, "upstream");

        let tracker = ConnectionTracker::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let handler = Arc::clone(&self.handler);
                        let token = tracker.acquire();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            serve_connection(handler, stream, peer, shutdown).await;
                            drop(token);
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "failed to accept connection");
                    }
                },
                () = shutdown.recv() => {
                    info!("Shutdown signal received, no longer accepting connections");
                    break;
                }
            }
        }

        let shutdown_timeout = self.config.server.shutdown_timeout;
        info!(
            "Waiting up to {:?} for {} connections to close",
            shutdown_timeout,
            tracker.active_connections()
        );

        tokio::select! {
            () = tracker.wait_for_drain() => {
                info!("All connections closed");
            }
            () = tokio::time::sleep(shutdown_timeout) => {
                warn!(
                    "Shutdown timeout reached, {} connections still active",
                    tracker.active_connections()
                );
            }
        }

        info!("Server stopped");
        Ok(())
    }
}

async fn serve_connection<T: Transport>(
    handler: Arc<FontpackHandler<T>>,
    stream: TcpStream,
    peer: SocketAddr,
    shutdown: ShutdownSignal,
) {
    let service = service_fn(move |req: Request<Incoming>| {
        let handler = Arc::clone(&handler);
        async move { Ok::<_, Infallible>(handler.handle(req).await) }
    });

    let mut conn = pin!(http1::Builder::new().serve_connection(TokioIo::new(stream), service));

    let result = tokio::select! {
        result = conn.as_mut() => result,
        () = shutdown.recv() => {
            debug!(%peer, "finishing connection for shutdown");
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };

    if let Err(e) = result {
        debug!(%peer, error = %e, "connection error");
    }
}
