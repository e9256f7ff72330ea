// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Lifecycle of the infra manager gRPC server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::{debug, error, info};

use crate::grpc::{HealthService, InfraAgentService};
use crate::proto::health::health_server::HealthServer;
use crate::proto::infra_agent_server::InfraAgentServer;
use crate::provision::ProvisionEngine;
use config::AgentConfig;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("Server already started")]
    AlreadyStarted,
    #[error("gRPC server failed: {0}")]
    Serve(#[from] tonic::transport::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServingState {
    #[default]
    Stopped,
    Serving,
}

/// Whether the server accepts requests, shared with the health service.
#[derive(Debug, Clone)]
pub struct ServerStatus(Arc<watch::Sender<ServingState>>);

impl Default for ServerStatus {
    fn default() -> Self {
        let (tx, _) = watch::channel(ServingState::Stopped);
        Self(Arc::new(tx))
    }
}

impl ServerStatus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, state: ServingState) {
        self.0.send_replace(state);
    }

    #[must_use]
    pub fn get(&self) -> ServingState {
        *self.0.borrow()
    }

    #[must_use]
    pub fn is_serving(&self) -> bool {
        self.get() == ServingState::Serving
    }

    /// Completes once the state is [`ServingState::Stopped`].
    pub async fn stopped(&self) {
        let mut rx = self.0.subscribe();
        // the sender lives in self, so the channel can't close under us
        let _ = rx.wait_for(|s| *s == ServingState::Stopped).await;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    pub addr: SocketAddr,
    /// HTTP/2 and TCP keepalive interval.
    pub keepalive: Option<Duration>,
    /// Deadline given to each provisioning request.
    pub request_timeout: Option<Duration>,
}

impl From<&AgentConfig> for ServerOptions {
    fn from(config: &AgentConfig) -> Self {
        Self {
            addr: config.infra_manager.addr,
            keepalive: config.infra_manager.keepalive.map(Duration::from_secs),
            request_timeout: config.request_timeout(),
        }
    }
}

pub struct ApiServer {
    addr: SocketAddr,
    listener: Option<TcpListener>,
    options: ServerOptions,
    engine: Arc<ProvisionEngine>,
    status: ServerStatus,
    shutdown: CancellationToken,
}

impl ApiServer {
    /// Bind the listening socket. Nothing is served before [`Self::start`].
    pub async fn bind(
        options: ServerOptions,
        engine: Arc<ProvisionEngine>,
    ) -> Result<Self, ServerError> {
        let bind_error = |source| ServerError::Bind {
            addr: options.addr,
            source,
        };
        let listener = TcpListener::bind(options.addr).await.map_err(bind_error)?;
        let addr = listener.local_addr().map_err(bind_error)?;
        debug!("Bound gRPC listener to {addr}");
        Ok(Self {
            addr,
            listener: Some(listener),
            options,
            engine,
            status: ServerStatus::new(),
            shutdown: CancellationToken::new(),
        })
    }

    /// The address actually bound, useful when binding port 0.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    #[must_use]
    pub fn status(&self) -> ServerStatus {
        self.status.clone()
    }

    /// Serve in a background task until [`Self::stop`] is called or `supervisor` is cancelled.
    ///
    /// The returned handle resolves when serving ends; a failure of the accept loop is its
    /// error.
    pub fn start(
        &mut self,
        supervisor: &CancellationToken,
    ) -> Result<JoinHandle<Result<(), ServerError>>, ServerError> {
        let listener = self.listener.take().ok_or(ServerError::AlreadyStarted)?;
        let keepalive = self.options.keepalive;
        let agent = InfraAgentService::new(self.engine.clone(), self.options.request_timeout);
        let health = HealthService::new(self.status.clone());
        let router = Server::builder()
            .http2_keepalive_interval(keepalive)
            .tcp_keepalive(keepalive)
            .add_service(InfraAgentServer::new(agent))
            .add_service(HealthServer::new(health));

        let supervisor = supervisor.clone();
        let shutdown = self.shutdown.clone();
        let signal = async move {
            tokio::select! {
                () = supervisor.cancelled() => info!("API server received stop signal"),
                () = shutdown.cancelled() => {}
            }
            info!("Stopping infra-manager gRPC server");
        };

        let status = self.status.clone();
        let addr = self.addr;
        status.set(ServingState::Serving);
        info!("Infra Manager serving on tcp://{addr}");
        Ok(tokio::spawn(async move {
            let result = router
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), signal)
                .await;
            status.set(ServingState::Stopped);
            match result {
                Ok(()) => {
                    info!("Infra-manager gRPC server on {addr} stopped");
                    Ok(())
                }
                Err(e) => {
                    error!("Failed to serve: {e}");
                    Err(e.into())
                }
            }
        }))
    }

    /// Stop accepting, let in-flight requests finish and release the listener.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        self.status.stopped().await;
    }
}
