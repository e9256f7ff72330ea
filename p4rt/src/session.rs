// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The single control session to the P4Runtime server.
//!
//! A [`SessionManager`] holds at most one session. Opening it dials the server, checks its
//! capabilities and starts arbitration; the caller then waits, for a bounded time, until the
//! server grants us the primary role. The arbitration loop outlives that wait: a session that
//! timed out waiting stays installed and follows later role changes.

use parking_lot::{Mutex, RwLock};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, error, info, warn};

use crate::arbitration::{self, Arbiter, ElectionId, Role};
use crate::error::SessionError;
use crate::pipeline::{FwdPipeConfig, ResponseType};
use crate::proto::p4_runtime_client::P4RuntimeClient;
use crate::proto::{
    CapabilitiesRequest, GetForwardingPipelineConfigRequest, SetForwardingPipelineConfigRequest,
    Update, WriteRequest, set_forwarding_pipeline_config_request,
};
use config::AgentConfig;

/// How to reach the runtime server and how long to wait for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// `host:port` of the P4Runtime server.
    pub addr: String,
    pub device_id: u64,
    pub election_timeout: Duration,
    pub arbitration_retry: Duration,
    pub connect_timeout: Duration,
}

impl SessionOptions {
    #[must_use]
    pub fn new(addr: impl Into<String>, device_id: u64) -> Self {
        Self {
            addr: addr.into(),
            device_id,
            election_timeout: Duration::from_secs(5),
            arbitration_retry: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&AgentConfig> for SessionOptions {
    fn from(config: &AgentConfig) -> Self {
        Self {
            election_timeout: config.client.election_timeout(),
            arbitration_retry: config.client.arbitration_retry(),
            ..Self::new(config.client.addr.clone(), config.device_id)
        }
    }
}

/// Where the session stands. The last three states are only reached with a session installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Connecting,
    Handshaking,
    Arbitrating,
    Primary,
    Backup,
}

struct Session {
    client: P4RuntimeClient<Channel>,
    api_version: String,
    election_id: ElectionId,
    role: watch::Receiver<Role>,
    stop: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    fn role(&self) -> Role {
        *self.role.borrow()
    }
}

pub struct SessionManager {
    options: SessionOptions,
    session: RwLock<Option<Arc<Session>>>,
    phase: Mutex<SessionState>,
}

impl SessionManager {
    #[must_use]
    pub fn new(options: SessionOptions) -> Self {
        Self {
            options,
            session: RwLock::new(None),
            phase: Mutex::new(SessionState::Init),
        }
    }

    #[must_use]
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    fn set_phase(&self, phase: SessionState) {
        *self.phase.lock() = phase;
    }

    fn current(&self) -> Result<Arc<Session>, SessionError> {
        self.session
            .read()
            .as_ref()
            .cloned()
            .ok_or(SessionError::NotConnected)
    }

    fn current_primary(&self) -> Result<Arc<Session>, SessionError> {
        let session = self.current()?;
        if session.role() == Role::Primary {
            Ok(session)
        } else {
            Err(SessionError::NotPrimary)
        }
    }

    /// Establish the session and wait until we are the primary client.
    ///
    /// The arbitration loop keeps running until `cancel` fires or [`Self::close_session`] is
    /// called, including when this returns [`SessionError::ElectionTimeout`].
    pub async fn open_session(
        &self,
        election_high: u64,
        election_low: u64,
        cancel: &CancellationToken,
    ) -> Result<(), SessionError> {
        if self.session.read().is_some() {
            warn!("Replacing the open P4Runtime session");
            self.close_session().await;
        }
        let election_id = ElectionId::new(election_high, election_low);
        let primary = match self.establish(election_id, cancel).await {
            Ok(primary) => primary,
            Err(e) => {
                self.set_phase(SessionState::Init);
                return Err(e);
            }
        };

        let timeout = self.options.election_timeout;
        match tokio::time::timeout(timeout, primary).await {
            Ok(Ok(())) => {
                info!("Primary client for device {}", self.options.device_id);
                Ok(())
            }
            Ok(Err(_)) => {
                warn!("Session closed before becoming primary");
                Err(SessionError::NotConnected)
            }
            Err(_) => {
                error!("Could not become the primary client within {timeout:?}");
                Err(SessionError::ElectionTimeout(timeout))
            }
        }
    }

    async fn establish(
        &self,
        election_id: ElectionId,
        cancel: &CancellationToken,
    ) -> Result<oneshot::Receiver<()>, SessionError> {
        let addr = &self.options.addr;
        info!("Connecting to P4Runtime Server at {addr}");
        self.set_phase(SessionState::Connecting);
        let connect_error = |reason: String| SessionError::Connect {
            addr: addr.clone(),
            reason,
        };
        let channel = Endpoint::from_shared(format!("http://{addr}"))
            .map_err(|e| connect_error(e.to_string()))?
            .connect_timeout(self.options.connect_timeout)
            .connect()
            .await
            .map_err(|e| connect_error(e.to_string()))?;

        self.set_phase(SessionState::Handshaking);
        let mut client = P4RuntimeClient::new(channel);
        let api_version = client
            .capabilities(CapabilitiesRequest {})
            .await
            .map_err(SessionError::Handshake)?
            .into_inner()
            .p4runtime_api_version;
        info!("P4Runtime server version is {api_version}");

        self.set_phase(SessionState::Arbitrating);
        let device_id = self.options.device_id;
        let stream = arbitration::open_stream(&mut client, device_id, election_id)
            .await
            .map_err(SessionError::Handshake)?;

        let (role_tx, role_rx) = watch::channel(Role::Unknown);
        let (primary_tx, primary_rx) = oneshot::channel();
        let stop = cancel.child_token();
        let arbiter = Arbiter {
            client: client.clone(),
            device_id,
            election_id,
            retry: self.options.arbitration_retry,
            role: role_tx,
            primary: Some(primary_tx),
            stop: stop.clone(),
        };
        let task = tokio::spawn(arbiter.run(stream));

        let session = Session {
            client,
            api_version,
            election_id,
            role: role_rx,
            stop,
            task: Mutex::new(Some(task)),
        };
        *self.session.write() = Some(Arc::new(session));
        Ok(primary_rx)
    }

    /// Stop the arbitration loop and drop the connection. Closing twice is harmless.
    pub async fn close_session(&self) {
        let session = self.session.write().take();
        self.set_phase(SessionState::Init);
        let Some(session) = session else {
            debug!("No P4Runtime session to close");
            return;
        };
        session.stop.cancel();
        let task = session.task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!("Arbitration task ended abnormally: {e}");
        }
        info!("Closed P4Runtime session to {}", self.options.addr);
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.session.read().is_some()
    }

    /// Current role; [`Role::Unknown`] without a session.
    #[must_use]
    pub fn role(&self) -> Role {
        self.session
            .read()
            .as_ref()
            .map_or(Role::Unknown, |s| s.role())
    }

    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.role() == Role::Primary
    }

    /// Follow role changes of the current session.
    #[must_use]
    pub fn watch_role(&self) -> Option<watch::Receiver<Role>> {
        self.session.read().as_ref().map(|s| s.role.clone())
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        match self.session.read().as_ref().map(|s| s.role()) {
            Some(Role::Unknown) => SessionState::Arbitrating,
            Some(Role::Primary) => SessionState::Primary,
            Some(Role::Backup) => SessionState::Backup,
            None => *self.phase.lock(),
        }
    }

    /// Protocol version reported by the server at handshake.
    #[must_use]
    pub fn api_version(&self) -> Option<String> {
        self.session.read().as_ref().map(|s| s.api_version.clone())
    }

    /// Query the forwarding pipeline of the device. Backups may read it.
    pub async fn get_forwarding_pipeline(
        &self,
        response_type: ResponseType,
    ) -> Result<FwdPipeConfig, SessionError> {
        let session = self.current()?;
        let request = GetForwardingPipelineConfigRequest {
            device_id: self.options.device_id,
            response_type: crate::proto::get_forwarding_pipeline_config_request::ResponseType::from(
                response_type,
            )
            .into(),
        };
        let response = session
            .client
            .clone()
            .get_forwarding_pipeline_config(request)
            .await?
            .into_inner();
        Ok(response.config.map(FwdPipeConfig::from).unwrap_or_default())
    }

    /// Push a forwarding pipeline to the device (verify and commit). Only the primary may.
    pub async fn set_forwarding_pipeline(
        &self,
        bin_path: &Path,
        p4info_path: &Path,
        cookie: u64,
    ) -> Result<FwdPipeConfig, SessionError> {
        let session = self.current_primary()?;
        let config = FwdPipeConfig::load(bin_path, p4info_path, cookie).await?;
        let request = SetForwardingPipelineConfigRequest {
            device_id: self.options.device_id,
            role_id: 0,
            election_id: Some(session.election_id.into()),
            action: set_forwarding_pipeline_config_request::Action::VerifyAndCommit.into(),
            config: Some(config.clone().into()),
            role: String::new(),
        };
        session
            .client
            .clone()
            .set_forwarding_pipeline_config(request)
            .await?;
        info!(
            "Forwarding pipeline {} set with cookie {cookie}",
            bin_path.display()
        );
        Ok(config)
    }

    /// Send table updates to the device. Only the primary may.
    pub async fn write(&self, updates: Vec<Update>) -> Result<(), SessionError> {
        let session = self.current_primary()?;
        let request = WriteRequest {
            device_id: self.options.device_id,
            role_id: 0,
            election_id: Some(session.election_id.into()),
            updates,
            atomicity: 0,
            role: String::new(),
        };
        session.client.clone().write(request).await?;
        Ok(())
    }
}
