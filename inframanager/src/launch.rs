// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Startup and shutdown sequence of the agent.

use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use config::{AgentConfig, StoreBackend};
use mgmt::{ApiServer, ProvisionEngine, ServerError, ServerOptions};
use p4rt::{P4CniProgrammer, SessionError, SessionManager, SessionOptions};
use store::{FileStore, MemoryStore, RecordStore, StoreError};

#[derive(Debug, Error)]
pub(crate) enum LaunchError {
    #[error("Failed to open the endpoint store: {0}")]
    Store(#[from] StoreError),
    #[error("P4Runtime session failed: {0}")]
    Session(#[from] SessionError),
    #[error("Failed to set the forwarding pipeline: {0}")]
    Pipeline(#[source] SessionError),
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error("gRPC server task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub(crate) async fn open_store(config: &AgentConfig) -> Result<Arc<dyn RecordStore>, StoreError> {
    let store: Arc<dyn RecordStore> = match config.store.backend {
        StoreBackend::Memory => {
            warn!("Using an in-memory endpoint store, endpoints will not survive a restart");
            Arc::new(MemoryStore::new())
        }
        StoreBackend::File => Arc::new(FileStore::open(&config.store.path).await?),
    };
    let restored = store.list().await?;
    info!("{} endpoints restored", restored.len());
    for record in restored {
        debug!("Restored {record}");
    }
    Ok(store)
}

/// Connect to the device and become its primary client.
///
/// Failing to reach the server is fatal. Failing to become primary is fatal too, unless the
/// configuration tolerates running as backup.
pub(crate) async fn open_session(
    config: &AgentConfig,
    supervisor: &CancellationToken,
) -> Result<Arc<SessionManager>, SessionError> {
    let session = Arc::new(SessionManager::new(SessionOptions::from(config)));
    let election = config.client.election_id;
    match session
        .open_session(election.high, election.low, supervisor)
        .await
    {
        Ok(()) => {}
        Err(SessionError::ElectionTimeout(timeout)) if config.client.tolerate_backup => {
            warn!("Not primary after {timeout:?}, running as backup until promoted");
        }
        Err(e) => {
            error!("Failed to open P4Runtime session: {e}");
            session.close_session().await;
            return Err(e);
        }
    }
    Ok(session)
}

async fn set_pipeline(config: &AgentConfig, session: &SessionManager) -> Result<(), SessionError> {
    let Some(pipeline) = config.p4_pipeline.as_ref().filter(|p| p.set_on_start) else {
        debug!("No forwarding pipeline to set at start");
        return Ok(());
    };
    let (Some(bin), Some(p4info)) = (&pipeline.bin_path, &pipeline.p4_info_path) else {
        // rejected by config validation
        return Ok(());
    };
    session
        .set_forwarding_pipeline(bin, p4info, pipeline.cookie)
        .await?;
    Ok(())
}

/// Run the agent until `supervisor` is cancelled or the gRPC server fails.
pub(crate) async fn run(config: AgentConfig, supervisor: CancellationToken) -> Result<(), LaunchError> {
    let store = open_store(&config).await?;
    let session = open_session(&config, &supervisor).await?;
    if let Err(e) = set_pipeline(&config, &session).await {
        error!("Failed to set the forwarding pipeline: {e}");
        session.close_session().await;
        return Err(LaunchError::Pipeline(e));
    }

    let programmer = Arc::new(P4CniProgrammer::new(session.clone(), config.dataplane));
    let engine = Arc::new(ProvisionEngine::new(store, programmer));
    let served = serve(&config, engine, &supervisor).await;

    session.close_session().await;
    served
}

async fn serve(
    config: &AgentConfig,
    engine: Arc<ProvisionEngine>,
    supervisor: &CancellationToken,
) -> Result<(), LaunchError> {
    let mut server = ApiServer::bind(ServerOptions::from(config), engine).await?;
    let handle = server.start(supervisor)?;
    let result = handle.await;
    server.stop().await;
    result??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use test_utils::{Arbitration, FakeP4Runtime};

    fn config_for(fake: &FakeP4Runtime) -> AgentConfig {
        let mut config = AgentConfig::default();
        config.client.addr = fake.addr().to_string();
        config.client.election_timeout_secs = 1;
        config.infra_manager.addr = "127.0.0.1:0".parse().unwrap();
        config.store.backend = StoreBackend::Memory;
        config
    }

    #[tokio::test]
    async fn election_timeout_is_fatal_unless_tolerated() {
        let fake = FakeP4Runtime::start(Arbitration::Backup).await;
        let mut config = config_for(&fake);
        let supervisor = CancellationToken::new();

        assert!(matches!(
            open_session(&config, &supervisor).await,
            Err(SessionError::ElectionTimeout(_))
        ));

        config.client.tolerate_backup = true;
        let session = open_session(&config, &supervisor).await.unwrap();
        assert!(session.is_open());
        assert!(!session.is_primary());
        session.close_session().await;
    }

    #[tokio::test]
    async fn runs_until_cancelled() {
        let fake = FakeP4Runtime::start(Arbitration::Primary).await;
        let config = config_for(&fake);
        let supervisor = CancellationToken::new();
        let agent = tokio::spawn(run(config, supervisor.clone()));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!agent.is_finished());
        supervisor.cancel();
        tokio::time::timeout(Duration::from_secs(5), agent)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn pipeline_is_pushed_at_start() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("k8s_dp.pb.bin");
        let p4info = dir.path().join("k8s_dp.p4info.bin");
        std::fs::write(&bin, b"bin").unwrap();
        std::fs::write(&p4info, b"info").unwrap();

        let fake = FakeP4Runtime::start(Arbitration::Primary).await;
        let mut config = config_for(&fake);
        config.p4_pipeline = Some(config::PipelineConfig {
            bin_path: Some(bin),
            p4_info_path: Some(p4info),
            cookie: 42,
            set_on_start: true,
        });
        let session = open_session(&config, &CancellationToken::new()).await.unwrap();
        set_pipeline(&config, &session).await.unwrap();
        let pushed = fake.pipeline().unwrap();
        assert_eq!(pushed.p4_device_config, b"bin");
        assert_eq!(pushed.cookie.map(|c| c.cookie), Some(42));
        session.close_session().await;
    }

    #[tokio::test]
    async fn file_store_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AgentConfig::default();
        config.store.path = dir.path().join("state").join("endpoints.json");
        let store = open_store(&config).await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }
}
