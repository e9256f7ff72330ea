// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! A P4Runtime server good enough to exercise the client: scripted arbitration, a pipeline slot
//! and a table store that enforces insert/delete semantics.

use parking_lot::Mutex;
use prost::Message;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, Streaming};
use tracing::debug;

use p4rt::proto::google::rpc;
use p4rt::proto::p4_runtime_server::{P4Runtime, P4RuntimeServer};
use p4rt::proto::{
    CapabilitiesRequest, CapabilitiesResponse, ForwardingPipelineConfig,
    GetForwardingPipelineConfigRequest, GetForwardingPipelineConfigResponse,
    MasterArbitrationUpdate, SetForwardingPipelineConfigRequest,
    SetForwardingPipelineConfigResponse, StreamMessageRequest, StreamMessageResponse, TableEntry,
    WriteRequest, WriteResponse, entity, stream_message_request, stream_message_response, update,
};

/// Version string returned by Capabilities.
pub const FAKE_API_VERSION: &str = "1.3.0";

/// How the fake answers arbitration requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arbitration {
    /// Grant primary right away.
    Primary,
    /// Answer backup, and keep doing so until [`FakeP4Runtime::promote`] is called.
    Backup,
    /// Answer backup, then grant primary after the delay.
    PromoteAfter(Duration),
    /// Never answer.
    Silent,
}

type ResponseTx = mpsc::Sender<Result<StreamMessageResponse, Status>>;
type EntryKey = (u32, Vec<u8>);

#[derive(Default)]
struct FakeState {
    script: Option<Arbitration>,
    streams: Vec<(MasterArbitrationUpdate, ResponseTx)>,
    pipeline: Option<ForwardingPipelineConfig>,
    entries: BTreeMap<EntryKey, TableEntry>,
    write_failures: HashMap<u32, tonic::Code>,
    writes: usize,
}

fn entry_key(entry: &TableEntry) -> EntryKey {
    let key = entry.r#match.iter().flat_map(|m| m.encode_to_vec()).collect();
    (entry.table_id, key)
}

fn arbitration_reply(request: &MasterArbitrationUpdate, code: tonic::Code) -> StreamMessageResponse {
    StreamMessageResponse {
        update: Some(stream_message_response::Update::Arbitration(
            MasterArbitrationUpdate {
                status: Some(rpc::Status {
                    code: code as i32,
                    message: format!("{code:?}"),
                }),
                ..request.clone()
            },
        )),
    }
}

#[derive(Clone)]
struct FakeService {
    state: Arc<Mutex<FakeState>>,
}

impl FakeService {
    fn broadcast(&self, code: tonic::Code) {
        let mut state = self.state.lock();
        state.streams.retain(|(request, tx)| {
            tx.try_send(Ok(arbitration_reply(request, code))).is_ok()
        });
    }
}

#[tonic::async_trait]
impl P4Runtime for FakeService {
    async fn write(&self, request: Request<WriteRequest>) -> Result<Response<WriteResponse>, Status> {
        let request = request.into_inner();
        let mut state = self.state.lock();
        state.writes += 1;
        for upd in request.updates {
            let Some(entity::Entity::TableEntry(entry)) = upd.entity.and_then(|e| e.entity) else {
                return Err(Status::invalid_argument("only table entries are supported"));
            };
            if let Some(code) = state.write_failures.remove(&entry.table_id) {
                return Err(Status::new(code, "injected failure"));
            }
            let key = entry_key(&entry);
            match update::Type::try_from(upd.r#type) {
                Ok(update::Type::Insert) => {
                    if state.entries.contains_key(&key) {
                        return Err(Status::already_exists("entry exists"));
                    }
                    state.entries.insert(key, entry);
                }
                Ok(update::Type::Modify) => {
                    if !state.entries.contains_key(&key) {
                        return Err(Status::not_found("no such entry"));
                    }
                    state.entries.insert(key, entry);
                }
                Ok(update::Type::Delete) => {
                    if state.entries.remove(&key).is_none() {
                        return Err(Status::not_found("no such entry"));
                    }
                }
                _ => return Err(Status::invalid_argument("bad update type")),
            }
        }
        Ok(Response::new(WriteResponse {}))
    }

    async fn set_forwarding_pipeline_config(
        &self,
        request: Request<SetForwardingPipelineConfigRequest>,
    ) -> Result<Response<SetForwardingPipelineConfigResponse>, Status> {
        let config = request
            .into_inner()
            .config
            .ok_or_else(|| Status::invalid_argument("missing config"))?;
        self.state.lock().pipeline = Some(config);
        Ok(Response::new(SetForwardingPipelineConfigResponse {}))
    }

    async fn get_forwarding_pipeline_config(
        &self,
        _request: Request<GetForwardingPipelineConfigRequest>,
    ) -> Result<Response<GetForwardingPipelineConfigResponse>, Status> {
        let config = self.state.lock().pipeline.clone();
        match config {
            Some(config) => Ok(Response::new(GetForwardingPipelineConfigResponse {
                config: Some(config),
            })),
            None => Err(Status::failed_precondition("no pipeline")),
        }
    }

    type StreamChannelStream = ReceiverStream<Result<StreamMessageResponse, Status>>;

    async fn stream_channel(
        &self,
        request: Request<Streaming<StreamMessageRequest>>,
    ) -> Result<Response<Self::StreamChannelStream>, Status> {
        let mut inbound = request.into_inner();
        let (tx, rx) = mpsc::channel(16);
        let service = self.clone();
        tokio::spawn(async move {
            while let Ok(Some(msg)) = inbound.message().await {
                let Some(stream_message_request::Update::Arbitration(arb)) = msg.update else {
                    continue;
                };
                let script = service.state.lock().script;
                debug!("Arbitration request {arb:?}, answering {script:?}");
                let code = match script {
                    Some(Arbitration::Primary) => tonic::Code::Ok,
                    Some(Arbitration::Backup | Arbitration::PromoteAfter(_)) => {
                        tonic::Code::AlreadyExists
                    }
                    Some(Arbitration::Silent) | None => {
                        service.state.lock().streams.push((arb, tx.clone()));
                        continue;
                    }
                };
                if tx.send(Ok(arbitration_reply(&arb, code))).await.is_err() {
                    break;
                }
                service.state.lock().streams.push((arb, tx.clone()));
                if let Some(Arbitration::PromoteAfter(delay)) = script {
                    let service = service.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        service.broadcast(tonic::Code::Ok);
                    });
                }
            }
        });
        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn capabilities(
        &self,
        _request: Request<CapabilitiesRequest>,
    ) -> Result<Response<CapabilitiesResponse>, Status> {
        Ok(Response::new(CapabilitiesResponse {
            p4runtime_api_version: FAKE_API_VERSION.to_string(),
        }))
    }
}

/// A running fake server on an ephemeral loopback port. Stops when dropped.
pub struct FakeP4Runtime {
    addr: SocketAddr,
    service: FakeService,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl FakeP4Runtime {
    /// Start serving with the given arbitration behavior.
    ///
    /// # Panics
    ///
    /// If the loopback listener can't be bound.
    pub async fn start(script: Arbitration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap_or_else(|e| panic!("failed to bind fake P4Runtime listener: {e}"));
        let addr = listener
            .local_addr()
            .unwrap_or_else(|e| panic!("no local address: {e}"));
        let service = FakeService {
            state: Arc::new(Mutex::new(FakeState {
                script: Some(script),
                ..Default::default()
            })),
        };
        let shutdown = CancellationToken::new();
        let server = tonic::transport::Server::builder()
            .add_service(P4RuntimeServer::new(service.clone()))
            .serve_with_incoming_shutdown(
                TcpListenerStream::new(listener),
                shutdown.clone().cancelled_owned(),
            );
        let task = tokio::spawn(async move {
            if let Err(e) = server.await {
                debug!("Fake P4Runtime server stopped: {e}");
            }
        });
        Self {
            addr,
            service,
            shutdown,
            task: Some(task),
        }
    }

    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Grant primary on every open stream, and to every later arbitration request.
    pub fn promote(&self) {
        self.service.state.lock().script = Some(Arbitration::Primary);
        self.service.broadcast(tonic::Code::Ok);
    }

    /// Demote every open stream to backup, and answer backup from now on.
    pub fn demote(&self) {
        self.service.state.lock().script = Some(Arbitration::Backup);
        self.service.broadcast(tonic::Code::AlreadyExists);
    }

    /// Fail the next write touching `table_id` with `code`.
    pub fn fail_next_write(&self, table_id: u32, code: tonic::Code) {
        self.service
            .state
            .lock()
            .write_failures
            .insert(table_id, code);
    }

    /// Installed entries, in table then key order.
    #[must_use]
    pub fn entries(&self) -> Vec<TableEntry> {
        self.service.state.lock().entries.values().cloned().collect()
    }

    #[must_use]
    pub fn entries_in(&self, table_id: u32) -> Vec<TableEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.table_id == table_id)
            .collect()
    }

    /// Number of Write calls received.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.service.state.lock().writes
    }

    #[must_use]
    pub fn pipeline(&self) -> Option<ForwardingPipelineConfig> {
        self.service.state.lock().pipeline.clone()
    }

    /// Stop serving and wait for the server task.
    pub async fn stop(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for FakeP4Runtime {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
