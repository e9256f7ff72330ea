// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Primary/backup arbitration on the P4Runtime stream channel.
//!
//! The arbiter owns the stream for the lifetime of the session. Every arbitration notification
//! from the server is turned into a [`Role`] published on a watch channel; the first time the
//! role becomes [`Role::Primary`] a oneshot is completed so that the opener of the session can
//! stop waiting. If the stream breaks, the role falls back to [`Role::Unknown`] and the stream is
//! re-opened (and arbitration re-sent) after a delay, until the session is stopped.

use std::fmt::Display;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::Streaming;
use tonic::transport::Channel;
use tracing::{debug, error, info, warn};

use crate::proto::p4_runtime_client::P4RuntimeClient;
use crate::proto::{
    MasterArbitrationUpdate, StreamMessageRequest, StreamMessageResponse, Uint128,
    stream_message_request, stream_message_response,
};

/// The 128-bit election id of this controller, fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElectionId {
    pub high: u64,
    pub low: u64,
}

impl ElectionId {
    #[must_use]
    pub fn new(high: u64, low: u64) -> Self {
        Self { high, low }
    }
}

impl From<ElectionId> for Uint128 {
    fn from(value: ElectionId) -> Self {
        Uint128 {
            high: value.high,
            low: value.low,
        }
    }
}

impl From<Uint128> for ElectionId {
    fn from(value: Uint128) -> Self {
        ElectionId::new(value.high, value.low)
    }
}

impl Display for ElectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.high, self.low)
    }
}

/// Role of this controller as last reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    /// No arbitration result yet, or the stream is down.
    #[default]
    Unknown,
    Primary,
    Backup,
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Unknown => write!(f, "unknown"),
            Role::Primary => write!(f, "primary"),
            Role::Backup => write!(f, "backup"),
        }
    }
}

/// An OK status (code 0) grants the primary role, any other code means backup. An absent status
/// decodes as code 0, like any other unset proto3 field.
#[must_use]
pub fn classify(update: &MasterArbitrationUpdate) -> Role {
    match update.status.as_ref().map_or(0, |s| s.code) {
        0 => Role::Primary,
        _ => Role::Backup,
    }
}

#[must_use]
pub fn arbitration_request(device_id: u64, election_id: ElectionId) -> StreamMessageRequest {
    StreamMessageRequest {
        update: Some(stream_message_request::Update::Arbitration(
            MasterArbitrationUpdate {
                device_id,
                role: None,
                election_id: Some(election_id.into()),
                status: None,
            },
        )),
    }
}

/// An open stream channel. The request side stays open as long as this is alive.
pub(crate) struct ArbitrationStream {
    _requests: mpsc::Sender<StreamMessageRequest>,
    responses: Streaming<StreamMessageResponse>,
}

/// Open the stream channel and send the arbitration request on it.
pub(crate) async fn open_stream(
    client: &mut P4RuntimeClient<Channel>,
    device_id: u64,
    election_id: ElectionId,
) -> Result<ArbitrationStream, tonic::Status> {
    let (requests, rx) = mpsc::channel(4);
    requests
        .send(arbitration_request(device_id, election_id))
        .await
        .map_err(|_| tonic::Status::internal("stream request queue closed"))?;
    let responses = client
        .stream_channel(ReceiverStream::new(rx))
        .await?
        .into_inner();
    debug!("Sent arbitration request for device {device_id} with election id {election_id}");
    Ok(ArbitrationStream {
        _requests: requests,
        responses,
    })
}

/// State of the arbitration loop of a session.
pub(crate) struct Arbiter {
    pub(crate) client: P4RuntimeClient<Channel>,
    pub(crate) device_id: u64,
    pub(crate) election_id: ElectionId,
    pub(crate) retry: Duration,
    pub(crate) role: watch::Sender<Role>,
    pub(crate) primary: Option<oneshot::Sender<()>>,
    pub(crate) stop: CancellationToken,
}

impl Arbiter {
    /// Run until the stop token is cancelled.
    pub(crate) async fn run(mut self, mut stream: ArbitrationStream) {
        loop {
            let next = tokio::select! {
                () = self.stop.cancelled() => break,
                next = stream.responses.message() => next,
            };
            match next {
                Ok(Some(msg)) => {
                    self.handle(msg);
                    continue;
                }
                Ok(None) => warn!("Stream channel closed by the P4Runtime server"),
                Err(status) => warn!("Stream channel failed: {status}"),
            }
            self.set_role(Role::Unknown);
            match self.reopen().await {
                Some(reopened) => stream = reopened,
                None => break,
            }
        }
        self.set_role(Role::Unknown);
        debug!("Arbitration loop stopped");
    }

    async fn reopen(&mut self) -> Option<ArbitrationStream> {
        loop {
            tokio::select! {
                () = self.stop.cancelled() => return None,
                () = tokio::time::sleep(self.retry) => {}
            }
            match open_stream(&mut self.client, self.device_id, self.election_id).await {
                Ok(stream) => {
                    info!("Stream channel re-opened");
                    return Some(stream);
                }
                Err(status) => warn!("Failed to re-open stream channel: {status}"),
            }
        }
    }

    fn handle(&mut self, msg: StreamMessageResponse) {
        match msg.update {
            Some(stream_message_response::Update::Arbitration(update)) => {
                let role = classify(&update);
                self.set_role(role);
                if role == Role::Primary {
                    info!("We are the primary client!");
                    if let Some(primary) = self.primary.take() {
                        let _ = primary.send(());
                    }
                } else {
                    let reason = update.status.map(|s| s.message).unwrap_or_default();
                    error!("We are not the primary client! {reason}");
                }
            }
            Some(stream_message_response::Update::Error(err)) => {
                warn!("Stream error from server: {} ({})", err.message, err.canonical_code);
            }
            None => debug!("Ignoring empty stream message"),
        }
    }

    fn set_role(&self, role: Role) {
        self.role.send_if_modified(|current| {
            if *current == role {
                false
            } else {
                debug!("Role changed from {current} to {role}");
                *current = role;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::google::rpc::Status;

    fn update(code: Option<i32>) -> MasterArbitrationUpdate {
        MasterArbitrationUpdate {
            device_id: 1,
            role: None,
            election_id: Some(ElectionId::new(0, 1).into()),
            status: code.map(|code| Status {
                code,
                message: String::new(),
            }),
        }
    }

    #[test]
    fn ok_status_is_primary() {
        assert_eq!(classify(&update(Some(0))), Role::Primary);
        assert_eq!(classify(&update(None)), Role::Primary);
    }

    #[test]
    fn any_other_status_is_backup() {
        // ALREADY_EXISTS is what servers send to backups
        assert_eq!(classify(&update(Some(6))), Role::Backup);
        assert_eq!(classify(&update(Some(5))), Role::Backup);
    }

    #[test]
    fn arbitration_request_carries_ids() {
        let req = arbitration_request(7, ElectionId::new(2, 3));
        let Some(stream_message_request::Update::Arbitration(arb)) = req.update else {
            unreachable!()
        };
        assert_eq!(arb.device_id, 7);
        assert_eq!(arb.election_id, Some(Uint128 { high: 2, low: 3 }));
    }
}
