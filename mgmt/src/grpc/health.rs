// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};

use crate::proto::health::health_check_response::ServingStatus;
use crate::proto::health::health_server::Health;
use crate::proto::health::{HealthCheckRequest, HealthCheckResponse};
use crate::server::ServerStatus;

/// `grpc.health.v1.Health`, reporting the [`ServerStatus`] of the process.
pub struct HealthService {
    status: ServerStatus,
}

impl HealthService {
    #[must_use]
    pub fn new(status: ServerStatus) -> Self {
        Self { status }
    }
}

#[tonic::async_trait]
impl Health for HealthService {
    async fn check(
        &self,
        _request: Request<HealthCheckRequest>,
    ) -> Result<Response<HealthCheckResponse>, Status> {
        if self.status.is_serving() {
            Ok(Response::new(HealthCheckResponse {
                status: ServingStatus::Serving.into(),
            }))
        } else {
            Err(Status::unavailable("InfraManager server is not serving"))
        }
    }

    type WatchStream = ReceiverStream<Result<HealthCheckResponse, Status>>;

    async fn watch(
        &self,
        _request: Request<HealthCheckRequest>,
    ) -> Result<Response<Self::WatchStream>, Status> {
        Err(Status::unimplemented("Unimplemented"))
    }
}
