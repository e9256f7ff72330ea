// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Infra manager management module: the gRPC front the CNI and policy agents talk to, and the
//! engine that provisions endpoints behind it.

#![deny(
    unsafe_code,
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::panic))]
#![allow(clippy::missing_errors_doc)]

/* gRPC services */
pub mod grpc;

/* Endpoint provisioning */
pub mod provision;

/* gRPC server lifecycle */
pub mod server;

/// Types and stubs generated from the service definitions.
#[allow(clippy::all, clippy::pedantic, unreachable_pub)]
pub mod proto {
    pub mod infra_agent {
        tonic::include_proto!("infra_agent");
    }
    pub mod health {
        tonic::include_proto!("grpc.health.v1");
    }
    pub use infra_agent::*;
}

pub use provision::{InconsistencyWindow, ProvisionEngine, ProvisionError, RequestContext};
pub use server::{ApiServer, ServerError, ServerOptions, ServerStatus, ServingState};

use tracectl::trace_target;
trace_target!("mgmt", LevelFilter::INFO, &["provisioning", "grpc"]);
