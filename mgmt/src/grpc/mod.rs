// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! gRPC request reception and response building.

mod agent;
mod health;

pub use agent::InfraAgentService;
pub use health::HealthService;
