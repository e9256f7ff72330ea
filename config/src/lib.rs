// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Configuration model of the infra manager. The agent reads a YAML file at start, command
//! line flags are then applied on top (see the args crate) and the result is validated once
//! before anything connects anywhere.

#![deny(
    unsafe_code,
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![allow(clippy::missing_errors_doc)]

pub mod agent;
pub mod errors;

pub use agent::{
    AgentConfig, ClientConfig, DataplaneConfig, ElectionIdConfig, InfraManagerConfig,
    PipelineConfig, StoreBackend, StoreConfig,
}; // re-export
pub use errors::{ConfigError, ConfigResult}; // re-export

use tracectl::trace_target;
trace_target!("config", LevelFilter::INFO, &["management"]);
