// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The reasons why a configuration may fail to load or be rejected.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml_ng::Error),
    #[error("Device id must be non-zero")]
    ZeroDeviceId,
    #[error("Election id 0/0 is reserved")]
    ZeroElectionId,
    #[error("Missing dataplane id: {0}")]
    MissingDataplaneId(&'static str),
    #[error("Pipeline is set on start but {0} is not configured")]
    MissingPipelinePath(&'static str),
    #[error("Invalid address '{0}': {1}")]
    BadAddress(String, &'static str),
    #[error("{0} must be non-zero")]
    ZeroTimeout(&'static str),
}

/// Result-like type for configurations
pub type ConfigResult = Result<(), ConfigError>;
