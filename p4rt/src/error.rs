// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Errors of the P4Runtime session and of dataplane programming.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures to establish or use the control session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Cannot connect to P4Runtime server at {addr}: {reason}")]
    Connect { addr: String, reason: String },
    #[error("P4Runtime handshake failed: {0}")]
    Handshake(tonic::Status),
    #[error("No P4Runtime session")]
    NotConnected,
    #[error("Could not become the primary client within {0:?}")]
    ElectionTimeout(Duration),
    #[error("Not the primary client")]
    NotPrimary,
    #[error("Failed to read {path}: {source}")]
    PipelineFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("P4Runtime request failed: {0}")]
    Rpc(#[from] tonic::Status),
}

impl SessionError {
    /// True for the failures to reach or talk to the runtime server at all.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            SessionError::Connect { .. } | SessionError::Handshake(_) | SessionError::NotConnected
        )
    }
}

/// Failures to install or remove forwarding rules.
#[derive(Debug, Error)]
pub enum DataplaneError {
    #[error("No P4Runtime session")]
    NotConnected,
    #[error("Not the primary client, writes are refused")]
    NotPrimary,
    #[error("Endpoint address {0} is not supported by the dataplane tables")]
    UnsupportedAddress(IpAddr),
    #[error("Table write rejected: {0}")]
    Write(tonic::Status),
}

impl DataplaneError {
    /// True if the device may accept the same request later.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            DataplaneError::NotConnected | DataplaneError::NotPrimary => true,
            DataplaneError::UnsupportedAddress(_) => false,
            DataplaneError::Write(status) => matches!(
                status.code(),
                tonic::Code::Unavailable | tonic::Code::DeadlineExceeded | tonic::Code::Aborted
            ),
        }
    }
}

impl From<SessionError> for DataplaneError {
    fn from(value: SessionError) -> Self {
        match value {
            SessionError::NotPrimary => DataplaneError::NotPrimary,
            SessionError::Rpc(status) | SessionError::Handshake(status) => {
                DataplaneError::Write(status)
            }
            _ => DataplaneError::NotConnected,
        }
    }
}
