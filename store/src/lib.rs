// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Local record of the endpoints whose forwarding rules are programmed in the dataplane.
//!
//! Records are keyed by endpoint IP and never updated in place: an endpoint is written once
//! when its rules are installed and deleted when they are removed.

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

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use net::Mac;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::net::IpAddr;
use std::path::PathBuf;
use thiserror::Error;

use tracectl::trace_target;
trace_target!("store", LevelFilter::INFO, &["provisioning"]);

/// An endpoint whose rules are installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointRecord {
    pub ip: IpAddr,
    pub port: u32,
    pub mac: Mac,
}

impl EndpointRecord {
    #[must_use]
    pub fn new(ip: IpAddr, port: u32, mac: Mac) -> Self {
        Self { ip, port, mac }
    }
}

impl Display for EndpointRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} mac {} port {}", self.ip, self.mac, self.port)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("No record for {0}")]
    NotFound(IpAddr),
    #[error("I/O failure on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed store document: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Key-value access to endpoint records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// The record for `ip`, if any.
    async fn get(&self, ip: IpAddr) -> Result<Option<EndpointRecord>, StoreError>;
    /// Insert a record, replacing any record with the same ip.
    async fn write(&self, record: EndpointRecord) -> Result<(), StoreError>;
    /// Remove the record for `ip`. Fails with [`StoreError::NotFound`] if there is none.
    async fn delete(&self, ip: IpAddr) -> Result<(), StoreError>;
    /// Every record, ordered by ip.
    async fn list(&self) -> Result<Vec<EndpointRecord>, StoreError>;
}
