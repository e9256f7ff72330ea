// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Volatile record store.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::net::IpAddr;
use tracing::debug;

use crate::{EndpointRecord, RecordStore, StoreError};

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<IpAddr, EndpointRecord>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-populated with `records`.
    pub fn with_records(records: impl IntoIterator<Item = EndpointRecord>) -> Self {
        let records = records.into_iter().map(|r| (r.ip, r)).collect();
        Self {
            records: RwLock::new(records),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(&self, ip: IpAddr) -> Result<Option<EndpointRecord>, StoreError> {
        Ok(self.records.read().get(&ip).copied())
    }

    async fn write(&self, record: EndpointRecord) -> Result<(), StoreError> {
        debug!("Storing {record}");
        self.records.write().insert(record.ip, record);
        Ok(())
    }

    async fn delete(&self, ip: IpAddr) -> Result<(), StoreError> {
        debug!("Removing record for {ip}");
        self.records
            .write()
            .remove(&ip)
            .map(|_| ())
            .ok_or(StoreError::NotFound(ip))
    }

    async fn list(&self) -> Result<Vec<EndpointRecord>, StoreError> {
        Ok(self.records.read().values().copied().collect())
    }
}
