// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! A [`RecordStore`] over [`MemoryStore`] with injectable failures.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::net::IpAddr;
use std::path::PathBuf;
use store::{EndpointRecord, MemoryStore, RecordStore, StoreError};

#[derive(Debug, Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    fail_gets: Mutex<bool>,
    fail_writes: Mutex<bool>,
    fail_deletes: Mutex<bool>,
}

fn injected() -> StoreError {
    StoreError::Io {
        path: PathBuf::from("faulty-store"),
        source: std::io::Error::other("injected failure"),
    }
}

impl FaultyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    /// Lookups fail while set.
    pub fn fail_gets(&self, fail: bool) {
        *self.fail_gets.lock() = fail;
    }

    /// Writes fail while set.
    pub fn fail_writes(&self, fail: bool) {
        *self.fail_writes.lock() = fail;
    }

    /// Deletes fail while set.
    pub fn fail_deletes(&self, fail: bool) {
        *self.fail_deletes.lock() = fail;
    }
}

#[async_trait]
impl RecordStore for FaultyStore {
    async fn get(&self, ip: IpAddr) -> Result<Option<EndpointRecord>, StoreError> {
        if *self.fail_gets.lock() {
            return Err(injected());
        }
        self.inner.get(ip).await
    }

    async fn write(&self, record: EndpointRecord) -> Result<(), StoreError> {
        if *self.fail_writes.lock() {
            return Err(injected());
        }
        self.inner.write(record).await
    }

    async fn delete(&self, ip: IpAddr) -> Result<(), StoreError> {
        if *self.fail_deletes.lock() {
            return Err(injected());
        }
        self.inner.delete(ip).await
    }

    async fn list(&self) -> Result<Vec<EndpointRecord>, StoreError> {
        self.inner.list().await
    }
}
