// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Record store persisted as a single JSON document.
//!
//! The whole document is rewritten on every mutation: the new contents go to a sibling temp
//! file, synced to disk, which is then renamed over the store file. The in-memory copy only changes once the
//! rename succeeded, so a failed write leaves both the file and the cache as they were.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{EndpointRecord, RecordStore, StoreError};

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    endpoints: Vec<EndpointRecord>,
}

#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    records: Mutex<BTreeMap<IpAddr, EndpointRecord>>,
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl FileStore {
    /// Open the store at `path`, creating parent directories as needed. A missing file is an
    /// empty store; it is created on the first write.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(io_error(parent))?;
        }
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => BTreeMap::new(),
            Ok(bytes) => {
                let doc: StoreDocument = serde_json::from_slice(&bytes)?;
                doc.endpoints.into_iter().map(|r| (r.ip, r)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(io_error(&path)(e)),
        };
        info!(
            "Opened endpoint store {} with {} records",
            path.display(),
            records.len()
        );
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, records: &BTreeMap<IpAddr, EndpointRecord>) -> Result<(), StoreError> {
        let doc = StoreDocument {
            endpoints: records.values().copied().collect(),
        };
        let bytes = serde_json::to_vec_pretty(&doc)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(io_error(&tmp))?;
        file.write_all(&bytes).await.map_err(io_error(&tmp))?;
        file.sync_all().await.map_err(io_error(&tmp))?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(io_error(&self.path))?;
        debug!("Persisted {} records to {}", records.len(), self.path.display());
        Ok(())
    }
}

#[async_trait]
impl RecordStore for FileStore {
    async fn get(&self, ip: IpAddr) -> Result<Option<EndpointRecord>, StoreError> {
        Ok(self.records.lock().await.get(&ip).copied())
    }

    async fn write(&self, record: EndpointRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let mut updated = records.clone();
        updated.insert(record.ip, record);
        self.persist(&updated).await?;
        *records = updated;
        Ok(())
    }

    async fn delete(&self, ip: IpAddr) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let mut updated = records.clone();
        if updated.remove(&ip).is_none() {
            return Err(StoreError::NotFound(ip));
        }
        self.persist(&updated).await?;
        *records = updated;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<EndpointRecord>, StoreError> {
        Ok(self.records.lock().await.values().copied().collect())
    }
}
