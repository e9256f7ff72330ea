// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! A [`RuleProgrammer`] that records what it is asked to do.

use async_trait::async_trait;
use net::{InterfaceKind, Mac};
use p4rt::{DataplaneError, RuleProgrammer};
use parking_lot::Mutex;
use std::net::IpAddr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgrammerCall {
    Insert {
        kind: InterfaceKind,
        mac: Mac,
        ip: IpAddr,
        port: u32,
    },
    Delete {
        kind: InterfaceKind,
        mac: Mac,
        ip: IpAddr,
        port: u32,
    },
}

#[derive(Debug, Default)]
pub struct FakeProgrammer {
    calls: Mutex<Vec<ProgrammerCall>>,
    fail_inserts: Mutex<usize>,
    fail_deletes: Mutex<usize>,
    delay: Option<Duration>,
}

impl FakeProgrammer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps for `delay` before completing, to widen race windows.
    #[must_use]
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Fail the next `n` inserts.
    pub fn fail_inserts(&self, n: usize) {
        *self.fail_inserts.lock() = n;
    }

    /// Fail the next `n` deletes.
    pub fn fail_deletes(&self, n: usize) {
        *self.fail_deletes.lock() = n;
    }

    #[must_use]
    pub fn calls(&self) -> Vec<ProgrammerCall> {
        self.calls.lock().clone()
    }

    #[must_use]
    pub fn inserts(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, ProgrammerCall::Insert { .. }))
            .count()
    }

    #[must_use]
    pub fn deletes(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, ProgrammerCall::Delete { .. }))
            .count()
    }

    fn take_failure(counter: &Mutex<usize>) -> bool {
        let mut left = counter.lock();
        if *left > 0 {
            *left -= 1;
            true
        } else {
            false
        }
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl RuleProgrammer for FakeProgrammer {
    async fn insert_rules(
        &self,
        kind: InterfaceKind,
        mac: Mac,
        ip: IpAddr,
        port: u32,
    ) -> Result<(), DataplaneError> {
        self.calls.lock().push(ProgrammerCall::Insert {
            kind,
            mac,
            ip,
            port,
        });
        self.pause().await;
        if Self::take_failure(&self.fail_inserts) {
            return Err(DataplaneError::Write(tonic::Status::unavailable(
                "injected insert failure",
            )));
        }
        Ok(())
    }

    async fn delete_rules(
        &self,
        kind: InterfaceKind,
        mac: Mac,
        ip: IpAddr,
        port: u32,
    ) -> Result<(), DataplaneError> {
        self.calls.lock().push(ProgrammerCall::Delete {
            kind,
            mac,
            ip,
            port,
        });
        self.pause().await;
        if Self::take_failure(&self.fail_deletes) {
            return Err(DataplaneError::Write(tonic::Status::internal(
                "injected delete failure",
            )));
        }
        Ok(())
    }
}
