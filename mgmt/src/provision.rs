// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Endpoint provisioning.
//!
//! An endpoint is provisioned by installing its forwarding rules and then recording it in the
//! store; it is deprovisioned in the reverse order. The store is the source of truth for "is this
//! endpoint provisioned", so the lookup comes first and both operations are idempotent on it.
//!
//! Calls for the same IP are serialized for the whole lookup-then-mutate sequence. A request may
//! be abandoned (cancelled or past its deadline) up to the first mutation; after that it always
//! runs to completion.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Display;
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use net::{InterfaceKind, Mac, ParseError};
use p4rt::{DataplaneError, RuleProgrammer};
use store::{EndpointRecord, RecordStore, StoreError};

/// Which half of an endpoint change is in effect after a store failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InconsistencyWindow {
    /// Rules were installed but the record was not written.
    DataplaneProgrammedStoreMissing,
    /// Rules were removed but the record was not deleted.
    DataplaneClearedStorePresent,
}

impl Display for InconsistencyWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InconsistencyWindow::DataplaneProgrammedStoreMissing => {
                write!(f, "dataplane programmed, store missing")
            }
            InconsistencyWindow::DataplaneClearedStorePresent => {
                write!(f, "dataplane cleared, store still present")
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Invalid request: {0}")]
    Parse(#[from] ParseError),
    #[error("A different endpoint is already provisioned for {}: {existing}", existing.ip)]
    Conflict { existing: EndpointRecord },
    #[error("No endpoint provisioned for {0}")]
    NotFound(IpAddr),
    #[error("Dataplane programming failed: {0}")]
    Dataplane(#[from] DataplaneError),
    #[error("Store update failed, {window}: {source}")]
    Store {
        #[source]
        source: StoreError,
        window: InconsistencyWindow,
    },
    #[error("Store lookup failed: {0}")]
    Lookup(#[source] StoreError),
    #[error("Request abandoned before any change was made")]
    Cancelled,
}

impl From<ProvisionError> for tonic::Status {
    fn from(value: ProvisionError) -> Self {
        let message = value.to_string();
        match value {
            ProvisionError::Parse(_) => tonic::Status::invalid_argument(message),
            ProvisionError::Conflict { .. } => tonic::Status::already_exists(message),
            ProvisionError::NotFound(_) => tonic::Status::not_found(message),
            ProvisionError::Dataplane(e) if e.is_transient() => tonic::Status::unavailable(message),
            ProvisionError::Dataplane(_) => tonic::Status::internal(message),
            ProvisionError::Store { .. } => tonic::Status::data_loss(message),
            ProvisionError::Lookup(_) => tonic::Status::unavailable(message),
            ProvisionError::Cancelled => tonic::Status::cancelled(message),
        }
    }
}

/// Cancellation and deadline of a single request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    #[must_use]
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    fn check(&self) -> Result<(), ProvisionError> {
        if self.is_done() {
            Err(ProvisionError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Completes when the request is cancelled or its deadline passes.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => tokio::select! {
                () = self.cancel.cancelled() => {}
                () = tokio::time::sleep_until(deadline) => {}
            },
            None => self.cancel.cancelled().await,
        }
    }
}

/// One async mutex per IP. Entries are dropped once nobody holds or waits on them.
#[derive(Default)]
struct KeyedLocks {
    locks: Mutex<HashMap<IpAddr, Arc<tokio::sync::Mutex<()>>>>,
}

struct KeyGuard<'a> {
    owner: &'a KeyedLocks,
    ip: IpAddr,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
    async fn lock(&self, ip: IpAddr) -> KeyGuard<'_> {
        // created before waiting, so that an abandoned wait still releases the entry
        let mut key = KeyGuard {
            owner: self,
            ip,
            guard: None,
        };
        let lock = self.locks.lock().entry(ip).or_default().clone();
        key.guard = Some(lock.lock_owned().await);
        key
    }

    fn len(&self) -> usize {
        self.locks.lock().len()
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.owner.locks.lock();
        if locks.get(&self.ip).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(&self.ip);
        }
    }
}

/// Provisions endpoints: dataplane rules plus their record.
pub struct ProvisionEngine {
    store: Arc<dyn RecordStore>,
    dataplane: Arc<dyn RuleProgrammer>,
    locks: KeyedLocks,
}

impl ProvisionEngine {
    #[must_use]
    pub fn new(store: Arc<dyn RecordStore>, dataplane: Arc<dyn RuleProgrammer>) -> Self {
        Self {
            store,
            dataplane,
            locks: KeyedLocks::default(),
        }
    }

    async fn lock(&self, ctx: &RequestContext, ip: IpAddr) -> Result<KeyGuard<'_>, ProvisionError> {
        ctx.check()?;
        tokio::select! {
            guard = self.locks.lock(ip) => Ok(guard),
            () = ctx.done() => {
                debug!("Request for {ip} abandoned while waiting for its turn");
                Err(ProvisionError::Cancelled)
            }
        }
    }

    async fn lookup(&self, ip: IpAddr) -> Result<Option<EndpointRecord>, ProvisionError> {
        self.store.get(ip).await.map_err(|e| {
            error!("Failed to look up {ip} in the store: {e}");
            ProvisionError::Lookup(e)
        })
    }

    /// Install the rules of an endpoint and record it.
    ///
    /// Provisioning an endpoint that is already recorded with the same MAC and port succeeds
    /// without touching the dataplane. A different record for the IP is a conflict.
    pub async fn provision_endpoint(
        &self,
        ctx: &RequestContext,
        kind: InterfaceKind,
        mac: Mac,
        ip: IpAddr,
        port: u32,
    ) -> Result<(), ProvisionError> {
        let _guard = self.lock(ctx, ip).await?;
        let wanted = EndpointRecord::new(ip, port, mac);

        match self.lookup(ip).await? {
            Some(existing) if existing == wanted => {
                info!("Entry {mac} {ip} {port} already exists");
                return Ok(());
            }
            Some(existing) => {
                warn!("A different entry for {ip} already exists in the store: {existing}");
                return Err(ProvisionError::Conflict { existing });
            }
            None => {}
        }
        ctx.check()?;

        info!("Inserting {kind} entries for {mac} {ip} port {port}");
        if let Err(e) = self.dataplane.insert_rules(kind, mac, ip, port).await {
            error!("Failed to insert the entries for {mac} {ip}: {e}");
            return Err(e.into());
        }

        if let Err(source) = self.store.write(wanted).await {
            let window = InconsistencyWindow::DataplaneProgrammedStoreMissing;
            error!("Failed to add {wanted} to the store ({window}): {source}");
            return Err(ProvisionError::Store { source, window });
        }
        info!("Provisioned {wanted}");
        Ok(())
    }

    /// Remove the rules of a recorded endpoint, then its record.
    ///
    /// The rules are looked up by the recorded MAC; a differing `mac` in the request is logged
    /// and otherwise ignored. `kind` must be the kind the endpoint was provisioned as.
    pub async fn deprovision_endpoint(
        &self,
        ctx: &RequestContext,
        kind: InterfaceKind,
        mac: Mac,
        ip: IpAddr,
    ) -> Result<(), ProvisionError> {
        let _guard = self.lock(ctx, ip).await?;

        let Some(record) = self.lookup(ip).await? else {
            warn!("Entry for {ip} does not exist in the store");
            return Err(ProvisionError::NotFound(ip));
        };
        if record.mac != mac {
            warn!("Request mac {mac} for {ip} differs from the recorded {}", record.mac);
        }
        ctx.check()?;

        if let Err(e) = self
            .dataplane
            .delete_rules(kind, record.mac, ip, record.port)
            .await {
            error!("Failed to delete the entries for {} {ip}: {e}", record.mac);
            return Err(e.into());
        }

        if let Err(source) = self.store.delete(ip).await {
            let window = InconsistencyWindow::DataplaneClearedStorePresent;
            error!("Failed to delete {record} from the store ({window}): {source}");
            return Err(ProvisionError::Store { source, window });
        }
        info!("Deprovisioned {record}");
        Ok(())
    }

    /// Number of IPs with a request in flight.
    #[must_use]
    pub fn busy_keys(&self) -> usize {
        self.locks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use store::MemoryStore;
    use test_utils::{FakeProgrammer, FaultyStore, ProgrammerCall};
    use tracing_test::traced_test;

    const MAC1: Mac = Mac([0, 0x09, 0, 0x08, 0xc5, 0x50]);
    const MAC2: Mac = Mac([0, 0x09, 0, 0x08, 0xc5, 0x51]);

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn engine() -> (Arc<MemoryStore>, Arc<FakeProgrammer>, ProvisionEngine) {
        let store = Arc::new(MemoryStore::new());
        let dp = Arc::new(FakeProgrammer::new());
        let engine = ProvisionEngine::new(store.clone(), dp.clone());
        (store, dp, engine)
    }

    #[tokio::test]
    async fn provision_then_repeat_is_idempotent() {
        let (store, dp, engine) = engine();
        let ctx = RequestContext::default();
        let addr = ip("10.10.10.1");

        engine
            .provision_endpoint(&ctx, InterfaceKind::Endpoint, MAC1, addr, 2)
            .await
            .unwrap();
        engine
            .provision_endpoint(&ctx, InterfaceKind::Endpoint, MAC1, addr, 2)
            .await
            .unwrap();

        assert_eq!(dp.inserts(), 1);
        assert_eq!(
            store.get(addr).await.unwrap(),
            Some(EndpointRecord::new(addr, 2, MAC1))
        );
        assert_eq!(engine.busy_keys(), 0);
    }

    #[tokio::test]
    async fn different_record_conflicts() {
        let (store, dp, engine) = engine();
        let ctx = RequestContext::default();
        let addr = ip("10.10.10.1");
        engine
            .provision_endpoint(&ctx, InterfaceKind::Endpoint, MAC1, addr, 2)
            .await
            .unwrap();

        let err = engine
            .provision_endpoint(&ctx, InterfaceKind::Endpoint, MAC2, addr, 2)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Conflict { existing } if existing.mac == MAC1));
        // same mac, other port
        let err = engine
            .provision_endpoint(&ctx, InterfaceKind::Endpoint, MAC1, addr, 3)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Conflict { .. }));

        assert_eq!(dp.inserts(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn deprovision_unknown_is_not_found() {
        let (_, dp, engine) = engine();
        let err = engine
            .deprovision_endpoint(
                &RequestContext::default(),
                InterfaceKind::Endpoint,
                MAC1,
                ip("10.0.0.1"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::NotFound(_)));
        assert!(dp.calls().is_empty());
    }

    #[tokio::test]
    async fn round_trip() {
        let (store, dp, engine) = engine();
        let ctx = RequestContext::default();
        let addr = ip("10.10.10.3");
        engine
            .provision_endpoint(&ctx, InterfaceKind::Host, MAC1, addr, 0)
            .await
            .unwrap();
        engine
            .deprovision_endpoint(&ctx, InterfaceKind::Host, MAC1, addr)
            .await
            .unwrap();

        assert!(store.is_empty());
        assert_eq!(
            dp.calls(),
            vec![
                ProgrammerCall::Insert {
                    kind: InterfaceKind::Host,
                    mac: MAC1,
                    ip: addr,
                    port: 0
                },
                ProgrammerCall::Delete {
                    kind: InterfaceKind::Host,
                    mac: MAC1,
                    ip: addr,
                    port: 0
                },
            ]
        );
        // and again, now absent
        assert!(matches!(
            engine
                .deprovision_endpoint(&ctx, InterfaceKind::Host, MAC1, addr)
                .await,
            Err(ProvisionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn deprovision_uses_the_recorded_mac() {
        let (_, dp, engine) = engine();
        let ctx = RequestContext::default();
        let addr = ip("10.10.10.4");
        engine
            .provision_endpoint(&ctx, InterfaceKind::Endpoint, MAC1, addr, 4)
            .await
            .unwrap();
        engine
            .deprovision_endpoint(&ctx, InterfaceKind::Endpoint, MAC2, addr)
            .await
            .unwrap();
        assert_eq!(
            dp.calls()[1],
            ProgrammerCall::Delete {
                kind: InterfaceKind::Endpoint,
                mac: MAC1,
                ip: addr,
                port: 4
            }
        );
    }

    #[tokio::test]
    async fn dataplane_failure_leaves_store_untouched() {
        let (store, dp, engine) = engine();
        let ctx = RequestContext::default();
        let addr = ip("10.0.0.5");
        dp.fail_inserts(1);
        let err = engine
            .provision_endpoint(&ctx, InterfaceKind::Endpoint, MAC1, addr, 5)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Dataplane(_)));
        assert!(store.is_empty());

        engine
            .provision_endpoint(&ctx, InterfaceKind::Endpoint, MAC1, addr, 5)
            .await
            .unwrap();
        dp.fail_deletes(1);
        let err = engine
            .deprovision_endpoint(&ctx, InterfaceKind::Endpoint, MAC1, addr)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Dataplane(_)));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn store_failure_reports_the_window() {
        let store = Arc::new(FaultyStore::new());
        let dp = Arc::new(FakeProgrammer::new());
        let engine = ProvisionEngine::new(store.clone(), dp.clone());
        let ctx = RequestContext::default();
        let addr = ip("10.0.0.6");

        store.fail_writes(true);
        let err = engine
            .provision_endpoint(&ctx, InterfaceKind::Endpoint, MAC1, addr, 6)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::Store {
                window: InconsistencyWindow::DataplaneProgrammedStoreMissing,
                ..
            }
        ));
        assert_eq!(dp.inserts(), 1);
        assert!(logs_contain("dataplane programmed, store missing"));

        store.fail_writes(false);
        engine
            .provision_endpoint(&ctx, InterfaceKind::Endpoint, MAC1, addr, 6)
            .await
            .unwrap();
        store.fail_deletes(true);
        let err = engine
            .deprovision_endpoint(&ctx, InterfaceKind::Endpoint, MAC1, addr)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::Store {
                window: InconsistencyWindow::DataplaneClearedStorePresent,
                ..
            }
        ));
        assert_eq!(store.inner().len(), 1);
    }

    #[tokio::test]
    async fn failed_lookup_mutates_nothing() {
        let store = Arc::new(FaultyStore::new());
        let dp = Arc::new(FakeProgrammer::new());
        let engine = ProvisionEngine::new(store.clone(), dp.clone());
        store.fail_gets(true);
        let err = engine
            .provision_endpoint(
                &RequestContext::default(),
                InterfaceKind::Endpoint,
                MAC1,
                ip("10.0.0.7"),
                7,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Lookup(_)));
        assert!(dp.calls().is_empty());
    }

    #[tokio::test]
    async fn cancelled_request_mutates_nothing() {
        let (store, dp, engine) = engine();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = engine
            .provision_endpoint(
                &RequestContext::new(cancel),
                InterfaceKind::Endpoint,
                MAC1,
                ip("10.0.0.8"),
                8,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Cancelled));
        assert!(dp.calls().is_empty());
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_deadline_while_waiting_mutates_nothing() {
        let store = Arc::new(MemoryStore::new());
        let dp = Arc::new(FakeProgrammer::with_delay(Duration::from_secs(10)));
        let engine = Arc::new(ProvisionEngine::new(store.clone(), dp.clone()));
        let addr = ip("10.0.0.9");

        let first = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .provision_endpoint(
                        &RequestContext::default(),
                        InterfaceKind::Endpoint,
                        MAC1,
                        addr,
                        9,
                    )
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let ctx = RequestContext::default().with_deadline(Instant::now() + Duration::from_secs(1));
        let err = engine
            .provision_endpoint(&ctx, InterfaceKind::Endpoint, MAC2, addr, 9)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Cancelled));

        first.await.unwrap().unwrap();
        assert_eq!(dp.inserts(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_creates_for_one_ip_have_one_winner() {
        let store = Arc::new(MemoryStore::new());
        let dp = Arc::new(FakeProgrammer::with_delay(Duration::from_millis(20)));
        let engine = Arc::new(ProvisionEngine::new(store.clone(), dp.clone()));
        let addr = ip("10.10.10.10");

        let tasks: Vec<_> = (0u8..8)
            .map(|i| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    let mac = Mac([2, 0, 0, 0, 0, i]);
                    engine
                        .provision_endpoint(
                            &RequestContext::default(),
                            InterfaceKind::Endpoint,
                            mac,
                            addr,
                            1,
                        )
                        .await
                })
            })
            .collect();

        let mut ok = 0;
        let mut conflicts = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(()) => ok += 1,
                Err(ProvisionError::Conflict { .. }) => conflicts += 1,
                Err(e) => panic!("unexpected error {e}"),
            }
        }
        assert_eq!((ok, conflicts), (1, 7));
        assert_eq!(dp.inserts(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(engine.busy_keys(), 0);
    }

    #[test]
    fn errors_map_to_status_codes() {
        let code = |e: ProvisionError| tonic::Status::from(e).code();
        assert_eq!(
            code(ProvisionError::Parse(ParseError::MissingAddress)),
            tonic::Code::InvalidArgument
        );
        assert_eq!(code(ProvisionError::NotFound(ip("10.0.0.1"))), tonic::Code::NotFound);
        assert_eq!(
            code(ProvisionError::Dataplane(DataplaneError::NotPrimary)),
            tonic::Code::Unavailable
        );
        assert_eq!(
            code(ProvisionError::Dataplane(DataplaneError::UnsupportedAddress(ip("::1")))),
            tonic::Code::Internal
        );
        assert_eq!(code(ProvisionError::Cancelled), tonic::Code::Cancelled);
    }
}
