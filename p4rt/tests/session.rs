// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use inframgr_p4rt as p4rt;

use config::DataplaneConfig;
use net::{InterfaceKind, Mac};
use p4rt::{
    DataplaneError, P4CniProgrammer, ResponseType, Role, RuleProgrammer, SessionError,
    SessionManager, SessionOptions, SessionState,
};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use test_utils::{Arbitration, FakeP4Runtime};
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

fn manager(fake: &FakeP4Runtime) -> SessionManager {
    SessionManager::new(SessionOptions::new(fake.addr().to_string(), 1))
}

#[tokio::test]
#[traced_test]
async fn primary_on_first_notification() {
    let fake = FakeP4Runtime::start(Arbitration::Primary).await;
    let sm = manager(&fake);
    let cancel = CancellationToken::new();

    assert_eq!(sm.state(), SessionState::Init);
    sm.open_session(0, 1, &cancel).await.unwrap();
    assert_eq!(sm.state(), SessionState::Primary);
    assert_eq!(sm.api_version().as_deref(), Some("1.3.0"));
    assert!(logs_contain("Primary client for device 1"));

    sm.close_session().await;
    assert_eq!(sm.state(), SessionState::Init);
    assert!(!sm.is_open());
    // closing twice is harmless
    sm.close_session().await;
}

#[tokio::test]
#[traced_test]
async fn election_times_out_when_only_backup() {
    let fake = FakeP4Runtime::start(Arbitration::Backup).await;
    let sm = manager(&fake);
    let cancel = CancellationToken::new();

    let started = Instant::now();
    let err = sm.open_session(0, 1, &cancel).await.unwrap_err();
    let waited = started.elapsed();

    assert!(matches!(err, SessionError::ElectionTimeout(_)), "{err}");
    assert!(waited >= Duration::from_millis(4900), "{waited:?}");
    assert!(waited < Duration::from_secs(7), "{waited:?}");
    assert!(logs_contain("Could not become the primary client"));

    // the session survives the timeout, as backup
    assert!(sm.is_open());
    assert_eq!(sm.role(), Role::Backup);
    sm.close_session().await;
}

#[tokio::test]
async fn later_promotion_is_observed() {
    let fake = FakeP4Runtime::start(Arbitration::Backup).await;
    let mut options = SessionOptions::new(fake.addr().to_string(), 1);
    options.election_timeout = Duration::from_millis(200);
    let sm = SessionManager::new(options);
    let cancel = CancellationToken::new();

    assert!(matches!(
        sm.open_session(0, 1, &cancel).await,
        Err(SessionError::ElectionTimeout(_))
    ));
    let mut role = sm.watch_role().unwrap();
    fake.promote();
    tokio::time::timeout(
        Duration::from_secs(2),
        role.wait_for(|r| *r == Role::Primary),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(sm.state(), SessionState::Primary);

    fake.demote();
    tokio::time::timeout(Duration::from_secs(2), role.wait_for(|r| *r == Role::Backup))
        .await
        .unwrap()
        .unwrap();

    // the loop stops with the supervisor token
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), role.wait_for(|r| *r == Role::Unknown))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn promotion_within_the_window_succeeds() {
    let fake = FakeP4Runtime::start(Arbitration::PromoteAfter(Duration::from_millis(300))).await;
    let sm = manager(&fake);
    sm.open_session(0, 1, &CancellationToken::new()).await.unwrap();
    assert!(sm.is_primary());
    sm.close_session().await;
}

#[tokio::test]
async fn unanswered_arbitration_stays_arbitrating() {
    let fake = FakeP4Runtime::start(Arbitration::Silent).await;
    let mut options = SessionOptions::new(fake.addr().to_string(), 1);
    options.election_timeout = Duration::from_millis(100);
    let sm = SessionManager::new(options);

    let err = sm
        .open_session(0, 1, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::ElectionTimeout(_)));
    assert_eq!(sm.state(), SessionState::Arbitrating);
    assert_eq!(sm.role(), Role::Unknown);

    sm.close_session().await;
    fake.stop().await;
}

#[tokio::test]
async fn unreachable_server_is_a_connection_error() {
    // bind then drop, so nothing listens on the port
    let addr = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap();
    let sm = SessionManager::new(SessionOptions::new(addr.to_string(), 1));
    let err = sm
        .open_session(0, 1, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_connection_error(), "{err}");
    assert!(matches!(err, SessionError::Connect { .. }));
    assert_eq!(sm.state(), SessionState::Init);
}

#[tokio::test]
async fn pipeline_needs_a_session() {
    let sm = SessionManager::new(SessionOptions::new("127.0.0.1:9559", 1));
    assert!(matches!(
        sm.get_forwarding_pipeline(ResponseType::All).await,
        Err(SessionError::NotConnected)
    ));
    assert!(matches!(
        sm.set_forwarding_pipeline("a.bin".as_ref(), "a.p4info".as_ref(), 1)
            .await,
        Err(SessionError::NotConnected)
    ));
}

#[tokio::test]
async fn pipeline_set_and_get() {
    let dir = tempfile::tempdir().unwrap();
    let bin = dir.path().join("k8s_dp.pb.bin");
    let p4info = dir.path().join("k8s_dp.p4info.bin");
    std::fs::write(&bin, b"device-config").unwrap();
    std::fs::write(&p4info, b"p4info").unwrap();

    let fake = FakeP4Runtime::start(Arbitration::Primary).await;
    let sm = manager(&fake);
    sm.open_session(0, 1, &CancellationToken::new()).await.unwrap();

    let set = sm.set_forwarding_pipeline(&bin, &p4info, 77).await.unwrap();
    assert_eq!(set.cookie, 77);
    let got = sm
        .get_forwarding_pipeline(ResponseType::All)
        .await
        .unwrap();
    assert_eq!(got, set);
    assert_eq!(fake.pipeline().unwrap().p4_device_config, b"device-config");

    sm.close_session().await;
}

#[tokio::test]
async fn backup_may_read_but_not_write() {
    let fake = FakeP4Runtime::start(Arbitration::Backup).await;
    let mut options = SessionOptions::new(fake.addr().to_string(), 1);
    options.election_timeout = Duration::from_millis(100);
    let sm = Arc::new(SessionManager::new(options));
    let _ = sm.open_session(0, 1, &CancellationToken::new()).await;

    assert!(matches!(
        sm.set_forwarding_pipeline("a.bin".as_ref(), "a.p4info".as_ref(), 1)
            .await,
        Err(SessionError::NotPrimary)
    ));
    // the fake has no pipeline, but the request does reach it
    assert!(matches!(
        sm.get_forwarding_pipeline(ResponseType::CookieOnly).await,
        Err(SessionError::Rpc(_))
    ));

    let programmer = P4CniProgrammer::new(sm.clone(), DataplaneConfig::default());
    let ip: IpAddr = "10.0.0.2".parse().unwrap();
    assert!(matches!(
        programmer
            .insert_rules(InterfaceKind::Endpoint, Mac([0, 0, 0, 0, 0, 2]), ip, 2)
            .await,
        Err(DataplaneError::NotPrimary)
    ));
    assert_eq!(fake.writes(), 0);
    sm.close_session().await;
}

#[tokio::test]
async fn cni_rules_are_written_and_removed() {
    let fake = FakeP4Runtime::start(Arbitration::Primary).await;
    let sm = Arc::new(manager(&fake));
    sm.open_session(0, 1, &CancellationToken::new()).await.unwrap();
    let ids = DataplaneConfig::default();
    let programmer = P4CniProgrammer::new(sm.clone(), ids);

    let mac = Mac([0, 0x09, 0, 0x08, 0xc5, 0x50]);
    let ip: IpAddr = "10.10.10.1".parse().unwrap();
    programmer
        .insert_rules(InterfaceKind::Host, mac, ip, 0)
        .await
        .unwrap();
    assert_eq!(fake.entries_in(ids.mac_table_id).len(), 1);
    assert_eq!(fake.entries_in(ids.ipv4_table_id).len(), 1);

    // a second insert of the same key is refused by the device
    assert!(matches!(
        programmer.insert_rules(InterfaceKind::Host, mac, ip, 0).await,
        Err(DataplaneError::Write(_))
    ));

    programmer
        .delete_rules(InterfaceKind::Host, mac, ip, 0)
        .await
        .unwrap();
    assert!(fake.entries().is_empty());
    // already absent entries are not an error
    programmer
        .delete_rules(InterfaceKind::Host, mac, ip, 0)
        .await
        .unwrap();
    sm.close_session().await;
}

#[tokio::test]
async fn failed_ipv4_insert_rolls_back_the_mac_entry() {
    let fake = FakeP4Runtime::start(Arbitration::Primary).await;
    let sm = Arc::new(manager(&fake));
    sm.open_session(0, 1, &CancellationToken::new()).await.unwrap();
    let ids = DataplaneConfig::default();
    let programmer = P4CniProgrammer::new(sm.clone(), ids);

    fake.fail_next_write(ids.ipv4_table_id, tonic::Code::ResourceExhausted);
    let ip: IpAddr = "10.0.0.9".parse().unwrap();
    assert!(matches!(
        programmer
            .insert_rules(InterfaceKind::Endpoint, Mac([2, 0, 0, 0, 0, 9]), ip, 9)
            .await,
        Err(DataplaneError::Write(_))
    ));
    assert!(fake.entries().is_empty());
    sm.close_session().await;
}

#[tokio::test]
async fn failed_mac_delete_restores_the_ipv4_entry() {
    let fake = FakeP4Runtime::start(Arbitration::Primary).await;
    let sm = Arc::new(manager(&fake));
    sm.open_session(0, 1, &CancellationToken::new()).await.unwrap();
    let ids = DataplaneConfig::default();
    let programmer = P4CniProgrammer::new(sm.clone(), ids);

    let mac = Mac([2, 0, 0, 0, 0, 7]);
    let ip: IpAddr = "10.0.0.7".parse().unwrap();
    programmer
        .insert_rules(InterfaceKind::Endpoint, mac, ip, 7)
        .await
        .unwrap();
    let installed = fake.entries();

    fake.fail_next_write(ids.mac_table_id, tonic::Code::Internal);
    assert!(matches!(
        programmer
            .delete_rules(InterfaceKind::Endpoint, mac, ip, 7)
            .await,
        Err(DataplaneError::Write(_))
    ));
    assert_eq!(fake.entries(), installed);

    // the restored pair can still be removed
    programmer
        .delete_rules(InterfaceKind::Endpoint, mac, ip, 7)
        .await
        .unwrap();
    assert!(fake.entries().is_empty());
    sm.close_session().await;
}
