//! Session lifecycle, recurring queries and rebalancing.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::*;
use trapline_core::{
    AuthenticationProtocol, CommunicationConfig, CommunicationSpec, DataType, DeviceCredentials,
    DeviceProfileTransportConfig, DeviceTransportConfig, PrivacyProtocol, ServiceInfo,
    ServiceListChangedEvent, SnmpProtocolVersion, TransportConfig, TransportEvent,
};
use trapline_transport::balancing::owner_index;
use trapline_transport::{octet_string, ClientEvent, Pdu, PduType, TrapEvent, VarBind};

fn polled_profile(frequency_ms: u64) -> DeviceProfileTransportConfig {
    DeviceProfileTransportConfig::default().with_config(
        CommunicationConfig::new(CommunicationSpec::TelemetryQuerying)
            .with_querying_frequency(frequency_ms)
            .with_mapping(mapping("1.3.6.1.2.1.1.3.0", "uptime", DataType::Long)),
    )
}

fn v3_device(host: &str) -> trapline_core::SnmpDevice {
    let mut device = device(host, DeviceProfileTransportConfig::default());
    device.transport = DeviceTransportConfig {
        community: None,
        username: Some("monitor".into()),
        engine_id: Some(format!("engine-{}", host)),
        context_name: Some("bridge1".into()),
        authentication_protocol: Some(AuthenticationProtocol::Md5),
        authentication_passphrase: Some("authpassword".into()),
        privacy_protocol: Some(PrivacyProtocol::Des),
        privacy_passphrase: Some("privpassword".into()),
        ..DeviceTransportConfig::community(host, 161, SnmpProtocolVersion::V3, "")
    };
    device
}

async fn eventually<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}

#[tokio::test(start_paused = true)]
async fn test_polling_sends_once_per_tick_until_cancelled() {
    let harness = Harness::with_defaults();
    let polled = device("10.1.0.1", polled_profile(5_000));
    let id = polled.id;
    harness.directory.add_with_token(polled);
    harness.service.start().await.unwrap();
    let session = harness.service.session(&id).unwrap();
    assert_eq!(session.querying_task_count(), 1);

    tokio::time::sleep(Duration::from_millis(4_999)).await;
    assert_eq!(harness.client.sent_count(), 0);

    tokio::time::sleep(Duration::from_millis(2)).await;
    assert_eq!(harness.client.sent_count(), 1);

    tokio::time::sleep(Duration::from_millis(5_000)).await;
    assert_eq!(harness.client.sent_count(), 2);

    harness.service.cancel_querying_tasks(&session);
    harness.service.cancel_querying_tasks(&session);
    assert_eq!(session.querying_task_count(), 0);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(harness.client.sent_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_polling_skips_inactive_session() {
    let harness = Harness::with_defaults();
    let id = harness.session_for(device("10.1.0.2", polled_profile(1_000))).await;
    let session = harness.service.session(&id).unwrap();

    session.set_active(false);
    tokio::time::sleep(Duration::from_millis(3_500)).await;
    assert_eq!(harness.client.sent_count(), 0);

    session.set_active(true);
    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert_eq!(harness.client.sent_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_polling_survives_send_failures() {
    let harness = Harness::with_defaults();
    harness.client.fail_attempt(0);
    let id = harness.session_for(device("10.1.0.3", polled_profile(1_000))).await;

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert_eq!(harness.client.sent_count(), 1);
    let errors = harness.platform.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, "Telemetry querying");
    assert!(harness.service.session(&id).unwrap().is_active());
}

#[tokio::test]
async fn test_start_only_establishes_access_token_devices() {
    let harness = Harness::with_defaults();
    let mut events = harness.event_bus.subscribe();
    let token_device = device("10.1.0.4", full_profile());
    let token_id = token_device.id;
    harness.directory.add_with_token(token_device);
    harness.directory.add(
        device("10.1.0.5", full_profile()),
        DeviceCredentials::X509Certificate { hash: "ab12".into() },
    );

    harness.service.start().await.unwrap();

    assert_eq!(harness.service.session_count(), 1);
    assert!(harness.service.session(&token_id).unwrap().is_active());
    assert_eq!(
        events.try_recv(),
        Some(TransportEvent::SessionEstablished { device_id: token_id })
    );
    assert!(harness.client.events.lock().is_some());
}

#[tokio::test]
async fn test_start_walks_every_directory_page() {
    let harness = Harness::new(TransportConfig {
        device_page_size: 2,
        ..TransportConfig::default()
    });
    for i in 0..5 {
        harness
            .directory
            .add_with_token(device(&format!("10.1.1.{}", i), full_profile()));
    }
    harness.service.start().await.unwrap();
    assert_eq!(harness.service.session_count(), 5);
}

#[tokio::test]
async fn test_invalid_device_does_not_block_others() {
    let harness = Harness::with_defaults();
    let mut broken = device("10.1.2.1", full_profile());
    broken.transport.community = None;
    harness.directory.add_with_token(broken);
    harness
        .directory
        .add_with_token(device("10.1.2.2", full_profile()));

    harness.service.start().await.unwrap();
    assert_eq!(harness.service.session_count(), 1);
}

#[tokio::test]
async fn test_delete_destroys_session() {
    let harness = Harness::with_defaults();
    let id = harness.session_for(device("10.1.0.6", full_profile())).await;
    let session = harness.service.session(&id).unwrap();
    let mut events = harness.event_bus.subscribe();

    harness.service.on_device_deleted(&id);

    assert!(harness.service.session(&id).is_none());
    assert!(!session.is_active());
    assert_eq!(
        events.try_recv(),
        Some(TransportEvent::SessionClosed { device_id: id })
    );
    assert!(!harness.service.destroy_session(&id));
}

#[tokio::test]
async fn test_v3_session_releases_usm_user() {
    let harness = Harness::with_defaults();
    let id = harness.session_for(v3_device("10.1.0.7")).await;
    let usm = harness.service.auth().usm().clone();
    assert_eq!(usm.len(), 1);

    // recreating the session keeps a single registration
    harness.service.on_device_updated(id).await.unwrap();
    assert_eq!(usm.len(), 1);

    harness.service.on_device_deleted(&id);
    assert!(usm.is_empty());
}

#[tokio::test]
async fn test_v3_requests_are_scoped() {
    let harness = Harness::with_defaults();
    let mut v3 = v3_device("10.1.0.8");
    v3.profile = full_profile();
    let id = harness.session_for(v3).await;
    let session = harness.service.session(&id).unwrap();
    let config = session
        .profile()
        .config_for(CommunicationSpec::TelemetryQuerying)
        .unwrap()
        .clone();

    harness
        .service
        .send_request(&session, &config, &Default::default())
        .await;
    let sent = harness.client.sent();
    assert_eq!(sent[0].pdu.context_name.as_deref(), Some("bridge1"));
    assert_eq!(sent[0].target.version_code(), 3);
}

#[tokio::test]
async fn test_device_update_reestablishes_session() {
    let harness = Harness::with_defaults();
    let original = device("10.1.0.9", full_profile());
    let id = harness.session_for(original.clone()).await;
    let before = harness.service.session(&id).unwrap();

    let mut moved = original;
    moved.transport.host = "10.1.0.99".into();
    harness.directory.update(moved);
    harness.service.on_device_updated(id).await.unwrap();

    let after = harness.service.session(&id).unwrap();
    assert!(!before.is_active());
    assert!(after.is_active());
    assert_eq!(after.target().address.addr.ip().to_string(), "10.1.0.99");
    assert_ne!(before.info().session_id, after.info().session_id);
}

#[tokio::test]
async fn test_profile_update_reestablishes_changed_sessions() {
    let harness = Harness::with_defaults();
    let changed = device("10.1.0.10", full_profile());
    let unchanged = device("10.1.0.11", full_profile());
    let changed_id = harness.session_for(changed.clone()).await;
    let unchanged_id = harness.session_for(unchanged).await;
    let before_changed = harness.service.session(&changed_id).unwrap().info().session_id;
    let before_unchanged = harness.service.session(&unchanged_id).unwrap().info().session_id;

    let mut updated = changed;
    updated.profile.timeout_ms = 3_000;
    harness.directory.update(updated);
    harness.service.on_device_profile_updated().await.unwrap();

    let session = harness.service.session(&changed_id).unwrap();
    assert_ne!(session.info().session_id, before_changed);
    assert_eq!(session.target().timeout, Duration::from_millis(3_000));
    assert_eq!(
        harness.service.session(&unchanged_id).unwrap().info().session_id,
        before_unchanged
    );
}

#[tokio::test]
async fn test_profile_update_continues_past_failed_lookup() {
    let harness = Harness::with_defaults();
    let broken = device("10.1.0.20", full_profile());
    let changed = device("10.1.0.21", full_profile());
    let broken_id = harness.session_for(broken).await;
    let changed_id = harness.session_for(changed.clone()).await;
    let before_broken = harness.service.session(&broken_id).unwrap().info().session_id;
    let before_changed = harness.service.session(&changed_id).unwrap().info().session_id;

    harness.directory.fail_lookups(broken_id);
    let mut updated = changed;
    updated.profile.retries = 5;
    harness.directory.update(updated);
    harness.service.on_device_profile_updated().await.unwrap();

    // the failed lookup leaves its session alone
    let broken_session = harness.service.session(&broken_id).unwrap();
    assert!(broken_session.is_active());
    assert_eq!(broken_session.info().session_id, before_broken);

    let changed_session = harness.service.session(&changed_id).unwrap();
    assert_ne!(changed_session.info().session_id, before_changed);
    assert_eq!(changed_session.target().retries, 5);
}

#[tokio::test]
async fn test_rebalance_keeps_only_owned_devices() {
    let harness = Harness::with_defaults();
    let mut ids = Vec::new();
    for i in 0..20 {
        let d = device(&format!("10.2.0.{}", i), full_profile());
        ids.push(d.id);
        harness.directory.add_with_token(d);
    }
    harness.service.start().await.unwrap();
    assert_eq!(harness.service.session_count(), 20);

    let changed = harness.service.on_service_list_changed(&ServiceListChangedEvent {
        changed_service: Some(ServiceInfo::snmp("snmp-b")),
        services: vec![ServiceInfo::snmp("snmp-a"), ServiceInfo::snmp("snmp-b")],
        current_service: ServiceInfo::snmp("snmp-a"),
    });
    assert!(changed);

    let owned: Vec<_> = ids.iter().filter(|id| owner_index(id, 2) == 0).copied().collect();
    let service = harness.service.clone();
    let expected = owned.len();
    eventually(move || service.session_count() == expected).await;
    for id in &owned {
        assert!(harness.service.session(id).is_some());
    }

    // back to a single instance, every device comes back
    harness.service.on_service_list_changed(&ServiceListChangedEvent {
        changed_service: None,
        services: vec![ServiceInfo::snmp("snmp-a")],
        current_service: ServiceInfo::snmp("snmp-a"),
    });
    let service = harness.service.clone();
    eventually(move || service.session_count() == 20).await;
}

#[tokio::test]
async fn test_client_events_are_dispatched() {
    let harness = Harness::with_defaults();
    let d = device("10.1.0.12", full_profile());
    let id = d.id;
    harness.directory.add_with_token(d);
    harness.service.start().await.unwrap();

    harness
        .client
        .events()
        .send(ClientEvent::Trap(TrapEvent {
            peer: peer("10.1.0.12"),
            pdu: Pdu::new(PduType::TrapV2).with_binding(VarBind::new(
                oid("1.3.6.1.4.1.99.3.1"),
                octet_string("false"),
            )),
        }))
        .await
        .unwrap();

    let platform = harness.platform.clone();
    eventually(move || platform.calls().contains(&Call::Activity(id))).await;
    assert!(matches!(
        &harness.platform.calls()[0],
        Call::ServerRpcEvent(device_id, method, payload)
            if *device_id == id && method == "TRAP" && payload == r#"{"alarm":false}"#
    ));
}

#[tokio::test]
async fn test_shutdown_stops_everything() {
    let harness = Harness::with_defaults();
    for i in 0..3 {
        harness
            .directory
            .add_with_token(device(&format!("10.3.0.{}", i), polled_profile(1_000)));
    }
    harness.service.start().await.unwrap();
    assert_eq!(harness.service.session_count(), 3);

    harness.service.shutdown().await.unwrap();

    assert_eq!(harness.service.session_count(), 0);
    assert!(harness.service.executor().is_shutdown());
    assert_eq!(harness.client.closed.load(Ordering::SeqCst), 1);
    assert_eq!(harness.client.released.lock().len(), 3);
    assert!(harness.client.events.lock().is_none());
}
