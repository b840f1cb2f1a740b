//! Connection loss and recovery, on paused time

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

mod common;

use common::{eventually, tag, test_config, Plant};
use errors::ErrorCode;
use idh_hub::{ConnectionState, HubConfig, ReconnectConfig};
use idh_model::{QualityClass, SourceFlags};
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_outage_degrades_then_recovers_without_resubscribe() {
    let plant = Plant::new();
    let (source, group) = plant.open_group();
    plant.server.set_value(&tag("MV1"), 3.5).unwrap();

    let handles = plant
        .hub
        .group_subscribe(group, &[tag("MV1")])
        .await
        .unwrap()
        .handles();
    let read = |plant: &Plant| plant.hub.group_read_values(group, &handles).unwrap().values()[0];
    assert!(read(&plant).quality().is_good());
    assert_eq!(read(&plant).value, 3.5);

    plant.server.set_reachable(false);
    plant.server.drop_connections("link down");
    let ds = plant.hub.source(source).unwrap();
    assert!(eventually(|| ds.state() == ConnectionState::Degraded).await);

    // Last known value, degraded quality
    let degraded = read(&plant);
    assert_eq!(degraded.value, 3.5);
    assert_eq!(degraded.quality().class(), QualityClass::Bad);

    let err = plant
        .hub
        .source_read_values(source, &[tag("MV1")])
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidServer);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(ds.state(), ConnectionState::Degraded);

    plant.server.set_reachable(true);
    assert!(eventually(|| ds.state() == ConnectionState::Connected).await);
    assert!(eventually(|| read(&plant).quality().is_good()).await);

    // Same handle keeps receiving pushes after recovery
    plant.server.set_value(&tag("MV1"), 42.0).unwrap();
    assert!(eventually(|| read(&plant).value == 42.0).await);

    let stats = ds.stats();
    assert_eq!(stats.successful_reconnects, 1);
    assert!(stats.failed_reconnects >= 2);
    assert_eq!(stats.subscribed_tags, 1);
    assert_eq!(plant.server.connect_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_loss_without_reconnect_flag_is_permanent() {
    let plant = Plant::new();
    let source = plant.open_source(SourceFlags::SUBSCRIBE);
    let group = plant.hub.group_create(source, "no-retry").unwrap();
    let handles = plant
        .hub
        .group_subscribe(group, &[tag("CV1")])
        .await
        .unwrap()
        .handles();

    plant.server.drop_connections("server restart");
    let ds = plant.hub.source(source).unwrap();
    assert!(eventually(|| ds.state() == ConnectionState::Disconnected).await);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(ds.state(), ConnectionState::Disconnected);
    assert_eq!(plant.server.connect_count(), 1);

    let value = plant.hub.group_read_values(group, &handles).unwrap().values()[0];
    assert_eq!(value.quality().class(), QualityClass::Bad);

    let late = plant
        .hub
        .group_subscribe(group, &[tag("CV2")])
        .await
        .unwrap();
    assert_eq!(late.elements[0], Err(ErrorCode::InvalidServer));
}

#[tokio::test(start_paused = true)]
async fn test_attempts_exhausted() {
    let plant = Plant::with_config(HubConfig {
        reconnect: ReconnectConfig {
            max_attempts: 3,
            ..test_config().reconnect
        },
        ..test_config()
    });
    plant.server.set_reachable(false);
    let source = plant.open_source(SourceFlags::SUBSCRIBE | SourceFlags::RECONNECT);
    let ds = plant.hub.source(source).unwrap();

    assert!(eventually(|| ds.state() == ConnectionState::Disconnected).await);
    let stats = ds.stats();
    assert_eq!(stats.total_attempts, 3);
    assert_eq!(stats.failed_reconnects, 3);

    // Reachable again, but the source has given up
    plant.server.set_reachable(true);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(ds.state(), ConnectionState::Disconnected);
    assert_eq!(plant.server.connect_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_first_connect_retries_until_reachable() {
    let plant = Plant::new();
    plant.server.set_reachable(false);
    let source = plant.open_source(SourceFlags::SUBSCRIBE | SourceFlags::RECONNECT);
    let ds = plant.hub.source(source).unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(ds.state(), ConnectionState::Connecting);

    plant.server.set_reachable(true);
    ds.wait_for_state(ConnectionState::Connected, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(ds.stats().successful_reconnects, 0);
    assert!(ds.stats().failed_reconnects >= 1);
}

#[tokio::test(start_paused = true)]
async fn test_destroy_while_degraded() {
    let plant = Plant::new();
    let (source, group) = plant.open_group();
    plant
        .hub
        .group_subscribe(group, &[tag("MV2")])
        .await
        .unwrap();

    plant.server.set_reachable(false);
    plant.server.drop_connections("link down");
    let ds = plant.hub.source(source).unwrap();
    assert!(eventually(|| ds.state() == ConnectionState::Degraded).await);

    plant.hub.source_destroy(source).await.unwrap();
    assert!(!ds.is_valid());
    assert_eq!(ds.state(), ConnectionState::Disconnected);

    plant.server.set_reachable(true);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(plant.server.connect_count(), 1);
}
