//! Shared fixtures: a hub wired to a simulated UA server
//!
//! The server exposes MV1..MV3, CV1..CV3 and DV1..DV2 in namespace 2; DV3 is deliberately
//! missing.

#![allow(clippy::disallowed_methods)] // Integration test - unwrap is acceptable
#![allow(dead_code)]

use idh_hub::backends::{MemoryFactory, MemoryServer};
use idh_hub::{BackendRegistry, Hub, HubConfig, ReconnectConfig, TimeoutConfig};
use idh_model::{SourceFlags, SourceType, Tag};
use std::sync::Arc;
use std::time::Duration;

pub const PLANT_HOST: &str = "plant";
pub const PLANT_SCHEMA: &str = "opc.tcp://plant:48010";

pub fn tag(name: &str) -> Tag {
    Tag::new(2, name)
}

pub fn tags(names: &[&str]) -> Vec<Tag> {
    names.iter().map(|n| tag(n)).collect()
}

/// Fast, deterministic timings: no jitter, unlimited retries from 100 ms up to 1 s
pub fn test_config() -> HubConfig {
    HubConfig {
        reconnect: ReconnectConfig {
            max_attempts: 0,
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            jitter: false,
        },
        timeouts: TimeoutConfig {
            operation_ms: 1_000,
            discovery_ms: 1_000,
            connect_ms: 1_000,
            ready_wait_ms: 1_000,
        },
        ..HubConfig::default()
    }
}

pub fn plant_server() -> MemoryServer {
    let server = MemoryServer::new("Plant simulator");
    for name in ["MV1", "MV2", "MV3", "CV1", "CV2", "CV3", "DV1", "DV2"] {
        server.add_tag(tag(name), 0.0).unwrap();
    }
    server
}

pub struct Plant {
    pub hub: Hub,
    pub server: MemoryServer,
    pub instance: i64,
}

impl Plant {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: HubConfig) -> Self {
        let server = plant_server();
        let registry = BackendRegistry::with_defaults();
        registry.register(Arc::new(
            MemoryFactory::new(SourceType::Ua).with_server(PLANT_HOST, server.clone()),
        ));
        let hub = Hub::with_registry(config, registry);
        let instance = hub.instance_create();
        Self {
            hub,
            server,
            instance,
        }
    }

    pub fn open_source(&self, flags: SourceFlags) -> i64 {
        self.hub
            .source_create(self.instance, SourceType::Ua, PLANT_SCHEMA, 1000, flags)
            .unwrap()
    }

    /// Subscribing, auto-reconnecting source with one group on it
    pub fn open_group(&self) -> (i64, i64) {
        let source = self.open_source(SourceFlags::SUBSCRIBE | SourceFlags::RECONNECT);
        let group = self.hub.group_create(source, "test").unwrap();
        (source, group)
    }
}

/// Poll `check` every 10 ms for up to 5 s
pub async fn eventually<F: FnMut() -> bool>(mut check: F) -> bool {
    for _ in 0..500 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
