//! Feed events that arrive while a subscribe is in flight

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

mod common;

use async_trait::async_trait;
use common::{tag, test_config};
use idh_hub::ConnectionState;
use errors::{HubError, Result};
use idh_hub::backend::{Registration, Subscribed, TagRead};
use idh_hub::registry::TagKey;
use idh_hub::{Backend, BackendFactory, BackendRegistry, FeedEvent, FeedSender, Hub};
use idh_model::{BrowseItem, Quality, RealValue, SourceAddress, SourceFlags, SourceType, Tag};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Server whose value moves to 2.0 @ 200 while a subscribe is being answered with the
/// older 1.0 @ 100
#[derive(Default)]
struct EagerBackend {
    feed: Mutex<Option<FeedSender>>,
}

fn older() -> RealValue {
    RealValue::new(1.0, Quality::GOOD, 100).unwrap()
}

fn newer() -> RealValue {
    RealValue::new(2.0, Quality::GOOD, 200).unwrap()
}

#[async_trait]
impl Backend for EagerBackend {
    fn name(&self) -> &str {
        "eager"
    }

    async fn connect(&self, feed: FeedSender) -> Result<()> {
        *self.feed.lock() = Some(feed);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.feed.lock().take();
        Ok(())
    }

    async fn read(&self, tags: &[Tag]) -> Result<Vec<TagRead>> {
        Ok(tags.iter().map(|_| Ok(newer())).collect())
    }

    async fn write(&self, _tag: &Tag, _value: f64) -> Result<()> {
        Ok(())
    }

    async fn subscribe(&self, key: TagKey, _tag: &Tag) -> Result<Subscribed> {
        let feed = self.feed.lock().clone();
        if let Some(feed) = feed {
            feed.send(FeedEvent::Value {
                key,
                value: newer(),
            })
            .await;
        }
        Ok(Subscribed {
            registration: Registration { key, id: 1 },
            initial: Some(older()),
        })
    }

    async fn unsubscribe(&self, _registration: Registration) -> Result<()> {
        Ok(())
    }

    async fn browse(&self, _parent: Option<(u16, &str)>) -> Result<Vec<BrowseItem>> {
        Err(HubError::UnsupportedType("no hierarchy".to_string()))
    }
}

/// Accepts one connection; the link drops while the first subscribe is answered
#[derive(Default)]
struct FlakyBackend {
    connects: AtomicUsize,
    feed: Mutex<Option<FeedSender>>,
}

#[async_trait]
impl Backend for FlakyBackend {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn connect(&self, feed: FeedSender) -> Result<()> {
        if self.connects.fetch_add(1, Ordering::Relaxed) > 0 {
            return Err(HubError::not_connected("link still down"));
        }
        *self.feed.lock() = Some(feed);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.feed.lock().take();
        Ok(())
    }

    async fn read(&self, _tags: &[Tag]) -> Result<Vec<TagRead>> {
        Err(HubError::not_connected("link down"))
    }

    async fn write(&self, _tag: &Tag, _value: f64) -> Result<()> {
        Err(HubError::not_connected("link down"))
    }

    async fn subscribe(&self, key: TagKey, _tag: &Tag) -> Result<Subscribed> {
        let feed = self.feed.lock().clone();
        if let Some(feed) = feed {
            feed.send(FeedEvent::ConnectionLost {
                reason: "cable pulled".to_string(),
            })
            .await;
        }
        Ok(Subscribed {
            registration: Registration { key, id: 1 },
            initial: Some(older()),
        })
    }

    async fn unsubscribe(&self, _registration: Registration) -> Result<()> {
        Ok(())
    }

    async fn browse(&self, _parent: Option<(u16, &str)>) -> Result<Vec<BrowseItem>> {
        Err(HubError::UnsupportedType("no hierarchy".to_string()))
    }
}

/// UA factory handing out a fresh adapter from `make`
struct SingleFactory<F>(F);

#[async_trait]
impl<F> BackendFactory for SingleFactory<F>
where
    F: Fn() -> Arc<dyn Backend> + Send + Sync,
{
    fn source_type(&self) -> SourceType {
        SourceType::Ua
    }

    fn create(
        &self,
        _address: &SourceAddress,
        _sample_interval: Duration,
    ) -> Result<Arc<dyn Backend>> {
        Ok((self.0)())
    }
}

fn hub_with<F>(make: F) -> Hub
where
    F: Fn() -> Arc<dyn Backend> + Send + Sync + 'static,
{
    let registry = BackendRegistry::empty();
    registry.register(Arc::new(SingleFactory(make)));
    Hub::with_registry(test_config(), registry)
}

#[tokio::test]
async fn test_push_during_subscribe_wins_over_older_initial_value() {
    let hub = hub_with(|| Arc::new(EagerBackend::default()));
    let instance = hub.instance_create();
    let source = hub
        .source_create(
            instance,
            SourceType::Ua,
            "opc.tcp://eager:4840",
            1000,
            SourceFlags::SUBSCRIBE,
        )
        .unwrap();
    let group = hub.group_create(source, "eager").unwrap();

    let handles = hub
        .group_subscribe(group, &[tag("MV1")])
        .await
        .unwrap()
        .handles();
    let cached = hub.group_read_values(group, &handles).unwrap().values()[0];
    let direct = hub
        .source_read_values(source, &[tag("MV1")])
        .await
        .unwrap()
        .values()[0];

    assert_eq!(cached.value, 2.0);
    assert_eq!(cached.timestamp_ms(), 200);
    assert_eq!(cached, direct);
}

#[tokio::test(start_paused = true)]
async fn test_connection_loss_during_subscribe_does_not_stall_caller() {
    let hub = hub_with(|| Arc::new(FlakyBackend::default()));
    let instance = hub.instance_create();
    let source = hub
        .source_create(
            instance,
            SourceType::Ua,
            "opc.tcp://flaky:4840",
            1000,
            SourceFlags::SUBSCRIBE | SourceFlags::RECONNECT,
        )
        .unwrap();
    let group = hub.group_create(source, "flaky").unwrap();

    // Operation timeout is 1 s; the caller must not sit it out
    let started = tokio::time::Instant::now();
    let subscribed = hub.group_subscribe(group, &[tag("MV1")]).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(500));
    assert!(subscribed.handles()[0].is_valid());

    let ds = hub.source(source).unwrap();
    assert_eq!(ds.state(), ConnectionState::Degraded);
    hub.instance_destroy(instance).await.unwrap();
}
