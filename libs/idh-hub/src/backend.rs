//! Backend adapter contract
//!
//! One adapter per source, selected at source creation by the declared source type.
//! The engine only talks to backends through [`Backend`]; protocol stacks stay behind it.

use crate::registry::TagKey;
use async_trait::async_trait;
use dashmap::DashMap;
use errors::{ErrorCode, HubError, Result};
use idh_model::{BrowseItem, RealValue, SourceAddress, SourceDescriptor, SourceType, Tag};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

// ============================================================================
// Update feed
// ============================================================================

/// Notification pushed by a backend into its source
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// New value for a subscribed tag
    Value { key: TagKey, value: RealValue },
    /// Unsolicited loss of the backend connection
    ConnectionLost { reason: String },
}

/// Sending half of a source's update feed
///
/// Every connect gets a fresh sender stamped with a connection epoch; events from an
/// earlier connection are discarded by the source.
#[derive(Debug, Clone)]
pub struct FeedSender {
    tx: mpsc::Sender<(u64, FeedEvent)>,
    epoch: u64,
}

impl FeedSender {
    pub(crate) fn new(tx: mpsc::Sender<(u64, FeedEvent)>, epoch: u64) -> Self {
        Self { tx, epoch }
    }

    /// Stand-alone feed, for driving a backend outside a source
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<(u64, FeedEvent)>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, epoch: 0 }, rx)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Send, waiting for room; false once the source is gone
    pub async fn send(&self, event: FeedEvent) -> bool {
        self.tx.send((self.epoch, event)).await.is_ok()
    }

    /// Send from synchronous code; drops the event when the feed is full
    pub fn try_send(&self, event: FeedEvent) -> bool {
        match self.tx.try_send((self.epoch, event)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full((_, event))) => {
                warn!("Update feed full, dropping {:?}", event);
                false
            },
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Backend-side identity of one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Registration {
    pub key: TagKey,
    pub id: u64,
}

/// Result of a backend subscribe
#[derive(Debug, Clone, Copy)]
pub struct Subscribed {
    pub registration: Registration,
    /// Current value if the backend knows it, used to prime the cache
    pub initial: Option<RealValue>,
}

/// Per-tag outcome of a backend read
pub type TagRead = std::result::Result<RealValue, ErrorCode>;

// ============================================================================
// Adapter trait
// ============================================================================

/// Capability set of a backend adapter
///
/// All methods take `&self`: the engine drives writes and subscriptions concurrently
/// with the update feed.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Implementation name, used in logs
    fn name(&self) -> &str;

    /// Whether the backend can push value changes
    fn supports_subscription(&self) -> bool {
        true
    }

    /// Connect; value changes and connection loss are reported through `feed`
    async fn connect(&self, feed: FeedSender) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    /// Read current values, one entry per requested tag in order
    async fn read(&self, tags: &[Tag]) -> Result<Vec<TagRead>>;

    async fn write(&self, tag: &Tag, value: f64) -> Result<()>;

    /// Register interest in `tag`; updates arrive on the feed under `key`
    async fn subscribe(&self, key: TagKey, tag: &Tag) -> Result<Subscribed>;

    async fn unsubscribe(&self, registration: Registration) -> Result<()>;

    /// Children of `parent`, or the root nodes when `parent` is `None`
    async fn browse(&self, parent: Option<(u16, &str)>) -> Result<Vec<BrowseItem>>;
}

// ============================================================================
// Factories
// ============================================================================

/// Creates adapters for one source type
#[async_trait]
pub trait BackendFactory: Send + Sync {
    fn source_type(&self) -> SourceType;

    fn create(&self, address: &SourceAddress, sample_interval: Duration)
        -> Result<Arc<dyn Backend>>;

    /// Enumerate reachable endpoints on `hostname` (empty = local)
    async fn discover(&self, _hostname: &str, _port: u16) -> Result<Vec<SourceDescriptor>> {
        Ok(Vec::new())
    }
}

/// Factory registry keyed by source type
pub struct BackendRegistry {
    factories: DashMap<SourceType, Arc<dyn BackendFactory>, ahash::RandomState>,
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("source_types", &self.source_types())
            .finish()
    }
}

impl BackendRegistry {
    /// Registry with no factories
    pub fn empty() -> Self {
        Self {
            factories: DashMap::with_hasher(ahash::RandomState::new()),
        }
    }

    /// Registry carrying the built-in CSV backend
    pub fn with_defaults() -> Self {
        let registry = Self::empty();
        registry.register(Arc::new(crate::backends::csv::CsvFactory::default()));
        registry
    }

    /// Register a factory, replacing any previous one for the same type
    pub fn register(&self, factory: Arc<dyn BackendFactory>) {
        let source_type = factory.source_type();
        if self.factories.insert(source_type, factory).is_some() {
            debug!("Replaced backend factory for {}", source_type);
        }
    }

    pub fn get(&self, source_type: SourceType) -> Result<Arc<dyn BackendFactory>> {
        self.factories
            .get(&source_type)
            .map(|f| f.clone())
            .ok_or_else(|| {
                HubError::UnsupportedType(format!("no backend registered for {source_type}"))
            })
    }

    pub fn source_types(&self) -> Vec<SourceType> {
        let mut types: Vec<SourceType> = self.factories.iter().map(|e| *e.key()).collect();
        types.sort();
        types
    }

    pub fn factories(&self) -> Vec<Arc<dyn BackendFactory>> {
        SourceType::ALL
            .iter()
            .filter_map(|t| self.factories.get(t).map(|f| f.clone()))
            .collect()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
