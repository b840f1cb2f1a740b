//! Data source
//!
//! A source owns one backend adapter and one update task. The update task drives the
//! connection state machine
//!
//! ```text
//! Connecting ──ok──> Connected ──lost──> Degraded ──ok──> Connected
//!     │                  │                   │
//!     └──gave up──> Disconnected <──lost─────┴──gave up
//!                   (no RECONNECT flag)
//! ```
//!
//! and is the only writer of the source's value cache. Client calls never wait on it for
//! reads; direct reads/writes and subscriptions go to the backend under a timeout.

use crate::backend::{Backend, FeedEvent, FeedSender, Registration};
use crate::batch::{BatchResult, Element, TagHandle};
use crate::cache::{CacheSlot, ValueCache};
use crate::config::{HubConfig, TimeoutConfig};
use crate::group::Group;
use crate::reconnect::{ReconnectError, ReconnectHelper, ReconnectPolicy};
use crate::registry::{TagKey, TagRegistry};
use ahash::AHashMap;
use errors::{ErrorCode, HubError, Result};
use futures::future::join_all;
use idh_model::{
    BrowseItem, Listing, Quality, RealValue, SourceAddress, SourceFlags, SourceType, Tag,
};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Connection state of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Connection lost, automatic recovery in progress
    Degraded,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Degraded => "DEGRADED",
        };
        f.write_str(s)
    }
}

/// Snapshot of source counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceStats {
    pub total_attempts: u64,
    pub successful_reconnects: u64,
    pub failed_reconnects: u64,
    pub applied_updates: u64,
    pub subscribed_tags: usize,
}

#[derive(Default)]
struct Counters {
    total_attempts: AtomicU64,
    successful_reconnects: AtomicU64,
    failed_reconnects: AtomicU64,
    applied_updates: AtomicU64,
    subscribed_tags: AtomicUsize,
}

/// Source-level subscription, shared by every group holding the tag
struct SubEntry {
    tag: Tag,
    /// None while the backend holds no live registration (after a failed resubscribe)
    registration: Option<Registration>,
    refs: usize,
}

enum Command {
    /// Store a subscription's initial value, acknowledged once visible in the cache
    Prime {
        key: TagKey,
        value: RealValue,
        ack: oneshot::Sender<()>,
    },
}

/// Parameters of a new source
#[derive(Debug, Clone)]
pub struct SourceOptions {
    pub source_type: SourceType,
    pub schema: String,
    pub sample_interval: Duration,
    pub flags: SourceFlags,
}

struct Shared {
    label: String,
    backend: Arc<dyn Backend>,
    registry: TagRegistry,
    cache: ValueCache,
    subscriptions: Mutex<AHashMap<TagKey, SubEntry>>,
    state_tx: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    counters: Counters,
    timeouts: TimeoutConfig,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            info!("{} {} -> {}", self.label, previous, state);
        }
    }
}

pub struct DataSource {
    id: u64,
    options: SourceOptions,
    address: SourceAddress,
    shared: Arc<Shared>,
    cmd_tx: mpsc::Sender<Command>,
    closed: AtomicBool,
    next_tag_handle: AtomicI64,
    groups: parking_lot::Mutex<Vec<Weak<Group>>>,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSource")
            .field("id", &self.id)
            .field("type", &self.options.source_type)
            .field("schema", &self.options.schema)
            .field("state", &self.state())
            .finish()
    }
}

impl DataSource {
    /// Start a source around `backend`; connecting begins immediately in the background
    ///
    /// Fails outside a Tokio runtime.
    pub fn start(
        id: u64,
        options: SourceOptions,
        address: SourceAddress,
        backend: Arc<dyn Backend>,
        config: &HubConfig,
    ) -> Result<Arc<Self>> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| HubError::config(format!("source needs a Tokio runtime: {e}")))?;

        let (feed_tx, feed_rx) = mpsc::channel(config.feed_capacity.max(1));
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);

        let shared = Arc::new(Shared {
            label: format!("[source {id}]"),
            backend,
            registry: TagRegistry::new(),
            cache: ValueCache::new(),
            subscriptions: Mutex::new(AHashMap::new()),
            state_tx,
            cancel: CancellationToken::new(),
            counters: Counters::default(),
            timeouts: config.timeouts.clone(),
        });

        let policy = if options.flags.contains(SourceFlags::RECONNECT) {
            ReconnectPolicy::from(&config.reconnect)
        } else {
            ReconnectPolicy::once()
        };
        let update_loop = UpdateLoop {
            shared: shared.clone(),
            feed_tx,
            feed_rx,
            cmd_rx,
            epoch: 0,
            auto_reconnect: options.flags.contains(SourceFlags::RECONNECT),
            helper: ReconnectHelper::new(policy),
        };

        info!(
            "{} created: type={} schema={} interval={:?} flags={:#x}",
            shared.label,
            options.source_type,
            options.schema,
            options.sample_interval,
            options.flags.bits()
        );
        let task = runtime.spawn(update_loop.run());

        Ok(Arc::new(Self {
            id,
            options,
            address,
            shared,
            cmd_tx,
            closed: AtomicBool::new(false),
            next_tag_handle: AtomicI64::new(1),
            groups: parking_lot::Mutex::new(Vec::new()),
            task: parking_lot::Mutex::new(Some(task)),
        }))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn source_type(&self) -> SourceType {
        self.options.source_type
    }

    pub fn schema(&self) -> &str {
        &self.options.schema
    }

    pub fn address(&self) -> &SourceAddress {
        &self.address
    }

    pub fn flags(&self) -> SourceFlags {
        self.options.flags
    }

    pub fn sample_interval(&self) -> Duration {
        self.options.sample_interval
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Liveness probe: true until destroyed, whatever the connection state
    pub fn is_valid(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    /// Subscriptions need both the SUBSCRIBE flag and a backend that can push
    pub fn supports_subscription(&self) -> bool {
        self.options.flags.contains(SourceFlags::SUBSCRIBE)
            && self.shared.backend.supports_subscription()
    }

    pub fn stats(&self) -> SourceStats {
        let c = &self.shared.counters;
        SourceStats {
            total_attempts: c.total_attempts.load(Ordering::Relaxed),
            successful_reconnects: c.successful_reconnects.load(Ordering::Relaxed),
            failed_reconnects: c.failed_reconnects.load(Ordering::Relaxed),
            applied_updates: c.applied_updates.load(Ordering::Relaxed),
            subscribed_tags: c.subscribed_tags.load(Ordering::Relaxed),
        }
    }

    /// Wait until the source reaches `state`
    pub async fn wait_for_state(&self, state: ConnectionState, limit: Duration) -> Result<()> {
        let mut rx = self.watch_state();
        let reached = tokio::time::timeout(limit, rx.wait_for(|s| *s == state))
            .await
            .map(|r| r.map(|_| ()));
        match reached {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(HubError::BadSource(format!("{} stopped", self.shared.label))),
            Err(_) => Err(HubError::timeout(format!(
                "{} did not reach {state} within {limit:?}",
                self.shared.label
            ))),
        }
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(HubError::BadSource(format!(
                "{} has been destroyed",
                self.shared.label
            )))
        }
    }

    /// Gate for calls that need the backend
    ///
    /// Waits up to `ready_wait` while the first connection is still being made; fails at
    /// once while Degraded or Disconnected.
    pub(crate) async fn ensure_ready(&self) -> Result<()> {
        self.ensure_open()?;
        let mut rx = self.watch_state();
        let state = *rx.borrow_and_update();
        match state {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Connecting => {
                let waited = tokio::select! {
                    _ = self.shared.cancel.cancelled() => {
                        return Err(HubError::Closed(format!("{} destroyed", self.shared.label)))
                    },
                    r = tokio::time::timeout(
                        self.shared.timeouts.ready_wait(),
                        rx.wait_for(|s| *s != ConnectionState::Connecting),
                    ) => r.ok().and_then(|r| r.ok().map(|s| *s)),
                };
                match waited {
                    Some(ConnectionState::Connected) => Ok(()),
                    Some(state) => Err(HubError::not_connected(format!(
                        "{} is {state}",
                        self.shared.label
                    ))),
                    None => Err(HubError::not_connected(format!(
                        "{} still connecting",
                        self.shared.label
                    ))),
                }
            },
            ConnectionState::Degraded | ConnectionState::Disconnected => Err(
                HubError::not_connected(format!("{} is {state}", self.shared.label)),
            ),
        }
    }

    /// Run a backend call under the operation timeout, aborting on destroy
    async fn bounded<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            _ = self.shared.cancel.cancelled() => Err(HubError::Closed(format!(
                "{} destroyed during {what}",
                self.shared.label
            ))),
            r = tokio::time::timeout(self.shared.timeouts.operation(), fut) => match r {
                Ok(r) => r,
                Err(_) => Err(HubError::timeout(format!("{} {what} timed out", self.shared.label))),
            },
        }
    }

    // ========================================================================
    // Direct access
    // ========================================================================

    /// Unbatched read through the backend
    ///
    /// Per-tag faults stay in their element; the overall code is only set when no tag
    /// could be read.
    pub async fn read_values(&self, tags: &[Tag]) -> Result<BatchResult<RealValue>> {
        self.ensure_open()?;
        if tags.is_empty() {
            return Ok(BatchResult::empty());
        }
        self.ensure_ready().await?;

        let elements = match self.bounded("read", self.shared.backend.read(tags)).await {
            Ok(values) if values.len() == tags.len() => values,
            Ok(values) => {
                warn!(
                    "{} backend returned {} values for {} tags",
                    self.shared.label,
                    values.len(),
                    tags.len()
                );
                vec![Err(ErrorCode::Corrupt); tags.len()]
            },
            Err(e @ HubError::Closed(_)) => return Err(e),
            Err(e) => {
                debug!("{} read failed: {}", self.shared.label, e);
                vec![Err(e.code()); tags.len()]
            },
        };
        Ok(BatchResult::from_elements(
            elements,
            ErrorCode::NotAllReadable,
            true,
        ))
    }

    /// Unbatched write; each tag is written independently and concurrently
    pub async fn write_values(&self, values: &[f64], tags: &[Tag]) -> Result<BatchResult<()>> {
        self.ensure_open()?;
        if values.len() != tags.len() {
            return Err(HubError::LengthMismatch {
                expected: tags.len(),
                actual: values.len(),
            });
        }
        if tags.is_empty() {
            return Ok(BatchResult::empty());
        }
        self.ensure_ready().await?;

        let writes: Vec<(Tag, f64)> = tags.iter().cloned().zip(values.iter().copied()).collect();
        let elements = self.write_tags(&writes).await;
        Ok(BatchResult::new(ErrorCode::Success, elements))
    }

    pub(crate) async fn write_tags(&self, writes: &[(Tag, f64)]) -> Vec<Element<()>> {
        let calls = writes.iter().map(|(tag, value)| async move {
            self.bounded("write", self.shared.backend.write(tag, *value))
                .await
                .map_err(|e| {
                    debug!("{} write {} failed: {}", self.shared.label, tag, e);
                    e.code()
                })
        });
        join_all(calls).await
    }

    pub async fn browse_root(&self, capacity: usize) -> Result<Listing<BrowseItem>> {
        self.browse_node(None, capacity).await
    }

    pub async fn browse(
        &self,
        parent_namespace_index: u16,
        parent_node_name: &str,
        capacity: usize,
    ) -> Result<Listing<BrowseItem>> {
        self.browse_node(Some((parent_namespace_index, parent_node_name)), capacity)
            .await
    }

    async fn browse_node(
        &self,
        parent: Option<(u16, &str)>,
        capacity: usize,
    ) -> Result<Listing<BrowseItem>> {
        self.ensure_ready().await?;
        let items = self
            .bounded("browse", self.shared.backend.browse(parent))
            .await?;
        Ok(Listing::truncated(items, capacity))
    }

    // ========================================================================
    // Subscription registration (used by groups)
    // ========================================================================

    pub(crate) fn next_tag_handle(&self) -> TagHandle {
        TagHandle(self.next_tag_handle.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn attach_group(&self, group: &Arc<Group>) {
        let mut groups = self.groups.lock();
        groups.retain(|g| g.strong_count() > 0);
        groups.push(Arc::downgrade(group));
    }

    /// Register interest in `tag`, subscribing on the backend for the first holder
    ///
    /// Returns once the initial value (if the backend has one) is visible in the cache.
    pub(crate) async fn acquire(&self, tag: &Tag) -> Result<(TagKey, Arc<CacheSlot>)> {
        let key = self.shared.registry.resolve(tag);
        let (slot, initial) = {
            let mut subs = self.shared.subscriptions.lock().await;
            if let Some(entry) = subs.get_mut(&key) {
                entry.refs += 1;
                return Ok((key, self.shared.cache.slot(key)));
            }
            // The slot must exist before the backend can push for this key
            let slot = self.shared.cache.slot(key);
            let subscribed = match self
                .bounded("subscribe", self.shared.backend.subscribe(key, tag))
                .await
            {
                Ok(subscribed) => subscribed,
                Err(e) => {
                    self.shared.cache.remove(key);
                    return Err(e);
                },
            };
            subs.insert(
                key,
                SubEntry {
                    tag: tag.clone(),
                    registration: Some(subscribed.registration),
                    refs: 1,
                },
            );
            self.shared
                .counters
                .subscribed_tags
                .store(subs.len(), Ordering::Relaxed);
            (slot, subscribed.initial)
        };

        if let Some(value) = initial {
            self.prime(key, value).await;
        }
        debug!("{} subscribed {} as {}", self.shared.label, tag, key);
        Ok((key, slot))
    }

    /// Hand an initial value to the update task and wait until it is applied
    ///
    /// Gives up as soon as the source leaves Connected; the update task only takes
    /// commands while connected, and a reconnect primes every subscription again.
    async fn prime(&self, key: TagKey, value: RealValue) {
        let (ack, done) = oneshot::channel();
        let mut state = self.watch_state();
        let delivered = tokio::time::timeout(self.shared.timeouts.operation(), async {
            if self
                .cmd_tx
                .send(Command::Prime { key, value, ack })
                .await
                .is_err()
            {
                return false;
            }
            tokio::select! {
                acked = done => acked.is_ok(),
                _ = async {
                    state
                        .wait_for(|s| *s != ConnectionState::Connected)
                        .await
                        .map(|_| ())
                } => false,
            }
        })
        .await;
        if !matches!(delivered, Ok(true)) {
            debug!("{} initial value for {} not applied", self.shared.label, key);
        }
    }

    /// Drop one holder of each key, unsubscribing on the backend for the last one
    pub(crate) async fn release(&self, keys: &[TagKey]) {
        if keys.is_empty() {
            return;
        }
        let mut dropped = Vec::new();
        {
            let mut subs = self.shared.subscriptions.lock().await;
            for key in keys {
                let last = match subs.get_mut(key) {
                    Some(entry) => {
                        entry.refs = entry.refs.saturating_sub(1);
                        entry.refs == 0
                    },
                    None => false,
                };
                if last {
                    if let Some(entry) = subs.remove(key) {
                        self.shared.cache.remove(*key);
                        dropped.push((*key, entry));
                    }
                }
            }
            self.shared
                .counters
                .subscribed_tags
                .store(subs.len(), Ordering::Relaxed);
        }

        if self.state() != ConnectionState::Connected {
            return;
        }
        for (key, entry) in dropped {
            let Some(registration) = entry.registration else {
                continue;
            };
            if let Err(e) = self
                .bounded("unsubscribe", self.shared.backend.unsubscribe(registration))
                .await
            {
                debug!(
                    "{} unsubscribe {} ({}) failed: {}",
                    self.shared.label, entry.tag, key, e
                );
            }
        }
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Close child groups, cancel in-flight calls and stop the update task
    pub async fn destroy(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("{} destroying", self.shared.label);

        let groups: Vec<Arc<Group>> = self
            .groups
            .lock()
            .drain(..)
            .filter_map(|g| g.upgrade())
            .collect();
        for group in groups {
            group.close_by_source();
        }

        self.shared.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if tokio::time::timeout(self.shared.timeouts.operation(), task)
                .await
                .is_err()
            {
                warn!("{} update task did not stop in time", self.shared.label);
            }
        }

        self.shared.subscriptions.lock().await.clear();
        self.shared.counters.subscribed_tags.store(0, Ordering::Relaxed);
        self.shared.set_state(ConnectionState::Disconnected);
    }
}

impl Drop for DataSource {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

// ============================================================================
// Update task
// ============================================================================

enum LiveExit {
    Cancelled,
    Lost(String),
}

struct UpdateLoop {
    shared: Arc<Shared>,
    feed_tx: mpsc::Sender<(u64, FeedEvent)>,
    feed_rx: mpsc::Receiver<(u64, FeedEvent)>,
    cmd_rx: mpsc::Receiver<Command>,
    /// Bumped on every connect; feed events from older connections are ignored
    epoch: u64,
    auto_reconnect: bool,
    helper: ReconnectHelper,
}

impl UpdateLoop {
    async fn run(mut self) {
        let label = self.shared.label.clone();
        let mut recovering = false;

        loop {
            self.epoch += 1;
            let feed = FeedSender::new(self.feed_tx.clone(), self.epoch);
            let backend = self.shared.backend.clone();
            let connect_timeout = self.shared.timeouts.connect();
            let connect = move || async move {
                match tokio::time::timeout(connect_timeout, backend.connect(feed)).await {
                    Ok(r) => r,
                    Err(_) => Err(HubError::timeout(format!(
                        "connect timed out after {connect_timeout:?}"
                    ))),
                }
            };

            let outcome = tokio::select! {
                _ = self.shared.cancel.cancelled() => break,
                r = self.helper.attempt(connect) => r,
            };
            self.sync_counters();

            match outcome {
                Ok(()) => {},
                Err(ReconnectError::ConnectionFailed(_)) if !self.helper.is_exhausted() => continue,
                Err(e) => {
                    error!("{} giving up: {}", label, e);
                    self.shared.cache.degrade_all(Quality::NOT_CONNECTED);
                    self.shared.set_state(ConnectionState::Disconnected);
                    break;
                },
            }

            if recovering {
                tokio::select! {
                    _ = self.shared.cancel.cancelled() => break,
                    _ = self.resubscribe_all() => {},
                }
            }
            self.shared.set_state(ConnectionState::Connected);

            match self.drain().await {
                LiveExit::Cancelled => break,
                LiveExit::Lost(reason) => {
                    warn!("{} connection lost: {}", label, reason);
                    self.shared.cache.degrade_all(Quality::NOT_CONNECTED);
                    let _ = tokio::time::timeout(
                        self.shared.timeouts.operation(),
                        self.shared.backend.disconnect(),
                    )
                    .await;
                    if self.auto_reconnect {
                        self.shared.set_state(ConnectionState::Degraded);
                        self.helper.reset();
                        recovering = true;
                    } else {
                        self.shared.set_state(ConnectionState::Disconnected);
                        break;
                    }
                },
            }
        }

        if self.shared.cancel.is_cancelled() {
            let _ = tokio::time::timeout(
                self.shared.timeouts.operation(),
                self.shared.backend.disconnect(),
            )
            .await;
        }
        debug!("{} update task stopped", label);
    }

    /// Apply feed events and commands until the connection drops or the source is destroyed
    ///
    /// The feed is polled before commands, so a push queued ahead of a prime is applied first.
    async fn drain(&mut self) -> LiveExit {
        loop {
            tokio::select! {
                biased;
                _ = self.shared.cancel.cancelled() => return LiveExit::Cancelled,
                event = self.feed_rx.recv() => match event {
                    Some((epoch, FeedEvent::Value { key, value })) if epoch == self.epoch => {
                        if self.shared.cache.apply(key, value) {
                            self.shared.counters.applied_updates.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    Some((epoch, FeedEvent::ConnectionLost { reason })) if epoch == self.epoch => {
                        return LiveExit::Lost(reason);
                    },
                    Some(_) => {},
                    None => return LiveExit::Lost("update feed closed".to_string()),
                },
                Some(cmd) = self.cmd_rx.recv() => match cmd {
                    Command::Prime { key, value, ack } => {
                        self.shared.cache.prime(key, value);
                        let _ = ack.send(());
                    },
                },
            }
        }
    }

    /// Re-register every live subscription after a reconnect; handles are untouched
    async fn resubscribe_all(&self) {
        let mut subs = self.shared.subscriptions.lock().await;
        let total = subs.len();
        let mut restored = 0;
        for (key, entry) in subs.iter_mut() {
            let result = tokio::time::timeout(
                self.shared.timeouts.operation(),
                self.shared.backend.subscribe(*key, &entry.tag),
            )
            .await;
            match result {
                Ok(Ok(subscribed)) => {
                    entry.registration = Some(subscribed.registration);
                    if let Some(value) = subscribed.initial {
                        self.shared.cache.prime(*key, value);
                    }
                    restored += 1;
                },
                Ok(Err(e)) => {
                    entry.registration = None;
                    warn!("{} resubscribe {} failed: {}", self.shared.label, entry.tag, e);
                },
                Err(_) => {
                    entry.registration = None;
                    warn!("{} resubscribe {} timed out", self.shared.label, entry.tag);
                },
            }
        }
        info!(
            "{} restored {}/{} subscriptions",
            self.shared.label, restored, total
        );
    }

    fn sync_counters(&self) {
        let stats = self.helper.stats();
        let c = &self.shared.counters;
        c.total_attempts.store(stats.total_attempts, Ordering::Relaxed);
        c.successful_reconnects
            .store(stats.successful_reconnects, Ordering::Relaxed);
        c.failed_reconnects
            .store(stats.failed_reconnects, Ordering::Relaxed);
    }
}
