//! In-memory backend
//!
//! Simulates a UA/DA server without any transport. A [`MemoryServer`] holds tags, a browse
//! tree and discovery entries; [`MemoryBackend`] adapters connect to it the way a protocol
//! client would. Tests drive the server to produce value changes, outages and latency.

use crate::backend::{
    Backend, BackendFactory, FeedEvent, FeedSender, Registration, Subscribed, TagRead,
};
use crate::registry::TagKey;
use ahash::AHashMap;
use async_trait::async_trait;
use dashmap::DashMap;
use errors::{ErrorCode, HubError, Result};
use idh_model::time::{SystemTimeProvider, TimeProvider};
use idh_model::{BrowseItem, Quality, RealValue, SourceAddress, SourceDescriptor, SourceType, Tag};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info};

type BrowseKey = Option<(u16, String)>;

/// One connected adapter as seen by the server
struct Session {
    feed: FeedSender,
    alive: AtomicBool,
    subscriptions: Mutex<AHashMap<Tag, Vec<Registration>>>,
}

impl Session {
    fn push(&self, tag: &Tag, value: RealValue) {
        let subs = self.subscriptions.lock();
        if let Some(registrations) = subs.get(tag) {
            for reg in registrations {
                self.feed.try_send(FeedEvent::Value {
                    key: reg.key,
                    value,
                });
            }
        }
    }
}

struct ServerInner {
    name: String,
    tags: RwLock<AHashMap<Tag, RealValue>>,
    browse: RwLock<AHashMap<BrowseKey, Vec<BrowseItem>>>,
    discovery: RwLock<Vec<SourceDescriptor>>,
    reachable: AtomicBool,
    latency_ms: AtomicU64,
    sessions: Mutex<Vec<Weak<Session>>>,
    connects: AtomicU64,
    writes: AtomicU64,
    clock: Arc<dyn TimeProvider>,
}

/// Simulated server shared by every adapter connected to it
#[derive(Clone)]
pub struct MemoryServer {
    inner: Arc<ServerInner>,
}

impl std::fmt::Debug for MemoryServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryServer")
            .field("name", &self.inner.name)
            .field("tags", &self.inner.tags.read().len())
            .field("reachable", &self.is_reachable())
            .finish()
    }
}

impl MemoryServer {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_clock(name, Arc::new(SystemTimeProvider))
    }

    pub fn with_clock(name: impl Into<String>, clock: Arc<dyn TimeProvider>) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                name: name.into(),
                tags: RwLock::new(AHashMap::new()),
                browse: RwLock::new(AHashMap::new()),
                discovery: RwLock::new(Vec::new()),
                reachable: AtomicBool::new(true),
                latency_ms: AtomicU64::new(0),
                sessions: Mutex::new(Vec::new()),
                connects: AtomicU64::new(0),
                writes: AtomicU64::new(0),
                clock,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Create or overwrite a tag with a Good value stamped now
    pub fn add_tag(&self, tag: Tag, value: f64) -> Result<()> {
        let value = self.stamp(value, Quality::GOOD)?;
        self.inner.tags.write().insert(tag, value);
        Ok(())
    }

    /// Change a tag's value and push it to every subscriber
    pub fn set_value(&self, tag: &Tag, value: f64) -> Result<()> {
        self.set_value_with_quality(tag, value, Quality::GOOD)
    }

    pub fn set_value_with_quality(&self, tag: &Tag, value: f64, quality: Quality) -> Result<()> {
        let value = self.stamp(value, quality)?;
        {
            let mut tags = self.inner.tags.write();
            let slot = tags
                .get_mut(tag)
                .ok_or_else(|| HubError::invalid_tag(format!("{tag} not on {}", self.name())))?;
            *slot = value;
        }
        for session in self.live_sessions() {
            session.push(tag, value);
        }
        Ok(())
    }

    pub fn value(&self, tag: &Tag) -> Option<RealValue> {
        self.inner.tags.read().get(tag).copied()
    }

    /// Add children under `parent` (`None` = root)
    pub fn add_browse_items(&self, parent: Option<(u16, &str)>, items: Vec<BrowseItem>) {
        let key = parent.map(|(ns, name)| (ns, name.to_string()));
        self.inner.browse.write().entry(key).or_default().extend(items);
    }

    pub fn add_discovery(&self, descriptor: SourceDescriptor) {
        self.inner.discovery.write().push(descriptor);
    }

    pub fn discovery(&self) -> Vec<SourceDescriptor> {
        self.inner.discovery.read().clone()
    }

    pub fn is_reachable(&self) -> bool {
        self.inner.reachable.load(Ordering::Acquire)
    }

    /// While unreachable, connect attempts fail
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::Release);
    }

    /// Delay applied to every call from an adapter
    pub fn set_latency(&self, latency: Duration) {
        self.inner
            .latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Break every open session, reporting the loss to its source
    pub fn drop_connections(&self, reason: &str) {
        let sessions: Vec<Arc<Session>> = self
            .inner
            .sessions
            .lock()
            .drain(..)
            .filter_map(|s| s.upgrade())
            .collect();
        info!(
            "{}: dropping {} connections ({})",
            self.name(),
            sessions.len(),
            reason
        );
        for session in sessions {
            if session.alive.swap(false, Ordering::AcqRel) {
                session.feed.try_send(FeedEvent::ConnectionLost {
                    reason: reason.to_string(),
                });
            }
        }
    }

    pub fn connect_count(&self) -> u64 {
        self.inner.connects.load(Ordering::Relaxed)
    }

    /// Writes received from adapters
    pub fn write_count(&self) -> u64 {
        self.inner.writes.load(Ordering::Relaxed)
    }

    /// Subscriptions held by live sessions
    pub fn subscription_count(&self) -> usize {
        self.live_sessions()
            .iter()
            .map(|s| s.subscriptions.lock().values().map(Vec::len).sum::<usize>())
            .sum()
    }

    fn stamp(&self, value: f64, quality: Quality) -> Result<RealValue> {
        RealValue::new(value, quality, self.inner.clock.now_ms())
    }

    fn live_sessions(&self) -> Vec<Arc<Session>> {
        let mut sessions = self.inner.sessions.lock();
        sessions.retain(|s| s.upgrade().is_some_and(|s| s.alive.load(Ordering::Acquire)));
        sessions.iter().filter_map(Weak::upgrade).collect()
    }

    async fn delay(&self) {
        let ms = self.inner.latency_ms.load(Ordering::Relaxed);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

/// Adapter connected to a [`MemoryServer`]
pub struct MemoryBackend {
    name: String,
    server: Option<MemoryServer>,
    session: Mutex<Option<Arc<Session>>>,
    next_registration: AtomicU64,
}

impl MemoryBackend {
    /// Adapter for `host`; `None` models a host with no server behind it
    pub fn new(host: impl Into<String>, server: Option<MemoryServer>) -> Self {
        Self {
            name: format!("memory://{}", host.into()),
            server,
            session: Mutex::new(None),
            next_registration: AtomicU64::new(1),
        }
    }

    fn server(&self) -> Result<&MemoryServer> {
        self.server
            .as_ref()
            .ok_or_else(|| HubError::InvalidServer(format!("no server behind {}", self.name)))
    }

    fn session(&self) -> Result<Arc<Session>> {
        self.session
            .lock()
            .as_ref()
            .filter(|s| s.alive.load(Ordering::Acquire))
            .cloned()
            .ok_or_else(|| HubError::not_connected(format!("{} has no session", self.name)))
    }

    /// Server round trip: latency first, then the session must still be up
    async fn call(&self) -> Result<(&MemoryServer, Arc<Session>)> {
        let server = self.server()?;
        server.delay().await;
        Ok((server, self.session()?))
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self, feed: FeedSender) -> Result<()> {
        let server = self.server()?;
        server.delay().await;
        if !server.is_reachable() {
            return Err(HubError::not_connected(format!(
                "{} is unreachable",
                server.name()
            )));
        }

        let session = Arc::new(Session {
            feed,
            alive: AtomicBool::new(true),
            subscriptions: Mutex::new(AHashMap::new()),
        });
        server.inner.sessions.lock().push(Arc::downgrade(&session));
        server.inner.connects.fetch_add(1, Ordering::Relaxed);
        if let Some(old) = self.session.lock().replace(session) {
            old.alive.store(false, Ordering::Release);
        }
        debug!("{} connected", self.name);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(session) = self.session.lock().take() {
            session.alive.store(false, Ordering::Release);
            debug!("{} disconnected", self.name);
        }
        Ok(())
    }

    async fn read(&self, tags: &[Tag]) -> Result<Vec<TagRead>> {
        let (server, _) = self.call().await?;
        let values = server.inner.tags.read();
        Ok(tags
            .iter()
            .map(|t| values.get(t).copied().ok_or(ErrorCode::InvalidTag))
            .collect())
    }

    async fn write(&self, tag: &Tag, value: f64) -> Result<()> {
        let (server, _) = self.call().await?;
        server.set_value(tag, value)?;
        server.inner.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn subscribe(&self, key: TagKey, tag: &Tag) -> Result<Subscribed> {
        let (server, session) = self.call().await?;
        let initial = server
            .value(tag)
            .ok_or_else(|| HubError::invalid_tag(format!("{tag} not on {}", server.name())))?;
        let registration = Registration {
            key,
            id: self.next_registration.fetch_add(1, Ordering::Relaxed),
        };
        session
            .subscriptions
            .lock()
            .entry(tag.clone())
            .or_default()
            .push(registration);
        Ok(Subscribed {
            registration,
            initial: Some(initial),
        })
    }

    async fn unsubscribe(&self, registration: Registration) -> Result<()> {
        let (_, session) = self.call().await?;
        let mut subs = session.subscriptions.lock();
        for registrations in subs.values_mut() {
            registrations.retain(|r| r.id != registration.id);
        }
        subs.retain(|_, r| !r.is_empty());
        Ok(())
    }

    async fn browse(&self, parent: Option<(u16, &str)>) -> Result<Vec<BrowseItem>> {
        let (server, _) = self.call().await?;
        let key = parent.map(|(ns, name)| (ns, name.to_string()));
        let tree = server.inner.browse.read();
        match (tree.get(&key), parent) {
            (Some(items), _) => Ok(items.clone()),
            (None, None) => Ok(Vec::new()),
            (None, Some((ns, name))) => Err(HubError::invalid_tag(format!(
                "no node ns={ns};s={name}"
            ))),
        }
    }
}

/// Factory resolving a source's host to a registered [`MemoryServer`]
pub struct MemoryFactory {
    source_type: SourceType,
    servers: DashMap<String, MemoryServer, ahash::RandomState>,
}

impl MemoryFactory {
    pub fn new(source_type: SourceType) -> Self {
        Self {
            source_type,
            servers: DashMap::with_hasher(ahash::RandomState::new()),
        }
    }

    pub fn with_server(self, host: impl Into<String>, server: MemoryServer) -> Self {
        self.servers.insert(host.into(), server);
        self
    }

    pub fn add_server(&self, host: impl Into<String>, server: MemoryServer) {
        self.servers.insert(host.into(), server);
    }
}

fn host_of(address: &SourceAddress) -> String {
    match address {
        SourceAddress::Ua { host, .. } | SourceAddress::Da { host, .. } => host.clone(),
        SourceAddress::Csv { path } => path.display().to_string(),
    }
}

#[async_trait]
impl BackendFactory for MemoryFactory {
    fn source_type(&self) -> SourceType {
        self.source_type
    }

    fn create(&self, address: &SourceAddress, _sample_interval: Duration) -> Result<Arc<dyn Backend>> {
        let host = host_of(address);
        let server = self.servers.get(&host).map(|s| s.clone());
        Ok(Arc::new(MemoryBackend::new(host, server)))
    }

    async fn discover(&self, hostname: &str, port: u16) -> Result<Vec<SourceDescriptor>> {
        let matches_port = |d: &SourceDescriptor| match SourceAddress::parse(d.source_type, &d.schema) {
            Ok(SourceAddress::Ua { port: p, .. }) => port == 0 || p == port,
            Ok(_) => true,
            Err(_) => false,
        };
        Ok(self
            .servers
            .iter()
            .filter(|e| hostname.is_empty() || e.key() == hostname)
            .flat_map(|e| e.value().discovery())
            .filter(|d| d.source_type == self.source_type && matches_port(d))
            .collect())
    }
}
