//! Handle-based facade
//!
//! Callers hold plain `i64` handles for instances, sources and groups. A destroyed
//! object's handle is never honored again, even after its slot is reused.

use crate::backend::BackendRegistry;
use crate::batch::{BatchResult, Subscription, TagHandle};
use crate::config::HubConfig;
use crate::group::Group;
use crate::handle::{HandleKind, HandleTable};
use crate::instance::Instance;
use crate::source::DataSource;
use common::LogLevel;
use errors::Result;
use idh_model::{BrowseItem, Listing, RealValue, SourceDescriptor, SourceFlags, SourceType, Tag};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::info;

static GLOBAL: OnceLock<Hub> = OnceLock::new();

#[derive(Clone)]
struct SourceEntry {
    instance: i64,
    source: Arc<DataSource>,
}

#[derive(Clone)]
struct GroupEntry {
    source: i64,
    group: Arc<Group>,
}

pub struct Hub {
    config: Arc<HubConfig>,
    registry: Arc<BackendRegistry>,
    instances: HandleTable<Arc<Instance>>,
    sources: HandleTable<SourceEntry>,
    groups: HandleTable<GroupEntry>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("instances", &self.instances.len())
            .field("sources", &self.sources.len())
            .field("groups", &self.groups.len())
            .field("registry", &self.registry)
            .finish()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

impl Hub {
    pub fn new(config: HubConfig) -> Self {
        Self::with_registry(config, BackendRegistry::with_defaults())
    }

    pub fn with_registry(config: HubConfig, registry: BackendRegistry) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            instances: HandleTable::new(HandleKind::Instance),
            sources: HandleTable::new(HandleKind::Source),
            groups: HandleTable::new(HandleKind::Group),
            next_id: AtomicU64::new(1),
        }
    }

    /// Process-wide hub with default configuration
    pub fn global() -> &'static Hub {
        GLOBAL.get_or_init(Hub::default)
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Backend factories; register more before creating sources of their type
    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// Install the global subscriber from `config.logging`
    pub fn init_logging(&self) -> Result<()> {
        common::logging::init_with_config(&self.config.logging)
    }

    pub fn set_log_level(&self, level: LogLevel) -> Result<()> {
        common::set_log_level(level)
    }

    pub fn get_log_level(&self) -> LogLevel {
        common::get_log_level()
    }

    // ========================================================================
    // Instances
    // ========================================================================

    pub fn instance_create(&self) -> i64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let instance = Arc::new(Instance::new(
            id,
            self.config.clone(),
            self.registry.clone(),
        ));
        let handle = self.instances.insert(instance);
        info!("Instance {} created (handle {:#x})", id, handle);
        handle
    }

    /// Destroy the instance and every source created through it
    pub async fn instance_destroy(&self, instance: i64) -> Result<()> {
        let removed = self.instances.remove(instance)?;
        let owned = self.sources.remove_where(|e| e.instance == instance);
        for (_, entry) in &owned {
            entry.source.destroy().await;
        }
        removed.destroy().await;
        Ok(())
    }

    pub async fn instance_discover(
        &self,
        instance: i64,
        hostname: &str,
        port: u16,
        capacity: usize,
    ) -> Result<Listing<SourceDescriptor>> {
        self.instances
            .get(instance)?
            .discover(hostname, port, capacity)
            .await
    }

    // ========================================================================
    // Sources
    // ========================================================================

    pub fn source_create(
        &self,
        instance: i64,
        source_type: SourceType,
        schema: &str,
        sample_interval_ms: u32,
        flags: SourceFlags,
    ) -> Result<i64> {
        let owner = self.instances.get(instance)?;
        let source = owner.create_source(source_type, schema, sample_interval_ms, flags)?;
        Ok(self.sources.insert(SourceEntry { instance, source }))
    }

    /// Resolve a source handle
    pub fn source(&self, source: i64) -> Result<Arc<DataSource>> {
        Ok(self.sources.get(source)?.source)
    }

    /// Liveness probe: true for a handle that was created and not yet destroyed
    pub fn source_valid(&self, source: i64) -> bool {
        self.sources
            .get(source)
            .is_ok_and(|entry| entry.source.is_valid())
    }

    /// Destroy the source; its groups stay addressable but report `BadSource`
    pub async fn source_destroy(&self, source: i64) -> Result<()> {
        let entry = self.sources.remove(source)?;
        if let Ok(instance) = self.instances.get(entry.instance) {
            instance.detach(&entry.source);
        }
        entry.source.destroy().await;
        Ok(())
    }

    pub async fn source_browse_root(
        &self,
        source: i64,
        capacity: usize,
    ) -> Result<Listing<BrowseItem>> {
        self.source(source)?.browse_root(capacity).await
    }

    pub async fn source_browse(
        &self,
        source: i64,
        parent_namespace_index: u16,
        parent_node_name: &str,
        capacity: usize,
    ) -> Result<Listing<BrowseItem>> {
        self.source(source)?
            .browse(parent_namespace_index, parent_node_name, capacity)
            .await
    }

    pub async fn source_read_values(
        &self,
        source: i64,
        tags: &[Tag],
    ) -> Result<BatchResult<RealValue>> {
        self.source(source)?.read_values(tags).await
    }

    pub async fn source_write_values(
        &self,
        source: i64,
        values: &[f64],
        tags: &[Tag],
    ) -> Result<BatchResult<()>> {
        self.source(source)?.write_values(values, tags).await
    }

    // ========================================================================
    // Groups
    // ========================================================================

    pub fn group_create(&self, source: i64, name: &str) -> Result<i64> {
        let owner = self.source(source)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let group = Group::new(id, name, owner)?;
        Ok(self.groups.insert(GroupEntry { source, group }))
    }

    pub fn group(&self, group: i64) -> Result<Arc<Group>> {
        Ok(self.groups.get(group)?.group)
    }

    /// Handle of the source a group was created on
    pub fn group_source(&self, group: i64) -> Result<i64> {
        Ok(self.groups.get(group)?.source)
    }

    pub async fn group_subscribe(
        &self,
        group: i64,
        tags: &[Tag],
    ) -> Result<BatchResult<Subscription>> {
        self.group(group)?.subscribe(tags).await
    }

    pub async fn group_unsubscribe(
        &self,
        group: i64,
        handles: &[TagHandle],
    ) -> Result<BatchResult<()>> {
        self.group(group)?.unsubscribe(handles).await
    }

    pub fn group_read_values(
        &self,
        group: i64,
        handles: &[TagHandle],
    ) -> Result<BatchResult<RealValue>> {
        self.group(group)?.read_values(handles)
    }

    pub async fn group_write_values(
        &self,
        group: i64,
        values: &[f64],
        handles: &[TagHandle],
    ) -> Result<BatchResult<()>> {
        self.group(group)?.write_values(values, handles).await
    }

    pub async fn group_clear(&self, group: i64) -> Result<()> {
        self.group(group)?.clear().await
    }

    pub async fn group_destroy(&self, group: i64) -> Result<()> {
        let entry = self.groups.remove(group)?;
        entry.group.destroy().await;
        Ok(())
    }

    /// Destroy everything; outstanding handles become invalid
    pub async fn shutdown(&self) {
        for (_, entry) in self.groups.remove_where(|_| true) {
            entry.group.destroy().await;
        }
        for (_, entry) in self.sources.remove_where(|_| true) {
            entry.source.destroy().await;
        }
        for (_, instance) in self.instances.remove_where(|_| true) {
            instance.destroy().await;
        }
        info!("Hub shut down");
    }
}

