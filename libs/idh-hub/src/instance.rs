//! Hub instance: discovery plus the sources created through it

use crate::backend::BackendRegistry;
use crate::config::HubConfig;
use crate::source::{DataSource, SourceOptions};
use errors::{HubError, Result};
use futures::future::join_all;
use idh_model::{Listing, SourceAddress, SourceDescriptor, SourceFlags, SourceType};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Source ids are process-wide so log lines stay unambiguous across instances
static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

pub struct Instance {
    id: u64,
    config: Arc<HubConfig>,
    registry: Arc<BackendRegistry>,
    sources: Mutex<Vec<Arc<DataSource>>>,
    closed: AtomicBool,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("sources", &self.sources.lock().len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Instance {
    pub fn new(id: u64, config: Arc<HubConfig>, registry: Arc<BackendRegistry>) -> Self {
        Self {
            id,
            config,
            registry,
            sources: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(HubError::Closed(format!("instance {} destroyed", self.id)))
        } else {
            Ok(())
        }
    }

    pub fn sources(&self) -> Vec<Arc<DataSource>> {
        self.sources.lock().clone()
    }

    /// Enumerate reachable sources through every registered backend
    ///
    /// Backends that fail are skipped; an empty result is not an error.
    pub async fn discover(
        &self,
        hostname: &str,
        port: u16,
        capacity: usize,
    ) -> Result<Listing<SourceDescriptor>> {
        self.ensure_open()?;
        let factories = self.registry.factories();
        let lookups = join_all(factories.iter().map(|f| f.discover(hostname, port)));
        let limit = self.config.timeouts.discovery();

        let results = tokio::select! {
            _ = self.cancel.cancelled() => {
                return Err(HubError::Closed(format!("instance {} destroyed", self.id)))
            },
            r = tokio::time::timeout(limit, lookups) => r.map_err(|_| {
                HubError::timeout(format!("discovery on '{hostname}' exceeded {limit:?}"))
            })?,
        };

        let mut found = Vec::new();
        for (factory, result) in factories.iter().zip(results) {
            match result {
                Ok(descriptors) => found.extend(descriptors),
                Err(e) => warn!(
                    "[instance {}] {} discovery failed: {}",
                    self.id,
                    factory.source_type(),
                    e
                ),
            }
        }
        debug!(
            "[instance {}] discovered {} sources on '{}'",
            self.id,
            found.len(),
            hostname
        );
        Ok(Listing::truncated(found, capacity))
    }

    /// Validate the schema, pick the backend by type and start connecting
    pub fn create_source(
        &self,
        source_type: SourceType,
        schema: &str,
        sample_interval_ms: u32,
        flags: SourceFlags,
    ) -> Result<Arc<DataSource>> {
        self.ensure_open()?;
        let address = SourceAddress::parse(source_type, schema)?;
        let sample_interval = Duration::from_millis(u64::from(sample_interval_ms));
        let backend = self
            .registry
            .get(source_type)?
            .create(&address, sample_interval)?;

        let options = SourceOptions {
            source_type,
            schema: schema.to_string(),
            sample_interval,
            flags,
        };
        let id = NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed);
        let source = DataSource::start(id, options, address, backend, &self.config)?;
        self.sources.lock().push(source.clone());
        Ok(source)
    }

    /// Forget `source`; returns false if it did not belong to this instance
    pub fn detach(&self, source: &Arc<DataSource>) -> bool {
        let mut sources = self.sources.lock();
        let before = sources.len();
        sources.retain(|s| !Arc::ptr_eq(s, source));
        sources.len() != before
    }

    /// Destroy every source and reject further calls
    pub async fn destroy(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();
        let sources = std::mem::take(&mut *self.sources.lock());
        let count = sources.len();
        join_all(sources.iter().map(|s| s.destroy())).await;
        info!("[instance {}] destroyed with {} sources", self.id, count);
    }
}
