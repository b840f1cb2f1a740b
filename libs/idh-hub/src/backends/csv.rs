//! CSV-simulated source
//!
//! The file lists samples as `namespace_index,tag_name,value[,quality]` after a header row.
//! Rows sharing a tag form a cyclic series; every sample-interval tick advances each series
//! by one step and pushes the new value to subscribers. Quality is decimal or `0x` hex and
//! defaults to Good.

use crate::backend::{
    Backend, BackendFactory, FeedEvent, FeedSender, Registration, Subscribed, TagRead,
};
use crate::registry::TagKey;
use ahash::AHashMap;
use async_trait::async_trait;
use csv::ReaderBuilder;
use errors::{ErrorCode, HubError, Result};
use idh_model::time::{SystemTimeProvider, TimeProvider};
use idh_model::{BrowseItem, Quality, RealValue, SourceAddress, SourceType, Tag};
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone)]
struct Series {
    samples: Vec<(f64, Quality)>,
    position: usize,
    current: RealValue,
}

impl Series {
    fn advance(&mut self, now_ms: u64) -> Result<RealValue> {
        self.position = (self.position + 1) % self.samples.len();
        let (value, quality) = self.samples[self.position];
        self.current = RealValue::new(value, quality, now_ms)?;
        Ok(self.current)
    }
}

fn parse_quality(field: &str) -> Option<Quality> {
    let field = field.trim();
    if field.is_empty() {
        return Some(Quality::GOOD);
    }
    let bits = match field.strip_prefix("0x").or_else(|| field.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16).ok()?,
        None => field.parse::<u8>().ok()?,
    };
    Some(Quality(bits))
}

/// Parse a CSV document into per-tag series, keeping first-seen tag order
fn parse_series(data: &[u8], path: &Path, now_ms: u64) -> Result<Vec<(Tag, Series)>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(data);

    let mut order: Vec<Tag> = Vec::new();
    let mut samples: AHashMap<Tag, Vec<(f64, Quality)>> = AHashMap::new();
    for (row, record) in reader.records().enumerate() {
        let line = row + 2;
        let record = record.map_err(|e| {
            HubError::Corrupt(format!("{}:{line}: {e}", path.display()))
        })?;
        if record.len() < 3 {
            return Err(HubError::Corrupt(format!(
                "{}:{line}: expected namespace_index,tag_name,value[,quality]",
                path.display()
            )));
        }
        let ns = record[0].parse::<u16>().map_err(|_| {
            HubError::Corrupt(format!("{}:{line}: bad namespace index '{}'", path.display(), &record[0]))
        })?;
        let value = record[2].parse::<f64>().map_err(|_| {
            HubError::Corrupt(format!("{}:{line}: bad value '{}'", path.display(), &record[2]))
        })?;
        let quality_field = record.get(3).unwrap_or("");
        let quality = parse_quality(quality_field).ok_or_else(|| {
            HubError::Corrupt(format!("{}:{line}: bad quality '{quality_field}'", path.display()))
        })?;

        let tag = Tag::new(ns, &record[1]);
        let entry = samples.entry(tag.clone()).or_default();
        if entry.is_empty() {
            order.push(tag);
        }
        entry.push((value, quality));
    }

    order
        .into_iter()
        .map(|tag| {
            let samples = samples.remove(&tag).unwrap_or_default();
            let (value, quality) = samples.first().copied().unwrap_or((0.0, Quality::NO_DATA));
            let current = RealValue::new(value, quality, now_ms)?;
            Ok((
                tag,
                Series {
                    samples,
                    position: 0,
                    current,
                },
            ))
        })
        .collect()
}

/// Shared between the adapter and its ticker task
struct CsvState {
    series: RwLock<AHashMap<Tag, Series>>,
    subscriptions: Mutex<AHashMap<Tag, Vec<Registration>>>,
    feed: Mutex<Option<FeedSender>>,
    clock: Arc<dyn TimeProvider>,
}

impl CsvState {
    fn push(&self, tag: &Tag, value: RealValue) {
        let feed = self.feed.lock().clone();
        let Some(feed) = feed else { return };
        let subs = self.subscriptions.lock();
        for reg in subs.get(tag).into_iter().flatten() {
            feed.try_send(FeedEvent::Value {
                key: reg.key,
                value,
            });
        }
    }

    fn tick(&self) -> Result<usize> {
        let now = self.clock.now_ms();
        let changed: Vec<(Tag, RealValue)> = {
            let mut series = self.series.write();
            series
                .iter_mut()
                .map(|(tag, s)| s.advance(now).map(|v| (tag.clone(), v)))
                .collect::<Result<_>>()?
        };
        for (tag, value) in &changed {
            self.push(tag, *value);
        }
        Ok(changed.len())
    }
}

pub struct CsvBackend {
    name: String,
    path: PathBuf,
    interval: Duration,
    state: Arc<CsvState>,
    ticker: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
    next_registration: AtomicU64,
}

impl CsvBackend {
    pub fn new(path: impl Into<PathBuf>, interval: Duration, clock: Arc<dyn TimeProvider>) -> Self {
        let path = path.into();
        Self {
            name: format!("csv://{}", path.display()),
            path,
            interval,
            state: Arc::new(CsvState {
                series: RwLock::new(AHashMap::new()),
                subscriptions: Mutex::new(AHashMap::new()),
                feed: Mutex::new(None),
                clock,
            }),
            ticker: Mutex::new(None),
            next_registration: AtomicU64::new(1),
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.state.feed.lock().is_some() {
            Ok(())
        } else {
            Err(HubError::not_connected(format!("{} not loaded", self.name)))
        }
    }

    fn current(&self, tag: &Tag) -> Option<RealValue> {
        self.state.series.read().get(tag).map(|s| s.current)
    }

    fn stop_ticker(&self) {
        if let Some((cancel, _)) = self.ticker.lock().take() {
            cancel.cancel();
        }
    }

    fn start_ticker(&self) {
        if self.interval.is_zero() {
            return;
        }
        let cancel = CancellationToken::new();
        let state = self.state.clone();
        let period = self.interval;
        let stop = cancel.clone();
        let name = self.name.clone();
        let task = tokio::spawn(async move {
            let mut ticks = tokio::time::interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately
            ticks.tick().await;
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticks.tick() => {
                        if let Err(e) = state.tick() {
                            debug!("{} tick failed: {}", name, e);
                        }
                    },
                }
            }
        });
        if let Some((old, _)) = self.ticker.lock().replace((cancel, task)) {
            old.cancel();
        }
    }
}

impl Drop for CsvBackend {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}

#[async_trait]
impl Backend for CsvBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self, feed: FeedSender) -> Result<()> {
        let data = tokio::fs::read(&self.path).await?;
        let parsed = parse_series(&data, &self.path, self.state.clock.now_ms())?;
        info!("{} loaded {} tags", self.name, parsed.len());

        *self.state.series.write() = parsed.into_iter().collect();
        self.state.subscriptions.lock().clear();
        *self.state.feed.lock() = Some(feed);
        self.start_ticker();
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.stop_ticker();
        self.state.feed.lock().take();
        Ok(())
    }

    async fn read(&self, tags: &[Tag]) -> Result<Vec<TagRead>> {
        self.ensure_connected()?;
        let series = self.state.series.read();
        Ok(tags
            .iter()
            .map(|t| series.get(t).map(|s| s.current).ok_or(ErrorCode::InvalidTag))
            .collect())
    }

    async fn write(&self, tag: &Tag, value: f64) -> Result<()> {
        self.ensure_connected()?;
        let written = {
            let mut series = self.state.series.write();
            let s = series
                .get_mut(tag)
                .ok_or_else(|| HubError::invalid_tag(format!("{tag} not in {}", self.name)))?;
            s.current = RealValue::new(value, Quality::GOOD, self.state.clock.now_ms())?;
            s.current
        };
        self.state.push(tag, written);
        Ok(())
    }

    async fn subscribe(&self, key: TagKey, tag: &Tag) -> Result<Subscribed> {
        self.ensure_connected()?;
        let initial = self
            .current(tag)
            .ok_or_else(|| HubError::invalid_tag(format!("{tag} not in {}", self.name)))?;
        let registration = Registration {
            key,
            id: self.next_registration.fetch_add(1, Ordering::Relaxed),
        };
        self.state
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
        let mut subs = self.state.subscriptions.lock();
        for registrations in subs.values_mut() {
            registrations.retain(|r| r.id != registration.id);
        }
        subs.retain(|_, r| !r.is_empty());
        Ok(())
    }

    async fn browse(&self, _parent: Option<(u16, &str)>) -> Result<Vec<BrowseItem>> {
        Err(HubError::UnsupportedType(format!(
            "{} has no address space to browse",
            self.name
        )))
    }
}

/// Factory for `csv://` sources
pub struct CsvFactory {
    clock: Arc<dyn TimeProvider>,
}

impl Default for CsvFactory {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemTimeProvider))
    }
}

impl CsvFactory {
    pub fn with_clock(clock: Arc<dyn TimeProvider>) -> Self {
        Self { clock }
    }
}

#[async_trait]
impl BackendFactory for CsvFactory {
    fn source_type(&self) -> SourceType {
        SourceType::Csv
    }

    fn create(&self, address: &SourceAddress, sample_interval: Duration) -> Result<Arc<dyn Backend>> {
        match address {
            SourceAddress::Csv { path } => Ok(Arc::new(CsvBackend::new(
                path.clone(),
                sample_interval,
                self.clock.clone(),
            ))),
            other => Err(HubError::UnsupportedType(format!(
                "CSV backend cannot serve {other}"
            ))),
        }
    }
}
