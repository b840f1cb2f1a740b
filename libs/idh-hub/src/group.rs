//! Subscription groups
//!
//! A group is a named set of subscribed tags on one source. Reads come from the source's
//! value cache and never touch the network; subscribe/unsubscribe/clear on one group are
//! serialized, other groups on the same source proceed independently.

use crate::batch::{BatchResult, Element, Subscription, TagHandle};
use crate::cache::CacheSlot;
use crate::registry::TagKey;
use crate::source::DataSource;
use ahash::{AHashMap, AHashSet};
use errors::{ErrorCode, HubError, Result};
use futures::future::join_all;
use idh_model::{RealValue, Tag};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

const OPEN: u8 = 0;
const DESTROYED: u8 = 1;
const SOURCE_CLOSED: u8 = 2;

struct Entry {
    tag: Tag,
    key: TagKey,
    slot: Arc<CacheSlot>,
}

#[derive(Default)]
struct Entries {
    by_handle: BTreeMap<TagHandle, Entry>,
    by_tag: AHashMap<Tag, TagHandle>,
}

impl Entries {
    fn take_keys(&mut self) -> Vec<TagKey> {
        self.by_tag.clear();
        std::mem::take(&mut self.by_handle)
            .into_values()
            .map(|e| e.key)
            .collect()
    }
}

pub struct Group {
    id: u64,
    name: String,
    source: Arc<DataSource>,
    /// Serializes membership changes of this group
    membership: tokio::sync::Mutex<()>,
    entries: RwLock<Entries>,
    state: AtomicU8,
}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("source", &self.source.id())
            .field("tags", &self.len())
            .finish()
    }
}

impl Group {
    pub fn new(id: u64, name: impl Into<String>, source: Arc<DataSource>) -> Result<Arc<Self>> {
        source.ensure_open()?;
        let group = Arc::new(Self {
            id,
            name: name.into(),
            source,
            membership: tokio::sync::Mutex::new(()),
            entries: RwLock::new(Entries::default()),
            state: AtomicU8::new(OPEN),
        });
        group.source.attach_group(&group);
        debug!("[group {}] '{}' created on source {}", id, group.name, group.source.id());
        Ok(group)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &Arc<DataSource> {
        &self.source
    }

    pub fn len(&self) -> usize {
        self.entries.read().by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribed tags in handle order
    pub fn tags(&self) -> Vec<(TagHandle, Tag)> {
        self.entries
            .read()
            .by_handle
            .iter()
            .map(|(h, e)| (*h, e.tag.clone()))
            .collect()
    }

    pub fn handle_of(&self, tag: &Tag) -> Option<TagHandle> {
        self.entries.read().by_tag.get(tag).copied()
    }

    fn check_open(&self) -> Result<()> {
        match self.state.load(Ordering::Acquire) {
            OPEN => self.source.ensure_open(),
            DESTROYED => Err(HubError::Closed(format!("group {} destroyed", self.id))),
            _ => Err(HubError::BadSource(format!(
                "source of group {} destroyed",
                self.id
            ))),
        }
    }

    /// Subscribe each tag, returning one handle or error code per tag in input order
    ///
    /// A tag already in the group (or repeated in the batch) yields its existing handle
    /// with status `AlreadyExists`.
    pub async fn subscribe(&self, tags: &[Tag]) -> Result<BatchResult<Subscription>> {
        self.check_open()?;
        if tags.is_empty() {
            return Ok(BatchResult::empty());
        }
        let _membership = self.membership.lock().await;
        self.check_open()?;

        if !self.source.supports_subscription() {
            return Ok(BatchResult::from_elements(
                vec![Err(ErrorCode::UnsupportedType); tags.len()],
                ErrorCode::SubscribeFailed,
                false,
            ));
        }

        let mut elements: Vec<Option<Element<Subscription>>> = vec![None; tags.len()];
        // New tags in first-seen order, with every index they occupy
        let mut pending: Vec<(Tag, Vec<usize>)> = Vec::new();
        {
            let entries = self.entries.read();
            let mut seen: AHashMap<&Tag, usize> = AHashMap::new();
            for (i, tag) in tags.iter().enumerate() {
                if let Some(handle) = entries.by_tag.get(tag) {
                    elements[i] = Some(Ok(Subscription {
                        handle: *handle,
                        status: ErrorCode::AlreadyExists,
                    }));
                } else if let Some(&p) = seen.get(tag) {
                    pending[p].1.push(i);
                } else {
                    seen.insert(tag, pending.len());
                    pending.push((tag.clone(), vec![i]));
                }
            }
        }

        if !pending.is_empty() {
            match self.source.ensure_ready().await {
                Err(e) if matches!(e.code(), ErrorCode::BadSource | ErrorCode::Closed) => {
                    return Err(e)
                },
                Err(e) => {
                    let code = e.code();
                    for (_, indices) in &pending {
                        for &i in indices {
                            elements[i] = Some(Err(code));
                        }
                    }
                },
                Ok(()) => {
                    let acquired =
                        join_all(pending.iter().map(|(tag, _)| self.source.acquire(tag))).await;
                    self.admit(pending, acquired, &mut elements).await;
                },
            }
        }

        let elements = elements
            .into_iter()
            .map(|e| e.unwrap_or(Err(ErrorCode::Failed)))
            .collect();
        let result = BatchResult::from_elements(elements, ErrorCode::SubscribeFailed, false);
        info!(
            "[group {}] subscribed {}/{} tags",
            self.id,
            result.succeeded(),
            result.len()
        );
        Ok(result)
    }

    async fn admit(
        &self,
        pending: Vec<(Tag, Vec<usize>)>,
        acquired: Vec<Result<(TagKey, Arc<CacheSlot>)>>,
        elements: &mut [Option<Element<Subscription>>],
    ) {
        let mut orphaned = Vec::new();
        {
            let mut entries = self.entries.write();
            let open = self.state.load(Ordering::Acquire) == OPEN;
            for ((tag, indices), result) in pending.into_iter().zip(acquired) {
                match result {
                    Ok((key, _)) if !open => {
                        orphaned.push(key);
                        for i in indices {
                            elements[i] = Some(Err(ErrorCode::BadSource));
                        }
                    },
                    Ok((key, slot)) => {
                        let handle = self.source.next_tag_handle();
                        for (n, i) in indices.into_iter().enumerate() {
                            let status = if n == 0 {
                                ErrorCode::Success
                            } else {
                                ErrorCode::AlreadyExists
                            };
                            elements[i] = Some(Ok(Subscription { handle, status }));
                        }
                        entries.by_tag.insert(tag.clone(), handle);
                        entries.by_handle.insert(handle, Entry { tag, key, slot });
                    },
                    Err(e) => {
                        debug!("[group {}] subscribe {} failed: {}", self.id, tag, e);
                        for i in indices {
                            elements[i] = Some(Err(e.code()));
                        }
                    },
                }
            }
        }
        self.source.release(&orphaned).await;
    }

    /// Remove handles from the group; unknown handles fail with `Unsubscribed`
    pub async fn unsubscribe(&self, handles: &[TagHandle]) -> Result<BatchResult<()>> {
        self.check_open()?;
        if handles.is_empty() {
            return Ok(BatchResult::empty());
        }
        let _membership = self.membership.lock().await;

        let mut released = Vec::new();
        let elements: Vec<Element<()>> = {
            let mut entries = self.entries.write();
            handles
                .iter()
                .map(|h| match entries.by_handle.remove(h) {
                    Some(entry) => {
                        entries.by_tag.remove(&entry.tag);
                        released.push(entry.key);
                        Ok(())
                    },
                    None => Err(ErrorCode::Unsubscribed),
                })
                .collect()
        };
        self.source.release(&released).await;
        Ok(BatchResult::from_elements(
            elements,
            ErrorCode::HasUnsubscribedItem,
            false,
        ))
    }

    /// Latest cached values; never waits on the network
    pub fn read_values(&self, handles: &[TagHandle]) -> Result<BatchResult<RealValue>> {
        self.check_open()?;
        let entries = self.entries.read();
        let elements = handles
            .iter()
            .map(|h| {
                entries
                    .by_handle
                    .get(h)
                    .map(|e| e.slot.load())
                    .ok_or(ErrorCode::Unsubscribed)
            })
            .collect();
        Ok(BatchResult::from_elements(
            elements,
            ErrorCode::NotAllReadable,
            false,
        ))
    }

    /// Write through the source by handle
    ///
    /// A handle listed twice with the same value is written once; listed with different
    /// values, every one of its elements fails with `Inconsistent` and nothing is written
    /// for it.
    pub async fn write_values(
        &self,
        values: &[f64],
        handles: &[TagHandle],
    ) -> Result<BatchResult<()>> {
        self.check_open()?;
        if values.len() != handles.len() {
            return Err(HubError::LengthMismatch {
                expected: handles.len(),
                actual: values.len(),
            });
        }
        if handles.is_empty() {
            return Ok(BatchResult::empty());
        }

        let mut elements: Vec<Option<Element<()>>> = vec![None; handles.len()];
        let mut writes: Vec<(Tag, f64, Vec<usize>)> = Vec::new();
        let mut conflicted = AHashSet::new();
        let mut any_unsubscribed = false;
        {
            let entries = self.entries.read();
            let mut seen: AHashMap<TagHandle, usize> = AHashMap::new();
            for (i, (handle, value)) in handles.iter().zip(values).enumerate() {
                let Some(entry) = entries.by_handle.get(handle) else {
                    elements[i] = Some(Err(ErrorCode::Unsubscribed));
                    any_unsubscribed = true;
                    continue;
                };
                match seen.get(handle) {
                    Some(&w) => {
                        if !same_value(writes[w].1, *value) {
                            conflicted.insert(w);
                        }
                        writes[w].2.push(i);
                    },
                    None => {
                        seen.insert(*handle, writes.len());
                        writes.push((entry.tag.clone(), *value, vec![i]));
                    },
                }
            }
        }

        let (rejected, dispatch): (Vec<_>, Vec<_>) = writes
            .into_iter()
            .enumerate()
            .partition(|(w, _)| conflicted.contains(w));
        for (_, (tag, _, indices)) in &rejected {
            debug!("[group {}] conflicting values for {}", self.id, tag);
            for &i in indices {
                elements[i] = Some(Err(ErrorCode::Inconsistent));
            }
        }

        if !dispatch.is_empty() {
            self.source.ensure_ready().await?;
            let batch: Vec<(Tag, f64)> = dispatch
                .iter()
                .map(|(_, (tag, value, _))| (tag.clone(), *value))
                .collect();
            let outcomes = self.source.write_tags(&batch).await;
            for ((_, (_, _, indices)), outcome) in dispatch.into_iter().zip(outcomes) {
                for i in indices {
                    elements[i] = Some(outcome);
                }
            }
        }

        let overall = if any_unsubscribed {
            ErrorCode::HasUnsubscribedItem
        } else if !rejected.is_empty() {
            ErrorCode::Inconsistent
        } else {
            ErrorCode::Success
        };
        let elements = elements
            .into_iter()
            .map(|e| e.unwrap_or(Err(ErrorCode::Failed)))
            .collect();
        Ok(BatchResult::new(overall, elements))
    }

    /// Unsubscribe every tag; the group stays usable
    pub async fn clear(&self) -> Result<()> {
        self.check_open()?;
        let _membership = self.membership.lock().await;
        let keys = self.entries.write().take_keys();
        debug!("[group {}] cleared {} tags", self.id, keys.len());
        self.source.release(&keys).await;
        Ok(())
    }

    /// Unsubscribe every tag and invalidate the group
    pub async fn destroy(&self) {
        let _membership = self.membership.lock().await;
        if self
            .state
            .compare_exchange(OPEN, DESTROYED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.state.store(DESTROYED, Ordering::Release);
            return;
        }
        let keys = self.entries.write().take_keys();
        self.source.release(&keys).await;
        info!("[group {}] '{}' destroyed", self.id, self.name);
    }

    /// The owning source is going away: drop all entries without talking to the backend
    pub(crate) fn close_by_source(&self) {
        if self
            .state
            .compare_exchange(OPEN, SOURCE_CLOSED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let dropped = self.entries.write().take_keys();
            debug!(
                "[group {}] closed with its source, dropped {} tags",
                self.id,
                dropped.len()
            );
        }
    }
}

fn same_value(a: f64, b: f64) -> bool {
    a == b || a.to_bits() == b.to_bits()
}
