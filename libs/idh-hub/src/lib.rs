//! Industrial data hub engine
//!
//! Clients create an instance, open data sources on it (one backend adapter per source)
//! and group subscribed tags for cached, non-blocking reads:
//!
//! ```no_run
//! use idh_hub::{Hub, HubConfig};
//! use idh_model::{SourceFlags, SourceType, Tag};
//!
//! # async fn demo() -> errors::Result<()> {
//! let hub = Hub::new(HubConfig::default());
//! let instance = hub.instance_create();
//! let source = hub.source_create(
//!     instance,
//!     SourceType::Csv,
//!     "csv://plant.csv",
//!     1000,
//!     SourceFlags::SUBSCRIBE | SourceFlags::RECONNECT,
//! )?;
//! let group = hub.group_create(source, "overview")?;
//! let subscribed = hub.group_subscribe(group, &[Tag::new(2, "MV1")]).await?;
//! let values = hub.group_read_values(group, &subscribed.handles())?;
//! println!("{:?}", values.values());
//! hub.instance_destroy(instance).await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod backends;
pub mod batch;
pub mod cache;
pub mod config;
pub mod group;
pub mod handle;
pub mod hub;
pub mod instance;
pub mod reconnect;
pub mod registry;
pub mod source;

pub use backend::{Backend, BackendFactory, BackendRegistry, FeedEvent, FeedSender};
pub use batch::{BatchResult, BatchStatus, Element, Subscription, TagHandle};
pub use config::{HubConfig, ReconnectConfig, TimeoutConfig};
pub use group::Group;
pub use handle::INVALID_HANDLE;
pub use hub::Hub;
pub use instance::Instance;
pub use source::{ConnectionState, DataSource, SourceStats};
