//! Data model of the industrial data hub
//!
//! Pure types and functions with no runtime: the quality/timestamp codec, tags and values,
//! browse items, source descriptors and the per-protocol address schemas.
//!
//! # Modules
//!
//! - `codec`: packs quality + timestamp into the 64-bit time-quality word
//! - `quality`: quality byte, class and reason catalogue
//! - `tag`: tags, data types and real values
//! - `browse`: node hierarchy items returned by browsing
//! - `source`: source types, flags and discovery descriptors
//! - `schema`: connection schema parsing per source type
//! - `listing`: capacity-bounded result lists
//! - `time`: milliseconds since 2000-01-01 and clock abstraction
//!
//! # Example
//!
//! ```
//! use idh_model::{codec, Quality, QualityClass};
//!
//! let tq = codec::pack(Quality::GOOD, 1_000).unwrap();
//! let (q, ms) = codec::unpack(tq);
//! assert_eq!(ms, 1_000);
//! assert_eq!(codec::quality_class(q), QualityClass::Good);
//! ```

pub mod browse;
pub mod codec;
pub mod listing;
pub mod quality;
pub mod schema;
pub mod source;
pub mod tag;
pub mod time;

pub use browse::{BrowseItem, NodeType};
pub use codec::{pack, quality_class, unpack};
pub use listing::Listing;
pub use quality::{Quality, QualityClass};
pub use schema::{DaServer, SourceAddress};
pub use source::{SourceDescriptor, SourceFlags, SourceType};
pub use tag::{DataType, RealValue, Tag};
pub use time::{SystemTimeProvider, TimeProvider};
