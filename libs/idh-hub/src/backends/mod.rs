//! Built-in backend adapters
//!
//! UA and DA wire stacks live outside this crate; they plug in through
//! [`BackendRegistry::register`](crate::backend::BackendRegistry::register).

pub mod csv;
pub mod memory;

pub use self::csv::{CsvBackend, CsvFactory};
pub use self::memory::{MemoryBackend, MemoryFactory, MemoryServer};
