//! Transactional store implementations.

pub mod memory;

pub use memory::{InMemoryConfig, InMemoryDatabase};
