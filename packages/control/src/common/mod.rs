//! Shared types used across the kernel and domains.

pub mod entity_ids;

pub use entity_ids::JobId;
