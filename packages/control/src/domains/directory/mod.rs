//! Member and society directory records referenced by jobs.

pub mod models;

pub use models::{Domain, Member, OwnerClass, Society};
