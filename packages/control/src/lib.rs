// SRCF Control Panel - job queue
//
// Provisioning requests are recorded as durable jobs and executed one at a
// time by a single job runner. The web front end submits jobs and drives
// the administrative actions through `kernel::jobs::JobService`.
//
// What each job does lives in domains/jobs; kernel/ holds the queue
// machinery and the seams to everything outside this process.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;
pub mod startup;

pub use config::*;
