//! Domain types and pure logic for the cutover migration service.
//!
//! Nothing in this crate performs I/O. Storage engines live in
//! `cutover-db`, the runtime workers in `cutover-migration`.

pub mod error;
pub mod format;
pub mod jobs;
pub mod legacy;
pub mod migration;
pub mod prerequisites;
pub mod rate;
pub mod status;
pub mod types;
