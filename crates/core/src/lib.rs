//! Domain types and pure logic shared by the tether crates.
//!
//! Nothing in this crate performs I/O.

pub mod device_groups;
pub mod error;
pub mod retry;
pub mod roles;
pub mod types;
