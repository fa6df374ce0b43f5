//! Domain types and wire messages shared by the gait test-session crates.

pub mod domain;
pub mod error;
pub mod protocol;
