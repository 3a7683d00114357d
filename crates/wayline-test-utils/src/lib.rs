//! Shared test utilities for Wayline crates.
//!
//! - [`RecordingBridge`]: a [`HostBridge`](wayline_core::traits::HostBridge)
//!   that records every request instead of acting on it.
//! - [`fixtures`]: workflow definitions used across engine tests.

pub mod bridge;
pub mod fixtures;

pub use bridge::{HostCall, RecordingBridge};
pub use fixtures::{definitions_dir, write_definitions};
