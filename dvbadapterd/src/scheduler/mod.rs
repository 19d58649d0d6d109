//! Scheduled work for dvbadapterd.
//!
//! This module provides:
//! - [`mux_scanner::tick`]: the per-adapter mux scan decision
//! - [`ScanTimers`]: the tokio tasks driving those ticks

pub mod mux_scanner;
pub mod timer;

pub use mux_scanner::{
    tick, ScanAction, ScanReason, TickOutcome, DEFAULT_SCAN_PERIOD, FIRST_SCAN_DELAY,
};
pub use timer::{spawn_scan_timer, ScanTarget, ScanTimers};
