//! Foundation module - Core utilities and types
//!
//! This module provides fundamental utilities used throughout the engine:
//! - Collections and handle types
//! - Progress reporting
//! - The single-threaded async runtime helper
//! - Logging utilities

pub mod collections;
pub mod logging;
pub mod progress;
pub mod runtime;
