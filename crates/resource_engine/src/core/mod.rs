//! # Core Module
//!
//! Shared configuration for the resource subsystems.
//!
//! ## Organization
//!
//! - **Config**: cache, pool and preload settings consumed by [`crate::ResourceContext`]

pub mod config;

pub use config::{
    CacheConfig,
    PoolConfig,
    PreloadConfig,
    PrewarmEntry,
    ResourceConfig,
    Config,
    ConfigError,
};
