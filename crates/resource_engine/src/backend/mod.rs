//! # Backend Module
//!
//! Concrete implementations of the traits defined by the asset and scene
//! modules.
//!
//! ## Organization
//!
//! - **Memory**: catalog-backed [`AssetBackend`](crate::assets::AssetBackend)
//!   and [`SceneBackend`](crate::scene::SceneBackend) for headless tools and tests
//!
//! ## Design Principles
//!
//! - **Abstraction**: backends implement traits defined in core modules
//! - **Isolation**: backend-specific state never leaks into the cache or the pools

pub mod memory;

pub use memory::{MemoryBackend, MemoryBundle, MemoryTemplate, PreloadBatch, SceneEvent};
