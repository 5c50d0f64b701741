//! # API Shared
//!
//! Shared definitions for the SSV APIs.
//!
//! Contains:
//! - Wire request/response types (`types` module), decoded once at the boundary
//! - Shared services like `HealthService`
//!
//! Used by `ssv-core`, `api-rest` and the CLI so every surface speaks the same shapes.

pub mod health;
pub mod types;

pub use health::HealthService;
pub use types::*;
