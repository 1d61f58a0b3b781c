//! Strata Core
//!
//! Entity-component storage and lifecycle engine:
//! - Component registry with reference tags and network ids
//! - Component store with per-type, per-entity and network indices
//! - Ordered lifecycle (add, initialize, startup, shutdown, remove)
//! - Join queries with a paused-entity filter
//! - Deferred deletion and the per-tick cull
//! - Lifecycle event notifications
//!
//! # Feature Flags
//!
//! - `metrics` - Count lifecycle operations (default: enabled)
//! - `exception-tolerance` - Log failing component hooks and carry on
//!   instead of failing the operation (default: enabled)

pub mod config;
pub mod ecs;
pub mod time;

pub use config::WorldConfig;
pub use glam;

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
