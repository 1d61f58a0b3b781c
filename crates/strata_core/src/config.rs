//! World configuration

use serde::{Deserialize, Serialize};

/// Sizing and diagnostics knobs for a [`World`](crate::ecs::World).
///
/// Every field has a default, so a partial JSON object is a valid config.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Entity ids reserved up front.
    pub entity_capacity: usize,
    /// Component arena slots reserved up front.
    pub component_capacity: usize,
    /// Initial size of the deferred deletion queue.
    pub deletion_capacity: usize,
    /// Emit a `trace!` event for every lifecycle transition.
    pub trace_lifecycle: bool,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            entity_capacity: 1024,
            component_capacity: 1024,
            deletion_capacity: 32,
            trace_lifecycle: false,
        }
    }
}
