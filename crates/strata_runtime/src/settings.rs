//! Runtime settings

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use strata_core::time::TICK_DURATION;
use strata_core::WorldConfig;

/// Runtime settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub world: WorldConfig,
    pub simulation: SimulationSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    /// Ticks to run before tearing the world down.
    pub ticks: u64,
    /// Entities spawned at startup.
    pub entities: usize,
    /// Base lifetime of a spawned entity, in ticks.
    pub lifetime_ticks: u32,
    /// Toggle the pause flag of every n-th entity each tick. Zero disables.
    pub pause_every: usize,
    /// Seconds advanced per tick by the movement system.
    pub tick_seconds: f32,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            ticks: 120,
            entities: 64,
            lifetime_ticks: 90,
            pause_every: 7,
            tick_seconds: TICK_DURATION.as_secs_f32(),
        }
    }
}

impl Settings {
    /// Read settings from a JSON file, or use the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("parsing settings in {}", path.display()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_path_uses_defaults() {
        let settings = Settings::load(None).unwrap();
        assert_eq!(settings.simulation.ticks, 120);
        assert_eq!(settings.world, WorldConfig::default());
    }

    #[test]
    fn nested_sections_are_partial() {
        let settings = Settings::from_json(
            r#"{ "world": { "trace_lifecycle": true }, "simulation": { "entities": 3 } }"#,
        )
        .unwrap();
        assert!(settings.world.trace_lifecycle);
        assert_eq!(settings.world.entity_capacity, 1024);
        assert_eq!(settings.simulation.entities, 3);
        assert_eq!(settings.simulation.lifetime_ticks, 90);
    }

    #[test]
    fn unreadable_file_reports_the_path() {
        let err = Settings::load(Some(Path::new("/nonexistent/strata.json"))).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/strata.json"));
    }
}
