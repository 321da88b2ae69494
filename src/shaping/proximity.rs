//! Fine-cadence shaping from the distance to the nearest known objective.
//!
//! Known objectives are the static table's entries for the current map
//! followed by the locations this environment learned from its own
//! milestone completions.

use serde::{Deserialize, Serialize};

use super::types::{LearnedObjectives, ObjectiveLocation, Position, StaticObjectiveTable};
use crate::config::ProximityConfig;

/// How the distance moved between two evaluations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProximityTrend {
    /// Current map has no listed or learned objectives.
    Unmapped,
    /// First evaluation on this map; distance recorded, nothing compared.
    Baseline,
    Approaching,
    VeryClose,
    Receding,
    Steady,
}

/// Result of one proximity evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProximityReading {
    pub multiplier: f64,
    pub trend: ProximityTrend,
    pub distance: Option<u32>,
    /// Label of the nearest objective, when the map has any.
    pub target: Option<String>,
}

impl ProximityReading {
    fn neutral(trend: ProximityTrend) -> Self {
        Self {
            multiplier: 1.0,
            trend,
            distance: None,
            target: None,
        }
    }
}

/// Per-environment distance memory.
#[derive(Debug, Clone, Default)]
pub struct ProximityShaper {
    last_map: Option<String>,
    last_distance: Option<u32>,
}

impl ProximityShaper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate the agent at `position` on `map_id`.
    ///
    /// Distance is Manhattan to the nearest known objective; equidistant
    /// objectives resolve to the first one, table entries before learned ones.
    pub fn evaluate(
        &mut self,
        table: &StaticObjectiveTable,
        learned: &LearnedObjectives,
        map_id: &str,
        position: Position,
        config: &ProximityConfig,
    ) -> ProximityReading {
        if self.last_map.as_deref() != Some(map_id) {
            self.last_map = Some(map_id.to_string());
            self.last_distance = None;
        }

        let candidates = table
            .locations(map_id)
            .unwrap_or_default()
            .iter()
            .chain(learned.locations(map_id));
        let mut nearest: Option<(&ObjectiveLocation, u32)> = None;
        for loc in candidates {
            let d = position.manhattan(loc.position());
            match nearest {
                Some((_, best)) if d >= best => {}
                _ => nearest = Some((loc, d)),
            }
        }
        let Some((nearest, distance)) = nearest else {
            self.last_distance = None;
            return ProximityReading::neutral(ProximityTrend::Unmapped);
        };

        let previous = self.last_distance.replace(distance);
        let (multiplier, trend) = match previous {
            None => (1.0, ProximityTrend::Baseline),
            Some(prev) if distance < prev => {
                if distance <= config.near_threshold_tiles {
                    (config.near_multiplier, ProximityTrend::VeryClose)
                } else {
                    (config.approach_multiplier, ProximityTrend::Approaching)
                }
            }
            Some(prev) if distance > prev => (config.recede_multiplier, ProximityTrend::Receding),
            Some(_) => (1.0, ProximityTrend::Steady),
        };

        ProximityReading {
            multiplier,
            trend,
            distance: Some(distance),
            target: Some(nearest.label.clone()),
        }
    }

    /// Forget the remembered distance (episode reset).
    pub fn reset(&mut self) {
        self.last_map = None;
        self.last_distance = None;
    }

    pub fn last_distance(&self) -> Option<u32> {
        self.last_distance
    }
}
