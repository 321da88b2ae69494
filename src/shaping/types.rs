//! Shared data model for the reward-shaping engine.
//!
//! These types are owned by a single environment context and never shared
//! across environments (the static objective table is the one exception: it is
//! immutable and handed out behind an `Arc`).

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Positions
// ---------------------------------------------------------------------------

/// A tile coordinate on a map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Grid (L1) distance to `other`.
    pub fn manhattan(&self, other: Position) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

// ---------------------------------------------------------------------------
// Milestones
// ---------------------------------------------------------------------------

/// Milestone identifiers reported complete by the emulator.
///
/// Append-only from the emulator's side; the engine only reads it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneSet(BTreeSet<String>);

impl MilestoneSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, milestone: &str) -> bool {
        self.0.contains(milestone)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Milestones present here but not in `earlier`.
    pub fn newly_completed<'a>(&'a self, earlier: &'a MilestoneSet) -> Vec<&'a str> {
        self.0.difference(&earlier.0).map(String::as_str).collect()
    }

    /// Used by the emulator side (and test fakes) to report a completion.
    pub fn insert(&mut self, milestone: impl Into<String>) {
        self.0.insert(milestone.into());
    }
}

impl<S: Into<String>> FromIterator<S> for MilestoneSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

// ---------------------------------------------------------------------------
// Objective record
// ---------------------------------------------------------------------------

/// The single active objective of an environment.
///
/// `created_step`, `initial_position` and `initial_map` are a snapshot taken
/// when the record is opened; only `last_position`/`last_map` change
/// afterwards, and only during a lifecycle evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveRecord {
    /// Unique identifier (UUID v4), handy when correlating log lines.
    pub id: String,
    /// Name of the detected goal.
    pub name: String,
    /// Milestone whose completion closes the record successfully.
    pub milestone_id: Option<String>,
    pub created_step: u64,
    pub initial_position: Position,
    pub initial_map: String,
    pub last_position: Position,
    pub last_map: String,
}

impl ObjectiveRecord {
    pub fn new(
        name: impl Into<String>,
        milestone_id: Option<String>,
        step: u64,
        position: Position,
        map: impl Into<String>,
    ) -> Self {
        let map = map.into();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            milestone_id,
            created_step: step,
            initial_position: position,
            initial_map: map.clone(),
            last_position: position,
            last_map: map,
        }
    }

    /// Steps elapsed since the record was opened.
    pub fn steps_since_created(&self, step: u64) -> u64 {
        step.saturating_sub(self.created_step)
    }
}

// ---------------------------------------------------------------------------
// Dialog
// ---------------------------------------------------------------------------

/// Coarse narrative category assigned to a piece of dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialogCategory {
    Farewell,
    Ambient,
    Quest,
    Story,
    System,
}

impl DialogCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Farewell => "farewell",
            Self::Ambient => "ambient",
            Self::Quest => "quest",
            Self::Story => "story",
            Self::System => "system",
        }
    }

    /// Parse from a string (case-insensitive).
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "farewell" => Some(Self::Farewell),
            "ambient" => Some(Self::Ambient),
            "quest" => Some(Self::Quest),
            "story" => Some(Self::Story),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// One stored line of narratively useful text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogEntry {
    pub text: String,
    /// Step at which the text was first seen.
    pub step: u64,
    pub useful: bool,
    pub category: DialogCategory,
    /// Milestone the text points at, if the classifier recognised one.
    pub milestone_hint: Option<String>,
}

// ---------------------------------------------------------------------------
// Static objective table
// ---------------------------------------------------------------------------

/// A known point of narrative interest on a map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectiveLocation {
    pub x: i32,
    pub y: i32,
    pub label: String,
}

impl ObjectiveLocation {
    pub fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }
}

/// Immutable map id -> ordered objective locations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StaticObjectiveTable {
    maps: HashMap<String, Vec<ObjectiveLocation>>,
}

impl StaticObjectiveTable {
    pub fn new(maps: HashMap<String, Vec<ObjectiveLocation>>) -> Self {
        Self { maps }
    }

    /// Objective locations on `map_id`, in table order. `None` for unknown maps.
    pub fn locations(&self, map_id: &str) -> Option<&[ObjectiveLocation]> {
        self.maps
            .get(map_id)
            .map(|v| v.as_slice())
            .filter(|v| !v.is_empty())
    }

    pub fn map_count(&self) -> usize {
        self.maps.len()
    }

    pub fn location_count(&self) -> usize {
        self.maps.values().map(|v| v.len()).sum()
    }

    pub fn map_ids(&self) -> impl Iterator<Item = &str> {
        self.maps.keys().map(String::as_str)
    }

    /// Load a table from JSON of the form `{"MAP": [{"x":1,"y":2,"label":"door"}]}`.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref()).with_context(|| {
            format!(
                "Failed to read objective table from {}",
                path.as_ref().display()
            )
        })?;
        let table: Self =
            serde_json::from_str(&data).context("Failed to deserialize objective table JSON")?;
        tracing::info!(
            path = %path.as_ref().display(),
            maps = table.map_count(),
            locations = table.location_count(),
            "Loaded objective table"
        );
        Ok(table)
    }
}

// ---------------------------------------------------------------------------
// Learned objective locations
// ---------------------------------------------------------------------------

/// Places where this environment's agent stood when a milestone completed.
///
/// Grow-only, one per environment, and kept across episodes. Every entry is a
/// tile the agent has visited, so proximity toward it leaks nothing about
/// unexplored maps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearnedObjectives {
    maps: HashMap<String, Vec<ObjectiveLocation>>,
}

impl LearnedObjectives {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember `milestone` at `position` on `map_id`. A milestone is learned
    /// once; returns `false` if it was already known.
    pub fn learn(&mut self, map_id: &str, position: Position, milestone: &str) -> bool {
        if self.maps.values().flatten().any(|loc| loc.label == milestone) {
            return false;
        }
        self.maps
            .entry(map_id.to_string())
            .or_default()
            .push(ObjectiveLocation {
                x: position.x,
                y: position.y,
                label: milestone.to_string(),
            });
        true
    }

    /// Learned locations on `map_id`, oldest first.
    pub fn locations(&self, map_id: &str) -> &[ObjectiveLocation] {
        self.maps.get(map_id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.maps.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.values().all(Vec::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manhattan() {
        assert_eq!(Position::new(0, 0).manhattan(Position::new(5, 0)), 5);
        assert_eq!(Position::new(-2, 3).manhattan(Position::new(1, -1)), 7);
    }

    #[test]
    fn test_newly_completed() {
        let before: MilestoneSet = ["A"].into_iter().collect();
        let after: MilestoneSet = ["A", "B"].into_iter().collect();
        assert_eq!(after.newly_completed(&before), vec!["B"]);
        assert!(before.newly_completed(&after).is_empty());
    }

    #[test]
    fn test_dialog_category_parse() {
        assert_eq!(DialogCategory::from_str_loose(" Quest "), Some(DialogCategory::Quest));
        assert_eq!(DialogCategory::from_str_loose("unknown"), None);
        assert_eq!(DialogCategory::Story.as_str(), "story");
    }

    #[test]
    fn test_objective_record_snapshot() {
        let rec = ObjectiveRecord::new("ROUTE_101", Some("ROUTE_101".into()), 200, Position::new(3, 4), "LITTLEROOT");
        assert_eq!(rec.initial_position, rec.last_position);
        assert_eq!(rec.initial_map, "LITTLEROOT");
        assert_eq!(rec.steps_since_created(5199), 4999);
        assert_eq!(rec.steps_since_created(100), 0);
    }

    #[test]
    fn test_learned_objectives_keep_first_location() {
        let mut learned = LearnedObjectives::new();
        assert!(learned.is_empty());
        assert!(learned.learn("ROUTE_101", Position::new(4, 7), "RESCUED_BIRCH"));
        assert!(!learned.learn("OLDALE_TOWN", Position::new(0, 0), "RESCUED_BIRCH"));
        assert_eq!(learned.len(), 1);
        assert_eq!(learned.locations("ROUTE_101")[0].position(), Position::new(4, 7));
        assert!(learned.locations("OLDALE_TOWN").is_empty());
    }

    #[test]
    fn test_table_parse_and_lookup() {
        let json = r#"{"ROUTE_101": [{"x": 5, "y": 0, "label": "north exit"}], "EMPTY": []}"#;
        let table: StaticObjectiveTable = serde_json::from_str(json).unwrap();
        assert_eq!(table.map_count(), 2);
        assert_eq!(table.locations("ROUTE_101").unwrap()[0].position(), Position::new(5, 0));
        assert!(table.locations("EMPTY").is_none());
        assert!(table.locations("NOWHERE").is_none());
    }
}
