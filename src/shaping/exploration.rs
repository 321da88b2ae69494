//! Exploration tracking restricted to places the agent has actually been.
//!
//! The [`ExplorationSummary`] is the only view of the world handed to
//! downstream consumers (the classifier prompt in particular), so it is built
//! exclusively from recorded visits.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use super::types::Position;

/// Grow-only record of visited maps, tiles and NPCs for one environment.
#[derive(Debug, Clone, Default)]
pub struct ExplorationState {
    visited_maps: HashSet<String>,
    visited_positions: HashMap<String, HashSet<Position>>,
    talked_npcs: HashSet<String>,
    /// Most recently entered maps, newest last, at most `recent_capacity` long.
    recent_maps: VecDeque<String>,
    recent_capacity: usize,
    /// Cached total of `visited_positions`, kept in step with inserts.
    positions_visited: usize,
}

/// What the rest of the engine is allowed to know about the world.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplorationSummary {
    pub maps_explored: usize,
    pub positions_visited: usize,
    pub npcs_talked: usize,
    /// Recently entered maps, oldest first.
    pub recent_maps: Vec<String>,
}

impl std::fmt::Display for ExplorationSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.maps_explored == 0 {
            return write!(f, "No exploration data yet");
        }
        write!(
            f,
            "Maps explored: {} | Positions visited: {} | NPCs talked to: {}",
            self.maps_explored, self.positions_visited, self.npcs_talked
        )?;
        if !self.recent_maps.is_empty() {
            write!(f, "\nRecent areas: {}", self.recent_maps.join(", "))?;
        }
        Ok(())
    }
}

impl ExplorationState {
    /// Create an empty tracker reporting up to `recent_capacity` recent maps.
    pub fn new(recent_capacity: usize) -> Self {
        Self {
            recent_capacity,
            ..Self::default()
        }
    }

    /// Record the agent's current map, tile and (optionally) NPC partner.
    pub fn record(&mut self, position: Position, map_id: &str, npc_id: Option<&str>) {
        if !self.visited_maps.contains(map_id) {
            self.visited_maps.insert(map_id.to_string());
        }

        if self.recent_maps.back().map(String::as_str) != Some(map_id) {
            self.touch_recent(map_id);
        }

        if !self.visited_positions.contains_key(map_id) {
            self.visited_positions
                .insert(map_id.to_string(), HashSet::new());
        }
        if let Some(tiles) = self.visited_positions.get_mut(map_id) {
            if tiles.insert(position) {
                self.positions_visited += 1;
            }
        }

        if let Some(npc) = npc_id {
            if !self.talked_npcs.contains(npc) {
                self.talked_npcs.insert(npc.to_string());
            }
        }
    }

    fn touch_recent(&mut self, map_id: &str) {
        if self.recent_capacity == 0 {
            return;
        }
        // The deque is bounded by a small constant, so the scan is O(1).
        if let Some(idx) = self.recent_maps.iter().position(|m| m == map_id) {
            self.recent_maps.remove(idx);
        }
        self.recent_maps.push_back(map_id.to_string());
        while self.recent_maps.len() > self.recent_capacity {
            self.recent_maps.pop_front();
        }
    }

    pub fn summary(&self) -> ExplorationSummary {
        ExplorationSummary {
            maps_explored: self.visited_maps.len(),
            positions_visited: self.positions_visited,
            npcs_talked: self.talked_npcs.len(),
            recent_maps: self.recent_maps.iter().cloned().collect(),
        }
    }

    pub fn has_visited_map(&self, map_id: &str) -> bool {
        self.visited_maps.contains(map_id)
    }

    pub fn has_visited(&self, map_id: &str, position: Position) -> bool {
        self.visited_positions
            .get(map_id)
            .is_some_and(|tiles| tiles.contains(&position))
    }

    pub fn has_talked_to(&self, npc_id: &str) -> bool {
        self.talked_npcs.contains(npc_id)
    }

    /// Tiles visited on `map_id` (empty for unvisited maps).
    pub fn visited_on(&self, map_id: &str) -> impl Iterator<Item = Position> + '_ {
        self.visited_positions
            .get(map_id)
            .into_iter()
            .flat_map(|tiles| tiles.iter().copied())
    }
}
