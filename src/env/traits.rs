//! Game-state collaborator interface.
//!
//! The emulator/memory reader is outside this crate; everything the shaping
//! engine consumes from it is captured in a [`RawState`] snapshot taken once
//! per step. Drivers that own an emulator implement [`GameEnvironment`] so the
//! simulator can run them uniformly.

use serde::{Deserialize, Serialize};

use crate::shaping::types::{MilestoneSet, Position};

/// One party slot as reported by the emulator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PartySlot {
    pub level: u32,
    /// Current HP divided by max HP, in `[0, 1]`.
    pub hp_ratio: f64,
}

/// Everything the engine reads from the emulator in one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawState {
    pub position: Position,
    pub map_id: String,
    pub milestones: MilestoneSet,
    #[serde(default)]
    pub party: Vec<PartySlot>,
    #[serde(default)]
    pub badge_count: u32,
    /// On-screen dialog text, if any is showing.
    #[serde(default)]
    pub dialog_text: Option<String>,
    /// NPC the player is interacting with, if the reader can tell.
    #[serde(default)]
    pub npc_id: Option<String>,
}

impl RawState {
    /// A bare state at `position` on `map_id` with nothing else going on.
    pub fn at(map_id: impl Into<String>, x: i32, y: i32) -> Self {
        Self {
            position: Position::new(x, y),
            map_id: map_id.into(),
            milestones: MilestoneSet::new(),
            party: Vec::new(),
            badge_count: 0,
            dialog_text: None,
            npc_id: None,
        }
    }

    pub fn with_dialog(mut self, text: impl Into<String>) -> Self {
        self.dialog_text = Some(text.into());
        self
    }

    pub fn with_milestones(mut self, milestones: MilestoneSet) -> Self {
        self.milestones = milestones;
        self
    }
}

/// A single transition produced by a game environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameStep {
    /// State after the transition.
    pub state: RawState,
    /// Unshaped reward for the transition.
    pub base_reward: f64,
    /// Whether the episode has terminated.
    pub done: bool,
}

/// An emulator-backed environment the simulator can drive.
#[allow(async_fn_in_trait)]
pub trait GameEnvironment: Send + Sync {
    /// Start a new episode and return the initial state.
    async fn reset(&mut self) -> anyhow::Result<RawState>;

    /// Advance the game by one agent action.
    async fn step(&mut self) -> anyhow::Result<GameStep>;

    /// Maximum number of steps in an episode.
    fn max_steps(&self) -> u64;

    /// Whether the current episode has ended.
    fn is_done(&self) -> bool;
}
