//! The adaptive reward-shaping engine.
//!
//! - [`exploration`] -- visited maps, tiles and NPCs (fog of war).
//! - [`dialog`] -- filtered, bounded dialog history.
//! - [`objective`] -- coarse-cadence objective lifecycle and classifier
//!   reconciliation.
//! - [`proximity`] -- fine-cadence distance-to-objective shaping over the
//!   static table and locations learned from milestone completions.
//! - [`coordinator`] -- per-step orchestration over an [`EnvironmentContext`].
//! - [`pool`] -- one context per environment behind its own mutex.

pub mod coordinator;
pub mod dialog;
pub mod exploration;
pub mod objective;
pub mod pool;
pub mod proximity;
pub mod types;

pub use coordinator::{DebugSnapshot, EnvironmentContext, RewardShaper};
pub use dialog::{DialogClassification, DialogHistory, PendingDialog};
pub use exploration::{ExplorationState, ExplorationSummary};
pub use objective::{ClassifierOutcome, LifecycleOutcome, ObjectiveEvent, ObjectiveLifecycle};
pub use pool::ShaperPool;
pub use proximity::{ProximityReading, ProximityShaper, ProximityTrend};
pub use types::{
    DialogCategory, DialogEntry, LearnedObjectives, MilestoneSet, ObjectiveLocation,
    ObjectiveRecord, Position, StaticObjectiveTable,
};
