//! Reward shaping coordinator.
//!
//! [`RewardShaper`] holds the immutable, shared parts (configuration, static
//! objective table, classifier). Everything that changes lives in one
//! [`EnvironmentContext`] per environment, passed explicitly into every call,
//! so environments never see each other's state.
//!
//! Per step the coordinator records exploration, queues dialog, learns where
//! milestones complete, and on their own cadences refreshes the lifecycle
//! multiplier (coarse) and the proximity multiplier (fine). Between refreshes both are held constant. The shaped
//! reward is `base_reward * clamp(lifecycle * proximity)`.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::dialog::{DialogHistory, PendingDialog};
use super::exploration::{ExplorationState, ExplorationSummary};
use super::objective::{LifecycleOutcome, ObjectiveLifecycle};
use super::proximity::{ProximityReading, ProximityShaper};
use super::types::{
    DialogEntry, LearnedObjectives, MilestoneSet, ObjectiveRecord, Position, StaticObjectiveTable,
};
use crate::config::ShapingConfig;
use crate::env::RawState;
use crate::model::classifier::{Classifier, ClassifierRequest, StateSummary};

// ---------------------------------------------------------------------------
// Per-environment state
// ---------------------------------------------------------------------------

/// All mutable shaping state of one environment.
#[derive(Debug, Clone)]
pub struct EnvironmentContext {
    env_id: String,
    exploration: ExplorationState,
    dialog: DialogHistory,
    lifecycle: ObjectiveLifecycle,
    proximity: ProximityShaper,
    learned: LearnedObjectives,

    lifecycle_multiplier: f64,
    proximity_multiplier: f64,

    episode: u64,
    /// Steps since the last episode reset; drives both cadences.
    episode_step: u64,
    total_steps: u64,

    stationary_steps: u64,
    last_seen: Option<(String, Position)>,
    /// Milestones reported on the previous step; `None` at episode start.
    last_milestones: Option<MilestoneSet>,
    milestones_at_last_eval: MilestoneSet,
    /// Most recent base rewards, oldest first.
    recent_rewards: VecDeque<f64>,

    last_lifecycle: Option<LifecycleOutcome>,
    last_proximity: Option<ProximityReading>,
}

impl EnvironmentContext {
    pub fn env_id(&self) -> &str {
        &self.env_id
    }

    pub fn episode_step(&self) -> u64 {
        self.episode_step
    }

    pub fn lifecycle_multiplier(&self) -> f64 {
        self.lifecycle_multiplier
    }

    pub fn proximity_multiplier(&self) -> f64 {
        self.proximity_multiplier
    }

    pub fn active_objective(&self) -> Option<&ObjectiveRecord> {
        self.lifecycle.active()
    }

    pub fn exploration(&self) -> &ExplorationState {
        &self.exploration
    }

    pub fn dialog(&self) -> &DialogHistory {
        &self.dialog
    }

    pub fn learned(&self) -> &LearnedObjectives {
        &self.learned
    }

    /// Mean of the recent base rewards, `None` before any step.
    pub fn avg_recent_reward(&self) -> Option<f64> {
        if self.recent_rewards.is_empty() {
            return None;
        }
        Some(self.recent_rewards.iter().sum::<f64>() / self.recent_rewards.len() as f64)
    }
}

/// Structured view of one environment for logging and telemetry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugSnapshot {
    pub env_id: String,
    pub captured_at: DateTime<Utc>,
    pub episode: u64,
    pub episode_step: u64,
    pub total_steps: u64,
    pub lifecycle_multiplier: f64,
    pub proximity_multiplier: f64,
    /// Clamped product actually applied to the base reward.
    pub combined_multiplier: f64,
    pub stationary_steps: u64,
    pub avg_recent_reward: Option<f64>,
    pub learned_objectives: usize,
    pub active_objective: Option<ObjectiveRecord>,
    pub exploration: ExplorationSummary,
    pub recent_dialog: Vec<DialogEntry>,
    pub pending_dialog: Option<PendingDialog>,
    pub last_lifecycle: Option<LifecycleOutcome>,
    pub last_proximity: Option<ProximityReading>,
    pub lifecycle_evaluations: u64,
    pub degraded_evaluations: u64,
}

// ---------------------------------------------------------------------------
// RewardShaper
// ---------------------------------------------------------------------------

pub struct RewardShaper<C> {
    config: Arc<ShapingConfig>,
    table: Arc<StaticObjectiveTable>,
    classifier: Arc<C>,
}

impl<C> Clone for RewardShaper<C> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            table: Arc::clone(&self.table),
            classifier: Arc::clone(&self.classifier),
        }
    }
}

impl<C: Classifier> RewardShaper<C> {
    pub fn new(
        config: Arc<ShapingConfig>,
        table: Arc<StaticObjectiveTable>,
        classifier: Arc<C>,
    ) -> Self {
        Self {
            config,
            table,
            classifier,
        }
    }

    pub fn config(&self) -> &ShapingConfig {
        &self.config
    }

    pub fn classifier(&self) -> &C {
        &self.classifier
    }

    /// Fresh state for a new environment.
    pub fn new_context(&self, env_id: impl Into<String>) -> EnvironmentContext {
        EnvironmentContext {
            env_id: env_id.into(),
            exploration: ExplorationState::new(self.config.exploration.recent_maps),
            dialog: DialogHistory::new(
                self.config.dialog.dialog_history_capacity,
                &self.config.dialog.system_message_denylist,
            ),
            lifecycle: ObjectiveLifecycle::new(),
            proximity: ProximityShaper::new(),
            learned: LearnedObjectives::new(),
            lifecycle_multiplier: 1.0,
            proximity_multiplier: 1.0,
            episode: 0,
            episode_step: 0,
            total_steps: 0,
            stationary_steps: 0,
            last_seen: None,
            last_milestones: None,
            milestones_at_last_eval: MilestoneSet::new(),
            recent_rewards: VecDeque::new(),
            last_lifecycle: None,
            last_proximity: None,
        }
    }

    /// Process one simulation step and return the shaped reward.
    pub async fn on_step(
        &self,
        ctx: &mut EnvironmentContext,
        base_reward: f64,
        state: &RawState,
    ) -> f64 {
        ctx.episode_step += 1;
        ctx.total_steps += 1;
        let step = ctx.episode_step;

        let stationary = ctx
            .last_seen
            .as_ref()
            .is_some_and(|(map, pos)| *map == state.map_id && *pos == state.position);
        if stationary {
            ctx.stationary_steps += 1;
        } else {
            ctx.stationary_steps = 0;
            ctx.last_seen = Some((state.map_id.clone(), state.position));
        }

        ctx.exploration
            .record(state.position, &state.map_id, state.npc_id.as_deref());
        if let Some(text) = state.dialog_text.as_deref() {
            ctx.dialog.observe(text, step);
        }
        self.learn_milestone_locations(ctx, state);

        let window = self.config.classifier.recent_reward_window;
        if window > 0 {
            if ctx.recent_rewards.len() == window {
                ctx.recent_rewards.pop_front();
            }
            ctx.recent_rewards.push_back(base_reward);
        }

        if step % self.config.cadence.lifecycle_interval == 0 {
            self.evaluate_lifecycle(ctx, state).await;
        }

        if step % self.config.cadence.proximity_interval == 0 {
            let reading = ctx.proximity.evaluate(
                &self.table,
                &ctx.learned,
                &state.map_id,
                state.position,
                &self.config.proximity,
            );
            debug!(
                env_id = %ctx.env_id,
                step,
                multiplier = reading.multiplier,
                trend = ?reading.trend,
                distance = ?reading.distance,
                "proximity evaluation"
            );
            ctx.proximity_multiplier = reading.multiplier;
            ctx.last_proximity = Some(reading);
        }

        self.shape(ctx, base_reward)
    }

    /// Remember where the agent stood when a milestone completed. Milestones
    /// already present on the first step of an episode are not learned.
    fn learn_milestone_locations(&self, ctx: &mut EnvironmentContext, state: &RawState) {
        if let Some(previous) = &ctx.last_milestones {
            for milestone in state.milestones.newly_completed(previous) {
                if ctx.learned.learn(&state.map_id, state.position, milestone) {
                    info!(
                        env_id = %ctx.env_id,
                        milestone,
                        map = %state.map_id,
                        position = %state.position,
                        "learned objective location"
                    );
                }
            }
        }
        if ctx.last_milestones.as_ref() != Some(&state.milestones) {
            ctx.last_milestones = Some(state.milestones.clone());
        }
    }

    async fn evaluate_lifecycle(&self, ctx: &mut EnvironmentContext, state: &RawState) {
        let new_milestones = state
            .milestones
            .newly_completed(&ctx.milestones_at_last_eval)
            .into_iter()
            .map(str::to_string)
            .collect();
        let request = ClassifierRequest {
            env_id: ctx.env_id.clone(),
            state: StateSummary {
                step: ctx.episode_step,
                stationary_steps: ctx.stationary_steps,
                milestones_completed: state.milestones.len(),
                new_milestones,
                map_id: state.map_id.clone(),
                position: state.position,
                badge_count: state.badge_count,
                party: state.party.clone(),
                avg_recent_reward: ctx.avg_recent_reward(),
            },
            exploration: ctx.exploration.summary(),
            dialog_history: ctx.dialog.recent(self.config.dialog.prompt_history_len),
            current_dialog: None,
            active_objective: None,
        };

        let outcome = ctx
            .lifecycle
            .evaluate(
                self.classifier.as_ref(),
                request,
                &state.milestones,
                &mut ctx.dialog,
                &self.config,
            )
            .await;

        ctx.lifecycle_multiplier = outcome.multiplier;
        ctx.milestones_at_last_eval = state.milestones.clone();
        ctx.last_lifecycle = Some(outcome);
    }

    /// Apply the cached multipliers to `base_reward`.
    pub fn shape(&self, ctx: &EnvironmentContext, base_reward: f64) -> f64 {
        base_reward * self.combined_multiplier(ctx)
    }

    fn combined_multiplier(&self, ctx: &EnvironmentContext) -> f64 {
        self.config
            .clamp_multiplier(ctx.lifecycle_multiplier * ctx.proximity_multiplier)
    }

    /// Start a new episode: drop the objective, distance memory and cadence
    /// counters. Exploration, stored dialog, learned locations and the reward
    /// window carry over.
    pub fn on_episode_reset(&self, ctx: &mut EnvironmentContext) {
        ctx.lifecycle.reset();
        ctx.proximity.reset();
        ctx.dialog.take_pending();
        ctx.lifecycle_multiplier = 1.0;
        ctx.proximity_multiplier = 1.0;
        ctx.episode += 1;
        ctx.episode_step = 0;
        ctx.stationary_steps = 0;
        ctx.last_seen = None;
        ctx.last_milestones = None;
        ctx.milestones_at_last_eval = MilestoneSet::new();
        ctx.last_lifecycle = None;
        ctx.last_proximity = None;
        info!(
            env_id = %ctx.env_id,
            episode = ctx.episode,
            maps_explored = ctx.exploration.summary().maps_explored,
            "episode reset"
        );
    }

    pub fn debug_snapshot(&self, ctx: &EnvironmentContext) -> DebugSnapshot {
        DebugSnapshot {
            env_id: ctx.env_id.clone(),
            captured_at: Utc::now(),
            episode: ctx.episode,
            episode_step: ctx.episode_step,
            total_steps: ctx.total_steps,
            lifecycle_multiplier: ctx.lifecycle_multiplier,
            proximity_multiplier: ctx.proximity_multiplier,
            combined_multiplier: self.combined_multiplier(ctx),
            stationary_steps: ctx.stationary_steps,
            avg_recent_reward: ctx.avg_recent_reward(),
            learned_objectives: ctx.learned.len(),
            active_objective: ctx.lifecycle.active().cloned(),
            exploration: ctx.exploration.summary(),
            recent_dialog: ctx.dialog.recent(ctx.dialog.capacity()),
            pending_dialog: ctx.dialog.pending().cloned(),
            last_lifecycle: ctx.last_lifecycle.clone(),
            last_proximity: ctx.last_proximity.clone(),
            lifecycle_evaluations: ctx.lifecycle.evaluations(),
            degraded_evaluations: ctx.lifecycle.degraded_evaluations(),
        }
    }
}
