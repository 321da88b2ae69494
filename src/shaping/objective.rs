//! Coarse-cadence objective lifecycle.
//!
//! Per environment there is at most one [`ObjectiveRecord`]. Each evaluation
//! first settles what the game itself proves (milestone completion, staleness,
//! movement since the last evaluation), then asks the classifier for a
//! suggestion and for labels on the pending dialog, and finally reconciles the
//! two into a single multiplier:
//!
//! | after the evaluation          | multiplier                          |
//! |-------------------------------|-------------------------------------|
//! | record completed              | `completion_multiplier`             |
//! | record went stale             | 1.0                                 |
//! | record still active           | max(progress, classifier)           |
//! | no record (or just opened)    | classifier                          |
//!
//! A classifier that fails or times out never blocks the step loop: its
//! suggestion is replaced by the previous multiplier (1.0 if there is none,
//! or if the previous one was a completion or stale payout). A reply that
//! cannot be parsed counts as a neutral 1.0 suggestion.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::dialog::{truncate, DialogClassification, DialogHistory};
use super::types::{MilestoneSet, ObjectiveRecord, Position};
use crate::config::{LifecycleConfig, ShapingConfig};
use crate::model::classifier::{
    is_generic_objective, Classifier, ClassifierError, ClassifierRequest, ClassifierVerdict,
};

/// A state-machine transition observed during one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObjectiveEvent {
    Opened {
        name: String,
        milestone_id: Option<String>,
    },
    Completed {
        name: String,
        milestone_id: String,
    },
    Stale {
        name: String,
        age_steps: u64,
    },
    Progress {
        name: String,
        changed_map: bool,
        moved: bool,
    },
}

/// How the classifier call went.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum ClassifierOutcome {
    Answered,
    /// Answered, but the multiplier had to be defaulted or clamped.
    Corrected(String),
    /// Timed out or unreachable; the previous multiplier was reused.
    Failed(String),
}

/// Result of one lifecycle evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleOutcome {
    pub multiplier: f64,
    pub events: Vec<ObjectiveEvent>,
    pub classifier: ClassifierOutcome,
    /// Classifier's reason, or the failure description.
    pub reason: String,
}

/// What the observable game state did to the record.
enum Observed {
    /// No record was active.
    Idle,
    /// The record closed with a fixed multiplier.
    Closed(f64),
    /// The record is still active; progress multiplier.
    Progress(f64),
}

#[derive(Debug, Clone, Default)]
pub struct ObjectiveLifecycle {
    record: Option<ObjectiveRecord>,
    /// Names and milestone ids of objectives closed this episode.
    closed: HashSet<String>,
    last_multiplier: Option<f64>,
    /// Suggestion substituted when the classifier is unavailable. Closing
    /// payouts never carry over into it.
    fallback_multiplier: Option<f64>,
    evaluations: u64,
    degraded_evaluations: u64,
}

impl ObjectiveLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one coarse-cadence evaluation.
    ///
    /// `request` carries the state summary, exploration summary and dialog
    /// history; the active objective and pending dialog are filled in here.
    pub async fn evaluate<C: Classifier>(
        &mut self,
        classifier: &C,
        mut request: ClassifierRequest,
        milestones: &MilestoneSet,
        dialog: &mut DialogHistory,
        config: &ShapingConfig,
    ) -> LifecycleOutcome {
        let env_id = request.env_id.clone();
        let step = request.state.step;
        let position = request.state.position;
        let map_id = request.state.map_id.clone();
        self.evaluations += 1;

        let mut events = Vec::new();
        let observed = self.advance_record(
            &env_id,
            step,
            position,
            &map_id,
            milestones,
            &config.lifecycle,
            &mut events,
        );

        request.active_objective = self.record.clone();
        request.current_dialog = dialog.pending().map(|p| p.text.clone());

        let timeout = config.classifier.timeout();
        let verdict = match tokio::time::timeout(timeout, classifier.classify(&request)).await {
            Ok(result) => result,
            Err(_) => Err(ClassifierError::Timeout(timeout)),
        };

        let (suggestion, outcome, reason) = match verdict {
            Ok(verdict) => {
                let (suggestion, outcome) =
                    sanitize_multiplier(&env_id, verdict.multiplier, config.classifier.multiplier_range);
                self.absorb_dialog(&env_id, step, position, &map_id, &verdict, milestones, dialog, &mut events);
                if let Some(objective) = verdict.objective.as_deref() {
                    self.note_objective(&env_id, objective);
                }
                (suggestion, outcome, verdict.reason)
            }
            Err(ClassifierError::Malformed(detail)) => {
                warn!(env_id = %env_id, step, detail = %detail, "malformed classifier reply, using 1.0");
                (
                    1.0,
                    ClassifierOutcome::Corrected(format!("malformed reply: {detail}")),
                    "malformed classifier reply".to_string(),
                )
            }
            Err(err) => {
                self.degraded_evaluations += 1;
                let fallback = self.fallback_multiplier.unwrap_or(1.0);
                warn!(
                    env_id = %env_id,
                    step,
                    error = %err,
                    fallback,
                    "classifier unavailable, reusing last multiplier"
                );
                (fallback, ClassifierOutcome::Failed(err.to_string()), err.to_string())
            }
        };

        let (multiplier, fallback) = match observed {
            Observed::Closed(m) => (m, 1.0),
            Observed::Progress(m) => (m.max(suggestion), m.max(suggestion)),
            Observed::Idle => (suggestion, suggestion),
        };
        self.last_multiplier = Some(multiplier);
        self.fallback_multiplier = Some(fallback);

        debug!(
            env_id = %env_id,
            step,
            multiplier,
            suggestion,
            active = self.record.as_ref().map(|r| r.name.as_str()).unwrap_or("none"),
            "lifecycle evaluation"
        );

        LifecycleOutcome {
            multiplier,
            events,
            classifier: outcome,
            reason,
        }
    }

    /// Apply milestone completion, staleness and progress to the active record.
    #[allow(clippy::too_many_arguments)]
    fn advance_record(
        &mut self,
        env_id: &str,
        step: u64,
        position: Position,
        map_id: &str,
        milestones: &MilestoneSet,
        config: &LifecycleConfig,
        events: &mut Vec<ObjectiveEvent>,
    ) -> Observed {
        let Some(record) = self.record.as_mut() else {
            return Observed::Idle;
        };

        if let Some(milestone) = record
            .milestone_id
            .clone()
            .filter(|m| milestones.contains(m))
        {
            if let Some(record) = self.close() {
                info!(
                    env_id = %env_id,
                    step,
                    objective = %record.name,
                    milestone = %milestone,
                    "objective completed"
                );
                events.push(ObjectiveEvent::Completed {
                    name: record.name,
                    milestone_id: milestone,
                });
            }
            return Observed::Closed(config.completion_multiplier);
        }

        let age = record.steps_since_created(step);
        if age > config.stale_threshold_steps {
            if let Some(record) = self.close() {
                info!(env_id = %env_id, step, objective = %record.name, age, "objective went stale");
                events.push(ObjectiveEvent::Stale {
                    name: record.name,
                    age_steps: age,
                });
            }
            return Observed::Closed(1.0);
        }

        let changed_map = record.last_map != map_id;
        let moved = record.last_position != position;
        record.last_position = position;
        record.last_map = map_id.to_string();

        let multiplier = if changed_map {
            config.map_change_multiplier
        } else if moved {
            config.moved_multiplier
        } else {
            config.stationary_multiplier
        };
        events.push(ObjectiveEvent::Progress {
            name: record.name.clone(),
            changed_map,
            moved,
        });
        Observed::Progress(multiplier)
    }

    /// Label and store the pending dialog, opening an objective from its hint.
    #[allow(clippy::too_many_arguments)]
    fn absorb_dialog(
        &mut self,
        env_id: &str,
        step: u64,
        position: Position,
        map_id: &str,
        verdict: &ClassifierVerdict,
        milestones: &MilestoneSet,
        dialog: &mut DialogHistory,
        events: &mut Vec<ObjectiveEvent>,
    ) {
        let Some(pending) = dialog.take_pending() else {
            return;
        };
        let labels = verdict
            .dialog
            .clone()
            .unwrap_or_else(DialogClassification::unlabelled);
        let Some(entry) = dialog.filter_and_append(&pending.text, pending.step, labels) else {
            return;
        };
        debug!(
            env_id = %env_id,
            category = entry.category.as_str(),
            useful = entry.useful,
            text = %truncate(&entry.text, 50),
            "dialog stored"
        );

        let Some(hint) = entry.milestone_hint else {
            return;
        };
        if milestones.contains(&hint) || self.closed.contains(&hint) {
            debug!(env_id = %env_id, hint = %hint, "hint already completed or closed");
            return;
        }
        if let Some(active) = &self.record {
            debug!(env_id = %env_id, hint = %hint, active = %active.name, "objective already active, hint ignored");
            return;
        }

        let name = match verdict.objective.as_deref() {
            Some(name) if !is_generic_objective(name) && !self.closed.contains(name) => {
                name.to_string()
            }
            _ => format!("reach_{}", hint.to_lowercase()),
        };
        let record = ObjectiveRecord::new(name, Some(hint), step, position, map_id);
        let opened = ObjectiveEvent::Opened {
            name: record.name.clone(),
            milestone_id: record.milestone_id.clone(),
        };
        if self.open(env_id, record) {
            events.push(opened);
        }
    }

    fn note_objective(&self, env_id: &str, objective: &str) {
        match &self.record {
            Some(active) if active.name != objective && is_generic_objective(objective) => {
                debug!(env_id = %env_id, active = %active.name, suggested = objective, "generic objective cannot replace active one");
            }
            Some(active) if active.name != objective => {
                debug!(env_id = %env_id, active = %active.name, suggested = objective, "classifier suggested a different objective");
            }
            _ => {}
        }
    }

    /// Install `record` as the active objective.
    ///
    /// Opening while another record is active is a logic error: it panics in
    /// debug builds and is refused (and logged) otherwise.
    fn open(&mut self, env_id: &str, record: ObjectiveRecord) -> bool {
        if let Some(active) = &self.record {
            error!(
                env_id = %env_id,
                active = %active.name,
                rejected = %record.name,
                "invariant violated: second objective record, refusing"
            );
            if cfg!(debug_assertions) {
                panic!(
                    "env {env_id}: opening objective {} while {} is active",
                    record.name, active.name
                );
            }
            return false;
        }
        info!(
            env_id = %env_id,
            objective = %record.name,
            milestone = record.milestone_id.as_deref().unwrap_or("none"),
            step = record.created_step,
            map = %record.initial_map,
            "objective opened"
        );
        self.record = Some(record);
        true
    }

    fn close(&mut self) -> Option<ObjectiveRecord> {
        let record = self.record.take()?;
        self.closed.insert(record.name.clone());
        if let Some(milestone) = &record.milestone_id {
            self.closed.insert(milestone.clone());
        }
        Some(record)
    }

    /// Forget the active and closed objectives (episode reset).
    pub fn reset(&mut self) {
        self.record = None;
        self.closed.clear();
        self.last_multiplier = None;
        self.fallback_multiplier = None;
    }

    pub fn active(&self) -> Option<&ObjectiveRecord> {
        self.record.as_ref()
    }

    pub fn last_multiplier(&self) -> Option<f64> {
        self.last_multiplier
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    pub fn degraded_evaluations(&self) -> u64 {
        self.degraded_evaluations
    }
}

/// Validate a classifier multiplier: missing or non-finite becomes 1.0, out of
/// range is clamped.
fn sanitize_multiplier(env_id: &str, raw: Option<f64>, [lo, hi]: [f64; 2]) -> (f64, ClassifierOutcome) {
    match raw {
        Some(m) if m.is_finite() && (lo..=hi).contains(&m) => (m, ClassifierOutcome::Answered),
        Some(m) if m.is_finite() => {
            let clamped = m.clamp(lo, hi);
            warn!(env_id = %env_id, raw = m, clamped, "classifier multiplier out of range");
            (
                clamped,
                ClassifierOutcome::Corrected(format!("multiplier {m} clamped to {clamped}")),
            )
        }
        other => {
            warn!(env_id = %env_id, raw = ?other, "classifier multiplier missing or invalid, using 1.0");
            (
                1.0,
                ClassifierOutcome::Corrected("multiplier missing or invalid".to_string()),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::classifier::{ScriptedClassifier, ScriptedReply, StateSummary};
    use crate::shaping::exploration::ExplorationSummary;
    use crate::shaping::types::DialogCategory;

    fn config() -> ShapingConfig {
        ShapingConfig::default()
    }

    fn history() -> DialogHistory {
        let c = config();
        DialogHistory::new(c.dialog.dialog_history_capacity, &c.dialog.system_message_denylist)
    }

    fn request(step: u64, map: &str, x: i32, y: i32) -> ClassifierRequest {
        ClassifierRequest {
            env_id: "env-0".into(),
            state: StateSummary {
                step,
                stationary_steps: 0,
                milestones_completed: 0,
                new_milestones: vec![],
                map_id: map.into(),
                position: Position::new(x, y),
                badge_count: 0,
                party: vec![],
                avg_recent_reward: None,
            },
            exploration: ExplorationSummary {
                maps_explored: 1,
                positions_visited: 1,
                npcs_talked: 0,
                recent_maps: vec![map.into()],
            },
            dialog_history: vec![],
            current_dialog: None,
            active_objective: None,
        }
    }

    fn verdict(multiplier: f64) -> ScriptedReply {
        ScriptedReply::Verdict(ClassifierVerdict {
            multiplier: Some(multiplier),
            objective: None,
            reason: "scripted".into(),
            dialog: None,
        })
    }

    fn hinted(hint: &str, objective: Option<&str>, multiplier: f64) -> ScriptedReply {
        ScriptedReply::Verdict(ClassifierVerdict {
            multiplier: Some(multiplier),
            objective: objective.map(str::to_string),
            reason: "quest dialog".into(),
            dialog: Some(DialogClassification {
                useful: true,
                category: DialogCategory::Quest,
                milestone_hint: Some(hint.into()),
            }),
        })
    }

    /// A lifecycle with "find_prof_birch" (milestone ROUTE_101) opened at step 200.
    async fn opened(classifier: &ScriptedClassifier) -> (ObjectiveLifecycle, DialogHistory) {
        let mut lifecycle = ObjectiveLifecycle::new();
        let mut dialog = history();
        dialog.observe("PROF. BIRCH went out to ROUTE 101.", 190);
        let out = lifecycle
            .evaluate(classifier, request(200, "TOWN", 0, 0), &MilestoneSet::new(), &mut dialog, &config())
            .await;
        assert_eq!(
            out.events,
            vec![ObjectiveEvent::Opened {
                name: "find_prof_birch".into(),
                milestone_id: Some("ROUTE_101".into()),
            }]
        );
        (lifecycle, dialog)
    }

    #[tokio::test]
    async fn test_opens_from_dialog_hint() {
        let classifier = ScriptedClassifier::new([hinted("ROUTE_101", Some("find_prof_birch"), 1.2)]);
        let (lifecycle, dialog) = opened(&classifier).await;

        let record = lifecycle.active().unwrap();
        assert_eq!(record.created_step, 200);
        assert_eq!(record.initial_map, "TOWN");
        assert_eq!(lifecycle.last_multiplier(), Some(1.2));
        assert_eq!(dialog.len(), 1);
        assert!(dialog.pending().is_none());

        let sent = classifier.requests();
        assert_eq!(sent[0].current_dialog.as_deref(), Some("PROF. BIRCH went out to ROUTE 101."));
        assert!(sent[0].active_objective.is_none());
    }

    #[tokio::test]
    async fn test_progress_multipliers() {
        let classifier = ScriptedClassifier::new([hinted("ROUTE_101", Some("find_prof_birch"), 1.2)]);
        let (mut lifecycle, mut dialog) = opened(&classifier).await;
        let none = MilestoneSet::new();

        let out = lifecycle
            .evaluate(&classifier, request(300, "TOWN", 1, 0), &none, &mut dialog, &config())
            .await;
        assert_eq!(out.multiplier, 1.4);

        let out = lifecycle
            .evaluate(&classifier, request(400, "ROUTE_101_GATE", 1, 0), &none, &mut dialog, &config())
            .await;
        assert_eq!(out.multiplier, 1.6);

        let out = lifecycle
            .evaluate(&classifier, request(500, "ROUTE_101_GATE", 1, 0), &none, &mut dialog, &config())
            .await;
        assert_eq!(out.multiplier, 1.2);
        assert_eq!(lifecycle.active().unwrap().last_map, "ROUTE_101_GATE");
        assert!(classifier.requests()[1].active_objective.is_some());
    }

    #[tokio::test]
    async fn test_active_objective_takes_max_with_classifier() {
        let classifier = ScriptedClassifier::new([
            hinted("ROUTE_101", Some("find_prof_birch"), 1.2),
            verdict(1.9),
            verdict(0.5),
        ]);
        let (mut lifecycle, mut dialog) = opened(&classifier).await;
        let none = MilestoneSet::new();

        let out = lifecycle
            .evaluate(&classifier, request(300, "TOWN", 0, 0), &none, &mut dialog, &config())
            .await;
        assert_eq!(out.multiplier, 1.9);

        // A low suggestion never overrides progress downward.
        let out = lifecycle
            .evaluate(&classifier, request(400, "TOWN", 0, 1), &none, &mut dialog, &config())
            .await;
        assert_eq!(out.multiplier, 1.4);
    }

    #[tokio::test]
    async fn test_completion_emits_fixed_multiplier_and_clears() {
        let classifier = ScriptedClassifier::new([
            hinted("ROUTE_101", Some("find_prof_birch"), 1.2),
            verdict(0.5),
        ]);
        let (mut lifecycle, mut dialog) = opened(&classifier).await;
        let done: MilestoneSet = ["ROUTE_101"].into_iter().collect();

        let out = lifecycle
            .evaluate(&classifier, request(1000, "ROUTE_101", 0, 0), &done, &mut dialog, &config())
            .await;
        assert_eq!(out.multiplier, 2.0);
        assert!(matches!(&out.events[0], ObjectiveEvent::Completed { milestone_id, .. } if milestone_id == "ROUTE_101"));
        assert!(lifecycle.active().is_none());
        assert!(classifier.requests()[1].active_objective.is_none());
    }

    #[tokio::test]
    async fn test_stale_boundary() {
        let classifier = ScriptedClassifier::new([hinted("ROUTE_101", Some("find_prof_birch"), 1.2)]);
        let (mut lifecycle, mut dialog) = opened(&classifier).await;
        let none = MilestoneSet::new();

        let out = lifecycle
            .evaluate(&classifier, request(200 + 4999, "TOWN", 0, 0), &none, &mut dialog, &config())
            .await;
        assert!(lifecycle.active().is_some());
        assert!(matches!(out.events[0], ObjectiveEvent::Progress { .. }));

        let out = lifecycle
            .evaluate(&classifier, request(200 + 5001, "TOWN", 0, 0), &none, &mut dialog, &config())
            .await;
        assert_eq!(out.multiplier, 1.0);
        assert!(matches!(out.events[0], ObjectiveEvent::Stale { age_steps: 5001, .. }));
        assert!(lifecycle.active().is_none());
    }

    #[tokio::test]
    async fn test_closed_objective_not_reopened_until_reset() {
        let classifier = ScriptedClassifier::new([
            hinted("ROUTE_101", Some("find_prof_birch"), 1.2),
            verdict(1.0),
            hinted("ROUTE_101", Some("find_prof_birch"), 1.2),
            hinted("ROUTE_101", Some("find_prof_birch"), 1.2),
        ]);
        let (mut lifecycle, mut dialog) = opened(&classifier).await;
        let none = MilestoneSet::new();

        lifecycle
            .evaluate(&classifier, request(6000, "TOWN", 0, 0), &none, &mut dialog, &config())
            .await;
        assert!(lifecycle.active().is_none());

        dialog.observe("Have you found PROF. BIRCH yet?", 6050);
        let out = lifecycle
            .evaluate(&classifier, request(7000, "TOWN", 0, 0), &none, &mut dialog, &config())
            .await;
        assert!(out.events.is_empty());
        assert!(lifecycle.active().is_none());

        lifecycle.reset();
        dialog.observe("PROF. BIRCH is on ROUTE 101!", 7050);
        lifecycle
            .evaluate(&classifier, request(8000, "TOWN", 0, 0), &none, &mut dialog, &config())
            .await;
        assert!(lifecycle.active().is_some());
    }

    #[tokio::test]
    async fn test_generic_objective_does_not_name_record() {
        let classifier = ScriptedClassifier::new([hinted("OLDALE_TOWN", Some("talk_to_npcs"), 1.1)]);
        let mut lifecycle = ObjectiveLifecycle::new();
        let mut dialog = history();
        dialog.observe("The town up north is OLDALE.", 10);
        lifecycle
            .evaluate(&classifier, request(100, "ROUTE_101", 0, 0), &MilestoneSet::new(), &mut dialog, &config())
            .await;
        assert_eq!(lifecycle.active().unwrap().name, "reach_oldale_town");
    }

    #[tokio::test]
    async fn test_hint_for_completed_milestone_ignored() {
        let classifier = ScriptedClassifier::new([hinted("ROUTE_101", None, 1.0)]);
        let mut lifecycle = ObjectiveLifecycle::new();
        let mut dialog = history();
        dialog.observe("ROUTE 101 is north of here.", 10);
        let done: MilestoneSet = ["ROUTE_101"].into_iter().collect();
        lifecycle
            .evaluate(&classifier, request(100, "TOWN", 0, 0), &done, &mut dialog, &config())
            .await;
        assert!(lifecycle.active().is_none());
        assert_eq!(dialog.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_falls_back_to_last_multiplier() {
        let classifier = ScriptedClassifier::new([verdict(1.3), ScriptedReply::Hang]);
        let mut lifecycle = ObjectiveLifecycle::new();
        let mut dialog = history();
        let none = MilestoneSet::new();

        lifecycle
            .evaluate(&classifier, request(100, "TOWN", 0, 0), &none, &mut dialog, &config())
            .await;

        dialog.observe("MOM: Take care!", 150);
        let out = lifecycle
            .evaluate(&classifier, request(200, "TOWN", 0, 0), &none, &mut dialog, &config())
            .await;
        assert_eq!(out.multiplier, 1.3);
        assert!(matches!(out.classifier, ClassifierOutcome::Failed(ref e) if e.contains("timed out")));
        assert_eq!(lifecycle.degraded_evaluations(), 1);
        // Unlabelled dialog waits for the next evaluation.
        assert_eq!(dialog.pending().unwrap().text, "MOM: Take care!");
        assert!(dialog.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_reply_is_neutral_not_reused() {
        let classifier = ScriptedClassifier::new([
            verdict(1.3),
            ScriptedReply::Fail(ClassifierError::Malformed("no JSON object in reply".into())),
        ]);
        let mut lifecycle = ObjectiveLifecycle::new();
        let mut dialog = history();
        let none = MilestoneSet::new();

        lifecycle
            .evaluate(&classifier, request(100, "TOWN", 0, 0), &none, &mut dialog, &config())
            .await;
        let out = lifecycle
            .evaluate(&classifier, request(200, "TOWN", 0, 0), &none, &mut dialog, &config())
            .await;
        assert_eq!(out.multiplier, 1.0);
        assert!(matches!(out.classifier, ClassifierOutcome::Corrected(ref d) if d.contains("no JSON object")));
        assert_eq!(lifecycle.degraded_evaluations(), 0);
    }

    #[tokio::test]
    async fn test_completion_payout_not_repeated_while_classifier_down() {
        let down = || ScriptedReply::Fail(ClassifierError::Transport("connection refused".into()));
        let classifier = ScriptedClassifier::new([
            hinted("ROUTE_101", Some("find_prof_birch"), 1.2),
            verdict(1.0),
            down(),
            down(),
            down(),
        ]);
        let (mut lifecycle, mut dialog) = opened(&classifier).await;
        let done: MilestoneSet = ["ROUTE_101"].into_iter().collect();

        let mut emitted = Vec::new();
        for step in [1000, 2000, 3000, 4000] {
            let out = lifecycle
                .evaluate(&classifier, request(step, "ROUTE_101", 0, 0), &done, &mut dialog, &config())
                .await;
            emitted.push(out.multiplier);
        }
        assert_eq!(emitted, vec![2.0, 1.0, 1.0, 1.0]);
        assert!(lifecycle.active().is_none());
        assert_eq!(lifecycle.degraded_evaluations(), 3);
    }

    #[tokio::test]
    async fn test_failure_without_history_is_neutral() {
        let classifier = ScriptedClassifier::new([ScriptedReply::Fail(ClassifierError::Transport(
            "connection refused".into(),
        ))]);
        let mut lifecycle = ObjectiveLifecycle::new();
        let out = lifecycle
            .evaluate(&classifier, request(100, "TOWN", 0, 0), &MilestoneSet::new(), &mut history(), &config())
            .await;
        assert_eq!(out.multiplier, 1.0);
    }

    #[tokio::test]
    async fn test_malformed_multipliers_are_corrected() {
        let classifier = ScriptedClassifier::new([
            ScriptedReply::Verdict(ClassifierVerdict {
                multiplier: None,
                objective: None,
                reason: String::new(),
                dialog: None,
            }),
            verdict(7.5),
            verdict(f64::NAN),
        ]);
        let mut lifecycle = ObjectiveLifecycle::new();
        let mut dialog = history();
        let none = MilestoneSet::new();

        let out = lifecycle
            .evaluate(&classifier, request(100, "TOWN", 0, 0), &none, &mut dialog, &config())
            .await;
        assert_eq!(out.multiplier, 1.0);
        assert!(matches!(out.classifier, ClassifierOutcome::Corrected(_)));

        let out = lifecycle
            .evaluate(&classifier, request(200, "TOWN", 0, 0), &none, &mut dialog, &config())
            .await;
        assert_eq!(out.multiplier, 2.0);

        let out = lifecycle
            .evaluate(&classifier, request(300, "TOWN", 0, 0), &none, &mut dialog, &config())
            .await;
        assert_eq!(out.multiplier, 1.0);
        assert_eq!(lifecycle.degraded_evaluations(), 0);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "while find_prof_birch is active")]
    fn test_second_record_panics_in_debug() {
        let mut lifecycle = ObjectiveLifecycle::new();
        let first = ObjectiveRecord::new("find_prof_birch", None, 0, Position::new(0, 0), "TOWN");
        let second = ObjectiveRecord::new("deliver_parcel", None, 0, Position::new(0, 0), "TOWN");
        assert!(lifecycle.open("env-0", first));
        lifecycle.open("env-0", second);
    }
}
