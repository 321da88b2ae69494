//! The classifier collaborator.
//!
//! Once per lifecycle evaluation the engine sends a [`ClassifierRequest`] and
//! gets back a [`ClassifierVerdict`]: a suggested multiplier, an optional
//! objective name, a reason, and labels for the pending dialog. Everything the
//! classifier says is untrusted; the lifecycle manager validates it.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::api::LlmClient;
use super::prompt::classifier_prompt;
use crate::config::{ClassifierBackend, ClassifierConfig};
use crate::env::PartySlot;
use crate::shaping::dialog::DialogClassification;
use crate::shaping::exploration::ExplorationSummary;
use crate::shaping::types::{DialogCategory, DialogEntry, ObjectiveRecord, Position};

/// Objectives too vague to displace a concrete one.
const GENERIC_OBJECTIVES: &[&str] = &["explore_and_talk_to_npcs", "talk_to_npcs"];

// ---------------------------------------------------------------------------
// Request / verdict
// ---------------------------------------------------------------------------

/// Game state as shown to the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSummary {
    pub step: u64,
    /// Consecutive steps without a position change.
    pub stationary_steps: u64,
    pub milestones_completed: usize,
    /// Milestones completed since the previous lifecycle evaluation.
    pub new_milestones: Vec<String>,
    pub map_id: String,
    pub position: Position,
    pub badge_count: u32,
    pub party: Vec<PartySlot>,
    /// Mean base reward over the recent window; `None` before any step.
    pub avg_recent_reward: Option<f64>,
}

impl fmt::Display for StateSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Step: {} | Map: {} @ {}", self.step, self.map_id, self.position)?;
        writeln!(f, "Stationary for {} steps", self.stationary_steps)?;
        if let Some(avg) = self.avg_recent_reward {
            writeln!(f, "Avg recent reward: {avg:.2}")?;
        }
        write!(f, "Milestones completed: {}", self.milestones_completed)?;
        if !self.new_milestones.is_empty() {
            write!(f, " (new: {})", self.new_milestones.join(", "))?;
        }
        writeln!(f)?;
        write!(f, "Badges: {} | Party: ", self.badge_count)?;
        if self.party.is_empty() {
            write!(f, "(empty)")
        } else {
            let slots: Vec<String> = self
                .party
                .iter()
                .map(|p| format!("Lv{} ({:.0}% HP)", p.level, p.hp_ratio * 100.0))
                .collect();
            write!(f, "{}", slots.join(", "))
        }
    }
}

/// Everything the classifier is allowed to see for one evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierRequest {
    pub env_id: String,
    pub state: StateSummary,
    pub exploration: ExplorationSummary,
    /// Recent stored dialog, newest last.
    pub dialog_history: Vec<DialogEntry>,
    /// Dialog seen since the last evaluation, waiting to be labelled.
    pub current_dialog: Option<String>,
    pub active_objective: Option<ObjectiveRecord>,
}

/// What the classifier answered, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierVerdict {
    /// Suggested multiplier; `None` when the reply carried none.
    pub multiplier: Option<f64>,
    /// Detected objective, if any.
    pub objective: Option<String>,
    pub reason: String,
    /// Labels for `current_dialog`; `None` when the classifier gave none.
    pub dialog: Option<DialogClassification>,
}

impl ClassifierVerdict {
    pub fn neutral(reason: impl Into<String>) -> Self {
        Self {
            multiplier: Some(1.0),
            objective: None,
            reason: reason.into(),
            dialog: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClassifierError {
    #[error("classifier timed out after {0:?}")]
    Timeout(Duration),
    #[error("classifier transport failed: {0}")]
    Transport(String),
    #[error("malformed classifier response: {0}")]
    Malformed(String),
}

// ---------------------------------------------------------------------------
// Classifier trait
// ---------------------------------------------------------------------------

/// A source of semantic judgements about the agent's situation.
#[allow(async_fn_in_trait)]
pub trait Classifier: Send + Sync {
    /// Judge the request. Implementations need not enforce a timeout; the
    /// caller does.
    async fn classify(&self, request: &ClassifierRequest)
        -> Result<ClassifierVerdict, ClassifierError>;

    /// Short name used in logs.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// LLM-backed classifier
// ---------------------------------------------------------------------------

pub struct LlmClassifier {
    client: LlmClient,
    model_id: String,
    temperature: f64,
}

impl LlmClassifier {
    pub fn new(client: LlmClient, model_id: impl Into<String>, temperature: f64) -> Self {
        Self {
            client,
            model_id: model_id.into(),
            temperature,
        }
    }

    pub fn from_config(config: &ClassifierConfig) -> Self {
        let client = LlmClient::new(&config.api_base, &config.api_key, config.timeout());
        Self::new(client, config.model_id.clone(), config.temperature)
    }
}

impl Classifier for LlmClassifier {
    async fn classify(
        &self,
        request: &ClassifierRequest,
    ) -> Result<ClassifierVerdict, ClassifierError> {
        let messages = classifier_prompt(request);
        let response = self
            .client
            .chat_completion(&self.model_id, &messages, self.temperature, 512)
            .await
            .map_err(|e| ClassifierError::Transport(format!("{e:#}")))?;
        parse_verdict(response.first_content())
    }

    fn name(&self) -> &str {
        "llm"
    }
}

// ---------------------------------------------------------------------------
// Rule-based classifier
// ---------------------------------------------------------------------------

/// Offline heuristics over the structured state, no network.
///
/// Punishes standing still, rewards fresh milestones, and otherwise stays
/// neutral. Never names objectives.
#[derive(Debug, Clone, Default)]
pub struct RuleClassifier;

impl RuleClassifier {
    pub fn judge(&self, state: &StateSummary) -> (f64, String) {
        if state.stationary_steps > 100 {
            (0.3, format!("agent is stuck ({} steps without moving)", state.stationary_steps))
        } else if state.stationary_steps > 50 {
            (0.6, format!("agent is idling ({} steps without moving)", state.stationary_steps))
        } else if !state.new_milestones.is_empty() {
            (1.8, format!("new milestones: {}", state.new_milestones.join(", ")))
        } else {
            (1.0, "normal exploration".to_string())
        }
    }
}

impl Classifier for RuleClassifier {
    async fn classify(
        &self,
        request: &ClassifierRequest,
    ) -> Result<ClassifierVerdict, ClassifierError> {
        let (multiplier, reason) = self.judge(&request.state);
        Ok(ClassifierVerdict {
            multiplier: Some(multiplier),
            objective: None,
            reason,
            dialog: request
                .current_dialog
                .as_ref()
                .map(|_| DialogClassification::unlabelled()),
        })
    }

    fn name(&self) -> &str {
        "rules"
    }
}

// ---------------------------------------------------------------------------
// AnyClassifier: enum dispatch for backend selection at runtime
// ---------------------------------------------------------------------------

pub enum AnyClassifier {
    Rules(RuleClassifier),
    Llm(LlmClassifier),
}

impl AnyClassifier {
    pub fn from_config(config: &ClassifierConfig) -> Self {
        match config.backend {
            ClassifierBackend::Rules => Self::Rules(RuleClassifier),
            ClassifierBackend::Llm => Self::Llm(LlmClassifier::from_config(config)),
        }
    }
}

impl Classifier for AnyClassifier {
    async fn classify(
        &self,
        request: &ClassifierRequest,
    ) -> Result<ClassifierVerdict, ClassifierError> {
        match self {
            Self::Rules(c) => c.classify(request).await,
            Self::Llm(c) => c.classify(request).await,
        }
    }

    fn name(&self) -> &str {
        match self {
            Self::Rules(c) => c.name(),
            Self::Llm(c) => c.name(),
        }
    }
}

// ---------------------------------------------------------------------------
// Scripted classifier
// ---------------------------------------------------------------------------

/// One canned answer of a [`ScriptedClassifier`].
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Verdict(ClassifierVerdict),
    Fail(ClassifierError),
    /// Never answer; only a caller-side timeout ends the call.
    Hang,
}

/// Replays canned replies in order, then answers neutrally.
///
/// Every request is kept so callers can inspect what was sent.
#[derive(Debug, Default)]
pub struct ScriptedClassifier {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<ClassifierRequest>>,
}

impl ScriptedClassifier {
    pub fn new(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ClassifierRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn next_reply(&self, request: &ClassifierRequest) -> Option<ScriptedReply> {
        match self.requests.lock() {
            Ok(mut requests) => requests.push(request.clone()),
            Err(poisoned) => poisoned.into_inner().push(request.clone()),
        }
        match self.replies.lock() {
            Ok(mut replies) => replies.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        }
    }
}

impl Classifier for ScriptedClassifier {
    async fn classify(
        &self,
        request: &ClassifierRequest,
    ) -> Result<ClassifierVerdict, ClassifierError> {
        match self.next_reply(request) {
            Some(ScriptedReply::Verdict(v)) => Ok(v),
            Some(ScriptedReply::Fail(e)) => Err(e),
            Some(ScriptedReply::Hang) => std::future::pending().await,
            None => Ok(ClassifierVerdict::neutral("script exhausted")),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawVerdict {
    #[serde(default)]
    multiplier: Option<serde_json::Value>,
    #[serde(default, alias = "detected_objective")]
    objective: Option<String>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    dialog: Option<RawDialog>,
}

#[derive(Debug, Deserialize)]
struct RawDialog {
    #[serde(default)]
    useful: bool,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    milestone_hint: Option<String>,
}

/// Parse an LLM reply into a verdict.
///
/// Tolerates markdown code fences and prose around the JSON object. The
/// multiplier is returned as given (possibly absent or out of range);
/// validating it is the caller's job.
pub fn parse_verdict(response: &str) -> Result<ClassifierVerdict, ClassifierError> {
    let trimmed = strip_code_fences(response);
    let raw: RawVerdict = match serde_json::from_str(trimmed) {
        Ok(raw) => raw,
        Err(first_err) => {
            let Some(object) = extract_json_object(trimmed) else {
                return Err(ClassifierError::Malformed(format!(
                    "no JSON object in reply ({first_err})"
                )));
            };
            serde_json::from_str(object)
                .map_err(|e| ClassifierError::Malformed(e.to_string()))?
        }
    };

    let multiplier = raw.multiplier.as_ref().and_then(|v| match v {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    });

    let dialog = raw.dialog.map(|d| DialogClassification {
        useful: d.useful,
        category: d
            .category
            .as_deref()
            .and_then(DialogCategory::from_str_loose)
            .unwrap_or(DialogCategory::Ambient),
        milestone_hint: d.milestone_hint.and_then(non_null),
    });

    Ok(ClassifierVerdict {
        multiplier,
        objective: raw.objective.and_then(non_null),
        reason: raw.reason.unwrap_or_default(),
        dialog,
    })
}

/// Whether `name` is a catch-all goal that must not displace a specific one.
pub fn is_generic_objective(name: &str) -> bool {
    let name = name.trim();
    GENERIC_OBJECTIVES
        .iter()
        .any(|g| g.eq_ignore_ascii_case(name))
}

/// Treat empty, `"null"` and `"none"` as absent.
fn non_null(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("null")
        || trimmed.eq_ignore_ascii_case("none")
    {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Strip markdown code fences from an LLM response.
fn strip_code_fences(s: &str) -> &str {
    let trimmed = s.trim();
    let stripped = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let stripped = stripped.strip_suffix("```").unwrap_or(stripped);
    stripped.trim()
}

/// First balanced `{...}` in `s` that mentions `"multiplier"`.
fn extract_json_object(s: &str) -> Option<&str> {
    let bytes = s.as_bytes();
    let mut start = 0;
    while let Some(offset) = s[start..].find('{') {
        let open = start + offset;
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        let mut close = None;
        for (i, &b) in bytes.iter().enumerate().skip(open) {
            if in_string {
                match b {
                    _ if escaped => escaped = false,
                    b'\\' => escaped = true,
                    b'"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        close = Some(i);
                        break;
                    }
                }
                _ => {}
            }
        }
        let close = close?;
        let candidate = &s[open..=close];
        if candidate.contains("\"multiplier\"") {
            return Some(candidate);
        }
        start = open + 1;
    }
    None
}
