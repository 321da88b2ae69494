use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_CLASSIFIER_TIMEOUT_SECS: f64 = 30.0;
/// Longest classifier call the engine will wait for.
const MAX_CLASSIFIER_TIMEOUT_SECS: f64 = 3600.0;

/// Complete configuration for the reward-shaping engine.
///
/// Built once at startup and shared (read-only) by every environment context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShapingConfig {
    pub cadence: CadenceConfig,
    pub lifecycle: LifecycleConfig,
    pub proximity: ProximityConfig,
    pub clamp: ClampConfig,
    pub dialog: DialogConfig,
    pub classifier: ClassifierConfig,
    pub exploration: ExplorationConfig,
    /// Optional path to a JSON file holding the static objective table.
    pub objective_table_path: Option<PathBuf>,
}

/// How often the coarse and fine signals are re-evaluated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CadenceConfig {
    /// Steps between objective lifecycle evaluations (default: 1000).
    pub lifecycle_interval: u64,
    /// Steps between proximity evaluations (default: 100).
    pub proximity_interval: u64,
}

/// Objective lifecycle thresholds and multipliers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// An objective older than this many steps is dropped as stale (default: 5000).
    pub stale_threshold_steps: u64,
    /// Emitted when the linked milestone completes (default: 2.0).
    pub completion_multiplier: f64,
    /// Emitted when the agent changed map since the last evaluation (default: 1.6).
    pub map_change_multiplier: f64,
    /// Emitted when the agent moved on the same map (default: 1.4).
    pub moved_multiplier: f64,
    /// Emitted while an objective is active but the agent stood still (default: 1.2).
    pub stationary_multiplier: f64,
}

/// Proximity shaping thresholds and multipliers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProximityConfig {
    /// Distance (in tiles) at or under which an approach counts as "very close" (default: 3).
    pub near_threshold_tiles: u32,
    /// Emitted when the distance to the nearest objective shrank (default: 1.5).
    pub approach_multiplier: f64,
    /// Emitted instead of `approach_multiplier` inside the near threshold (default: 1.8).
    pub near_multiplier: f64,
    /// Emitted when the distance grew (default: 0.8).
    pub recede_multiplier: f64,
}

/// Bounds applied to the combined multiplier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClampConfig {
    /// `[min, max]` for the product of all multipliers (default: [0.2, 3.5]).
    pub multiplier_clamp_range: [f64; 2],
}

/// Dialog history settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DialogConfig {
    /// Maximum number of stored dialog entries (default: 10).
    pub dialog_history_capacity: usize,
    /// Case-insensitive substrings marking UI/engine chrome.
    pub system_message_denylist: Vec<String>,
    /// How many of the most recent entries are shown to the classifier (default: 5).
    pub prompt_history_len: usize,
}

/// Which classifier implementation to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierBackend {
    /// Offline heuristics, no network.
    Rules,
    /// OpenAI-compatible chat completion endpoint.
    Llm,
}

/// Classifier collaborator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub backend: ClassifierBackend,
    /// Base URL of the chat completion API (e.g. a local Ollama `/v1`).
    pub api_base: String,
    pub model_id: String,
    pub api_key: String,
    pub temperature: f64,
    /// Upper bound on a single classifier call (default: 30.0).
    pub classifier_timeout_seconds: f64,
    /// Suggestions outside `[min, max]` are clamped (default: [0.3, 2.0]).
    pub multiplier_range: [f64; 2],
    /// Number of recent base rewards averaged into the state summary (default: 100).
    pub recent_reward_window: usize,
}

/// Exploration summary settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorationConfig {
    /// Number of recently entered maps reported in the summary (default: 3).
    pub recent_maps: usize,
}

impl Default for ShapingConfig {
    fn default() -> Self {
        Self {
            cadence: CadenceConfig::default(),
            lifecycle: LifecycleConfig::default(),
            proximity: ProximityConfig::default(),
            clamp: ClampConfig::default(),
            dialog: DialogConfig::default(),
            classifier: ClassifierConfig::default(),
            exploration: ExplorationConfig::default(),
            objective_table_path: None,
        }
    }
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            lifecycle_interval: 1000,
            proximity_interval: 100,
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            stale_threshold_steps: 5000,
            completion_multiplier: 2.0,
            map_change_multiplier: 1.6,
            moved_multiplier: 1.4,
            stationary_multiplier: 1.2,
        }
    }
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            near_threshold_tiles: 3,
            approach_multiplier: 1.5,
            near_multiplier: 1.8,
            recede_multiplier: 0.8,
        }
    }
}

impl Default for ClampConfig {
    fn default() -> Self {
        Self {
            multiplier_clamp_range: [0.2, 3.5],
        }
    }
}

impl Default for DialogConfig {
    fn default() -> Self {
        Self {
            dialog_history_capacity: 10,
            system_message_denylist: default_denylist(),
            prompt_history_len: 5,
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            backend: ClassifierBackend::Rules,
            api_base: "http://localhost:11434/v1".into(),
            model_id: "llama3".into(),
            api_key: String::new(),
            temperature: 0.3,
            classifier_timeout_seconds: DEFAULT_CLASSIFIER_TIMEOUT_SECS,
            multiplier_range: [0.3, 2.0],
            recent_reward_window: 100,
        }
    }
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self { recent_maps: 3 }
    }
}

impl ClassifierConfig {
    /// `classifier_timeout_seconds` as a `Duration`; values that do not fit
    /// fall back to the default.
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.classifier_timeout_seconds)
            .unwrap_or(Duration::from_secs_f64(DEFAULT_CLASSIFIER_TIMEOUT_SECS))
    }
}

fn default_denylist() -> Vec<String> {
    [
        "no item assigned",
        "no registered item",
        "press start",
        "press select",
        "saving",
        "save completed",
        "now loading",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl ShapingConfig {
    /// Read a JSON config file. Missing sections fall back to defaults.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.cadence.lifecycle_interval == 0 || self.cadence.proximity_interval == 0 {
            anyhow::bail!("cadence intervals must be at least 1 step");
        }
        check_range("clamp.multiplier_clamp_range", self.clamp.multiplier_clamp_range)?;
        check_range(
            "classifier.multiplier_range",
            self.classifier.multiplier_range,
        )?;
        if self.dialog.dialog_history_capacity == 0 {
            anyhow::bail!("dialog.dialog_history_capacity must be at least 1");
        }
        let timeout = self.classifier.classifier_timeout_seconds;
        if !(timeout.is_finite() && timeout > 0.0 && timeout <= MAX_CLASSIFIER_TIMEOUT_SECS) {
            anyhow::bail!(
                "classifier.classifier_timeout_seconds must be in (0, {MAX_CLASSIFIER_TIMEOUT_SECS}], got {timeout}"
            );
        }
        Ok(())
    }

    /// Clamp a combined multiplier into the configured range.
    pub fn clamp_multiplier(&self, multiplier: f64) -> f64 {
        let [lo, hi] = self.clamp.multiplier_clamp_range;
        multiplier.clamp(lo, hi)
    }
}

fn check_range(name: &str, [lo, hi]: [f64; 2]) -> Result<()> {
    if !(lo.is_finite() && hi.is_finite()) || lo <= 0.0 || lo > hi {
        anyhow::bail!("{name} must satisfy 0 < min <= max, got [{lo}, {hi}]");
    }
    Ok(())
}
