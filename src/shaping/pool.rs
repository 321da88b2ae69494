//! One shaper, many environments.
//!
//! The set of environments is fixed when the pool is built, so the map itself
//! is read-only and needs no lock; each [`EnvironmentContext`] sits behind its
//! own async mutex, which serializes calls for the same `env_id` only.

use std::collections::HashMap;

use anyhow::Result;
use tokio::sync::Mutex;

use super::coordinator::{DebugSnapshot, EnvironmentContext, RewardShaper};
use crate::env::RawState;
use crate::model::classifier::Classifier;

pub struct ShaperPool<C> {
    shaper: RewardShaper<C>,
    contexts: HashMap<String, Mutex<EnvironmentContext>>,
}

impl<C: Classifier> ShaperPool<C> {
    /// Build a pool with a fresh context for every id in `env_ids`.
    pub fn new<I, S>(shaper: RewardShaper<C>, env_ids: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut contexts = HashMap::new();
        for env_id in env_ids {
            let env_id = env_id.into();
            if contexts.contains_key(&env_id) {
                anyhow::bail!("duplicate environment id: {env_id}");
            }
            let ctx = shaper.new_context(env_id.clone());
            contexts.insert(env_id, Mutex::new(ctx));
        }
        tracing::info!(envs = contexts.len(), "shaper pool ready");
        Ok(Self { shaper, contexts })
    }

    pub fn shaper(&self) -> &RewardShaper<C> {
        &self.shaper
    }

    /// Registered ids, sorted.
    pub fn env_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.contexts.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Shape one step of `env_id`.
    pub async fn on_step(&self, env_id: &str, base_reward: f64, state: &RawState) -> Result<f64> {
        let mut ctx = self.context(env_id)?.lock().await;
        Ok(self.shaper.on_step(&mut ctx, base_reward, state).await)
    }

    pub async fn on_episode_reset(&self, env_id: &str) -> Result<()> {
        let mut ctx = self.context(env_id)?.lock().await;
        self.shaper.on_episode_reset(&mut ctx);
        Ok(())
    }

    pub async fn debug_snapshot(&self, env_id: &str) -> Result<DebugSnapshot> {
        let ctx = self.context(env_id)?.lock().await;
        Ok(self.shaper.debug_snapshot(&ctx))
    }

    fn context(&self, env_id: &str) -> Result<&Mutex<EnvironmentContext>> {
        self.contexts
            .get(env_id)
            .ok_or_else(|| anyhow::anyhow!("unknown environment id: {env_id}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShapingConfig;
    use crate::model::classifier::{
        ClassifierVerdict, RuleClassifier, ScriptedClassifier, ScriptedReply,
    };
    use crate::shaping::types::StaticObjectiveTable;
    use std::sync::Arc;

    fn pool<C: Classifier>(config: ShapingConfig, classifier: C, ids: &[&str]) -> ShaperPool<C> {
        let shaper = RewardShaper::new(
            Arc::new(config),
            Arc::new(StaticObjectiveTable::new(HashMap::new())),
            Arc::new(classifier),
        );
        ShaperPool::new(shaper, ids.iter().copied()).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_env_is_an_error() {
        let p = pool(ShapingConfig::default(), RuleClassifier, &["env-0"]);
        let err = p
            .on_step("env-9", 1.0, &RawState::at("TOWN", 0, 0))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("env-9"));
        assert!(p.on_episode_reset("env-9").await.is_err());
        assert!(p.debug_snapshot("env-9").await.is_err());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let shaper = RewardShaper::new(
            Arc::new(ShapingConfig::default()),
            Arc::new(StaticObjectiveTable::new(HashMap::new())),
            Arc::new(RuleClassifier),
        );
        assert!(ShaperPool::new(shaper, ["a", "b", "a"]).is_err());
    }

    #[tokio::test]
    async fn test_interleaved_envs_keep_separate_state() {
        let mut config = ShapingConfig::default();
        config.cadence.lifecycle_interval = 2;
        let classifier = ScriptedClassifier::new([
            ScriptedReply::Verdict(ClassifierVerdict {
                multiplier: Some(1.5),
                objective: None,
                reason: "first".into(),
                dialog: None,
            }),
            ScriptedReply::Verdict(ClassifierVerdict::neutral("second")),
        ]);
        let p = pool(config, classifier, &["env-0", "env-1"]);
        assert_eq!(p.env_ids(), vec!["env-0", "env-1"]);

        for x in 0..2 {
            let town = RawState::at("TOWN", x, 0);
            let lab = RawState::at("LAB", x, 5);
            let (a, b) = tokio::join!(
                p.on_step("env-0", 1.0, &town),
                p.on_step("env-1", 1.0, &lab),
            );
            a.unwrap();
            b.unwrap();
        }

        let a = p.debug_snapshot("env-0").await.unwrap();
        let b = p.debug_snapshot("env-1").await.unwrap();
        assert_eq!(a.exploration.recent_maps, vec!["TOWN"]);
        assert_eq!(b.exploration.recent_maps, vec!["LAB"]);
        assert_eq!(a.episode_step, 2);
        assert_eq!(b.episode_step, 2);
        // One classifier call per environment, each with its own id.
        let ids: Vec<String> = p
            .shaper()
            .classifier()
            .requests()
            .into_iter()
            .map(|r| r.env_id)
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"env-0".to_string()) && ids.contains(&"env-1".to_string()));
        assert_eq!(a.lifecycle_multiplier.max(b.lifecycle_multiplier), 1.5);
    }

    #[tokio::test]
    async fn test_reset_through_pool() {
        let p = pool(ShapingConfig::default(), RuleClassifier, &["env-0"]);
        p.on_step("env-0", 1.0, &RawState::at("TOWN", 0, 0)).await.unwrap();
        p.on_episode_reset("env-0").await.unwrap();
        let snap = p.debug_snapshot("env-0").await.unwrap();
        assert_eq!(snap.episode, 1);
        assert_eq!(snap.episode_step, 0);
        assert_eq!(snap.exploration.maps_explored, 1);
    }
}
