//! Bounded, order-preserving log of narratively useful dialog.
//!
//! Text passes through a case-insensitive denylist of UI/engine chrome before
//! anything else happens. Surviving text waits as the *pending* dialog until
//! the next lifecycle evaluation, where the classifier labels it and it is
//! appended to the history.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::types::{DialogCategory, DialogEntry};

/// Classifier labels for one piece of dialog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogClassification {
    pub useful: bool,
    pub category: DialogCategory,
    pub milestone_hint: Option<String>,
}

impl DialogClassification {
    /// Labels used when the classifier gave no opinion about the text.
    pub fn unlabelled() -> Self {
        Self {
            useful: false,
            category: DialogCategory::Ambient,
            milestone_hint: None,
        }
    }
}

/// Filtered text seen since the last lifecycle evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingDialog {
    pub text: String,
    pub step: u64,
}

#[derive(Debug, Clone)]
pub struct DialogHistory {
    entries: VecDeque<DialogEntry>,
    capacity: usize,
    /// Lower-cased denylist.
    denylist: Vec<String>,
    pending: Option<PendingDialog>,
}

impl DialogHistory {
    pub fn new(capacity: usize, denylist: &[String]) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            denylist: denylist.iter().map(|s| s.to_lowercase()).collect(),
            pending: None,
        }
    }

    /// Whether `text` is UI/engine chrome that must never be stored.
    pub fn is_system_message(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.denylist.iter().any(|pattern| lower.contains(pattern.as_str()))
    }

    /// Hold `raw_text` for classification at the next evaluation.
    ///
    /// Returns `false` (and leaves the pending slot untouched) for blank or
    /// denylisted text, and for text identical to the pending one.
    pub fn observe(&mut self, raw_text: &str, step: u64) -> bool {
        let text = raw_text.trim();
        if text.is_empty() {
            return false;
        }
        if self.is_system_message(text) {
            tracing::debug!(text = %truncate(text, 50), "filtered system message");
            return false;
        }
        if self.pending.as_ref().is_some_and(|p| p.text == text) {
            return false;
        }
        self.pending = Some(PendingDialog {
            text: text.to_string(),
            step,
        });
        true
    }

    pub fn pending(&self) -> Option<&PendingDialog> {
        self.pending.as_ref()
    }

    /// Take the pending dialog out, leaving the slot empty.
    pub fn take_pending(&mut self) -> Option<PendingDialog> {
        self.pending.take()
    }

    /// Filter, label and store `raw_text`.
    ///
    /// Returns `None` when the text is denylisted or blank, or when it equals
    /// the most recent stored entry; in both cases the history is unchanged.
    pub fn filter_and_append(
        &mut self,
        raw_text: &str,
        step: u64,
        classification: DialogClassification,
    ) -> Option<DialogEntry> {
        let text = raw_text.trim();
        if text.is_empty() || self.is_system_message(text) {
            return None;
        }
        if self.entries.back().is_some_and(|last| last.text == text) {
            return None;
        }

        let entry = DialogEntry {
            text: text.to_string(),
            step,
            useful: classification.useful,
            category: classification.category,
            milestone_hint: classification.milestone_hint,
        };
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry.clone());
        Some(entry)
    }

    /// Up to `n` most recent entries, newest last.
    pub fn recent(&self, n: usize) -> Vec<DialogEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShapingConfig;
    use proptest::prelude::*;

    fn history() -> DialogHistory {
        let config = ShapingConfig::default();
        DialogHistory::new(
            config.dialog.dialog_history_capacity,
            &config.dialog.system_message_denylist,
        )
    }

    fn quest(hint: Option<&str>) -> DialogClassification {
        DialogClassification {
            useful: true,
            category: DialogCategory::Quest,
            milestone_hint: hint.map(str::to_string),
        }
    }

    #[test]
    fn test_denylisted_text_is_dropped() {
        let mut h = history();
        assert!(h
            .filter_and_append("There is no item assigned to SELECT.", 1, quest(None))
            .is_none());
        assert!(h.filter_and_append("NOW LOADING...", 2, quest(None)).is_none());
        assert!(h.is_empty());
    }

    #[test]
    fn test_consecutive_duplicates_collapse() {
        let mut h = history();
        assert!(h.filter_and_append("Go see PROF. BIRCH!", 1, quest(None)).is_some());
        assert!(h.filter_and_append("Go see PROF. BIRCH!", 2, quest(None)).is_none());
        assert!(h.filter_and_append("Be careful!", 3, quest(None)).is_some());
        assert!(h.filter_and_append("Go see PROF. BIRCH!", 4, quest(None)).is_some());
        assert_eq!(h.len(), 3);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut h = DialogHistory::new(3, &[]);
        for i in 0..5 {
            h.filter_and_append(&format!("line {i}"), i, quest(None));
        }
        let texts: Vec<_> = h.recent(10).into_iter().map(|e| e.text).collect();
        assert_eq!(texts, vec!["line 2", "line 3", "line 4"]);
    }

    #[test]
    fn test_recent_newest_last() {
        let mut h = history();
        h.filter_and_append("first", 1, quest(None));
        h.filter_and_append("second", 2, quest(Some("ROUTE_101")));
        let recent = h.recent(1);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].text, "second");
        assert_eq!(recent[0].milestone_hint.as_deref(), Some("ROUTE_101"));
    }

    #[test]
    fn test_observe_holds_latest_pending() {
        let mut h = history();
        assert!(h.observe("MOM: See you, honey!", 5));
        assert!(!h.observe("Press START to continue", 6));
        assert!(!h.observe("   ", 7));
        assert_eq!(h.pending().unwrap().step, 5);
        assert!(h.observe("PROF. BIRCH is outside town.", 8));
        let pending = h.take_pending().unwrap();
        assert_eq!(pending.text, "PROF. BIRCH is outside town.");
        assert!(h.pending().is_none());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("ab", 3), "ab");
    }

    proptest! {
        #[test]
        fn prop_denylisted_never_stored(
            prefix in "[a-z ]{0,10}",
            pattern_idx in 0usize..7,
            suffix in "[a-z ]{0,10}",
            upper in any::<bool>(),
        ) {
            let mut h = history();
            h.filter_and_append("existing line", 0, quest(None));
            let pattern = ShapingConfig::default().dialog.system_message_denylist[pattern_idx].clone();
            let pattern = if upper { pattern.to_uppercase() } else { pattern };
            let text = format!("{prefix}{pattern}{suffix}");
            prop_assert!(h.filter_and_append(&text, 1, quest(None)).is_none());
            prop_assert_eq!(h.len(), 1);
        }
    }
}
