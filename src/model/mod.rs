//! The classifier collaborator and the LLM client behind it.
//!
//! - [`api::LlmClient`] -- OpenAI-compatible chat completion client.
//! - [`prompt`] -- the classifier prompt template.
//! - [`classifier`] -- the [`Classifier`] trait, its LLM, rule-based and
//!   scripted implementations, and response parsing.

pub mod api;
pub mod classifier;
pub mod prompt;

pub use api::{ChatMessage, ChatResponse, Choice, LlmClient, Usage};
pub use classifier::{
    AnyClassifier, Classifier, ClassifierError, ClassifierRequest, ClassifierVerdict,
    LlmClassifier, RuleClassifier, ScriptedClassifier, ScriptedReply, StateSummary,
};
