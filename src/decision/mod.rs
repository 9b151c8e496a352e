//! Decision adapter: routes a natural-language instruction to one of the
//! five task protocols.
//!
//! Two implementations of [`Classifier`] are provided: [`RuleClassifier`],
//! a pure keyword-rule engine that needs no network, and
//! [`ModelClassifier`], which asks a remote classification service and
//! degrades to `free_chat` when the service stays unreachable.

mod classifier;
mod rules;

pub use classifier::{ModelClassifier, CLASSIFIER_SYSTEM_PROMPT};
pub use rules::RuleClassifier;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A single user instruction. Immutable once issued.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub id: Uuid,
    pub text: String,
    pub issued_at: DateTime<Utc>,
}

impl Instruction {
    /// Create a new instruction stamped with the current time.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            issued_at: Utc::now(),
        }
    }
}

/// The five instruction-routing outcomes. Closed set: the decision adapter
/// never produces anything outside these variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    FreeChat,
    BasicOperation,
    SingleReply,
    ContinuousReply,
    ComplexOperation,
}

impl TaskType {
    /// Tag string as exchanged with the classification service.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FreeChat => "free_chat",
            Self::BasicOperation => "basic_operation",
            Self::SingleReply => "single_reply",
            Self::ContinuousReply => "continuous_reply",
            Self::ComplexOperation => "complex_operation",
        }
    }
}

/// Structured classification of one instruction. Produced once, never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub task_type: TaskType,
    #[serde(default)]
    pub target_app: String,
    #[serde(default)]
    pub target_object: String,
    #[serde(default)]
    pub is_auto: bool,
    #[serde(default)]
    pub specific_content: String,
    /// Set when the decision service was unreachable and the instruction
    /// fell back to free chat.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
}

impl Classification {
    /// Plain free-chat classification.
    pub fn free_chat() -> Self {
        Self {
            task_type: TaskType::FreeChat,
            target_app: String::new(),
            target_object: String::new(),
            is_auto: false,
            specific_content: String::new(),
            degraded: false,
        }
    }

    /// Free-chat fallback used when classification retries are exhausted.
    pub fn degraded_free_chat() -> Self {
        Self {
            degraded: true,
            ..Self::free_chat()
        }
    }
}

/// Decision adapter errors.
#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error("classification service error: {0}")]
    Service(#[from] crate::model::ModelError),
    #[error("unparsable classification payload: {0}")]
    Payload(String),
}

/// Contract for the classification step: exactly one of the five task
/// types, with ambiguous conversational input resolving to free chat.
pub trait Classifier: Send + Sync {
    fn classify(
        &self,
        instruction: &Instruction,
        context: Option<&str>,
    ) -> impl std::future::Future<Output = Result<Classification, ClassifyError>> + Send;
}
