pub mod aggregate;
pub mod analyzer;
pub mod consumer;
pub mod dispatcher;
pub mod gate;

pub use aggregate::classify;
pub use analyzer::{AnalyzeOutcome, Analyzer};
pub use consumer::{run_consumer, ConsumeOptions, ConsumeStats};
pub use dispatcher::{BatchOptions, BatchSummary, DispatchMode, Dispatcher, ItemFailure};

use std::fmt;

/// Failure taxonomy for one (security, date) item. Failures are local to the
/// item and never abort siblings in a batch; the kind tells callers which
/// collaborator misbehaved.
#[derive(Debug, Clone)]
pub enum PipelineError {
    /// News fetch failed (network, rate limit, malformed feed).
    SourceUnavailable { security_id: String, detail: String },
    /// Model call failed or its output failed schema/range validation.
    ModelFailure { security_id: String, detail: String },
    /// Durable result or tracking store read/write failed.
    StoreFailure { security_id: String, detail: String },
    /// The existence check itself errored; distinct from "work is needed".
    IdempotencyCheckFailure { security_id: String, detail: String },
}

impl PipelineError {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::SourceUnavailable { .. } => "SourceUnavailable",
            PipelineError::ModelFailure { .. } => "ModelFailure",
            PipelineError::StoreFailure { .. } => "StoreFailure",
            PipelineError::IdempotencyCheckFailure { .. } => "IdempotencyCheckFailure",
        }
    }

    pub fn security_id(&self) -> &str {
        match self {
            PipelineError::SourceUnavailable { security_id, .. }
            | PipelineError::ModelFailure { security_id, .. }
            | PipelineError::StoreFailure { security_id, .. }
            | PipelineError::IdempotencyCheckFailure { security_id, .. } => security_id,
        }
    }

    fn detail(&self) -> &str {
        match self {
            PipelineError::SourceUnavailable { detail, .. }
            | PipelineError::ModelFailure { detail, .. }
            | PipelineError::StoreFailure { detail, .. }
            | PipelineError::IdempotencyCheckFailure { detail, .. } => detail,
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} for {}: {}", self.kind(), self.security_id(), self.detail())
    }
}

impl std::error::Error for PipelineError {}
