//! Error taxonomy shared by every coach operation.

use thiserror::Error;

use crate::goal::GoalScores;

/// Which collaborator draft failed structural validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftKind {
    Plan,
    Quests,
}

impl std::fmt::Display for DraftKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DraftKind::Plan => write!(f, "plan"),
            DraftKind::Quests => write!(f, "quest"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CoachError {
    /// The goal failed scoring. The caller resubmits.
    #[error("goal rejected: {}", suggestions.join("; "))]
    ValidationRejected {
        scores: Option<GoalScores>,
        suggestions: Vec<String>,
        refined_goal: Option<String>,
    },

    /// A collaborator draft broke a structural invariant. Never auto-repaired.
    #[error("{kind} draft rejected: {}", violations.join("; "))]
    StructuralDraft {
        kind: DraftKind,
        violations: Vec<String>,
    },

    #[error("regeneration cap reached ({used}/{cap}) for today")]
    CapacityExceeded { cap: u32, used: u32 },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Tolerated as an idempotent no-op by retrying callers.
    #[error("{entity} {id} is already {status}")]
    AlreadyTerminal {
        entity: &'static str,
        id: String,
        status: String,
    },

    #[error("invalid transition for {id}: {from} -> {to}")]
    InvalidTransition { id: String, from: String, to: String },

    #[error("collaborator unavailable: {0}")]
    CollaboratorUnavailable(String),

    #[error("persistence error: {0}")]
    Persistence(String),
}

impl CoachError {
    pub fn structural(kind: DraftKind, violations: Vec<String>) -> Self {
        CoachError::StructuralDraft { kind, violations }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        CoachError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Whether the same request can succeed later without a code or data fix.
    pub fn is_recoverable(&self) -> bool {
        match self {
            CoachError::ValidationRejected { .. }
            | CoachError::StructuralDraft { .. }
            | CoachError::CapacityExceeded { .. }
            | CoachError::AlreadyTerminal { .. }
            | CoachError::CollaboratorUnavailable(_) => true,
            CoachError::NotFound { .. }
            | CoachError::InvalidTransition { .. }
            | CoachError::Persistence(_) => false,
        }
    }

    /// Short machine-readable label, used in batch error reports.
    pub fn code(&self) -> &'static str {
        match self {
            CoachError::ValidationRejected { .. } => "validation_rejected",
            CoachError::StructuralDraft { .. } => "structural_draft",
            CoachError::CapacityExceeded { .. } => "capacity_exceeded",
            CoachError::NotFound { .. } => "not_found",
            CoachError::AlreadyTerminal { .. } => "already_terminal",
            CoachError::InvalidTransition { .. } => "invalid_transition",
            CoachError::CollaboratorUnavailable(_) => "collaborator_unavailable",
            CoachError::Persistence(_) => "persistence",
        }
    }
}

pub type CoachResult<T> = std::result::Result<T, CoachError>;
