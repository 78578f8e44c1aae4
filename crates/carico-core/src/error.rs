//! Errors surfaced by [`crate::service::PlanService`].

use thiserror::Error;

use crate::StudentId;
use crate::saga::MutationState;
use crate::store::StoreError;
use crate::transition::{TransitionError, TransitionStep};
use crate::validator::{Rejected, Rejection};

/// Everything a plan operation can fail with.
///
/// [`PlanError::Rejected`] is a deterministic verdict on the caller's input
/// and must not be retried. [`PlanError::Persistence`] is a store failure;
/// the whole request may be retried.
#[derive(Debug, Error)]
pub enum PlanError {
    /// `examined` counts the proposed courses looked at before the verdict,
    /// the offending one included. Zero when no single course is to blame.
    #[error("the proposed study plan is not legal: {reason}")]
    Rejected { reason: Rejection, examined: usize },

    #[error("student {0} not found")]
    StudentNotFound(StudentId),

    #[error("database error during {operation}")]
    Persistence {
        operation: String,
        #[source]
        source: StoreError,
    },

    #[error("invalid plan mutation transition: {from} -> {to}")]
    InvalidTransition {
        from: MutationState,
        to: MutationState,
    },
}

impl PlanError {
    /// Classify a store failure that happened during `operation`.
    pub fn from_store(operation: impl Into<String>, err: StoreError) -> Self {
        match err {
            StoreError::StudentNotFound(id) => Self::StudentNotFound(id),
            StoreError::CourseFull(course) => Rejection::Full(course).into(),
            StoreError::UnknownCourse(course) => Rejection::NotFound(course).into(),
            source => Self::Persistence {
                operation: operation.into(),
                source,
            },
        }
    }

    /// The validation verdict, when this is a rejection.
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Rejected { reason, .. } => Some(reason),
            _ => None,
        }
    }

    /// How far into the proposal the rejection happened.
    pub fn examined(&self) -> Option<usize> {
        match self {
            Self::Rejected { examined, .. } => Some(*examined),
            _ => None,
        }
    }

    /// Whether repeating the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence { .. })
    }
}

impl From<Rejection> for PlanError {
    fn from(reason: Rejection) -> Self {
        Self::Rejected {
            reason,
            examined: 0,
        }
    }
}

impl From<Rejected> for PlanError {
    fn from(rejected: Rejected) -> Self {
        Self::Rejected {
            reason: rejected.reason,
            examined: rejected.examined,
        }
    }
}

impl From<TransitionError> for PlanError {
    fn from(err: TransitionError) -> Self {
        let position = match &err.step {
            TransitionStep::Insert { index, .. } => index + 1,
            _ => 0,
        };
        match Self::from_store(format!("plan transition ({})", err.step), err.source) {
            Self::Rejected { reason, .. } => Self::Rejected {
                reason,
                examined: position,
            },
            other => other,
        }
    }
}
