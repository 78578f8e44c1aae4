//! Plan mutation saga.
//!
//! A plan mutation tentatively writes the requested plan type before the
//! courses are validated and committed. Each tentative write pushes a
//! [`Compensation`]; if the mutation is aborted, compensations run in
//! reverse order. A failing compensation is logged and reported in the
//! [`AbortReport`] but never replaces the error that caused the abort.
//!
//! The caller holds the store's mutation lock for the student from before
//! the previous type is read until after the last compensation, so a
//! restore never lands on top of another mutation's committed plan.
//!
//! ```text
//! idle         -> type_applied
//! idle         -> validated     (type unchanged)
//! idle         -> rejected
//! type_applied -> validated
//! type_applied -> rolled_back
//! validated    -> committed
//! validated    -> rolled_back
//! ```

use std::fmt;

use tracing::{error, info, warn};

use crate::error::PlanError;
use crate::store::{PlanStore, StoreError};
use crate::{PlanType, StudentId};

/// State of a single plan mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
    Idle,
    TypeApplied,
    Validated,
    Committed,
    RolledBack,
    Rejected,
}

impl MutationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack | Self::Rejected)
    }
}

impl fmt::Display for MutationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::TypeApplied => "type_applied",
            Self::Validated => "validated",
            Self::Committed => "committed",
            Self::RolledBack => "rolled_back",
            Self::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// The plan mutation state graph.
pub struct MutationStateMachine;

impl MutationStateMachine {
    /// Check whether `from -> to` is an edge of the state graph.
    pub fn is_valid_transition(from: MutationState, to: MutationState) -> bool {
        use MutationState::*;
        matches!(
            (from, to),
            (Idle, TypeApplied)
                | (Idle, Validated)
                | (Idle, Rejected)
                | (TypeApplied, Validated)
                | (TypeApplied, RolledBack)
                | (Validated, Committed)
                | (Validated, RolledBack)
        )
    }
}

/// Undo action recorded by a tentative write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compensation {
    RestorePlanType { previous: Option<PlanType> },
}

/// A compensation that could not be applied.
#[derive(Debug)]
pub struct CompensationFailure {
    pub compensation: Compensation,
    pub error: StoreError,
}

/// What happened when a mutation was aborted.
#[derive(Debug)]
pub struct AbortReport {
    pub final_state: MutationState,
    pub compensated: usize,
    pub failures: Vec<CompensationFailure>,
}

/// One in-flight plan mutation for one student.
pub struct PlanMutation<'s> {
    store: &'s dyn PlanStore,
    student: StudentId,
    state: MutationState,
    compensations: Vec<Compensation>,
}

impl<'s> PlanMutation<'s> {
    pub fn new(store: &'s dyn PlanStore, student: StudentId) -> Self {
        Self {
            store,
            student,
            state: MutationState::Idle,
            compensations: Vec::new(),
        }
    }

    pub fn state(&self) -> MutationState {
        self.state
    }

    fn advance(&mut self, to: MutationState) -> Result<(), PlanError> {
        if !MutationStateMachine::is_valid_transition(self.state, to) {
            return Err(PlanError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// Tentatively record `requested` as the student's plan type.
    ///
    /// Does nothing when `previous` already equals `requested`. Returns
    /// whether a write happened. A failed write leaves the mutation idle.
    pub async fn apply_type(
        &mut self,
        previous: Option<PlanType>,
        requested: PlanType,
    ) -> Result<bool, PlanError> {
        if previous == Some(requested) {
            return Ok(false);
        }
        if self.state != MutationState::Idle {
            return Err(PlanError::InvalidTransition {
                from: self.state,
                to: MutationState::TypeApplied,
            });
        }

        self.store
            .set_plan_type(self.student, Some(requested))
            .await
            .map_err(|e| PlanError::from_store("apply plan type", e))?;
        self.compensations
            .push(Compensation::RestorePlanType { previous });
        self.advance(MutationState::TypeApplied)?;

        info!(
            student_id = self.student,
            plan_type = %requested,
            previous = ?previous,
            "plan type applied tentatively"
        );
        Ok(true)
    }

    /// The proposal passed validation.
    pub fn mark_validated(&mut self) -> Result<(), PlanError> {
        self.advance(MutationState::Validated)
    }

    /// The transition committed; compensations are discarded.
    pub fn mark_committed(mut self) -> Result<MutationState, PlanError> {
        self.advance(MutationState::Committed)?;
        self.compensations.clear();
        Ok(self.state)
    }

    /// Abandon the mutation, undoing every tentative write.
    ///
    /// An idle mutation with nothing to undo ends `rejected`; anything
    /// further along ends `rolled_back`.
    pub async fn abort(mut self) -> AbortReport {
        if self.state == MutationState::Idle && self.compensations.is_empty() {
            self.state = MutationState::Rejected;
            return AbortReport {
                final_state: self.state,
                compensated: 0,
                failures: Vec::new(),
            };
        }

        let mut compensated = 0;
        let mut failures = Vec::new();
        while let Some(compensation) = self.compensations.pop() {
            match self.compensate(compensation).await {
                Ok(()) => compensated += 1,
                Err(error) => {
                    error!(
                        student_id = self.student,
                        compensation = ?compensation,
                        error = %error,
                        "compensating action failed"
                    );
                    failures.push(CompensationFailure {
                        compensation,
                        error,
                    });
                }
            }
        }

        self.state = MutationState::RolledBack;
        AbortReport {
            final_state: self.state,
            compensated,
            failures,
        }
    }

    async fn compensate(&self, compensation: Compensation) -> Result<(), StoreError> {
        match compensation {
            Compensation::RestorePlanType { previous } => {
                warn!(
                    student_id = self.student,
                    restored = ?previous,
                    "restoring previous plan type"
                );
                self.store.set_plan_type(self.student, previous).await?;
            }
        }
        Ok(())
    }
}
