//! Study-plan legality.
//!
//! [`PlanValidator::validate`] walks the proposed ids in the order given and
//! stops at the first violation. Ids after the failing one are not examined;
//! [`Rejected::examined`] says how far the walk got. For every id, in order:
//!
//! 1. The id appears for the first time in the proposal.
//! 2. The course exists.
//! 3. The course has a seat, not counting the student twice if their stored
//!    plan already holds it.
//! 4. Its prerequisite, if any, is in the proposal.
//! 5. None of its incompatible courses are in the proposal.
//!
//! Once every id passes, the CFU total must fall within the plan type's
//! bounds.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::PlanType;
use crate::catalog::{CatalogSnapshot, CourseId};

// ---------------------------------------------------------------------------
// CFU bounds
// ---------------------------------------------------------------------------

/// Inclusive CFU range a plan of a given type must fall within.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CfuBounds {
    pub min: u32,
    pub max: u32,
}

impl CfuBounds {
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, cfu: u32) -> bool {
        (self.min..=self.max).contains(&cfu)
    }

    /// A range with `min > max` accepts nothing.
    pub fn is_well_formed(&self) -> bool {
        self.min <= self.max
    }
}

impl fmt::Display for CfuBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.min, self.max)
    }
}

/// CFU bounds for every plan type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanRules {
    pub full_time: CfuBounds,
    pub part_time: CfuBounds,
}

impl PlanRules {
    pub fn bounds(&self, plan_type: PlanType) -> CfuBounds {
        match plan_type {
            PlanType::FullTime => self.full_time,
            PlanType::PartTime => self.part_time,
        }
    }
}

impl Default for PlanRules {
    fn default() -> Self {
        Self {
            full_time: CfuBounds::new(60, 80),
            part_time: CfuBounds::new(20, 40),
        }
    }
}

// ---------------------------------------------------------------------------
// Verdicts
// ---------------------------------------------------------------------------

/// Why a proposed plan is not legal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("the course {0} does not exist")]
    NotFound(CourseId),

    #[error("the course {0} is full")]
    Full(CourseId),

    #[error("the course {course} requires the course {prerequisite} in the study plan")]
    MissingPrerequisite {
        course: CourseId,
        prerequisite: CourseId,
    },

    #[error("the course {course} is incompatible with the course {other}")]
    Incompatible { course: CourseId, other: CourseId },

    #[error("the course {0} appears more than once")]
    DuplicateCourse(CourseId),

    #[error("illegal number of CFU: {total} (must be between {min} and {max})")]
    CfuOutOfRange { total: u32, min: u32, max: u32 },

    #[error("the proposed study plan contains no courses")]
    EmptyPlan,
}

impl Rejection {
    /// The course the rejection is about, when there is one.
    pub fn course_id(&self) -> Option<&CourseId> {
        match self {
            Self::NotFound(id) | Self::Full(id) | Self::DuplicateCourse(id) => Some(id),
            Self::MissingPrerequisite { course, .. } | Self::Incompatible { course, .. } => {
                Some(course)
            }
            Self::CfuOutOfRange { .. } | Self::EmptyPlan => None,
        }
    }
}

/// A legal plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accepted {
    pub cfu_total: u32,
}

/// An illegal plan: the first violation found and how many proposed ids were
/// examined before stopping.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct Rejected {
    pub reason: Rejection,
    pub examined: usize,
}

pub type Verdict = Result<Accepted, Rejected>;

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

/// Checks proposals against one catalog snapshot.
#[derive(Debug, Clone, Copy)]
pub struct PlanValidator<'a> {
    catalog: &'a CatalogSnapshot,
    rules: &'a PlanRules,
}

impl<'a> PlanValidator<'a> {
    pub fn new(catalog: &'a CatalogSnapshot, rules: &'a PlanRules) -> Self {
        Self { catalog, rules }
    }

    /// Decide whether `proposed` is a legal plan of type `plan_type` for a
    /// student whose stored plan is `current_plan`.
    pub fn validate(
        &self,
        proposed: &[CourseId],
        plan_type: PlanType,
        current_plan: &BTreeSet<CourseId>,
    ) -> Verdict {
        let members: HashSet<&CourseId> = proposed.iter().collect();
        let mut seen: HashSet<&CourseId> = HashSet::with_capacity(proposed.len());
        let mut cfu_total: u32 = 0;

        for (index, id) in proposed.iter().enumerate() {
            let reject = |reason| Rejected {
                reason,
                examined: index + 1,
            };

            if !seen.insert(id) {
                return Err(reject(Rejection::DuplicateCourse(id.clone())));
            }

            let Some(course) = self.catalog.get(id) else {
                return Err(reject(Rejection::NotFound(id.clone())));
            };

            if course.lacks_seat_for(current_plan.contains(id)) {
                return Err(reject(Rejection::Full(id.clone())));
            }

            if let Some(prerequisite) = &course.prerequisite {
                if !members.contains(prerequisite) {
                    return Err(reject(Rejection::MissingPrerequisite {
                        course: id.clone(),
                        prerequisite: prerequisite.clone(),
                    }));
                }
            }

            if let Some(other) = course
                .incompatibilities
                .iter()
                .find(|other| members.contains(other))
            {
                return Err(reject(Rejection::Incompatible {
                    course: id.clone(),
                    other: other.clone(),
                }));
            }

            cfu_total = cfu_total.saturating_add(course.cfu);
        }

        let bounds = self.rules.bounds(plan_type);
        if !bounds.contains(cfu_total) {
            return Err(Rejected {
                reason: Rejection::CfuOutOfRange {
                    total: cfu_total,
                    min: bounds.min,
                    max: bounds.max,
                },
                examined: proposed.len(),
            });
        }

        Ok(Accepted { cfu_total })
    }

    /// Total CFU of a set of course ids, skipping ids missing from the
    /// catalog.
    pub fn cfu_of<'i>(&self, ids: impl IntoIterator<Item = &'i CourseId>) -> u32 {
        ids.into_iter()
            .filter_map(|id| self.catalog.get(id))
            .fold(0u32, |total, course| total.saturating_add(course.cfu))
    }
}
