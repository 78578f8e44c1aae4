//! The course catalog as seen by the engine.
//!
//! [`CatalogView`] is the read side of the store. Each call reflects the
//! store at call time; the engine takes one [`CatalogSnapshot`] per request
//! and validates against that.

pub mod file;
pub mod import;

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::StudentId;
use crate::store::StoreError;

pub use file::{CatalogFileError, parse_catalog_toml};
pub use import::import_catalog;

// ---------------------------------------------------------------------------
// Course identifiers
// ---------------------------------------------------------------------------

/// Errors produced when parsing a [`CourseId`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CourseIdError {
    #[error("course id {value:?} must be exactly 7 characters long")]
    WrongLength { value: String },

    #[error("course id {value:?} contains invalid character {ch:?}")]
    InvalidCharacter { value: String, ch: char },
}

/// A catalog course code: exactly seven ASCII alphanumeric characters,
/// stored upper case (e.g. `CS10001`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CourseId(String);

impl CourseId {
    /// Length of every course code.
    pub const LEN: usize = 7;

    pub fn parse(value: &str) -> Result<Self, CourseIdError> {
        if let Some(ch) = value.chars().find(|c| !c.is_ascii_alphanumeric()) {
            return Err(CourseIdError::InvalidCharacter {
                value: value.to_owned(),
                ch,
            });
        }
        if value.len() != Self::LEN {
            return Err(CourseIdError::WrongLength {
                value: value.to_owned(),
            });
        }
        Ok(Self(value.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CourseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CourseId {
    type Err = CourseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CourseId {
    type Error = CourseIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CourseId> for String {
    fn from(id: CourseId) -> Self {
        id.0
    }
}

impl AsRef<str> for CourseId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Courses
// ---------------------------------------------------------------------------

/// A catalog course together with its live enrollment count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub id: CourseId,
    pub name: String,
    /// Credit weight (CFU), always positive.
    pub cfu: u32,
    /// Maximum enrollment, if the course is capped.
    pub capacity: Option<u32>,
    /// Number of students whose stored plan contains this course.
    pub signed_up: u32,
    pub prerequisite: Option<CourseId>,
    /// Courses that may not share a plan with this one. Read symmetrically.
    pub incompatibilities: BTreeSet<CourseId>,
}

impl Course {
    /// Whether one more student would exceed the capacity.
    ///
    /// `already_enrolled` is true when the student asking is already counted
    /// in `signed_up`, in which case they do not need a new seat.
    pub fn lacks_seat_for(&self, already_enrolled: bool) -> bool {
        match self.capacity {
            None => false,
            Some(capacity) => {
                let others = self.signed_up - u32::from(already_enrolled).min(self.signed_up);
                others + 1 > capacity
            }
        }
    }

    /// Whether every seat is taken.
    pub fn is_full(&self) -> bool {
        self.capacity.is_some_and(|capacity| self.signed_up >= capacity)
    }
}

/// An immutable per-request view of the catalog, keyed by course id.
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    courses: HashMap<CourseId, Course>,
}

impl CatalogSnapshot {
    pub fn new(courses: impl IntoIterator<Item = Course>) -> Self {
        Self {
            courses: courses
                .into_iter()
                .map(|course| (course.id.clone(), course))
                .collect(),
        }
    }

    pub fn get(&self, id: &CourseId) -> Option<&Course> {
        self.courses.get(id)
    }

    pub fn len(&self) -> usize {
        self.courses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.courses.is_empty()
    }
}

/// Read access to the catalog and to students' stored plans.
#[async_trait]
pub trait CatalogView: Send + Sync {
    /// Fetch one course, `None` if the catalog has no such id.
    async fn get_course(&self, id: &CourseId) -> Result<Option<Course>, StoreError>;

    /// Every course in the catalog, ordered by name.
    async fn list_courses(&self) -> Result<Vec<Course>, StoreError>;

    /// The course ids in the student's stored plan.
    async fn get_plan(&self, student: StudentId) -> Result<BTreeSet<CourseId>, StoreError>;

    /// Take a snapshot of the whole catalog.
    async fn snapshot(&self) -> Result<CatalogSnapshot, StoreError> {
        Ok(CatalogSnapshot::new(self.list_courses().await?))
    }
}
