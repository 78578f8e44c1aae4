use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Primary key of the `students` table.
pub type StudentId = i64;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Kind of study plan a student has chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum PlanType {
    FullTime,
    PartTime,
}

impl PlanType {
    /// Every plan type, in display order.
    pub const ALL: [PlanType; 2] = [PlanType::FullTime, PlanType::PartTime];
}

impl fmt::Display for PlanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::FullTime => "full-time",
            Self::PartTime => "part-time",
        };
        f.write_str(s)
    }
}

impl FromStr for PlanType {
    type Err = PlanTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full-time" => Ok(Self::FullTime),
            "part-time" => Ok(Self::PartTime),
            other => Err(PlanTypeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`PlanType`] string.
#[derive(Debug, Clone)]
pub struct PlanTypeParseError(pub String);

impl fmt::Display for PlanTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid plan type: {:?} (expected full-time or part-time)",
            self.0
        )
    }
}

impl std::error::Error for PlanTypeParseError {}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A student and the type of the plan they hold, if any.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Student {
    pub id: StudentId,
    pub email: String,
    pub name: String,
    pub surname: String,
    pub plan_type: Option<PlanType>,
    pub created_at: DateTime<Utc>,
}

/// A course as read from the catalog, with its derived enrollment count and
/// incompatibilities gathered from both directions of the relation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CourseRow {
    pub id: String,
    pub name: String,
    pub cfu: i32,
    pub max_students: Option<i32>,
    pub signed_up: i64,
    pub preparatory: Option<String>,
    pub incompatibilities: Vec<String>,
}

/// Input for inserting a catalog course.
#[derive(Debug, Clone)]
pub struct NewCourse<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub cfu: i32,
    pub max_students: Option<i32>,
    pub preparatory: Option<&'a str>,
}
