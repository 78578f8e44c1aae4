//! Catalog TOML parser with validation.
//!
//! Parses a catalog file of `[[courses]]` tables into [`Course`] values and
//! validates:
//! - Course ids are well formed and unique.
//! - `cfu` and `max_students` are positive.
//! - `preparatory` and `incompatible_with` reference courses in the file.
//! - No course references itself and prerequisite chains are acyclic.
//!
//! Incompatibilities are made symmetric: listing a pair on either side is
//! enough.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::Deserialize;
use thiserror::Error;

use super::{Course, CourseId, CourseIdError};

/// Errors that can occur while parsing a catalog file.
#[derive(Debug, Error)]
pub enum CatalogFileError {
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid course id in catalog: {0}")]
    InvalidId(#[from] CourseIdError),

    #[error("duplicate course id: {0}")]
    DuplicateCourse(CourseId),

    #[error("course {0} must have a positive number of CFU")]
    ZeroCfu(CourseId),

    #[error("course {0} has max_students = 0")]
    ZeroCapacity(CourseId),

    #[error("course {course} references unknown course {reference}")]
    UnknownReference { course: CourseId, reference: CourseId },

    #[error("course {0} references itself")]
    SelfReference(CourseId),

    #[error("prerequisite cycle detected involving courses: {0}")]
    PrerequisiteCycle(String),

    #[error("catalog must contain at least one course")]
    NoCourses,
}

#[derive(Debug, Deserialize)]
struct CatalogToml {
    #[serde(default)]
    courses: Vec<CourseToml>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CourseToml {
    id: String,
    name: String,
    cfu: u32,
    #[serde(default)]
    max_students: Option<u32>,
    #[serde(default)]
    preparatory: Option<String>,
    #[serde(default)]
    incompatible_with: Vec<String>,
}

/// Parse and validate a catalog file.
///
/// Returned courses have `signed_up = 0` and are ordered by id.
pub fn parse_catalog_toml(content: &str) -> Result<Vec<Course>, CatalogFileError> {
    let raw: CatalogToml = toml::from_str(content)?;
    if raw.courses.is_empty() {
        return Err(CatalogFileError::NoCourses);
    }

    let mut courses: BTreeMap<CourseId, Course> = BTreeMap::new();
    for entry in raw.courses {
        let id = CourseId::parse(&entry.id)?;
        if courses.contains_key(&id) {
            return Err(CatalogFileError::DuplicateCourse(id));
        }
        if entry.cfu == 0 {
            return Err(CatalogFileError::ZeroCfu(id));
        }
        if entry.max_students == Some(0) {
            return Err(CatalogFileError::ZeroCapacity(id));
        }

        let prerequisite = entry
            .preparatory
            .as_deref()
            .map(CourseId::parse)
            .transpose()?;
        let incompatibilities = entry
            .incompatible_with
            .iter()
            .map(|other| CourseId::parse(other))
            .collect::<Result<BTreeSet<_>, _>>()?;

        if prerequisite.as_ref() == Some(&id) || incompatibilities.contains(&id) {
            return Err(CatalogFileError::SelfReference(id));
        }

        courses.insert(
            id.clone(),
            Course {
                id,
                name: entry.name,
                cfu: entry.cfu,
                capacity: entry.max_students,
                signed_up: 0,
                prerequisite,
                incompatibilities,
            },
        );
    }

    // Every reference must resolve inside the file.
    for course in courses.values() {
        for reference in course.prerequisite.iter().chain(&course.incompatibilities) {
            if !courses.contains_key(reference) {
                return Err(CatalogFileError::UnknownReference {
                    course: course.id.clone(),
                    reference: reference.clone(),
                });
            }
        }
    }

    detect_prerequisite_cycle(&courses)?;

    // Mirror every incompatibility onto its partner.
    let pairs: Vec<(CourseId, CourseId)> = courses
        .values()
        .flat_map(|c| c.incompatibilities.iter().map(|o| (o.clone(), c.id.clone())))
        .collect();
    for (course, other) in pairs {
        if let Some(entry) = courses.get_mut(&course) {
            entry.incompatibilities.insert(other);
        }
    }

    Ok(courses.into_values().collect())
}

/// Each course has at most one prerequisite, so following the chain from
/// every course either ends or revisits a course already on the chain.
fn detect_prerequisite_cycle(courses: &BTreeMap<CourseId, Course>) -> Result<(), CatalogFileError> {
    let mut cleared: HashSet<&CourseId> = HashSet::new();

    for start in courses.keys() {
        let mut chain: Vec<&CourseId> = Vec::new();
        let mut current = Some(start);

        while let Some(id) = current {
            if cleared.contains(id) {
                break;
            }
            if let Some(pos) = chain.iter().position(|seen| *seen == id) {
                let names: Vec<&str> = chain[pos..].iter().map(|c| c.as_str()).collect();
                return Err(CatalogFileError::PrerequisiteCycle(names.join(", ")));
            }
            chain.push(id);
            current = courses.get(id).and_then(|c| c.prerequisite.as_ref());
        }

        cleared.extend(chain);
    }

    Ok(())
}
