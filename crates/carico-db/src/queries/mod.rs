//! Query functions, one module per table group.

pub mod courses;
pub mod students;
pub mod study_plan;
