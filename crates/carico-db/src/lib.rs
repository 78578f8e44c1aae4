//! PostgreSQL persistence for the course catalog, students and their
//! stored study plans.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
