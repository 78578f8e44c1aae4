//! Study-plan legality checks and atomic plan transitions.
//!
//! ```text
//! PlanService::propose_plan
//!     |
//!     v
//! PlanMutation (saga) --apply type--> PlanStore::set_plan_type
//!     |
//!     v
//! PlanValidator::validate(snapshot of CatalogView, stored plan)
//!     |
//!     v
//! transition::replace_plan --> PlanWriter { lock, erase, insert.., commit }
//!     |
//!     +-- on any failure: compensations run in reverse (restore type)
//! ```

pub mod catalog;
pub mod error;
pub mod saga;
pub mod service;
pub mod store;
pub mod transition;
pub mod validator;

pub use carico_db::models::{PlanType, StudentId};
pub use error::PlanError;
