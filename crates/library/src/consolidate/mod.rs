//! Folding an existing folder tree into the library.
//!
//! Consolidation is two-phase: [`build_plan`] walks a tree and describes what
//! should happen to each file without touching anything, and [`execute_plan`]
//! carries the plan out. Plans serialize to JSON, so a plan can be reviewed
//! before running and an interrupted run resumed from where it stopped.
//! [`record_consolidated`] then catalogs the models that landed in the library.

mod catalog;
mod executor;
mod models;
mod planner;

pub use self::catalog::{RecordReport, record_consolidated};
pub use self::executor::{ConsolidationProgress, ExecutionReport, execute_plan};
pub use self::models::{ConsolidationItem, ConsolidationPlan, Operation, PlanSummary};
pub use self::planner::build_plan;
