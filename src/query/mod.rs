pub mod executor;
pub mod planner;
pub mod predicate;

pub use executor::QueryExecutor;
pub use planner::{ExecutionPlan, PlanCache, QueryPlanner};
pub use predicate::Predicate;
