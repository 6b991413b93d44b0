//! Query plan IR, plan DSL, and the executor.

pub mod brute_force;
pub mod dsl;
pub mod executor;
pub mod placeholder;
pub mod plan;
pub mod reduce;
pub mod retrieve;
pub mod sub_result;

pub use executor::search;
pub use placeholder::{PlaceholderGroup, QueryVectors};
pub use plan::{CompareOp, Expr, Plan, ScalarValue, VectorQueryInfo};
pub use reduce::SearchResult;
pub use retrieve::{retrieve, RetrievePlan, RetrieveResult};
pub use sub_result::SubQueryResult;
