//! Assignment model and hierarchical resolution

pub mod resolver;
pub mod types;

pub use resolver::{AssignmentResolver, ResolvedAssignment};
pub use types::{
    Assignment, Condition, ConditionContext, ConditionOperator, ContextValue, HierarchyLevel,
    HierarchyNode,
};
