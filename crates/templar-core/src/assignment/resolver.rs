//! Hierarchical assignment resolution
//!
//! Given a hierarchy ancestor chain and the assignments attached to its
//! nodes, selects the template that applies. Highest priority wins; ties are
//! broken by more-specific hierarchy level, then by template name, so
//! resolution is total and deterministic — an "ambiguous assignment" outcome
//! cannot occur by construction.

use tracing::debug;

use crate::assignment::types::{Assignment, ConditionContext, HierarchyNode};

/// The winning assignment for a hierarchy node
#[derive(Debug, Clone)]
pub struct ResolvedAssignment {
    /// Name of the selected template
    pub template_name: String,
    /// The assignment that won
    pub assignment: Assignment,
}

/// Stateless assignment resolver
#[derive(Debug, Clone, Copy, Default)]
pub struct AssignmentResolver;

impl AssignmentResolver {
    /// Create a new resolver
    pub fn new() -> Self {
        Self
    }

    /// Resolve the applicable template for a hierarchy chain
    ///
    /// `chain` is the node's ancestor chain (any order; levels carry their
    /// own specificity). Candidates are active assignments targeting a chain
    /// node whose conditions all hold against `context`. Returns `None` when
    /// nothing applies; falling back to a default template is the caller's
    /// policy, not the resolver's.
    pub fn resolve(
        &self,
        chain: &[HierarchyNode],
        assignments: &[Assignment],
        context: &ConditionContext,
    ) -> Option<ResolvedAssignment> {
        let mut best: Option<&Assignment> = None;

        for assignment in assignments {
            if !assignment.is_active || !assignment.applies(context) {
                continue;
            }
            let on_chain = chain.iter().any(|node| {
                node.level == assignment.hierarchy_type && node.id == assignment.hierarchy_id
            });
            if !on_chain {
                continue;
            }
            best = match best {
                None => Some(assignment),
                Some(current) => {
                    if Self::beats(assignment, current) {
                        Some(assignment)
                    } else {
                        Some(current)
                    }
                }
            };
        }

        best.map(|assignment| {
            debug!(
                template = %assignment.template_name,
                level = %assignment.hierarchy_type,
                priority = assignment.priority,
                "Resolved template assignment"
            );
            ResolvedAssignment {
                template_name: assignment.template_name.clone(),
                assignment: assignment.clone(),
            }
        })
    }

    /// Deterministic total order: priority, then specificity, then name
    fn beats(challenger: &Assignment, incumbent: &Assignment) -> bool {
        let challenger_key = (
            challenger.priority,
            challenger.hierarchy_type.specificity(),
        );
        let incumbent_key = (incumbent.priority, incumbent.hierarchy_type.specificity());
        match challenger_key.cmp(&incumbent_key) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => challenger.template_name < incumbent.template_name,
        }
    }
}
