//! Assignment data model
//!
//! An assignment binds a template to a node in the five-level
//! project → milestone → phase → task → subtask hierarchy, with a priority
//! and optional ANDed conditions gating applicability.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Hierarchy levels, most general first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HierarchyLevel {
    Project,
    Milestone,
    Phase,
    Task,
    Subtask,
}

impl HierarchyLevel {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Milestone => "milestone",
            Self::Phase => "phase",
            Self::Task => "task",
            Self::Subtask => "subtask",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "project" => Some(Self::Project),
            "milestone" => Some(Self::Milestone),
            "phase" => Some(Self::Phase),
            "task" => Some(Self::Task),
            "subtask" => Some(Self::Subtask),
            _ => None,
        }
    }

    /// Specificity rank: subtask > task > phase > milestone > project
    ///
    /// Breaks priority ties during resolution.
    pub fn specificity(&self) -> u8 {
        match self {
            Self::Project => 0,
            Self::Milestone => 1,
            Self::Phase => 2,
            Self::Task => 3,
            Self::Subtask => 4,
        }
    }

    /// All levels, most general first
    pub fn all() -> &'static [HierarchyLevel] {
        &[
            Self::Project,
            Self::Milestone,
            Self::Phase,
            Self::Task,
            Self::Subtask,
        ]
    }
}

impl std::fmt::Display for HierarchyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One node in a hierarchy ancestor chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyNode {
    /// Level of this node
    pub level: HierarchyLevel,
    /// Opaque identifier of the node
    pub id: String,
}

impl HierarchyNode {
    /// Create a new node
    pub fn new(level: HierarchyLevel, id: impl Into<String>) -> Self {
        Self {
            level,
            id: id.into(),
        }
    }
}

/// A typed scalar value usable in condition contexts
///
/// Context data crosses the boundary as a closed string→scalar map; raw JSON
/// blobs never travel through the resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextValue {
    String(String),
    Number(f64),
    Bool(bool),
}

impl ContextValue {
    /// Numeric view, when the value is a number
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// String rendering used by string operators
    pub fn render(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Number(n) => n.to_string(),
            Self::Bool(b) => b.to_string(),
        }
    }
}

impl From<&str> for ContextValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<f64> for ContextValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for ContextValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Evaluation context for conditional assignments
pub type ConditionContext = BTreeMap<String, ContextValue>;

/// Condition comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    Contains,
    Matches,
    GreaterThan,
    LessThan,
}

impl ConditionOperator {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::Contains => "contains",
            Self::Matches => "matches",
            Self::GreaterThan => "greater_than",
            Self::LessThan => "less_than",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "equals" => Some(Self::Equals),
            "contains" => Some(Self::Contains),
            "matches" => Some(Self::Matches),
            "greater_than" => Some(Self::GreaterThan),
            "less_than" => Some(Self::LessThan),
            _ => None,
        }
    }
}

/// A single `{field, operator, value}` condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Context field the condition reads
    pub field: String,
    /// Comparison operator
    pub operator: ConditionOperator,
    /// Expected value
    pub value: ContextValue,
}

impl Condition {
    /// Create a new condition
    pub fn new(
        field: impl Into<String>,
        operator: ConditionOperator,
        value: impl Into<ContextValue>,
    ) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    /// Evaluate against a context; a missing field never satisfies
    pub fn evaluate(&self, context: &ConditionContext) -> bool {
        let Some(actual) = context.get(&self.field) else {
            return false;
        };
        match self.operator {
            ConditionOperator::Equals => actual == &self.value,
            ConditionOperator::Contains => actual.render().contains(&self.value.render()),
            ConditionOperator::Matches => wildcard_match(&self.value.render(), &actual.render()),
            ConditionOperator::GreaterThan => match (actual.as_number(), self.value.as_number()) {
                (Some(a), Some(b)) => a > b,
                _ => false,
            },
            ConditionOperator::LessThan => match (actual.as_number(), self.value.as_number()) {
                (Some(a), Some(b)) => a < b,
                _ => false,
            },
        }
    }
}

/// Match `text` against a pattern where `*` matches any run of characters
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        // No wildcard: exact match
        return pattern == text;
    }

    let first = parts[0];
    let last = parts[parts.len() - 1];
    if !text.starts_with(first) {
        return false;
    }

    let mut rest = &text[first.len()..];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(at) => rest = &rest[at + part.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}

/// A binding of a template to a hierarchy node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    /// Unique assignment identifier
    pub id: String,
    /// Level of the target node
    pub hierarchy_type: HierarchyLevel,
    /// Identifier of the target node
    pub hierarchy_id: String,
    /// Name of the bound template (weak reference, many-to-one)
    pub template_name: String,
    /// Higher priority wins on conflict
    pub priority: i64,
    /// ANDed conditions; empty means always applicable
    pub conditional_logic: Vec<Condition>,
    /// Inactive assignments are ignored by resolution
    pub is_active: bool,
    /// When the assignment was created
    pub created_at: DateTime<Utc>,
    /// When the assignment was last updated
    pub updated_at: DateTime<Utc>,
}

impl Assignment {
    /// Create a new unconditional assignment
    pub fn new(
        hierarchy_type: HierarchyLevel,
        hierarchy_id: impl Into<String>,
        template_name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            hierarchy_type,
            hierarchy_id: hierarchy_id.into(),
            template_name: template_name.into(),
            priority: 0,
            conditional_logic: Vec::new(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Add gating conditions (ANDed)
    pub fn with_conditions(mut self, conditions: Vec<Condition>) -> Self {
        self.conditional_logic = conditions;
        self
    }

    /// Whether all conditions hold against the context
    pub fn applies(&self, context: &ConditionContext) -> bool {
        self.conditional_logic.iter().all(|c| c.evaluate(context))
    }
}
