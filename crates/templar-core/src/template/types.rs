//! Component and template data models
//!
//! Components are named, reusable instruction fragments addressed by a
//! type-tagged name (`action::x`, `group::y`, ...). Templates are documents
//! whose body carries `{{type::name}}` placeholders plus one `{{USER_TASK}}`
//! marker.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The four known component types
///
/// A component's declared type and the `type::` prefix of its name must
/// agree; `Component::new` derives the type from the name so the two can
/// never drift apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentType {
    Action,
    Group,
    Sequence,
    Validation,
}

impl ComponentType {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Action => "action",
            Self::Group => "group",
            Self::Sequence => "sequence",
            Self::Validation => "validation",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "action" => Some(Self::Action),
            "group" => Some(Self::Group),
            "sequence" => Some(Self::Sequence),
            "validation" => Some(Self::Validation),
            _ => None,
        }
    }

    /// Get all component types
    pub fn all() -> &'static [ComponentType] {
        &[Self::Action, Self::Group, Self::Sequence, Self::Validation]
    }
}

impl std::fmt::Display for ComponentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Component priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Parse from string, defaulting to Medium for unknown values
    pub fn parse(s: &str) -> Self {
        match s {
            "low" => Self::Low,
            "high" => Self::High,
            "critical" => Self::Critical,
            _ => Self::Medium,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Check that an identifier matches `[a-z0-9_]+`
pub fn is_valid_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Split a `{type}::{identifier}` component name into its parts
///
/// Returns `None` when the name does not match the pattern or the type is
/// not one of the four known types. Splits on the *first* `::`.
pub fn split_component_name(name: &str) -> Option<(ComponentType, &str)> {
    let (prefix, identifier) = name.split_once("::")?;
    let component_type = ComponentType::parse(prefix)?;
    if !is_valid_identifier(identifier) {
        return None;
    }
    Some((component_type, identifier))
}

/// Check whether a string is a well-formed component name
pub fn validate_name(name: &str) -> bool {
    split_component_name(name).is_some()
}

/// A named, reusable instruction fragment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Component {
    /// Unique `{type}::{identifier}` name
    pub name: String,
    /// Component type, always consistent with the name prefix
    pub component_type: ComponentType,
    /// Literal text substituted at expansion time
    pub instruction_text: String,
    /// Tools required when this component is part of a template
    pub required_tools: BTreeSet<String>,
    /// Estimated duration in minutes (>= 1)
    pub estimated_duration: u32,
    /// Priority for operator triage
    pub priority: Priority,
    /// Inactive components are invisible to resolution
    pub is_active: bool,
    /// When the component was created
    pub created_at: DateTime<Utc>,
    /// When the component was last updated
    pub updated_at: DateTime<Utc>,
}

impl Component {
    /// Create a new component, deriving the type from the name prefix
    ///
    /// Fails when the name does not match `{type}::{identifier}` or the
    /// instruction text is empty.
    pub fn new(name: impl Into<String>, instruction_text: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let instruction_text = instruction_text.into();

        let (component_type, _) = split_component_name(&name)
            .ok_or_else(|| Error::InvalidComponentName(name.clone()))?;
        if instruction_text.is_empty() {
            return Err(Error::InvalidInput(format!(
                "Component '{}' has empty instruction text",
                name
            )));
        }

        let now = Utc::now();
        Ok(Self {
            name,
            component_type,
            instruction_text,
            required_tools: BTreeSet::new(),
            estimated_duration: 1,
            priority: Priority::Medium,
            is_active: true,
            created_at: now,
            updated_at: now,
        })
    }

    /// Add required tools
    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    /// Set the estimated duration in minutes (clamped to at least 1)
    pub fn with_duration(mut self, minutes: u32) -> Self {
        self.estimated_duration = minutes.max(1);
        self
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Mark the component inactive
    pub fn deactivated(mut self) -> Self {
        self.is_active = false;
        self
    }
}

/// A named document containing placeholder syntax
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    /// Unique template name
    pub name: String,
    /// Body text with `{{type::name}}` placeholders and one `{{USER_TASK}}` marker
    pub template_content: String,
    /// Declared 1-based placeholder ordinal of the USER_TASK marker
    ///
    /// Used only as a non-strict fallback when the marker is absent or
    /// duplicated; the marker in the body is authoritative otherwise.
    pub user_task_position: u32,
    /// Denormalized union of referenced components' tools (recomputable)
    pub required_tools: BTreeSet<String>,
    /// Denormalized sum of referenced components' durations (recomputable)
    pub estimated_duration: u32,
    /// Inactive templates are excluded from assignment resolution
    pub is_active: bool,
    /// Version, bumped on content changes
    pub version: u32,
    /// When the template was created
    pub created_at: DateTime<Utc>,
    /// When the template was last updated
    pub updated_at: DateTime<Utc>,
}

impl Template {
    /// Create a new template with the given name and body
    pub fn new(name: impl Into<String>, template_content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            template_content: template_content.into(),
            user_task_position: 1,
            required_tools: BTreeSet::new(),
            estimated_duration: 0,
            is_active: true,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the declared USER_TASK placeholder ordinal
    pub fn with_user_task_position(mut self, position: u32) -> Self {
        self.user_task_position = position.max(1);
        self
    }
}

/// Read-path lookup over components
///
/// Implementations must hide inactive components: a deactivated component is
/// indistinguishable from a nonexistent one.
pub trait ComponentSource {
    /// Exact-match lookup by full `{type}::{identifier}` name
    fn lookup(&self, name: &str) -> Option<&Component>;
}

/// Immutable in-memory component snapshot
///
/// The expansion engine performs no I/O; callers pre-resolve every component
/// a template might reference into a snapshot and hand it to `expand()`.
#[derive(Debug, Clone, Default)]
pub struct ComponentSnapshot {
    components: HashMap<String, Component>,
}

impl ComponentSnapshot {
    /// Create an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a component, keyed by its name
    pub fn insert(&mut self, component: Component) {
        self.components.insert(component.name.clone(), component);
    }

    /// Number of components held (active or not)
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Whether the snapshot is empty
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

impl FromIterator<Component> for ComponentSnapshot {
    fn from_iter<I: IntoIterator<Item = Component>>(iter: I) -> Self {
        let mut snapshot = Self::new();
        for component in iter {
            snapshot.insert(component);
        }
        snapshot
    }
}

impl ComponentSource for ComponentSnapshot {
    fn lookup(&self, name: &str) -> Option<&Component> {
        self.components.get(name).filter(|c| c.is_active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_name_validation() {
        assert!(validate_name("action::run_tests"));
        assert!(validate_name("group::setup_env"));
        assert!(validate_name("sequence::deploy_2"));
        assert!(validate_name("validation::lint"));

        assert!(!validate_name("action::"));
        assert!(!validate_name("::run_tests"));
        assert!(!validate_name("task::run_tests"));
        assert!(!validate_name("action:run_tests"));
        assert!(!validate_name("action::Run-Tests"));
        assert!(!validate_name("USER_TASK"));
    }

    #[test]
    fn test_split_on_first_double_colon() {
        // The identifier after the first :: must still match the pattern
        assert!(split_component_name("group::a::b").is_none());
        let (ty, ident) = split_component_name("group::a_b").unwrap();
        assert_eq!(ty, ComponentType::Group);
        assert_eq!(ident, "a_b");
    }

    #[test]
    fn test_component_type_derived_from_name() {
        let component = Component::new("sequence::deploy", "Deploy it").unwrap();
        assert_eq!(component.component_type, ComponentType::Sequence);
        assert!(component.is_active);
        assert_eq!(component.estimated_duration, 1);
    }

    #[test]
    fn test_component_rejects_bad_name_and_empty_text() {
        assert!(matches!(
            Component::new("nope::x", "text"),
            Err(Error::InvalidComponentName(_))
        ));
        assert!(matches!(
            Component::new("action::x", ""),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_component_builders() {
        let component = Component::new("action::lint", "Run the linter")
            .unwrap()
            .with_tools(["shell", "read_file"])
            .with_duration(0)
            .with_priority(Priority::High);

        assert_eq!(component.estimated_duration, 1); // clamped
        assert_eq!(component.required_tools.len(), 2);
        assert_eq!(component.priority, Priority::High);
    }

    #[test]
    fn test_snapshot_hides_inactive_components() {
        let active = Component::new("action::a", "A").unwrap();
        let inactive = Component::new("action::b", "B").unwrap().deactivated();

        let snapshot: ComponentSnapshot = [active, inactive].into_iter().collect();

        assert!(snapshot.lookup("action::a").is_some());
        assert!(snapshot.lookup("action::b").is_none());
        assert!(snapshot.lookup("action::missing").is_none());
        assert_eq!(snapshot.len(), 2);
    }

    #[test]
    fn test_priority_round_trip() {
        assert_eq!(Priority::parse("critical"), Priority::Critical);
        assert_eq!(Priority::parse("unknown"), Priority::Medium);
        assert!(Priority::Low < Priority::Critical);
    }

    #[test]
    fn test_template_defaults() {
        let template = Template::new("default_workflow", "{{USER_TASK}}");
        assert_eq!(template.user_task_position, 1);
        assert_eq!(template.version, 1);
        assert!(template.is_active);
    }
}
