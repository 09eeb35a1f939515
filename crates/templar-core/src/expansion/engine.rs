//! Template expansion engine
//!
//! Resolves all placeholders in a template against a component snapshot and
//! a user task string, producing final instructions plus cost roll-ups and
//! validation diagnostics. The engine is stateless and performs no I/O:
//! every component a template might reference is pre-resolved by the caller
//! into a `ComponentSource` snapshot, so `expand()` is a pure, bounded,
//! in-memory operation safe to run concurrently from any task.

use std::collections::{BTreeSet, HashSet};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::expansion::report::ValidationReporter;
use crate::template::parser::{self, Token};
use crate::template::types::{ComponentSource, Template};

/// Options controlling one expansion
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpandOptions {
    /// In strict mode, missing components and a wrong USER_TASK marker count
    /// abort the expansion instead of degrading to warnings.
    pub strict: bool,
    /// Treat any recorded warning as a validation failure. The result is
    /// still produced; only `validation_passed` flips.
    pub fail_on_warnings: bool,
}

impl ExpandOptions {
    /// Strict-mode options
    pub fn strict() -> Self {
        Self {
            strict: true,
            fail_on_warnings: false,
        }
    }
}

/// The output of a single expansion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpansionResult {
    /// Final instructions with all placeholders resolved
    pub expanded_instructions: String,
    /// Number of successful component substitutions (per occurrence)
    pub component_count: u32,
    /// Wall-clock expansion time in milliseconds
    pub expansion_time_ms: u64,
    /// Overall validation outcome
    pub validation_passed: bool,
    /// Warnings in encounter order
    pub validation_warnings: Vec<String>,
    /// Union of referenced components' tools (deduplicated by name)
    pub required_tools: BTreeSet<String>,
    /// Sum of referenced components' durations (deduplicated by name)
    pub estimated_duration: u32,
}

/// Stateless expansion engine
///
/// Holds no state between calls; construct one and share it freely, passing
/// stores in at the call site rather than through process-wide singletons.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpansionEngine;

impl ExpansionEngine {
    /// Create a new engine
    pub fn new() -> Self {
        Self
    }

    /// Expand a template against a component snapshot and a user task string
    ///
    /// The user task text is preserved verbatim and appears exactly once in
    /// the output; substituted text is never re-parsed, so `{{` sequences
    /// inside the task or inside component instructions are inert.
    ///
    /// Fatal only in strict mode: a missing component reference or a marker
    /// count other than one. Everything else degrades to an ordered warning
    /// alongside best-effort output.
    pub fn expand<C: ComponentSource>(
        &self,
        template: &Template,
        user_task_text: &str,
        components: &C,
        options: &ExpandOptions,
    ) -> Result<ExpansionResult> {
        let started = Instant::now();
        let mut reporter = ValidationReporter::new();

        let parsed = parser::parse(&template.template_content);
        reporter.extend(parsed.warnings.iter().cloned());

        let markers = parsed.user_task_markers;
        if markers != 1 {
            if options.strict {
                return Err(Error::MarkerCount { found: markers });
            }
            reporter.warn(format!(
                "template contains {} USER_TASK markers, expected exactly 1; \
                 falling back to declared position {}",
                markers, template.user_task_position
            ));
        }

        let plan = MarkerPlan::build(&parsed.tokens, markers, template.user_task_position);

        let mut output = String::new();
        let mut warnings_tail = Vec::new();
        let mut component_count: u32 = 0;
        let mut estimated_duration: u32 = 0;
        let mut required_tools = BTreeSet::new();
        let mut counted: HashSet<String> = HashSet::new();
        let mut ordinal = 0usize;
        let mut task_inserted = false;

        for token in &parsed.tokens {
            if token.is_placeholder() {
                ordinal += 1;
                if plan.insert_before(ordinal) && !task_inserted {
                    output.push_str(user_task_text);
                    task_inserted = true;
                }
            }
            match token {
                Token::Literal(text) => output.push_str(text),
                Token::Reference {
                    component_type,
                    identifier,
                } => {
                    let name = format!("{}::{}", component_type.as_str(), identifier);
                    match components.lookup(&name) {
                        Some(component) => {
                            // Text is substituted at every occurrence; the
                            // cost/tool roll-up counts each name only once.
                            output.push_str(&component.instruction_text);
                            component_count += 1;
                            if counted.insert(name) {
                                estimated_duration += component.estimated_duration;
                                required_tools
                                    .extend(component.required_tools.iter().cloned());
                            }
                        }
                        None => {
                            if options.strict {
                                return Err(Error::MissingComponent(name));
                            }
                            warnings_tail.push(format!("missing component: {}", name));
                        }
                    }
                }
                Token::Malformed(_) => {
                    // Warning already recorded at parse time; substitutes nothing.
                }
                Token::UserTask => {
                    if plan.substitute_at(ordinal) && !task_inserted {
                        output.push_str(user_task_text);
                        task_inserted = true;
                    }
                }
            }
        }

        if !task_inserted {
            // Zero markers and a declared position past the last placeholder.
            output.push_str(user_task_text);
        }

        reporter.extend(warnings_tail);
        let report = reporter.into_report(options.fail_on_warnings);

        Ok(ExpansionResult {
            expanded_instructions: output,
            component_count,
            expansion_time_ms: started.elapsed().as_millis() as u64,
            validation_passed: report.passed,
            validation_warnings: report.warnings,
            required_tools,
            estimated_duration,
        })
    }
}

/// Where the user task lands in the token walk
///
/// With exactly one marker the marker itself is authoritative. With zero
/// markers the task is inserted at the declared placeholder ordinal (or
/// appended past the end). With multiple markers the marker at the declared
/// ordinal wins, falling back to the first marker; the rest substitute
/// nothing.
#[derive(Debug, Clone, Copy)]
enum MarkerPlan {
    AtMarker { ordinal: usize },
    BeforeOrdinal { ordinal: usize },
    EveryMarkerIsFirstMatch,
}

impl MarkerPlan {
    fn build(tokens: &[Token], markers: usize, declared_position: u32) -> Self {
        match markers {
            1 => MarkerPlan::EveryMarkerIsFirstMatch,
            0 => MarkerPlan::BeforeOrdinal {
                ordinal: declared_position.max(1) as usize,
            },
            _ => {
                let mut ordinal = 0usize;
                let mut first_marker = None;
                let mut at_declared = None;
                for token in tokens {
                    if token.is_placeholder() {
                        ordinal += 1;
                        if matches!(token, Token::UserTask) {
                            first_marker.get_or_insert(ordinal);
                            if ordinal == declared_position as usize {
                                at_declared = Some(ordinal);
                            }
                        }
                    }
                }
                MarkerPlan::AtMarker {
                    ordinal: at_declared
                        .or(first_marker)
                        .unwrap_or(1),
                }
            }
        }
    }

    fn insert_before(&self, ordinal: usize) -> bool {
        matches!(self, MarkerPlan::BeforeOrdinal { ordinal: o } if *o == ordinal)
    }

    fn substitute_at(&self, ordinal: usize) -> bool {
        match self {
            MarkerPlan::EveryMarkerIsFirstMatch => true,
            MarkerPlan::AtMarker { ordinal: o } => *o == ordinal,
            MarkerPlan::BeforeOrdinal { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::types::{Component, ComponentSnapshot};

    fn snapshot(entries: &[(&str, &str, u32, &[&str])]) -> ComponentSnapshot {
        entries
            .iter()
            .map(|(name, text, minutes, tools)| {
                Component::new(*name, *text)
                    .unwrap()
                    .with_duration(*minutes)
                    .with_tools(tools.iter().copied())
            })
            .collect()
    }

    fn engine() -> ExpansionEngine {
        ExpansionEngine::new()
    }

    #[test]
    fn test_round_trip_well_formed_template() {
        let components = snapshot(&[
            ("group::setup", "Set up. ", 10, &["shell"]),
            ("action::build", "Build. ", 20, &["shell", "cargo"]),
            ("validation::check", "Check. ", 5, &["read_file"]),
        ]);
        let template = Template::new(
            "standard",
            "{{group::setup}}{{action::build}}{{USER_TASK}}{{validation::check}}",
        );

        let result = engine()
            .expand(&template, "Ship it. ", &components, &ExpandOptions::default())
            .unwrap();

        assert_eq!(
            result.expanded_instructions,
            "Set up. Build. Ship it. Check. "
        );
        assert!(result.validation_passed);
        assert!(result.validation_warnings.is_empty());
        assert_eq!(result.component_count, 3);
        assert_eq!(result.estimated_duration, 35);
        assert_eq!(result.required_tools.len(), 3);
    }

    #[test]
    fn test_marker_position_exact_concatenation() {
        let components = snapshot(&[("group::a", "X", 1, &[]), ("group::b", "Y", 1, &[])]);
        let template = Template::new("concat", "{{group::a}}{{USER_TASK}}{{group::b}}");

        let result = engine()
            .expand(&template, "TASK", &components, &ExpandOptions::default())
            .unwrap();

        // No whitespace inserted by the engine itself
        assert_eq!(result.expanded_instructions, "XTASKY");
    }

    #[test]
    fn test_user_task_preserved_verbatim_without_reexpansion() {
        let components = snapshot(&[("group::a", "A", 1, &[])]);
        let template = Template::new("t", "{{group::a}} {{USER_TASK}}");
        let task = "do {{group::a}} and {{USER_TASK}} literally";

        let result = engine()
            .expand(&template, task, &components, &ExpandOptions::default())
            .unwrap();

        assert_eq!(result.expanded_instructions.matches(task).count(), 1);
        // Only the template's own reference was substituted
        assert_eq!(result.component_count, 1);
    }

    #[test]
    fn test_determinism() {
        let components = snapshot(&[("group::a", "A", 3, &["shell"])]);
        let template = Template::new("t", "{{group::a}} {{USER_TASK}} {{group::missing}}");

        let first = engine()
            .expand(&template, "task", &components, &ExpandOptions::default())
            .unwrap();
        let second = engine()
            .expand(&template, "task", &components, &ExpandOptions::default())
            .unwrap();

        assert_eq!(first.expanded_instructions, second.expanded_instructions);
        assert_eq!(first.component_count, second.component_count);
        assert_eq!(first.validation_warnings, second.validation_warnings);
    }

    #[test]
    fn test_duplicate_reference_cost_is_idempotent() {
        let components = snapshot(&[("action::lint", "Lint. ", 7, &["shell"])]);
        let template = Template::new("t", "{{action::lint}}{{action::lint}}{{USER_TASK}}");

        let result = engine()
            .expand(&template, "done", &components, &ExpandOptions::default())
            .unwrap();

        // Text substituted at every occurrence
        assert_eq!(result.expanded_instructions, "Lint. Lint. done");
        // Cost and tools rolled up once per name
        assert_eq!(result.estimated_duration, 7);
        assert_eq!(result.required_tools.len(), 1);
        assert_eq!(result.component_count, 2);
    }

    #[test]
    fn test_fail_soft_missing_component() {
        let components = snapshot(&[
            ("group::a", "A", 1, &[]),
            ("group::b", "B", 1, &[]),
        ]);
        let template =
            Template::new("t", "{{group::a}}{{group::gone}}{{group::b}}{{USER_TASK}}");

        let result = engine()
            .expand(&template, "!", &components, &ExpandOptions::default())
            .unwrap();

        assert_eq!(result.expanded_instructions, "AB!");
        assert_eq!(result.component_count, 2);
        assert_eq!(result.validation_warnings.len(), 1);
        assert!(result.validation_warnings[0].contains("missing component: group::gone"));
        // Warnings don't fail validation by default
        assert!(result.validation_passed);
    }

    #[test]
    fn test_strict_abort_on_missing_component() {
        let components = snapshot(&[("group::a", "A", 1, &[])]);
        let template = Template::new("t", "{{group::a}}{{group::gone}}{{USER_TASK}}");

        let err = engine()
            .expand(&template, "!", &components, &ExpandOptions::strict())
            .unwrap_err();

        assert!(matches!(err, Error::MissingComponent(name) if name == "group::gone"));
    }

    #[test]
    fn test_inactive_component_treated_as_missing() {
        let mut components = ComponentSnapshot::new();
        components.insert(Component::new("group::a", "A").unwrap().deactivated());
        let template = Template::new("t", "{{group::a}}{{USER_TASK}}");

        let result = engine()
            .expand(&template, "!", &components, &ExpandOptions::default())
            .unwrap();

        assert_eq!(result.expanded_instructions, "!");
        assert_eq!(result.component_count, 0);
        assert!(result.validation_warnings[0].contains("missing component: group::a"));
    }

    #[test]
    fn test_malformed_reference_never_fatal_even_in_strict_mode() {
        let components = snapshot(&[("group::a", "A", 1, &[])]);
        let template = Template::new("t", "{{group::a}}{{oops!}}{{USER_TASK}}");

        let result = engine()
            .expand(&template, "x", &components, &ExpandOptions::strict())
            .unwrap();

        assert_eq!(result.expanded_instructions, "Ax");
        assert!(result
            .validation_warnings
            .iter()
            .any(|w| w.contains("malformed placeholder")));
    }

    #[test]
    fn test_marker_before_unterminated_tail_still_substitutes_in_strict_mode() {
        let components = snapshot(&[("group::a", "A", 1, &[])]);
        let template = Template::new("t", "{{group::a}}{{USER_TASK}} tail {{broken");

        let result = engine()
            .expand(&template, "T", &components, &ExpandOptions::strict())
            .unwrap();

        assert_eq!(result.expanded_instructions, "AT tail {{broken");
        assert!(result
            .validation_warnings
            .iter()
            .any(|w| w.contains("unterminated")));
    }

    #[test]
    fn test_zero_markers_strict_aborts() {
        let components = snapshot(&[("group::a", "A", 1, &[])]);
        let template = Template::new("t", "{{group::a}}");

        let err = engine()
            .expand(&template, "x", &components, &ExpandOptions::strict())
            .unwrap_err();
        assert!(matches!(err, Error::MarkerCount { found: 0 }));
    }

    #[test]
    fn test_zero_markers_falls_back_to_declared_position() {
        let components = snapshot(&[
            ("group::a", "A", 1, &[]),
            ("group::b", "B", 1, &[]),
        ]);
        // Task declared at placeholder ordinal 2: lands before group::b
        let template =
            Template::new("t", "{{group::a}}{{group::b}}").with_user_task_position(2);

        let result = engine()
            .expand(&template, "T", &components, &ExpandOptions::default())
            .unwrap();

        assert_eq!(result.expanded_instructions, "ATB");
        assert!(result.validation_warnings[0].contains("0 USER_TASK markers"));
    }

    #[test]
    fn test_zero_markers_position_past_end_appends() {
        let components = snapshot(&[("group::a", "A", 1, &[])]);
        let template = Template::new("t", "{{group::a}}").with_user_task_position(9);

        let result = engine()
            .expand(&template, "T", &components, &ExpandOptions::default())
            .unwrap();

        assert_eq!(result.expanded_instructions, "AT");
    }

    #[test]
    fn test_multiple_markers_substitute_once_at_declared_position() {
        let components = snapshot(&[("group::a", "A", 1, &[])]);
        // Markers at ordinals 1 and 3; declared position selects the third
        let template =
            Template::new("t", "{{USER_TASK}}{{group::a}}{{USER_TASK}}").with_user_task_position(3);

        let result = engine()
            .expand(&template, "T", &components, &ExpandOptions::default())
            .unwrap();

        assert_eq!(result.expanded_instructions, "AT");
        assert_eq!(result.expanded_instructions.matches('T').count(), 1);
    }

    #[test]
    fn test_multiple_markers_fall_back_to_first_marker() {
        let components = snapshot(&[("group::a", "A", 1, &[])]);
        // Declared position 2 is the reference, not a marker: first marker wins
        let template =
            Template::new("t", "{{USER_TASK}}{{group::a}}{{USER_TASK}}").with_user_task_position(2);

        let result = engine()
            .expand(&template, "T", &components, &ExpandOptions::default())
            .unwrap();

        assert_eq!(result.expanded_instructions, "TA");
    }

    #[test]
    fn test_fail_on_warnings_flips_validation_passed() {
        let components = ComponentSnapshot::new();
        let template = Template::new("t", "{{group::gone}}{{USER_TASK}}");

        let options = ExpandOptions {
            strict: false,
            fail_on_warnings: true,
        };
        let result = engine().expand(&template, "x", &components, &options).unwrap();

        assert!(!result.validation_passed);
        assert_eq!(result.expanded_instructions, "x");
    }

    #[test]
    fn test_empty_template_yields_task_only() {
        let components = ComponentSnapshot::new();
        let template = Template::new("empty", "");

        let result = engine()
            .expand(&template, "just the task", &components, &ExpandOptions::default())
            .unwrap();

        assert_eq!(result.expanded_instructions, "just the task");
        assert_eq!(result.component_count, 0);
    }
}
