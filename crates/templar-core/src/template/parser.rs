//! Placeholder parser
//!
//! Tokenizes template body text into literal segments, component references,
//! and the USER_TASK marker. Parsing is pure and fail-soft: a malformed
//! placeholder becomes a `Malformed` token plus a recorded warning instead of
//! aborting, so a single pass yields complete diagnostics.

use std::collections::BTreeSet;

use crate::template::types::{split_component_name, ComponentType};

/// Opening placeholder delimiter
const OPEN: &str = "{{";
/// Closing placeholder delimiter
const CLOSE: &str = "}}";

/// A single token of a parsed template body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Raw text outside any placeholder (never empty)
    Literal(String),
    /// A `{{type::identifier}}` component reference
    Reference {
        component_type: ComponentType,
        identifier: String,
    },
    /// The `{{USER_TASK}}` marker
    UserTask,
    /// Placeholder content that does not parse as a known form (trimmed)
    Malformed(String),
}

impl Token {
    /// Full `{type}::{identifier}` lookup name for reference tokens
    pub fn reference_name(&self) -> Option<String> {
        match self {
            Token::Reference {
                component_type,
                identifier,
            } => Some(format!("{}::{}", component_type.as_str(), identifier)),
            _ => None,
        }
    }

    /// Whether this token occupies a placeholder position
    ///
    /// Placeholder ordinals (as used by `user_task_position`) count
    /// references, malformed placeholders, and the USER_TASK marker alike.
    pub fn is_placeholder(&self) -> bool {
        !matches!(self, Token::Literal(_))
    }
}

/// The result of parsing a template body
#[derive(Debug, Clone, Default)]
pub struct ParsedTemplate {
    /// Tokens in encounter order
    pub tokens: Vec<Token>,
    /// Parse-level warnings (malformed / unterminated placeholders), in order
    pub warnings: Vec<String>,
    /// Number of USER_TASK markers seen
    ///
    /// The parser only counts; the exactly-one rule is interpreted by
    /// validation.
    pub user_task_markers: usize,
    /// Number of well-formed component references seen
    pub reference_count: usize,
}

impl ParsedTemplate {
    /// Full names of all references, in encounter order (with repeats)
    pub fn reference_names(&self) -> Vec<String> {
        self.tokens
            .iter()
            .filter_map(Token::reference_name)
            .collect()
    }

    /// Distinct reference names, sorted
    pub fn distinct_references(&self) -> BTreeSet<String> {
        self.tokens.iter().filter_map(Token::reference_name).collect()
    }

    /// Total number of placeholder positions (references + malformed + markers)
    pub fn placeholder_count(&self) -> usize {
        self.tokens.iter().filter(|t| t.is_placeholder()).count()
    }
}

/// Parse a template body into tokens
///
/// Scans left to right for `{{` / `}}` pairs. The parser is not recursive:
/// it always matches the *next* `}}`, so a nested `{{` ends up inside the
/// placeholder content and fails the name pattern. Same input always yields
/// the same token sequence.
pub fn parse(content: &str) -> ParsedTemplate {
    let mut parsed = ParsedTemplate::default();
    let mut rest = content;

    while let Some(open_at) = rest.find(OPEN) {
        if open_at > 0 {
            parsed.tokens.push(Token::Literal(rest[..open_at].to_string()));
        }

        let after_open = &rest[open_at + OPEN.len()..];
        let Some(close_at) = after_open.find(CLOSE) else {
            // Unterminated placeholder: the remainder becomes a literal.
            parsed
                .warnings
                .push("unterminated placeholder: missing '}}'".to_string());
            parsed.tokens.push(Token::Literal(rest[open_at..].to_string()));
            rest = "";
            break;
        };

        let inner = after_open[..close_at].trim();
        parsed.tokens.push(classify(inner, &mut parsed.warnings));
        rest = &after_open[close_at + CLOSE.len()..];
    }

    if !rest.is_empty() {
        parsed.tokens.push(Token::Literal(rest.to_string()));
    }

    for token in &parsed.tokens {
        match token {
            Token::UserTask => parsed.user_task_markers += 1,
            Token::Reference { .. } => parsed.reference_count += 1,
            _ => {}
        }
    }

    parsed
}

fn classify(inner: &str, warnings: &mut Vec<String>) -> Token {
    if inner == "USER_TASK" {
        return Token::UserTask;
    }
    match split_component_name(inner) {
        Some((component_type, identifier)) => Token::Reference {
            component_type,
            identifier: identifier.to_string(),
        },
        None => {
            warnings.push(format!("malformed placeholder: '{}'", inner));
            Token::Malformed(inner.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_literals_and_references() {
        let parsed = parse("Do this: {{action::run_tests}} then {{USER_TASK}} done");

        assert_eq!(
            parsed.tokens,
            vec![
                Token::Literal("Do this: ".into()),
                Token::Reference {
                    component_type: ComponentType::Action,
                    identifier: "run_tests".into()
                },
                Token::Literal(" then ".into()),
                Token::UserTask,
                Token::Literal(" done".into()),
            ]
        );
        assert_eq!(parsed.reference_count, 1);
        assert_eq!(parsed.user_task_markers, 1);
        assert!(parsed.warnings.is_empty());
    }

    #[test]
    fn test_empty_literals_are_dropped() {
        let parsed = parse("{{group::a}}{{group::b}}");
        assert_eq!(parsed.tokens.len(), 2);
        assert!(parsed.tokens.iter().all(|t| t.is_placeholder()));
    }

    #[test]
    fn test_inner_whitespace_is_trimmed() {
        let parsed = parse("{{  group::setup  }}{{ USER_TASK }}");
        assert_eq!(
            parsed.tokens[0].reference_name().as_deref(),
            Some("group::setup")
        );
        assert_eq!(parsed.tokens[1], Token::UserTask);
    }

    #[test]
    fn test_malformed_placeholder_is_fail_soft() {
        let parsed = parse("a {{not a ref}} b {{action::ok}} c");

        assert_eq!(parsed.tokens[1], Token::Malformed("not a ref".into()));
        assert_eq!(parsed.reference_count, 1);
        assert_eq!(parsed.warnings.len(), 1);
        assert!(parsed.warnings[0].contains("not a ref"));
        // The rest of the template still parses
        assert_eq!(
            parsed.tokens[3].reference_name().as_deref(),
            Some("action::ok")
        );
    }

    #[test]
    fn test_unknown_type_is_malformed() {
        let parsed = parse("{{task::thing}}");
        assert_eq!(parsed.tokens[0], Token::Malformed("task::thing".into()));
        assert_eq!(parsed.warnings.len(), 1);
    }

    #[test]
    fn test_unterminated_placeholder_becomes_literal() {
        let parsed = parse("before {{group::a");

        assert_eq!(
            parsed.tokens,
            vec![
                Token::Literal("before ".into()),
                Token::Literal("{{group::a".into()),
            ]
        );
        assert_eq!(parsed.warnings.len(), 1);
        assert!(parsed.warnings[0].contains("unterminated"));
    }

    #[test]
    fn test_tokens_before_unterminated_placeholder_are_still_counted() {
        let parsed = parse("{{USER_TASK}} then {{action::go}} and {{oops");

        assert_eq!(parsed.user_task_markers, 1);
        assert_eq!(parsed.reference_count, 1);
        assert_eq!(
            parsed.tokens.last(),
            Some(&Token::Literal("{{oops".into()))
        );
        assert_eq!(parsed.warnings.len(), 1);
    }

    #[test]
    fn test_nested_open_matches_next_close() {
        // Not recursive: the next }} closes, leaving an invalid inner name.
        let parsed = parse("{{group::a{{b}}");
        assert_eq!(parsed.tokens[0], Token::Malformed("group::a{{b".into()));
        assert_eq!(parsed.warnings.len(), 1);
    }

    #[test]
    fn test_marker_counting_only() {
        let parsed = parse("{{USER_TASK}} and {{USER_TASK}}");
        assert_eq!(parsed.user_task_markers, 2);
        // Zero or >1 markers is a validation concern, not a parse warning
        assert!(parsed.warnings.is_empty());
    }

    #[test]
    fn test_placeholder_ordinals_count_all_placeholder_kinds() {
        let parsed = parse("{{group::a}}{{bogus}}{{USER_TASK}}");
        assert_eq!(parsed.placeholder_count(), 3);
    }

    #[test]
    fn test_parse_is_deterministic() {
        let input = "x {{action::a}} {{bad}} {{USER_TASK}} y";
        let first = parse(input);
        let second = parse(input);
        assert_eq!(first.tokens, second.tokens);
        assert_eq!(first.warnings, second.warnings);
    }

    #[test]
    fn test_distinct_references_dedupe() {
        let parsed = parse("{{group::a}}{{group::a}}{{action::b}}");
        assert_eq!(parsed.reference_count, 3);
        assert_eq!(parsed.distinct_references().len(), 2);
    }
}
