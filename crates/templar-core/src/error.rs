//! Error types for Templar

use thiserror::Error;

/// Result type alias using Templar's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Templar error types with helpful messages
#[derive(Error, Debug)]
pub enum Error {
    // Entity errors (E001-E099)
    #[error("Component '{0}' not found. Run `templar components list` to see all components.")]
    ComponentNotFound(String),

    #[error("Template '{0}' not found. Run `templar templates list` to see all templates.")]
    TemplateNotFound(String),

    #[error("Assignment '{0}' not found.")]
    AssignmentNotFound(String),

    // Expansion errors (E100-E199)
    #[error("Missing component '{0}' referenced by template (strict mode)")]
    MissingComponent(String),

    #[error("Template contains {found} USER_TASK markers, exactly 1 required (strict mode)")]
    MarkerCount { found: usize },

    // Validation errors (E200-E299)
    #[error("Invalid component name '{0}': expected '{{type}}::{{identifier}}' with type in action|group|sequence|validation and identifier matching [a-z0-9_]+")]
    InvalidComponentName(String),

    #[error("Component '{name}' declares type '{declared}' but its name prefix is '{prefix}'")]
    ComponentTypeMismatch {
        name: String,
        declared: String,
        prefix: String,
    },

    #[error("Template validation failed: {0}")]
    TemplateValidationFailed(String),

    // Database errors (E400-E499)
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Input errors (E800-E899)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::ComponentNotFound(_) => "E001",
            Self::TemplateNotFound(_) => "E002",
            Self::AssignmentNotFound(_) => "E003",
            Self::MissingComponent(_) => "E100",
            Self::MarkerCount { .. } => "E101",
            Self::InvalidComponentName(_) => "E200",
            Self::ComponentTypeMismatch { .. } => "E201",
            Self::TemplateValidationFailed(_) => "E202",
            Self::DatabaseError(_) => "E400",
            Self::ConfigError(_) => "E600",
            Self::InvalidInput(_) => "E800",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Whether this error aborts an expansion (as opposed to surfacing as a warning)
    pub fn is_expansion_abort(&self) -> bool {
        matches!(self, Self::MissingComponent(_) | Self::MarkerCount { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(Error::ComponentNotFound("x".into()).code(), "E001");
        assert_eq!(Error::MissingComponent("group::x".into()).code(), "E100");
        assert_eq!(Error::MarkerCount { found: 0 }.code(), "E101");
        assert_eq!(Error::InvalidComponentName("bad".into()).code(), "E200");
    }

    #[test]
    fn test_expansion_abort_classification() {
        assert!(Error::MissingComponent("group::x".into()).is_expansion_abort());
        assert!(Error::MarkerCount { found: 2 }.is_expansion_abort());
        assert!(!Error::TemplateNotFound("t".into()).is_expansion_abort());
    }
}
