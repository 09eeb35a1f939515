//! Templar Core Library
//!
//! This crate provides the core functionality for Templar, including:
//! - Placeholder parsing ({{type::name}} / {{USER_TASK}} syntax)
//! - Template expansion (component substitution, cost roll-up, diagnostics)
//! - Hierarchical assignment resolution (priority + specificity)
//! - Storage (SQLite-backed component/template/assignment stores)
//! - Configuration and the expansion request/response contract

pub mod assignment;
pub mod config;
pub mod error;
pub mod expansion;
pub mod service;
pub mod store;
pub mod template;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::expansion::{ExpandOptions, ExpansionEngine, ExpansionResult};
    pub use crate::template::{Component, ComponentSnapshot, ComponentType, Template};
}
