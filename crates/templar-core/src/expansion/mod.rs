//! Expansion engine and validation reporting

pub mod engine;
pub mod report;

pub use engine::{ExpandOptions, ExpansionEngine, ExpansionResult};
pub use report::{ValidationReport, ValidationReporter};
