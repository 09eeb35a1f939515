//! Template and component data model plus placeholder parsing

pub mod parser;
pub mod types;

pub use parser::{parse, ParsedTemplate, Token};
pub use types::{
    is_valid_identifier, split_component_name, validate_name, Component, ComponentSnapshot,
    ComponentSource, ComponentType, Priority, Template,
};
