//! Storage layer
//!
//! SQLite-backed stores for components, templates, and assignments, plus
//! connection management, migrations, and a TTL read cache.

pub mod assignment;
pub mod cache;
pub mod component;
pub mod database;
pub mod migrations;
pub mod template;

pub use assignment::AssignmentStore;
pub use cache::TtlCache;
pub use component::ComponentStore;
pub use database::{Database, DatabaseConfig};
pub use template::{DerivedFields, TemplateStore};
