//! Template storage, derived-field computation, and structural validation
//!
//! Templates cache the union of their referenced components' tools and the
//! sum of their durations. The caches are best-effort and recomputable:
//! references that fail lookup contribute zero and surface as warnings.

use std::collections::BTreeSet;

use chrono::Utc;
use sqlx::FromRow;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::expansion::report::{ValidationReport, ValidationReporter};
use crate::store::component::{parse_timestamp, ComponentStore};
use crate::store::database::Database;
use crate::template::parser;
use crate::template::types::Template;

/// Recomputed denormalized fields for a template
#[derive(Debug, Clone)]
pub struct DerivedFields {
    /// Union of referenced components' tools
    pub required_tools: BTreeSet<String>,
    /// Sum of referenced components' durations (deduplicated by name)
    pub estimated_duration: u32,
    /// Lookup warnings encountered while computing
    pub warnings: Vec<String>,
}

/// Store for persisting and retrieving templates
#[derive(Clone)]
pub struct TemplateStore {
    db: Database,
}

impl TemplateStore {
    /// Create a new template store
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Save a template (insert or update by name)
    pub async fn save(&self, template: &Template) -> Result<()> {
        let tools_json = serde_json::to_string(&template.required_tools)
            .map_err(|e| Error::Other(format!("Failed to serialize tools: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO templates (
                name, template_content, user_task_position, required_tools,
                estimated_duration, is_active, version, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                template_content = excluded.template_content,
                user_task_position = excluded.user_task_position,
                required_tools = excluded.required_tools,
                estimated_duration = excluded.estimated_duration,
                is_active = excluded.is_active,
                version = excluded.version,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&template.name)
        .bind(&template.template_content)
        .bind(template.user_task_position as i64)
        .bind(&tools_json)
        .bind(template.estimated_duration as i64)
        .bind(template.is_active)
        .bind(template.version as i64)
        .bind(template.created_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(self.db.pool())
        .await?;

        info!(template = %template.name, version = template.version, "Template saved");
        Ok(())
    }

    /// Get an active template by name
    pub async fn get(&self, name: &str) -> Result<Option<Template>> {
        let row: Option<TemplateRow> =
            sqlx::query_as("SELECT * FROM templates WHERE name = ? AND is_active = 1")
                .bind(name)
                .fetch_optional(self.db.pool())
                .await?;

        Ok(row.map(|r| r.into_template()))
    }

    /// Get a template by name regardless of active state
    pub async fn get_any(&self, name: &str) -> Result<Option<Template>> {
        let row: Option<TemplateRow> =
            sqlx::query_as("SELECT * FROM templates WHERE name = ?")
                .bind(name)
                .fetch_optional(self.db.pool())
                .await?;

        Ok(row.map(|r| r.into_template()))
    }

    /// List all active templates, ordered by name
    pub async fn list(&self) -> Result<Vec<Template>> {
        let rows: Vec<TemplateRow> =
            sqlx::query_as("SELECT * FROM templates WHERE is_active = 1 ORDER BY name")
                .fetch_all(self.db.pool())
                .await?;

        Ok(rows.into_iter().map(|r| r.into_template()).collect())
    }

    /// Deactivate a template
    pub async fn deactivate(&self, name: &str) -> Result<bool> {
        let result =
            sqlx::query("UPDATE templates SET is_active = 0, updated_at = ? WHERE name = ?")
                .bind(Utc::now().to_rfc3339())
                .bind(name)
                .execute(self.db.pool())
                .await?;

        let changed = result.rows_affected() > 0;
        if changed {
            info!(template = %name, "Template deactivated");
        }
        Ok(changed)
    }

    /// Delete a template by name
    pub async fn delete(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM templates WHERE name = ?")
            .bind(name)
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Count active templates
    pub async fn count(&self) -> Result<u64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM templates WHERE is_active = 1")
                .fetch_one(self.db.pool())
                .await?;
        Ok(count as u64)
    }

    /// Recompute a template's denormalized tool/duration caches
    ///
    /// Walks the distinct references in the parsed body and rolls up from
    /// the component store. Best-effort: missing or inactive references
    /// contribute zero and are reported as warnings, never as errors.
    pub async fn compute_derived_fields(
        &self,
        template: &Template,
        components: &ComponentStore,
    ) -> Result<DerivedFields> {
        let parsed = parser::parse(&template.template_content);

        let mut required_tools = BTreeSet::new();
        let mut estimated_duration: u32 = 0;
        let mut warnings = Vec::new();

        for name in parsed.distinct_references() {
            match components.get(&name).await? {
                Some(component) => {
                    estimated_duration += component.estimated_duration;
                    required_tools.extend(component.required_tools.iter().cloned());
                }
                None => warnings.push(format!("missing component: {}", name)),
            }
        }

        debug!(
            template = %template.name,
            duration = estimated_duration,
            tools = required_tools.len(),
            "Computed derived fields"
        );

        Ok(DerivedFields {
            required_tools,
            estimated_duration,
            warnings,
        })
    }

    /// Recompute and persist the caches for a stored template
    pub async fn refresh_derived(
        &self,
        name: &str,
        components: &ComponentStore,
    ) -> Result<Template> {
        let mut template = self
            .get_any(name)
            .await?
            .ok_or_else(|| Error::TemplateNotFound(name.to_string()))?;

        let derived = self.compute_derived_fields(&template, components).await?;
        template.required_tools = derived.required_tools;
        template.estimated_duration = derived.estimated_duration;
        self.save(&template).await?;

        Ok(template)
    }

    /// Structurally validate a template
    ///
    /// Checks the USER_TASK marker count, the declared `user_task_position`
    /// against the marker's actual placeholder ordinal, and every reference
    /// against the component store. In strict mode a marker-count violation
    /// or missing component fails with an error; otherwise all findings are
    /// returned as warnings.
    pub async fn validate(
        &self,
        template: &Template,
        components: &ComponentStore,
        strict: bool,
    ) -> Result<ValidationReport> {
        let parsed = parser::parse(&template.template_content);
        let mut reporter = ValidationReporter::new();
        reporter.extend(parsed.warnings.iter().cloned());

        if parsed.user_task_markers != 1 {
            if strict {
                return Err(Error::MarkerCount {
                    found: parsed.user_task_markers,
                });
            }
            reporter.warn(format!(
                "template contains {} USER_TASK markers, expected exactly 1",
                parsed.user_task_markers
            ));
        } else if let Some(actual) = marker_ordinal(&parsed) {
            if actual != template.user_task_position as usize {
                reporter.warn(format!(
                    "declared user_task_position {} does not match actual marker position {}",
                    template.user_task_position, actual
                ));
            }
        }

        for name in parsed.distinct_references() {
            if components.get(&name).await?.is_none() {
                if strict {
                    return Err(Error::MissingComponent(name));
                }
                reporter.warn(format!("missing component: {}", name));
            }
        }

        Ok(reporter.into_report(false))
    }
}

/// 1-based placeholder ordinal of the first USER_TASK marker
fn marker_ordinal(parsed: &parser::ParsedTemplate) -> Option<usize> {
    let mut ordinal = 0;
    for token in &parsed.tokens {
        if token.is_placeholder() {
            ordinal += 1;
            if matches!(token, parser::Token::UserTask) {
                return Some(ordinal);
            }
        }
    }
    None
}

/// Database row for the templates table
#[derive(Debug, FromRow)]
struct TemplateRow {
    name: String,
    template_content: String,
    user_task_position: i64,
    required_tools: Option<String>,
    estimated_duration: i64,
    is_active: bool,
    version: i64,
    created_at: String,
    updated_at: String,
}

impl TemplateRow {
    fn into_template(self) -> Template {
        let required_tools: BTreeSet<String> = self
            .required_tools
            .as_ref()
            .map(|s| serde_json::from_str(s).unwrap_or_default())
            .unwrap_or_default();

        Template {
            name: self.name,
            template_content: self.template_content,
            user_task_position: self.user_task_position.max(1) as u32,
            required_tools,
            estimated_duration: self.estimated_duration.max(0) as u32,
            is_active: self.is_active,
            version: self.version.max(1) as u32,
            created_at: parse_timestamp(&self.created_at),
            updated_at: parse_timestamp(&self.updated_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::types::Component;

    async fn setup() -> (TemplateStore, ComponentStore) {
        let db = Database::in_memory().await.expect("in-memory db");
        (TemplateStore::new(db.clone()), ComponentStore::new(db))
    }

    async fn seed_components(components: &ComponentStore) {
        for (name, minutes, tools) in [
            ("group::setup", 10, vec!["shell"]),
            ("action::build", 20, vec!["shell", "cargo"]),
        ] {
            components
                .save(
                    &Component::new(name, format!("Do {}", name))
                        .unwrap()
                        .with_duration(minutes)
                        .with_tools(tools),
                )
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_save_and_get() {
        let (templates, _) = setup().await;
        let template = Template::new("flow", "{{group::setup}}{{USER_TASK}}")
            .with_user_task_position(2);
        templates.save(&template).await.unwrap();

        let fetched = templates.get("flow").await.unwrap().unwrap();
        assert_eq!(fetched.user_task_position, 2);
        assert_eq!(fetched.version, 1);
    }

    #[tokio::test]
    async fn test_derived_fields_dedupe_by_name() {
        let (templates, components) = setup().await;
        seed_components(&components).await;

        // group::setup referenced twice counts once in the roll-up
        let template = Template::new(
            "flow",
            "{{group::setup}}{{group::setup}}{{action::build}}{{USER_TASK}}",
        );

        let derived = templates
            .compute_derived_fields(&template, &components)
            .await
            .unwrap();

        assert_eq!(derived.estimated_duration, 30);
        assert_eq!(
            derived.required_tools,
            ["cargo", "shell"].iter().map(|s| s.to_string()).collect()
        );
        assert!(derived.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_derived_fields_missing_reference_contributes_zero() {
        let (templates, components) = setup().await;
        seed_components(&components).await;

        let template = Template::new("flow", "{{group::setup}}{{group::gone}}{{USER_TASK}}");
        let derived = templates
            .compute_derived_fields(&template, &components)
            .await
            .unwrap();

        assert_eq!(derived.estimated_duration, 10);
        assert_eq!(derived.warnings, vec!["missing component: group::gone"]);
    }

    #[tokio::test]
    async fn test_refresh_derived_persists_caches() {
        let (templates, components) = setup().await;
        seed_components(&components).await;

        templates
            .save(&Template::new("flow", "{{action::build}}{{USER_TASK}}"))
            .await
            .unwrap();

        let refreshed = templates.refresh_derived("flow", &components).await.unwrap();
        assert_eq!(refreshed.estimated_duration, 20);

        let fetched = templates.get("flow").await.unwrap().unwrap();
        assert_eq!(fetched.estimated_duration, 20);
        assert!(fetched.required_tools.contains("cargo"));
    }

    #[tokio::test]
    async fn test_validate_clean_template_passes() {
        let (templates, components) = setup().await;
        seed_components(&components).await;

        let template = Template::new("flow", "{{group::setup}}{{USER_TASK}}")
            .with_user_task_position(2);
        let report = templates.validate(&template, &components, false).await.unwrap();

        assert!(report.passed);
        assert!(report.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_validate_flags_position_mismatch() {
        let (templates, components) = setup().await;
        seed_components(&components).await;

        // Marker is at ordinal 2, declared position says 1
        let template = Template::new("flow", "{{group::setup}}{{USER_TASK}}");
        let report = templates.validate(&template, &components, false).await.unwrap();

        assert!(report
            .warnings
            .iter()
            .any(|w| w.contains("does not match actual marker position 2")));
    }

    #[tokio::test]
    async fn test_validate_strict_rejects_missing_component() {
        let (templates, components) = setup().await;
        let template = Template::new("flow", "{{group::gone}}{{USER_TASK}}");

        let err = templates
            .validate(&template, &components, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingComponent(_)));
    }

    #[tokio::test]
    async fn test_validate_strict_rejects_marker_count() {
        let (templates, components) = setup().await;
        let template = Template::new("flow", "no markers here");

        let err = templates
            .validate(&template, &components, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MarkerCount { found: 0 }));
    }

    #[tokio::test]
    async fn test_inactive_template_invisible_to_get() {
        let (templates, _) = setup().await;
        templates
            .save(&Template::new("flow", "{{USER_TASK}}"))
            .await
            .unwrap();
        templates.deactivate("flow").await.unwrap();

        assert!(templates.get("flow").await.unwrap().is_none());
        assert!(templates.get_any("flow").await.unwrap().is_some());
    }
}
