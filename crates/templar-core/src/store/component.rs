//! Component storage and retrieval
//!
//! SQLite-backed CRUD for instruction components. The read path used by
//! expansion (`get`, `snapshot`) only sees active components; the admin
//! surface reaches inactive rows through `get_any`/`list_all`.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::store::database::Database;
use crate::template::types::{
    split_component_name, Component, ComponentSnapshot, ComponentType, Priority,
};

/// Store for persisting and retrieving components
#[derive(Clone)]
pub struct ComponentStore {
    db: Database,
}

impl ComponentStore {
    /// Create a new component store
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Save a component (insert or update by name)
    pub async fn save(&self, component: &Component) -> Result<()> {
        // The name prefix is the single source of truth for the type.
        match split_component_name(&component.name) {
            Some((prefix_type, _)) if prefix_type == component.component_type => {}
            Some((prefix_type, _)) => {
                return Err(Error::ComponentTypeMismatch {
                    name: component.name.clone(),
                    declared: component.component_type.as_str().to_string(),
                    prefix: prefix_type.as_str().to_string(),
                });
            }
            None => return Err(Error::InvalidComponentName(component.name.clone())),
        }

        let tools_json = serde_json::to_string(&component.required_tools)
            .map_err(|e| Error::Other(format!("Failed to serialize tools: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO components (
                name, component_type, instruction_text, required_tools,
                estimated_duration, priority, is_active, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                component_type = excluded.component_type,
                instruction_text = excluded.instruction_text,
                required_tools = excluded.required_tools,
                estimated_duration = excluded.estimated_duration,
                priority = excluded.priority,
                is_active = excluded.is_active,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&component.name)
        .bind(component.component_type.as_str())
        .bind(&component.instruction_text)
        .bind(&tools_json)
        .bind(component.estimated_duration as i64)
        .bind(component.priority.as_str())
        .bind(component.is_active)
        .bind(component.created_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(self.db.pool())
        .await?;

        info!(component = %component.name, "Component saved");
        Ok(())
    }

    /// Get an active component by name
    ///
    /// Inactive components are indistinguishable from nonexistent ones here;
    /// use `get_any` on the admin path.
    pub async fn get(&self, name: &str) -> Result<Option<Component>> {
        let row: Option<ComponentRow> =
            sqlx::query_as("SELECT * FROM components WHERE name = ? AND is_active = 1")
                .bind(name)
                .fetch_optional(self.db.pool())
                .await?;

        row.map(|r| r.into_component()).transpose()
    }

    /// Get a component by name regardless of active state
    pub async fn get_any(&self, name: &str) -> Result<Option<Component>> {
        let row: Option<ComponentRow> =
            sqlx::query_as("SELECT * FROM components WHERE name = ?")
                .bind(name)
                .fetch_optional(self.db.pool())
                .await?;

        row.map(|r| r.into_component()).transpose()
    }

    /// List all active components, ordered by name
    pub async fn list(&self) -> Result<Vec<Component>> {
        let rows: Vec<ComponentRow> =
            sqlx::query_as("SELECT * FROM components WHERE is_active = 1 ORDER BY name")
                .fetch_all(self.db.pool())
                .await?;

        rows.into_iter().map(|r| r.into_component()).collect()
    }

    /// List every component including inactive ones
    pub async fn list_all(&self) -> Result<Vec<Component>> {
        let rows: Vec<ComponentRow> =
            sqlx::query_as("SELECT * FROM components ORDER BY name")
                .fetch_all(self.db.pool())
                .await?;

        rows.into_iter().map(|r| r.into_component()).collect()
    }

    /// List active components of one type
    pub async fn list_by_type(&self, component_type: ComponentType) -> Result<Vec<Component>> {
        let rows: Vec<ComponentRow> = sqlx::query_as(
            "SELECT * FROM components WHERE component_type = ? AND is_active = 1 ORDER BY name",
        )
        .bind(component_type.as_str())
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter().map(|r| r.into_component()).collect()
    }

    /// Deactivate a component
    ///
    /// The component disappears from resolution but its row is retained;
    /// templates referencing it surface a missing-component warning at
    /// expansion time rather than being hard-blocked.
    pub async fn deactivate(&self, name: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE components SET is_active = 0, updated_at = ? WHERE name = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(name)
        .execute(self.db.pool())
        .await?;

        let changed = result.rows_affected() > 0;
        if changed {
            info!(component = %name, "Component deactivated");
        }
        Ok(changed)
    }

    /// Delete a component by name
    pub async fn delete(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM components WHERE name = ?")
            .bind(name)
            .execute(self.db.pool())
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(component = %name, "Component deleted");
        }
        Ok(deleted)
    }

    /// Count active components
    pub async fn count(&self) -> Result<u64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM components WHERE is_active = 1")
                .fetch_one(self.db.pool())
                .await?;
        Ok(count as u64)
    }

    /// Build an in-memory snapshot of the named components
    ///
    /// Only active components land in the snapshot; names that are missing
    /// or inactive are simply absent, which the expansion engine reports as
    /// missing references.
    pub async fn snapshot(&self, names: &BTreeSet<String>) -> Result<ComponentSnapshot> {
        let mut snapshot = ComponentSnapshot::new();
        for name in names {
            if let Some(component) = self.get(name).await? {
                snapshot.insert(component);
            }
        }
        debug!(
            requested = names.len(),
            resolved = snapshot.len(),
            "Built component snapshot"
        );
        Ok(snapshot)
    }
}

/// Database row for the components table
#[derive(Debug, FromRow)]
struct ComponentRow {
    name: String,
    component_type: String,
    instruction_text: String,
    required_tools: Option<String>,
    estimated_duration: i64,
    priority: String,
    is_active: bool,
    created_at: String,
    updated_at: String,
}

impl ComponentRow {
    fn into_component(self) -> Result<Component> {
        let component_type = ComponentType::parse(&self.component_type)
            .ok_or_else(|| Error::InvalidComponentName(self.name.clone()))?;

        let required_tools: BTreeSet<String> = self
            .required_tools
            .as_ref()
            .map(|s| serde_json::from_str(s).unwrap_or_default())
            .unwrap_or_default();

        Ok(Component {
            name: self.name,
            component_type,
            instruction_text: self.instruction_text,
            required_tools,
            estimated_duration: self.estimated_duration.max(1) as u32,
            priority: Priority::parse(&self.priority),
            is_active: self.is_active,
            created_at: parse_timestamp(&self.created_at),
            updated_at: parse_timestamp(&self.updated_at),
        })
    }
}

/// Parse an RFC 3339 timestamp, falling back to now for legacy rows
pub(crate) fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> ComponentStore {
        let db = Database::in_memory().await.expect("in-memory db");
        ComponentStore::new(db)
    }

    fn component(name: &str) -> Component {
        Component::new(name, format!("Instructions for {}", name))
            .unwrap()
            .with_duration(5)
            .with_tools(["shell"])
    }

    #[tokio::test]
    async fn test_save_and_get() {
        let store = setup().await;
        store.save(&component("action::build")).await.unwrap();

        let fetched = store.get("action::build").await.unwrap().unwrap();
        assert_eq!(fetched.component_type, ComponentType::Action);
        assert_eq!(fetched.estimated_duration, 5);
        assert!(fetched.required_tools.contains("shell"));
    }

    #[tokio::test]
    async fn test_upsert_updates_in_place() {
        let store = setup().await;
        let mut c = component("group::setup");
        store.save(&c).await.unwrap();

        c.instruction_text = "Updated".into();
        store.save(&c).await.unwrap();

        let fetched = store.get("group::setup").await.unwrap().unwrap();
        assert_eq!(fetched.instruction_text, "Updated");
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_type_mismatch_is_rejected() {
        let store = setup().await;
        let mut c = component("action::build");
        c.component_type = ComponentType::Group;

        let err = store.save(&c).await.unwrap_err();
        assert!(matches!(err, Error::ComponentTypeMismatch { .. }));
    }

    #[tokio::test]
    async fn test_deactivated_component_is_invisible_to_get() {
        let store = setup().await;
        store.save(&component("validation::lint")).await.unwrap();

        assert!(store.deactivate("validation::lint").await.unwrap());

        // Read path cannot distinguish disabled from deleted
        assert!(store.get("validation::lint").await.unwrap().is_none());
        // Admin path still sees it
        let any = store.get_any("validation::lint").await.unwrap().unwrap();
        assert!(!any.is_active);
    }

    #[tokio::test]
    async fn test_list_by_type() {
        let store = setup().await;
        store.save(&component("action::a")).await.unwrap();
        store.save(&component("action::b")).await.unwrap();
        store.save(&component("group::c")).await.unwrap();

        let actions = store.list_by_type(ComponentType::Action).await.unwrap();
        assert_eq!(actions.len(), 2);
        assert!(actions.iter().all(|c| c.component_type == ComponentType::Action));
    }

    #[tokio::test]
    async fn test_snapshot_skips_missing_and_inactive() {
        let store = setup().await;
        store.save(&component("action::a")).await.unwrap();
        store.save(&component("action::b")).await.unwrap();
        store.deactivate("action::b").await.unwrap();

        let names: BTreeSet<String> = ["action::a", "action::b", "action::missing"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let snapshot = store.snapshot(&names).await.unwrap();

        assert_eq!(snapshot.len(), 1);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = setup().await;
        store.save(&component("sequence::deploy")).await.unwrap();

        assert!(store.delete("sequence::deploy").await.unwrap());
        assert!(store.get_any("sequence::deploy").await.unwrap().is_none());
        assert!(!store.delete("sequence::deploy").await.unwrap());
    }
}
