//! Assignment storage
//!
//! SQLite-backed CRUD for template assignments plus the chain query feeding
//! the resolver. Uniqueness of active, unconditional assignments per
//! (node, template) is enforced by a partial unique index in the schema, not
//! by this store.

use chrono::Utc;
use sqlx::FromRow;
use tracing::info;

use crate::assignment::types::{Assignment, Condition, HierarchyLevel, HierarchyNode};
use crate::error::{Error, Result};
use crate::store::component::parse_timestamp;
use crate::store::database::Database;

/// Store for persisting and retrieving assignments
#[derive(Clone)]
pub struct AssignmentStore {
    db: Database,
}

impl AssignmentStore {
    /// Create a new assignment store
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Save an assignment (insert or update by id)
    pub async fn save(&self, assignment: &Assignment) -> Result<()> {
        let conditions_json = serde_json::to_string(&assignment.conditional_logic)
            .map_err(|e| Error::Other(format!("Failed to serialize conditions: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO assignments (
                id, hierarchy_type, hierarchy_id, template_name,
                priority, conditional_logic, is_active, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                hierarchy_type = excluded.hierarchy_type,
                hierarchy_id = excluded.hierarchy_id,
                template_name = excluded.template_name,
                priority = excluded.priority,
                conditional_logic = excluded.conditional_logic,
                is_active = excluded.is_active,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&assignment.id)
        .bind(assignment.hierarchy_type.as_str())
        .bind(&assignment.hierarchy_id)
        .bind(&assignment.template_name)
        .bind(assignment.priority)
        .bind(&conditions_json)
        .bind(assignment.is_active)
        .bind(assignment.created_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(self.db.pool())
        .await?;

        info!(
            assignment = %assignment.id,
            template = %assignment.template_name,
            node = %assignment.hierarchy_id,
            "Assignment saved"
        );
        Ok(())
    }

    /// Get an assignment by id
    pub async fn get(&self, id: &str) -> Result<Option<Assignment>> {
        let row: Option<AssignmentRow> =
            sqlx::query_as("SELECT * FROM assignments WHERE id = ?")
                .bind(id)
                .fetch_optional(self.db.pool())
                .await?;

        row.map(|r| r.into_assignment()).transpose()
    }

    /// List all assignments, most recently updated first
    pub async fn list(&self) -> Result<Vec<Assignment>> {
        let rows: Vec<AssignmentRow> =
            sqlx::query_as("SELECT * FROM assignments ORDER BY updated_at DESC")
                .fetch_all(self.db.pool())
                .await?;

        rows.into_iter().map(|r| r.into_assignment()).collect()
    }

    /// List active assignments attached to one hierarchy node
    pub async fn for_node(
        &self,
        level: HierarchyLevel,
        node_id: &str,
    ) -> Result<Vec<Assignment>> {
        let rows: Vec<AssignmentRow> = sqlx::query_as(
            r#"
            SELECT * FROM assignments
            WHERE hierarchy_type = ? AND hierarchy_id = ? AND is_active = 1
            ORDER BY priority DESC
            "#,
        )
        .bind(level.as_str())
        .bind(node_id)
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter().map(|r| r.into_assignment()).collect()
    }

    /// Collect active assignments for every node in an ancestor chain
    pub async fn for_chain(&self, chain: &[HierarchyNode]) -> Result<Vec<Assignment>> {
        let mut assignments = Vec::new();
        for node in chain {
            assignments.extend(self.for_node(node.level, &node.id).await?);
        }
        Ok(assignments)
    }

    /// Remove an assignment by id
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM assignments WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(assignment = %id, "Assignment deleted");
        }
        Ok(deleted)
    }

    /// Deactivate an assignment by id
    pub async fn deactivate(&self, id: &str) -> Result<bool> {
        let result =
            sqlx::query("UPDATE assignments SET is_active = 0, updated_at = ? WHERE id = ?")
                .bind(Utc::now().to_rfc3339())
                .bind(id)
                .execute(self.db.pool())
                .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Database row for the assignments table
#[derive(Debug, FromRow)]
struct AssignmentRow {
    id: String,
    hierarchy_type: String,
    hierarchy_id: String,
    template_name: String,
    priority: i64,
    conditional_logic: Option<String>,
    is_active: bool,
    created_at: String,
    updated_at: String,
}

impl AssignmentRow {
    fn into_assignment(self) -> Result<Assignment> {
        let hierarchy_type = HierarchyLevel::parse(&self.hierarchy_type).ok_or_else(|| {
            Error::InvalidInput(format!("Unknown hierarchy level: {}", self.hierarchy_type))
        })?;

        let conditional_logic: Vec<Condition> = self
            .conditional_logic
            .as_ref()
            .map(|s| serde_json::from_str(s).unwrap_or_default())
            .unwrap_or_default();

        Ok(Assignment {
            id: self.id,
            hierarchy_type,
            hierarchy_id: self.hierarchy_id,
            template_name: self.template_name,
            priority: self.priority,
            conditional_logic,
            is_active: self.is_active,
            created_at: parse_timestamp(&self.created_at),
            updated_at: parse_timestamp(&self.updated_at),
        })
    }
}
