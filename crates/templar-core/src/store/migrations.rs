//! Database migrations
//!
//! Manages SQLite schema migrations for templar. Migrations are versioned
//! and applied automatically on database connection.

use sqlx::SqlitePool;

/// Current schema version
pub const CURRENT_VERSION: i32 = 2;

/// SQL for creating the migrations tracking table
const CREATE_MIGRATIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS _migrations (
        version INTEGER PRIMARY KEY NOT NULL,
        applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
"#;

/// Migration 1: components, templates, assignments
const MIGRATION_V1: &str = r#"
    -- Reusable instruction fragments, addressed by {type}::{identifier} name
    CREATE TABLE IF NOT EXISTS components (
        name TEXT PRIMARY KEY NOT NULL,
        component_type TEXT NOT NULL CHECK (component_type IN ('action', 'group', 'sequence', 'validation')),
        instruction_text TEXT NOT NULL CHECK (length(instruction_text) > 0),
        required_tools TEXT NOT NULL DEFAULT '[]',
        estimated_duration INTEGER NOT NULL DEFAULT 1 CHECK (estimated_duration >= 1),
        priority TEXT NOT NULL DEFAULT 'medium' CHECK (priority IN ('low', 'medium', 'high', 'critical')),
        is_active INTEGER NOT NULL DEFAULT 1,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );

    CREATE INDEX IF NOT EXISTS idx_components_type ON components(component_type);
    CREATE INDEX IF NOT EXISTS idx_components_active ON components(is_active);

    -- Placeholder-bearing templates with denormalized cost caches
    CREATE TABLE IF NOT EXISTS templates (
        name TEXT PRIMARY KEY NOT NULL,
        template_content TEXT NOT NULL,
        user_task_position INTEGER NOT NULL DEFAULT 1 CHECK (user_task_position >= 1),
        required_tools TEXT NOT NULL DEFAULT '[]',
        estimated_duration INTEGER NOT NULL DEFAULT 0,
        is_active INTEGER NOT NULL DEFAULT 1,
        version INTEGER NOT NULL DEFAULT 1,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );

    CREATE INDEX IF NOT EXISTS idx_templates_active ON templates(is_active);

    -- Template bindings onto the five-level hierarchy
    CREATE TABLE IF NOT EXISTS assignments (
        id TEXT PRIMARY KEY NOT NULL,
        hierarchy_type TEXT NOT NULL CHECK (hierarchy_type IN ('project', 'milestone', 'phase', 'task', 'subtask')),
        hierarchy_id TEXT NOT NULL,
        template_name TEXT NOT NULL REFERENCES templates(name) ON DELETE CASCADE,
        priority INTEGER NOT NULL DEFAULT 0,
        conditional_logic TEXT NOT NULL DEFAULT '[]',
        is_active INTEGER NOT NULL DEFAULT 1,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );

    CREATE INDEX IF NOT EXISTS idx_assignments_node ON assignments(hierarchy_type, hierarchy_id);
    CREATE INDEX IF NOT EXISTS idx_assignments_template ON assignments(template_name);

    -- At most one active, unconditional assignment per (node, template)
    CREATE UNIQUE INDEX IF NOT EXISTS idx_assignments_unconditional_unique
        ON assignments(hierarchy_type, hierarchy_id, template_name)
        WHERE is_active = 1 AND conditional_logic = '[]';
"#;

/// Migration 2: expansion audit log
const MIGRATION_V2: &str = r#"
    -- One row per task-creation expansion, retained for audit/debugging
    CREATE TABLE IF NOT EXISTS expansion_log (
        id TEXT PRIMARY KEY NOT NULL,
        template_name TEXT NOT NULL,
        template_version INTEGER NOT NULL,
        original_description TEXT NOT NULL,
        expanded_instructions TEXT NOT NULL,
        component_count INTEGER NOT NULL,
        expansion_time_ms INTEGER NOT NULL,
        validation_passed INTEGER NOT NULL,
        validation_warnings TEXT NOT NULL DEFAULT '[]',
        preserve_original INTEGER NOT NULL DEFAULT 1,
        expanded_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );

    CREATE INDEX IF NOT EXISTS idx_expansion_log_template ON expansion_log(template_name);
    CREATE INDEX IF NOT EXISTS idx_expansion_log_expanded_at ON expansion_log(expanded_at);
"#;

/// Get the current schema version from the database
async fn get_current_version(pool: &SqlitePool) -> anyhow::Result<i32> {
    // Ensure migrations table exists
    sqlx::raw_sql(CREATE_MIGRATIONS_TABLE).execute(pool).await?;

    // Get the latest version
    let row: Option<(i32,)> = sqlx::query_as("SELECT MAX(version) FROM _migrations")
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|(v,)| v).unwrap_or(0))
}

/// Record that a migration has been applied
async fn record_migration(pool: &SqlitePool, version: i32) -> anyhow::Result<()> {
    sqlx::query("INSERT INTO _migrations (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    let current_version = get_current_version(pool).await?;

    tracing::info!(
        current_version = current_version,
        target_version = CURRENT_VERSION,
        "Checking database migrations"
    );

    if current_version >= CURRENT_VERSION {
        tracing::debug!("Database is up to date");
        return Ok(());
    }

    if current_version < 1 {
        tracing::info!("Applying migration v1: Components, templates, assignments");
        sqlx::raw_sql(MIGRATION_V1).execute(pool).await?;
        record_migration(pool, 1).await?;
    }

    if current_version < 2 {
        tracing::info!("Applying migration v2: Expansion audit log");
        sqlx::raw_sql(MIGRATION_V2).execute(pool).await?;
        record_migration(pool, 2).await?;
    }

    tracing::info!("Database migrations completed");
    Ok(())
}

/// Check if the database needs migrations
pub async fn needs_migration(pool: &SqlitePool) -> anyhow::Result<bool> {
    let current_version = get_current_version(pool).await?;
    Ok(current_version < CURRENT_VERSION)
}

/// Get migration status information
pub async fn migration_status(pool: &SqlitePool) -> anyhow::Result<MigrationStatus> {
    let current_version = get_current_version(pool).await?;
    Ok(MigrationStatus {
        current_version,
        target_version: CURRENT_VERSION,
        needs_migration: current_version < CURRENT_VERSION,
    })
}

/// Migration status information
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    /// Current schema version in the database
    pub current_version: i32,
    /// Target schema version (latest)
    pub target_version: i32,
    /// Whether migrations are pending
    pub needs_migration: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test pool")
    }

    #[tokio::test]
    async fn test_migrations_apply_cleanly() {
        let pool = test_pool().await;
        run_migrations(&pool).await.unwrap();
        assert!(!needs_migration(&pool).await.unwrap());
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = test_pool().await;
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let status = migration_status(&pool).await.unwrap();
        assert_eq!(status.current_version, CURRENT_VERSION);
    }

    #[tokio::test]
    async fn test_unconditional_uniqueness_is_enforced_by_schema() {
        let pool = test_pool().await;
        run_migrations(&pool).await.unwrap();

        sqlx::query("INSERT INTO templates (name, template_content) VALUES ('t', '{{USER_TASK}}')")
            .execute(&pool)
            .await
            .unwrap();

        let insert = "INSERT INTO assignments (id, hierarchy_type, hierarchy_id, template_name) \
                      VALUES (?, 'task', 't-1', 't')";
        sqlx::query(insert).bind("a-1").execute(&pool).await.unwrap();

        // Second active, unconditional assignment for the same (node, template)
        let duplicate = sqlx::query(insert).bind("a-2").execute(&pool).await;
        assert!(duplicate.is_err());

        // A conditional one for the same node is fine
        sqlx::query(
            "INSERT INTO assignments (id, hierarchy_type, hierarchy_id, template_name, conditional_logic) \
             VALUES ('a-3', 'task', 't-1', 't', '[{\"field\":\"env\"}]')",
        )
        .execute(&pool)
        .await
        .unwrap();
    }
}
