//! Template injection service
//!
//! The request/response boundary consumed by the task-creation workflow.
//! Wires assignment resolution, component snapshot assembly, the pure
//! expansion engine, and audit persistence together behind explicit
//! dependency injection — the service owns its stores, no process-wide
//! singletons.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::assignment::resolver::AssignmentResolver;
use crate::assignment::types::{ConditionContext, HierarchyNode};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::expansion::engine::{ExpandOptions, ExpansionEngine, ExpansionResult};
use crate::store::cache::TtlCache;
use crate::store::component::parse_timestamp;
use crate::store::{AssignmentStore, ComponentStore, Database, TemplateStore};
use crate::template::parser;
use crate::template::types::Template;
use std::time::Duration;

/// An expansion request from the task-creation workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpandRequest {
    /// Explicit template choice; when absent the hierarchy chain decides
    #[serde(default)]
    pub template_name: Option<String>,
    /// The user's original task description, preserved verbatim
    pub user_task_text: String,
    /// Ancestor chain of the node the task is created under
    #[serde(default)]
    pub hierarchy_chain: Vec<HierarchyNode>,
    /// Context for conditional assignment evaluation
    #[serde(default)]
    pub hierarchy_context: ConditionContext,
    /// Strict mode override; falls back to the configured default
    #[serde(default)]
    pub strict: Option<bool>,
}

impl ExpandRequest {
    /// Create a request for a named template
    pub fn for_template(template_name: impl Into<String>, user_task_text: impl Into<String>) -> Self {
        Self {
            template_name: Some(template_name.into()),
            user_task_text: user_task_text.into(),
            hierarchy_chain: Vec::new(),
            hierarchy_context: ConditionContext::new(),
            strict: None,
        }
    }

    /// Create a request resolved through a hierarchy chain
    pub fn for_chain(chain: Vec<HierarchyNode>, user_task_text: impl Into<String>) -> Self {
        Self {
            template_name: None,
            user_task_text: user_task_text.into(),
            hierarchy_chain: chain,
            hierarchy_context: ConditionContext::new(),
            strict: None,
        }
    }

    /// Set strict mode
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = Some(strict);
        self
    }

    /// Set the condition context
    pub fn with_context(mut self, context: ConditionContext) -> Self {
        self.hierarchy_context = context;
        self
    }
}

/// Expansion metadata returned with every response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateMetadata {
    pub template_name: String,
    pub component_count: u32,
    pub expansion_time_ms: u64,
    pub validation_passed: bool,
    pub validation_warnings: Vec<String>,
}

/// A successful expansion response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpandResponse {
    /// Final instructions with all placeholders resolved
    pub expanded_instructions: String,
    /// Expansion metadata for the caller to persist with the task
    pub template_metadata: TemplateMetadata,
    /// The unmodified user task text, echoed for audit pairing
    pub original_task_preserved: String,
}

/// The error response wire shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always false
    pub success: bool,
    /// Human-readable error message
    pub error: String,
    /// Structured details
    pub details: ErrorDetails,
}

/// Structured error details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub validation_errors: Vec<String>,
    pub error_code: String,
    pub timestamp: String,
}

impl ErrorResponse {
    /// Build the wire-shape error response for an engine error
    pub fn from_error(error: &Error) -> Self {
        Self {
            success: false,
            error: error.to_string(),
            details: ErrorDetails {
                validation_errors: vec![error.to_string()],
                error_code: error.code().to_string(),
                timestamp: Utc::now().to_rfc3339(),
            },
        }
    }
}

/// Persisted audit record for one expansion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpansionRecord {
    pub id: String,
    pub template_name: String,
    pub template_version: u32,
    pub original_description: String,
    pub expanded_at: DateTime<Utc>,
    pub expansion_time_ms: u64,
    pub component_count: u32,
    pub preserve_original: bool,
}

/// Orchestrates template resolution, expansion, and audit persistence
pub struct InjectionService {
    db: Database,
    templates: TemplateStore,
    components: ComponentStore,
    assignments: AssignmentStore,
    engine: ExpansionEngine,
    resolver: AssignmentResolver,
    config: Config,
    template_cache: Option<TtlCache<String, Template>>,
}

impl InjectionService {
    /// Create a service over the given database and configuration
    pub fn new(db: Database, config: Config) -> Self {
        let template_cache = config
            .cache
            .enabled
            .then(|| TtlCache::new(Duration::from_secs(config.cache.ttl_secs)));

        Self {
            templates: TemplateStore::new(db.clone()),
            components: ComponentStore::new(db.clone()),
            assignments: AssignmentStore::new(db.clone()),
            engine: ExpansionEngine::new(),
            resolver: AssignmentResolver::new(),
            db,
            config,
            template_cache,
        }
    }

    /// Access the template store (admin surface)
    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    /// Access the component store (admin surface)
    pub fn components(&self) -> &ComponentStore {
        &self.components
    }

    /// Access the assignment store (admin surface)
    pub fn assignments(&self) -> &AssignmentStore {
        &self.assignments
    }

    /// Drop a template from the read cache after a CRUD write
    pub fn invalidate_template(&self, name: &str) {
        if let Some(cache) = &self.template_cache {
            cache.invalidate(&name.to_string());
        }
    }

    /// Expand a template for a task-creation request
    pub async fn expand(&self, request: &ExpandRequest) -> Result<ExpandResponse> {
        let template = self.select_template(request).await?;

        let names = parser::parse(&template.template_content).distinct_references();
        let snapshot = self.components.snapshot(&names).await?;

        let options = ExpandOptions {
            strict: request.strict.unwrap_or(self.config.expansion.strict_default),
            fail_on_warnings: self.config.expansion.fail_on_warnings,
        };
        let result = self
            .engine
            .expand(&template, &request.user_task_text, &snapshot, &options)?;

        if result.expansion_time_ms > self.config.expansion.budget_ms {
            warn!(
                template = %template.name,
                elapsed_ms = result.expansion_time_ms,
                budget_ms = self.config.expansion.budget_ms,
                "Expansion exceeded latency budget"
            );
        }

        self.record_expansion(&template, request, &result).await?;

        info!(
            template = %template.name,
            components = result.component_count,
            warnings = result.validation_warnings.len(),
            "Template expanded"
        );

        Ok(ExpandResponse {
            expanded_instructions: result.expanded_instructions,
            template_metadata: TemplateMetadata {
                template_name: template.name,
                component_count: result.component_count,
                expansion_time_ms: result.expansion_time_ms,
                validation_passed: result.validation_passed,
                validation_warnings: result.validation_warnings,
            },
            original_task_preserved: request.user_task_text.clone(),
        })
    }

    /// Pick the template for a request: explicit name, then assignment
    /// resolution over the chain, then the configured default
    async fn select_template(&self, request: &ExpandRequest) -> Result<Template> {
        if let Some(name) = &request.template_name {
            return self.load_template(name).await;
        }

        if !request.hierarchy_chain.is_empty() {
            let assignments = self.assignments.for_chain(&request.hierarchy_chain).await?;
            if let Some(resolved) = self.resolver.resolve(
                &request.hierarchy_chain,
                &assignments,
                &request.hierarchy_context,
            ) {
                return self.load_template(&resolved.template_name).await;
            }
        }

        // No assignment applies: fall back to the configured default
        match &self.config.expansion.default_template {
            Some(name) => self.load_template(name).await,
            None => Err(Error::InvalidInput(
                "no template assigned for this hierarchy and no default template configured"
                    .to_string(),
            )),
        }
    }

    async fn load_template(&self, name: &str) -> Result<Template> {
        if let Some(cache) = &self.template_cache {
            if let Some(template) = cache.get(&name.to_string()) {
                return Ok(template);
            }
        }

        let template = self
            .templates
            .get(name)
            .await?
            .ok_or_else(|| Error::TemplateNotFound(name.to_string()))?;

        if let Some(cache) = &self.template_cache {
            cache.insert(name.to_string(), template.clone());
        }
        Ok(template)
    }

    /// Persist the audit record paired with the original task text
    async fn record_expansion(
        &self,
        template: &Template,
        request: &ExpandRequest,
        result: &ExpansionResult,
    ) -> Result<()> {
        let warnings_json = serde_json::to_string(&result.validation_warnings)
            .map_err(|e| Error::Other(format!("Failed to serialize warnings: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO expansion_log (
                id, template_name, template_version, original_description,
                expanded_instructions, component_count, expansion_time_ms,
                validation_passed, validation_warnings, preserve_original, expanded_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&template.name)
        .bind(template.version as i64)
        .bind(&request.user_task_text)
        .bind(&result.expanded_instructions)
        .bind(result.component_count as i64)
        .bind(result.expansion_time_ms as i64)
        .bind(result.validation_passed)
        .bind(&warnings_json)
        .bind(true)
        .bind(Utc::now().to_rfc3339())
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    /// Most recent expansion audit records
    pub async fn recent_expansions(&self, limit: u32) -> Result<Vec<ExpansionRecord>> {
        let rows: Vec<ExpansionLogRow> = sqlx::query_as(
            "SELECT * FROM expansion_log ORDER BY expanded_at DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.into_iter().map(|r| r.into_record()).collect())
    }
}

/// Database row for the expansion_log table
#[derive(Debug, sqlx::FromRow)]
#[allow(dead_code)]
struct ExpansionLogRow {
    id: String,
    template_name: String,
    template_version: i64,
    original_description: String,
    expanded_instructions: String,
    component_count: i64,
    expansion_time_ms: i64,
    validation_passed: bool,
    validation_warnings: Option<String>,
    preserve_original: bool,
    expanded_at: String,
}

impl ExpansionLogRow {
    fn into_record(self) -> ExpansionRecord {
        ExpansionRecord {
            id: self.id,
            template_name: self.template_name,
            template_version: self.template_version.max(1) as u32,
            original_description: self.original_description,
            expanded_at: parse_timestamp(&self.expanded_at),
            expansion_time_ms: self.expansion_time_ms.max(0) as u64,
            component_count: self.component_count.max(0) as u32,
            preserve_original: self.preserve_original,
        }
    }
}
