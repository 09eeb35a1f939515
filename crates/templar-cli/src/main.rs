//! Templar CLI - template injection and expansion engine

use clap::{Parser, Subcommand};
use templar_core::assignment::{
    Assignment, Condition, ConditionContext, ConditionOperator, ContextValue, HierarchyLevel,
    HierarchyNode,
};
use templar_core::config::Config;
use templar_core::service::{ErrorResponse, ExpandRequest, InjectionService};
use templar_core::store::{migrations, Database, DatabaseConfig};
use templar_core::template::{Component, ComponentType, Priority, Template};

#[derive(Parser)]
#[command(name = "templar")]
#[command(author, version, about = "Template injection and expansion engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, PartialEq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Expand a template for a task description
    Expand {
        /// The user task description (preserved verbatim in the output)
        task: String,
        /// Template name; omit to resolve through the hierarchy chain
        #[arg(short, long)]
        template: Option<String>,
        /// Hierarchy chain node as level:id (repeatable, e.g. task:t-42)
        #[arg(short, long)]
        node: Vec<String>,
        /// Context entry for conditional assignments as key=value (repeatable)
        #[arg(short, long)]
        context: Vec<String>,
        /// Abort on the first structural problem instead of degrading
        #[arg(long)]
        strict: bool,
    },

    /// Manage instruction components
    Components {
        #[command(subcommand)]
        action: ComponentAction,
    },

    /// Manage templates
    Templates {
        #[command(subcommand)]
        action: TemplateAction,
    },

    /// Manage template assignments
    Assignments {
        #[command(subcommand)]
        action: AssignmentAction,
    },

    /// Show recent expansion audit records
    History {
        #[arg(short, long, default_value_t = 10)]
        limit: u32,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run health check
    Doctor,
}

#[derive(Subcommand)]
enum ComponentAction {
    /// List active components
    List {
        /// Filter by component type (action, group, sequence, validation)
        #[arg(short = 't', long)]
        r#type: Option<String>,
    },
    /// Show component details
    Show { name: String },
    /// Create or update a component
    Create {
        /// Fully qualified name, e.g. action::run_tests
        name: String,
        /// Instruction text substituted at expansion time
        text: String,
        /// Required tool (repeatable)
        #[arg(long)]
        tool: Vec<String>,
        /// Estimated duration in minutes
        #[arg(short, long, default_value_t = 1)]
        duration: u32,
        /// Priority (low, medium, high, critical)
        #[arg(short, long, default_value = "medium")]
        priority: String,
    },
    /// Deactivate a component (soft delete)
    Deactivate { name: String },
    /// Permanently delete a component
    Delete { name: String },
}

#[derive(Subcommand)]
enum TemplateAction {
    /// List active templates
    List,
    /// Show template details
    Show { name: String },
    /// Create or update a template
    Create {
        name: String,
        /// Template body with {{type::name}} and {{USER_TASK}} placeholders
        content: String,
        /// Fallback ordinal for the task text when markers are absent
        #[arg(long, default_value_t = 1)]
        position: u32,
    },
    /// Validate a template's structure and references
    Validate {
        name: String,
        #[arg(long)]
        strict: bool,
    },
    /// Recompute a template's cached tool and duration roll-ups
    Refresh { name: String },
    /// Deactivate a template (soft delete)
    Deactivate { name: String },
    /// Permanently delete a template and its assignments
    Delete { name: String },
}

#[derive(Subcommand)]
enum AssignmentAction {
    /// List all assignments
    List,
    /// Assign a template to a hierarchy node
    Assign {
        /// Hierarchy level (project, milestone, phase, task, subtask)
        level: String,
        /// Node identifier
        node_id: String,
        /// Template to assign
        template: String,
        /// Resolution priority (higher wins)
        #[arg(short, long, default_value_t = 0)]
        priority: i64,
        /// Condition as field:operator:value (repeatable)
        #[arg(short, long)]
        condition: Vec<String>,
    },
    /// Deactivate an assignment
    Deactivate { id: String },
    /// Remove an assignment
    Remove { id: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("templar=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let open_service = || async {
        let config = Config::load()?;
        let db = Database::new(DatabaseConfig::default()).await?;
        anyhow::Ok(InjectionService::new(db, config))
    };

    match cli.command {
        Commands::Expand {
            task,
            template,
            node,
            context,
            strict,
        } => {
            let service = open_service().await?;
            cmd_expand(&service, task, template, node, context, strict, cli.format).await
        }

        Commands::Components { action } => {
            let service = open_service().await?;
            cmd_components(&service, action, cli.quiet).await
        }

        Commands::Templates { action } => {
            let service = open_service().await?;
            cmd_templates(&service, action, cli.quiet).await
        }

        Commands::Assignments { action } => {
            let service = open_service().await?;
            cmd_assignments(&service, action, cli.quiet).await
        }

        Commands::History { limit } => {
            let service = open_service().await?;
            cmd_history(&service, limit, cli.format).await
        }

        Commands::Config { action } => cmd_config(action, cli.quiet),

        Commands::Doctor => cmd_doctor(cli.quiet).await,
    }
}

fn parse_chain(nodes: &[String]) -> anyhow::Result<Vec<HierarchyNode>> {
    nodes
        .iter()
        .map(|spec| {
            let (level, id) = spec
                .split_once(':')
                .ok_or_else(|| anyhow::anyhow!("Expected level:id, got '{}'", spec))?;
            let level = HierarchyLevel::parse(level)
                .ok_or_else(|| anyhow::anyhow!("Unknown hierarchy level: {}", level))?;
            Ok(HierarchyNode::new(level, id))
        })
        .collect()
}

fn parse_context(entries: &[String]) -> anyhow::Result<ConditionContext> {
    let mut context = ConditionContext::new();
    for entry in entries {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("Expected key=value, got '{}'", entry))?;
        let value = if let Ok(b) = value.parse::<bool>() {
            ContextValue::Bool(b)
        } else if let Ok(n) = value.parse::<f64>() {
            ContextValue::Number(n)
        } else {
            ContextValue::String(value.to_string())
        };
        context.insert(key.to_string(), value);
    }
    Ok(context)
}

fn parse_condition(spec: &str) -> anyhow::Result<Condition> {
    let mut parts = spec.splitn(3, ':');
    let (field, op, value) = match (parts.next(), parts.next(), parts.next()) {
        (Some(f), Some(o), Some(v)) => (f, o, v),
        _ => anyhow::bail!("Expected field:operator:value, got '{}'", spec),
    };
    let operator: ConditionOperator = serde_json::from_value(serde_json::Value::String(
        op.to_string(),
    ))
    .map_err(|_| anyhow::anyhow!("Unknown condition operator: {}", op))?;
    let value = if let Ok(b) = value.parse::<bool>() {
        ContextValue::Bool(b)
    } else if let Ok(n) = value.parse::<f64>() {
        ContextValue::Number(n)
    } else {
        ContextValue::String(value.to_string())
    };
    Ok(Condition::new(field, operator, value))
}

async fn cmd_expand(
    service: &InjectionService,
    task: String,
    template: Option<String>,
    nodes: Vec<String>,
    context: Vec<String>,
    strict: bool,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let request = ExpandRequest {
        template_name: template,
        user_task_text: task,
        hierarchy_chain: parse_chain(&nodes)?,
        hierarchy_context: parse_context(&context)?,
        strict: Some(strict),
    };

    match service.expand(&request).await {
        Ok(response) => {
            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&response)?);
                }
                OutputFormat::Text => {
                    println!("{}", response.expanded_instructions);
                    let meta = &response.template_metadata;
                    eprintln!(
                        "# template={} components={} elapsed={}ms validation={}",
                        meta.template_name,
                        meta.component_count,
                        meta.expansion_time_ms,
                        if meta.validation_passed { "ok" } else { "failed" }
                    );
                    for warning in &meta.validation_warnings {
                        eprintln!("# warning: {}", warning);
                    }
                }
            }
            Ok(())
        }
        Err(e) => {
            if format == OutputFormat::Json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&ErrorResponse::from_error(&e))?
                );
            }
            Err(e.into())
        }
    }
}

async fn cmd_components(
    service: &InjectionService,
    action: ComponentAction,
    quiet: bool,
) -> anyhow::Result<()> {
    let components = service.components();
    match action {
        ComponentAction::List { r#type } => {
            let list = match r#type.as_deref() {
                Some(t) => {
                    let component_type = ComponentType::parse(t)
                        .ok_or_else(|| anyhow::anyhow!("Unknown component type: {}", t))?;
                    components.list_by_type(component_type).await?
                }
                None => components.list().await?,
            };
            if list.is_empty() {
                if !quiet {
                    println!("No components found.");
                    println!("\nCreate one with: templar components create <type::name> <text>");
                }
            } else {
                for c in list {
                    println!(
                        "  {} ({} min, {})",
                        c.name,
                        c.estimated_duration,
                        c.priority.as_str()
                    );
                }
            }
        }
        ComponentAction::Show { name } => match components.get_any(&name).await? {
            Some(c) => {
                println!("Component: {}", c.name);
                println!("  Type: {}", c.component_type.as_str());
                println!("  Priority: {}", c.priority.as_str());
                println!("  Duration: {} min", c.estimated_duration);
                if !c.required_tools.is_empty() {
                    println!(
                        "  Tools: {}",
                        c.required_tools.iter().cloned().collect::<Vec<_>>().join(", ")
                    );
                }
                println!("  Active: {}", c.is_active);
                println!("  Updated: {}", c.updated_at.format("%Y-%m-%d %H:%M:%S"));
                println!("\n{}", c.instruction_text);
            }
            None => anyhow::bail!("Component '{}' not found.", name),
        },
        ComponentAction::Create {
            name,
            text,
            tool,
            duration,
            priority,
        } => {
            let component = Component::new(&name, &text)?
                .with_tools(tool)
                .with_duration(duration)
                .with_priority(Priority::parse(&priority));
            components.save(&component).await?;
            if !quiet {
                println!("Component '{}' saved.", name);
            }
        }
        ComponentAction::Deactivate { name } => {
            if components.deactivate(&name).await? {
                if !quiet {
                    println!("Component '{}' deactivated.", name);
                }
            } else {
                anyhow::bail!("Component '{}' not found.", name);
            }
        }
        ComponentAction::Delete { name } => {
            if components.delete(&name).await? {
                if !quiet {
                    println!("Component '{}' deleted.", name);
                }
            } else {
                anyhow::bail!("Component '{}' not found.", name);
            }
        }
    }
    Ok(())
}

async fn cmd_templates(
    service: &InjectionService,
    action: TemplateAction,
    quiet: bool,
) -> anyhow::Result<()> {
    let templates = service.templates();
    match action {
        TemplateAction::List => {
            let list = templates.list().await?;
            if list.is_empty() {
                if !quiet {
                    println!("No templates found.");
                    println!("\nCreate one with: templar templates create <name> <content>");
                }
            } else {
                for t in list {
                    println!(
                        "  {} (v{}, ~{} min)",
                        t.name, t.version, t.estimated_duration
                    );
                }
            }
        }
        TemplateAction::Show { name } => match templates.get_any(&name).await? {
            Some(t) => {
                println!("Template: {}", t.name);
                println!("  Version: {}", t.version);
                println!("  User task position: {}", t.user_task_position);
                println!("  Estimated duration: {} min", t.estimated_duration);
                if !t.required_tools.is_empty() {
                    println!(
                        "  Tools: {}",
                        t.required_tools.iter().cloned().collect::<Vec<_>>().join(", ")
                    );
                }
                println!("  Active: {}", t.is_active);
                println!("\n{}", t.template_content);
            }
            None => anyhow::bail!("Template '{}' not found.", name),
        },
        TemplateAction::Create {
            name,
            content,
            position,
        } => {
            let mut template = Template::new(&name, &content).with_user_task_position(position);
            if let Some(existing) = templates.get_any(&name).await? {
                template.version = existing.version + 1;
                template.created_at = existing.created_at;
            }
            templates.save(&template).await?;
            service.invalidate_template(&name);
            // Populate the tool/duration caches from the current components
            templates.refresh_derived(&name, service.components()).await?;
            if !quiet {
                println!("Template '{}' saved.", name);
            }
        }
        TemplateAction::Validate { name, strict } => {
            let template = templates
                .get_any(&name)
                .await?
                .ok_or_else(|| anyhow::anyhow!("Template '{}' not found.", name))?;
            let report = templates
                .validate(&template, service.components(), strict)
                .await?;
            if report.warnings.is_empty() {
                println!("Template '{}' is valid.", name);
            } else {
                println!("Template '{}': {} warning(s)", name, report.warnings.len());
                for warning in &report.warnings {
                    println!("  - {}", warning);
                }
            }
        }
        TemplateAction::Refresh { name } => {
            let template = templates.refresh_derived(&name, service.components()).await?;
            service.invalidate_template(&name);
            if !quiet {
                println!(
                    "Template '{}' refreshed: ~{} min, {} tool(s).",
                    name,
                    template.estimated_duration,
                    template.required_tools.len()
                );
            }
        }
        TemplateAction::Deactivate { name } => {
            if templates.deactivate(&name).await? {
                service.invalidate_template(&name);
                if !quiet {
                    println!("Template '{}' deactivated.", name);
                }
            } else {
                anyhow::bail!("Template '{}' not found.", name);
            }
        }
        TemplateAction::Delete { name } => {
            if templates.delete(&name).await? {
                service.invalidate_template(&name);
                if !quiet {
                    println!("Template '{}' deleted.", name);
                }
            } else {
                anyhow::bail!("Template '{}' not found.", name);
            }
        }
    }
    Ok(())
}

async fn cmd_assignments(
    service: &InjectionService,
    action: AssignmentAction,
    quiet: bool,
) -> anyhow::Result<()> {
    let assignments = service.assignments();
    match action {
        AssignmentAction::List => {
            let list = assignments.list().await?;
            if list.is_empty() {
                if !quiet {
                    println!("No assignments found.");
                }
            } else {
                for a in list {
                    let status = if a.is_active { "" } else { " [inactive]" };
                    let conditional = if a.conditional_logic.is_empty() {
                        String::new()
                    } else {
                        format!(", {} condition(s)", a.conditional_logic.len())
                    };
                    println!(
                        "  {} - {}:{} -> {} (priority {}{}){}",
                        &a.id[..8],
                        a.hierarchy_type.as_str(),
                        a.hierarchy_id,
                        a.template_name,
                        a.priority,
                        conditional,
                        status
                    );
                }
            }
        }
        AssignmentAction::Assign {
            level,
            node_id,
            template,
            priority,
            condition,
        } => {
            let level = HierarchyLevel::parse(&level)
                .ok_or_else(|| anyhow::anyhow!("Unknown hierarchy level: {}", level))?;
            let conditions = condition
                .iter()
                .map(|spec| parse_condition(spec))
                .collect::<anyhow::Result<Vec<_>>>()?;

            let assignment = Assignment::new(level, &node_id, &template)
                .with_priority(priority)
                .with_conditions(conditions);
            assignments.save(&assignment).await?;
            if !quiet {
                println!("Assignment created: {}", assignment.id);
            }
        }
        AssignmentAction::Deactivate { id } => {
            if assignments.deactivate(&id).await? {
                if !quiet {
                    println!("Assignment '{}' deactivated.", id);
                }
            } else {
                anyhow::bail!("Assignment '{}' not found.", id);
            }
        }
        AssignmentAction::Remove { id } => {
            if assignments.delete(&id).await? {
                if !quiet {
                    println!("Assignment '{}' removed.", id);
                }
            } else {
                anyhow::bail!("Assignment '{}' not found.", id);
            }
        }
    }
    Ok(())
}

async fn cmd_history(
    service: &InjectionService,
    limit: u32,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let records = service.recent_expansions(limit).await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&records)?),
        OutputFormat::Text => {
            if records.is_empty() {
                println!("No expansions recorded yet.");
            } else {
                for r in records {
                    println!(
                        "  {} {} (v{}) {} components, {}ms - {}",
                        r.expanded_at.format("%Y-%m-%d %H:%M:%S"),
                        r.template_name,
                        r.template_version,
                        r.component_count,
                        r.expansion_time_ms,
                        truncate(&r.original_description, 60)
                    );
                }
            }
        }
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let prefix: String = s.chars().take(max).collect();
        format!("{}...", prefix)
    }
}

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            println!("{}", config.get(&key)?);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            for (key, value) in config.list() {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Path => {
            println!("{}", Config::config_path()?.display());
        }
    }
    Ok(())
}

async fn cmd_doctor(quiet: bool) -> anyhow::Result<()> {
    if !quiet {
        println!("Templar Health Check");
        println!("====================");
        println!();
    }

    let mut all_ok = true;

    match Config::load() {
        Ok(config) => {
            if !quiet {
                println!("[OK] Configuration: Valid");
                match &config.expansion.default_template {
                    Some(name) => println!("     Default template: {}", name),
                    None => println!("     Default template: (not set)"),
                }
            }
        }
        Err(e) => {
            all_ok = false;
            if !quiet {
                println!("[!!] Configuration: Error - {}", e);
            }
        }
    }

    if !quiet {
        match Config::config_path() {
            Ok(path) => {
                if path.exists() {
                    println!("[OK] Config file: {}", path.display());
                } else {
                    println!("[--] Config file: {} (using defaults)", path.display());
                }
            }
            Err(e) => println!("[!!] Config file: Error - {}", e),
        }
    }

    match Database::new(DatabaseConfig::default()).await {
        Ok(db) => {
            if !quiet {
                println!("[OK] Database: Connected");
                match migrations::migration_status(db.pool()).await {
                    Ok(status) => {
                        if status.needs_migration {
                            println!(
                                "[!!] Database: Migrations pending (v{} -> v{})",
                                status.current_version, status.target_version
                            );
                        } else {
                            println!("[OK] Database: Schema v{}", status.current_version);
                        }
                    }
                    Err(e) => println!("[!!] Database: Migration check failed - {}", e),
                }

                let service = InjectionService::new(db, Config::load().unwrap_or_default());
                let components = service.components().count().await.unwrap_or(0);
                let templates = service.templates().count().await.unwrap_or(0);
                println!("     Components: {}", components);
                println!("     Templates: {}", templates);
            }
        }
        Err(e) => {
            all_ok = false;
            if !quiet {
                println!("[!!] Database: Failed to initialize - {}", e);
            }
        }
    }

    if !quiet {
        println!();
        if all_ok {
            println!("All checks passed!");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }

    Ok(())
}
