//! Turns an empty [`Store`] into one with at least one runnable template.
//!
//! Two paths, both landing on the same `upsert_*` methods `core/src/store/mod.rs`
//! reserves for this purpose: a file-based loader for operators who hand us a
//! real template (`--templates path.toml`), and an in-code seed for the
//! `agentd run` convenience path — grounded on `gateway/tests/common.rs`'s
//! `spawn_stack` fixture, the one place in this workspace that already builds
//! a template from scratch end to end.

use std::path::Path;

use agentd_core::{
    AgentInstance, ExecutionPolicy, InstanceStatus, LlmPolicy, Prompts, ReasoningStrategy,
    SelectionStrategy, Store, Template, TemplateVersion, TemplateVersionSettings, ToolCategory,
    ToolPolicy, ToolRecord,
};
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("read templates file: {0}")]
    Read(#[from] std::io::Error),
    #[error("parse templates file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error(transparent)]
    Store(#[from] agentd_core::StoreError),
}

/// Shape of a `--templates` file: the same rows the (absent) admin HTTP CRUD
/// surface would accept, loaded once at process start instead (§6, §store
/// doc comment "declarative bootstrap writes"). Every field type already
/// derives `Deserialize` in `agentd_core::domain`, so this is pure passthrough.
#[derive(Debug, Deserialize, Default)]
struct TemplatesFile {
    #[serde(default)]
    templates: Vec<Template>,
    #[serde(default)]
    template_versions: Vec<TemplateVersion>,
    #[serde(default)]
    tools: Vec<ToolRecord>,
    #[serde(default)]
    instances: Vec<AgentInstance>,
}

/// Loads a TOML templates file and upserts every row it declares. Order
/// matters only in that a `template_version` referencing a `template_id` and
/// an `instance` referencing both should appear in the same file; the store
/// itself enforces no foreign-key ordering, so this just upserts in
/// declaration order.
pub async fn load_templates_file(store: &dyn Store, path: &Path) -> Result<(), BootstrapError> {
    let raw = std::fs::read_to_string(path)?;
    let file: TemplatesFile = toml::from_str(&raw)?;

    for template in &file.templates {
        store.upsert_template(template).await?;
    }
    for version in &file.template_versions {
        store.upsert_template_version(version).await?;
    }
    for tool in &file.tools {
        store.upsert_tool(tool).await?;
    }
    for instance in &file.instances {
        store.upsert_instance(instance).await?;
    }
    Ok(())
}

/// Seeds a minimal single-tool template under `name` if one doesn't already
/// exist, so `agentd run --template <name> "<message>"` works against a
/// fresh store without requiring a templates file first. Returns the
/// existing or newly-created [`Template`].
pub async fn ensure_default_template(
    store: &dyn Store,
    name: &str,
) -> Result<Template, BootstrapError> {
    if let Some(template) = store.get_template_by_name(name).await? {
        return Ok(template);
    }

    let template_id = Uuid::new_v4().to_string();
    let version_id = Uuid::new_v4().to_string();

    let template = Template {
        id: template_id.clone(),
        name: name.to_string(),
        description: "Default single-tool template, seeded for local testing.".to_string(),
        active_version_id: Some(version_id.clone()),
    };
    let settings = TemplateVersionSettings {
        base_class: ReasoningStrategy::Simple,
        llm: LlmPolicy {
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            api_key_ref: "OPENAI_API_KEY".to_string(),
            temperature: 0.2,
            max_tokens: 1024,
            streaming: false,
        },
        execution: ExecutionPolicy {
            max_iterations: 10,
            time_budget_seconds: 120,
        },
        tool_policy: ToolPolicy {
            max_tools_in_prompt: 4,
            selection_strategy: SelectionStrategy::Static,
            ..Default::default()
        },
        prompts: Prompts {
            system: "You are a helpful assistant. {available_tools}".to_string(),
            initial_user: "{message}".to_string(),
            clarification: "{message}".to_string(),
        },
        rules: vec![],
        mcp: None,
    };
    let template_version = TemplateVersion {
        id: version_id.clone(),
        template_id: template_id.clone(),
        version: 1,
        settings,
        tool_names: vec!["FinalAnswerTool".to_string()],
        active: true,
    };
    let tool = ToolRecord {
        id: Uuid::new_v4().to_string(),
        name: "FinalAnswerTool".to_string(),
        description: "Finishes the session with an answer.".to_string(),
        entrypoint: "agentd_core.tools.final_answer:FinalAnswerTool".to_string(),
        config: serde_json::json!({}),
        embedding: None,
        category: ToolCategory::Utility,
        active: true,
    };
    let instance = AgentInstance {
        id: Uuid::new_v4().to_string(),
        name: format!("{name}-1"),
        display_name: name.to_string(),
        template_id: template_id.clone(),
        template_version_id: version_id.clone(),
        status: InstanceStatus::Offline,
        current_session_id: None,
        enabled: true,
        auto_start: true,
        priority: 0,
        heartbeat_at: None,
        sessions_count: 0,
        messages_count: 0,
        tool_calls_count: 0,
        errors_count: 0,
        last_error: None,
        last_error_at: None,
    };

    store.upsert_template(&template).await?;
    store.upsert_template_version(&template_version).await?;
    store.upsert_tool(&tool).await?;
    store.upsert_instance(&instance).await?;

    Ok(template)
}
