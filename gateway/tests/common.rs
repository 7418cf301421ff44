//! Shared fixture for the gateway's HTTP tests: a fully wired runtime
//! (in-memory store, one instance, the built-in tool catalog, a scripted
//! [`MockLlm`]) bound to a real `TcpListener` so tests drive it with `reqwest`
//! exactly like a real client would.

use std::sync::Arc;

use agentd_core::domain::{
    AgentInstance, ExecutionPolicy, InstanceStatus, LlmPolicy, Prompts, ReasoningStrategy,
    Template, TemplateVersion, TemplateVersionSettings, ToolCategory, ToolPolicy, ToolRecord,
};
use agentd_core::{Driver, InstancePool, LlmTurn, MockLlm, SqliteStore, Store, ToolCallRequest, ToolCatalog};
use agentd_gateway::GatewayState;
use tokio::net::TcpListener;

pub const TEMPLATE_NAME: &str = "research-assistant";

/// Boots the full stack (store, pool, one idle worker) with `turns` as the
/// scripted LLM replies, and returns the base URL the gateway is listening
/// on. The returned `JoinHandle`s keep the server and worker alive for the
/// duration of the test; the caller just needs to hold on to them.
pub async fn spawn_stack(turns: Vec<LlmTurn>) -> String {
    let store: Arc<dyn Store> = Arc::new(SqliteStore::new(":memory:").expect("open store"));

    let template = Template {
        id: "tpl-1".to_string(),
        name: TEMPLATE_NAME.to_string(),
        description: "test template".to_string(),
        active_version_id: Some("tplv-1".to_string()),
    };
    let settings = TemplateVersionSettings {
        base_class: ReasoningStrategy::Simple,
        llm: LlmPolicy {
            model: "mock".to_string(),
            base_url: None,
            api_key_ref: "none".to_string(),
            temperature: 0.0,
            max_tokens: 256,
            streaming: false,
        },
        execution: ExecutionPolicy {
            max_iterations: 8,
            time_budget_seconds: 60,
        },
        tool_policy: ToolPolicy {
            max_tools_in_prompt: 8,
            ..Default::default()
        },
        prompts: Prompts {
            system: "You are a test agent. {available_tools}".to_string(),
            initial_user: "{message}".to_string(),
            clarification: "{message}".to_string(),
        },
        rules: vec![],
        mcp: None,
    };
    let template_version = TemplateVersion {
        id: "tplv-1".to_string(),
        template_id: "tpl-1".to_string(),
        version: 1,
        settings,
        tool_names: vec!["FinalAnswerTool".to_string()],
        active: true,
    };
    let tool = ToolRecord {
        id: "tool-final-answer".to_string(),
        name: "FinalAnswerTool".to_string(),
        description: "Finishes the session with an answer.".to_string(),
        entrypoint: "agentd_core.tools.final_answer:FinalAnswerTool".to_string(),
        config: serde_json::json!({}),
        embedding: None,
        category: ToolCategory::Utility,
        active: true,
    };
    let instance = AgentInstance {
        id: "inst-1".to_string(),
        name: "research-assistant-1".to_string(),
        display_name: "Research Assistant".to_string(),
        template_id: "tpl-1".to_string(),
        template_version_id: "tplv-1".to_string(),
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

    store.upsert_template(&template).await.expect("seed template");
    store
        .upsert_template_version(&template_version)
        .await
        .expect("seed template version");
    store.upsert_tool(&tool).await.expect("seed tool");
    store.upsert_instance(&instance).await.expect("seed instance");

    let llm = Arc::new(MockLlm::new(turns));
    let catalog = Arc::new(ToolCatalog::new());
    let driver = Arc::new(Driver::new(store.clone(), llm, catalog, None));
    let pool = InstancePool::new(store.clone(), driver);
    pool.spawn_all().await.expect("spawn workers");

    let state = Arc::new(GatewayState {
        store,
        pool,
        embedder: None,
        started_at: std::time::Instant::now(),
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = agentd_gateway::serve_on_listener(listener, state).await;
    });

    format!("http://{addr}")
}

/// A scripted turn that immediately finishes the session with `answer`.
pub fn final_answer_turn(answer: &str) -> LlmTurn {
    LlmTurn {
        content: String::new(),
        tool_calls: vec![ToolCallRequest {
            id: "call-0".to_string(),
            tool_name: "FinalAnswerTool".to_string(),
            arguments: serde_json::json!({ "status": "completed", "answer": answer }),
        }],
        usage: None,
    }
}
