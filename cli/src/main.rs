//! Operator CLI for the agent runtime (§A): run the gateway server
//! in-process, run a one-shot session against a template for local testing,
//! or print the resolved configuration.

mod bootstrap;
mod log_format;
mod logging;

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use agentd_core::{
    select_first_step_tools, ChatOpenAI, Driver, InstancePool, LlmClient, LlmTurn, MockLlm,
    RunOutcome, SessionService, SessionState, SqliteStore, Store, ToolCallRequest, ToolCatalog,
};
use agentd_gateway::GatewayState;
use agentd_protocol::StepEvent;
use clap::{Parser, Subcommand};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Store(#[from] agentd_core::StoreError),
    #[error(transparent)]
    Driver(#[from] agentd_core::DriverError),
    #[error(transparent)]
    Selector(#[from] agentd_core::SelectorError),
    #[error(transparent)]
    Bootstrap(#[from] bootstrap::BootstrapError),
    #[error(transparent)]
    Config(#[from] agentd_config::LoadError),
    #[error(transparent)]
    Gateway(#[from] Box<dyn std::error::Error + Send + Sync>),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("template {0:?} has no active version")]
    NoActiveVersion(String),
}

#[derive(Parser)]
#[command(name = "agentd", about = "Operator CLI for the persistent agent runtime")]
struct Cli {
    /// Use the span/trace-id-prefixed log formatter instead of the default one.
    #[arg(long, global = true, env = "AGENTD_LOG_SPANS")]
    log_spans: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway's HTTP server (instance pool + `/v1/chat/completions`)
    /// until interrupted.
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: String,
        #[arg(long, default_value = "agentd.db", env = "DATABASE_URL")]
        db: String,
        /// TOML file of templates/template_versions/tools/instances to load
        /// at start. Without one, a default single-tool template is seeded.
        #[arg(long)]
        templates: Option<PathBuf>,
        #[command(flatten)]
        llm: LlmArgs,
    },
    /// Run one session against a template directly, outside the instance
    /// pool, for local testing from the command line.
    Run {
        /// Logical template name. Seeded automatically if absent and no
        /// `--templates` file was given.
        #[arg(long, default_value = "local-assistant")]
        template: String,
        /// The task text for the session's first user message.
        message: String,
        #[arg(long, default_value = ":memory:", env = "DATABASE_URL")]
        db: String,
        #[arg(long)]
        templates: Option<PathBuf>,
        #[command(flatten)]
        llm: LlmArgs,
    },
    /// Load config the same way `Serve`/`Run` do and print what was resolved.
    Config {
        #[arg(long, default_value = "agentd.db", env = "DATABASE_URL")]
        db: String,
    },
}

#[derive(clap::Args)]
struct LlmArgs {
    #[arg(long, default_value = "gpt-4o-mini", env = "OPENAI_MODEL")]
    model: String,
    #[arg(long, env = "OPENAI_BASE_URL")]
    base_url: Option<String>,
    /// Name of the environment variable holding the API key.
    #[arg(long, default_value = "OPENAI_API_KEY")]
    api_key_env: String,
    /// Skip the real provider and reply with a canned final answer; for
    /// exercising the loop without network access or a key on hand.
    #[arg(long)]
    mock: bool,
}

fn build_llm(args: &LlmArgs) -> Result<Arc<dyn LlmClient>, CliError> {
    if args.mock {
        return Ok(Arc::new(MockLlm::fixed(LlmTurn {
            content: String::new(),
            tool_calls: vec![ToolCallRequest {
                id: "mock-0".to_string(),
                tool_name: "FinalAnswerTool".to_string(),
                arguments: serde_json::json!({
                    "status": "completed",
                    "answer": "this is a mock response (--mock)",
                }),
            }],
            usage: None,
        })));
    }
    let api_key = agentd_config::resolve_api_key_ref(&args.api_key_env)?;
    Ok(Arc::new(ChatOpenAI::new(
        &api_key,
        args.base_url.as_deref(),
        &args.model,
    )))
}

fn print_event(event: &StepEvent) {
    eprintln!("[{}] {}", event.kind(), event.data_value());
}

async fn cmd_serve(
    addr: String,
    db: String,
    templates: Option<PathBuf>,
    llm_args: LlmArgs,
) -> Result<(), CliError> {
    agentd_config::load_and_apply("agentd", None)?;
    let store: Arc<dyn Store> = Arc::new(SqliteStore::new(db)?);

    match &templates {
        Some(path) => bootstrap::load_templates_file(&*store, path).await?,
        None => {
            bootstrap::ensure_default_template(&*store, "local-assistant").await?;
        }
    }

    let llm = build_llm(&llm_args)?;
    let catalog = Arc::new(ToolCatalog::new());
    let driver = Arc::new(Driver::new(store.clone(), llm, catalog, None));
    let pool = InstancePool::new(store.clone(), driver);
    let handles = pool.spawn_all().await?;

    let state = Arc::new(GatewayState {
        store,
        pool: pool.clone(),
        embedder: None,
        started_at: std::time::Instant::now(),
    });

    tokio::select! {
        result = agentd_gateway::serve(&addr, state) => {
            result.map_err(CliError::Gateway)?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("ctrl-c received, draining in-flight steps before exit");
            pool.shutdown().await;
            for handle in handles {
                let _ = handle.await;
            }
        }
    }
    Ok(())
}

async fn cmd_run(
    template_name: String,
    message: String,
    db: String,
    templates: Option<PathBuf>,
    llm_args: LlmArgs,
) -> Result<(), CliError> {
    agentd_config::load_and_apply("agentd", None)?;
    let store: Arc<dyn Store> = Arc::new(SqliteStore::new(db)?);

    if let Some(path) = &templates {
        bootstrap::load_templates_file(&*store, path).await?;
    }
    let template = match store.get_template_by_name(&template_name).await? {
        Some(template) => template,
        None => bootstrap::ensure_default_template(&*store, &template_name).await?,
    };
    let version_id = template
        .active_version_id
        .clone()
        .ok_or_else(|| CliError::NoActiveVersion(template_name.clone()))?;
    let template_version = store.get_template_version(&version_id).await?;
    let catalog_tools = store.list_tools(&template_version.tool_names).await?;

    let llm = build_llm(&llm_args)?;
    let catalog = Arc::new(ToolCatalog::new());
    let driver = Driver::new(store.clone(), llm, catalog, None);
    let service = SessionService::new(store.clone());

    let task_text = message;
    let first_step_tools =
        select_first_step_tools(&catalog_tools, &template_version, &task_text, None)?;
    let title: String = task_text.chars().take(80).collect();
    let mut session = service
        .start_session(&template_version, &first_step_tools, &task_text, &title)
        .await?;

    loop {
        let (tx, mut rx) = mpsc::channel::<StepEvent>(256);
        let printer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                print_event(&event);
            }
        });
        let shutdown = AtomicBool::new(false);
        let outcome = driver
            .run(session, &template_version, &catalog_tools, &task_text, &tx, &shutdown)
            .await?;
        drop(tx);
        let _ = printer.await;

        match outcome {
            RunOutcome::Finished(finished) => {
                match finished.state {
                    SessionState::Failed => {
                        eprintln!("session failed");
                        std::process::exit(1);
                    }
                    _ => {
                        println!("{}", finished.context.execution_result.unwrap_or_default());
                    }
                }
                break;
            }
            RunOutcome::Suspended(suspended) if suspended.state == SessionState::WaitingForClarification => {
                eprint!("clarification needed> ");
                std::io::stderr().flush()?;
                let mut line = String::new();
                std::io::stdin().read_line(&mut line)?;
                session = service
                    .resume_with_clarification(
                        &suspended.id,
                        line.trim(),
                        &template_version.settings.prompts.clarification,
                    )
                    .await?;
            }
            RunOutcome::Suspended(suspended) => {
                // Only reachable via a shutdown flag this command never sets.
                eprintln!("run suspended without finishing (state={:?})", suspended.state);
                break;
            }
        }
    }

    Ok(())
}

fn cmd_config(db: String) -> Result<(), CliError> {
    agentd_config::load_and_apply("agentd", None)?;
    println!("database: {db}");
    match agentd_config::resolve_api_key_ref("OPENAI_API_KEY") {
        Ok(_) => println!("OPENAI_API_KEY: <set>"),
        Err(_) => println!("OPENAI_API_KEY: <unset>"),
    }
    if let Ok(base_url) = std::env::var("OPENAI_BASE_URL") {
        println!("OPENAI_BASE_URL: {base_url}");
    }
    if let Ok(model) = std::env::var("OPENAI_MODEL") {
        println!("OPENAI_MODEL: {model}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();
    logging::init(cli.log_spans);

    match cli.command {
        Command::Serve { addr, db, templates, llm } => cmd_serve(addr, db, templates, llm).await?,
        Command::Run { template, message, db, templates, llm } => {
            cmd_run(template, message, db, templates, llm).await?
        }
        Command::Config { db } => cmd_config(db)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_run_subcommand_with_defaults() {
        let cli = Cli::parse_from(["agentd", "run", "what is 2+2?"]);
        match cli.command {
            Command::Run { template, message, llm, .. } => {
                let _ = llm.mock;
                assert_eq!(template, "local-assistant");
                assert_eq!(message, "what is 2+2?");
            }
            _ => panic!("expected Run"),
        }
    }

    #[test]
    fn cli_parses_serve_subcommand_flags() {
        let cli = Cli::parse_from(["agentd", "serve", "--addr", "0.0.0.0:9090", "--mock"]);
        match cli.command {
            Command::Serve { addr, llm, .. } => {
                assert_eq!(addr, "0.0.0.0:9090");
                assert!(llm.mock);
            }
            _ => panic!("expected Serve"),
        }
    }
}
