mod cli;
mod seed;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use maestro_core::{
    ChatOrchestrator, ContextBuilder, RagSearchTool, SessionManager, ValidationBroker,
};
use maestro_domain::secrets::SecretBox;
use maestro_mcp::{build_pool, ClientFactory, MetadataCache, OAuthManager};
use maestro_model::Gateway;
use maestro_scheduler::{
    register_automation_triggers, register_builtin_jobs, EmptyChatGcJob, ModelSyncJob, Scheduler,
    SessionCleanupJob, ValidationExpiryJob,
};
use maestro_store::MemoryStore;
use maestro_tools::ToolRegistry;
use maestro_workflow::{RunAutomationTool, WorkflowExecutor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Some(Commands::ShowConfig) => {
            let mut settings = maestro_config::load()?;
            // Never print key material.
            settings.encryption_master_key = settings
                .encryption_master_key
                .map(|_| "<redacted>".to_string());
            settings.anthropic.api_key = settings.anthropic.api_key.map(|_| "<redacted>".into());
            settings.openai.api_key = settings.openai.api_key.map(|_| "<redacted>".into());
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
        Some(Commands::GenerateKey) => {
            println!("{}", maestro_domain::secrets::generate_master_key());
            Ok(())
        }
        Some(Commands::Run) | None => run().await,
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}

async fn run() -> anyhow::Result<()> {
    let settings = maestro_config::load().context("loading settings")?;

    // The one and only outbound HTTP client.
    let pool = build_pool(&settings.http)?;
    let store = Arc::new(MemoryStore::new());

    let secrets = match settings.encryption_master_key.as_deref() {
        Some(key) => Some(Arc::new(
            SecretBox::from_master_key(key).context("MAESTRO_ENCRYPTION_MASTER_KEY")?,
        )),
        None => None,
    };

    // MCP connectivity: cache → OAuth → client factory, verify hook wired
    // after construction.
    let cache = Arc::new(MetadataCache::new(Duration::from_secs(
        settings.oauth_metadata_cache_ttl_secs,
    )));
    let oauth = Arc::new(OAuthManager::new(
        pool.clone(),
        cache,
        store.clone(),
        store.clone(),
        settings.oauth_success_redirect.clone(),
    ));
    let mcp = Arc::new(ClientFactory::new(
        pool.clone(),
        store.clone(),
        store.clone(),
        secrets,
        oauth.clone(),
        Duration::from_secs(settings.mcp_call_timeout_secs),
        Duration::from_secs(settings.mcp_verify_timeout_secs),
    ));
    oauth.set_verifier(mcp.clone());

    // Internal tools shared by the orchestrator and the workflow executor.
    let automation_tool = RunAutomationTool::new();
    let registry = Arc::new(ToolRegistry::from_handlers(vec![
        Arc::new(RagSearchTool::new(Arc::new(seed::UnindexedRetriever))),
        automation_tool.clone(),
    ]));

    // Gateway starts on a throwaway client, then swaps onto the pool.
    let mut gateway = Gateway::from_settings(&settings, reqwest_bootstrap_client());
    gateway.reinit_with_pooled_client(pool.clone());
    let gateway = Arc::new(gateway);

    let sessions = Arc::new(SessionManager::new(Duration::from_secs(
        settings.session_max_age_secs,
    )));
    let broker = Arc::new(ValidationBroker::new(
        store.clone(),
        sessions.clone(),
        mcp.clone(),
        registry.clone(),
        settings.validation_ttl_secs,
    ));
    let context = ContextBuilder::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        registry.clone(),
        settings.chat_history_limit,
    );
    let orchestrator = Arc::new(ChatOrchestrator::new(
        store.clone(),
        context,
        gateway.clone(),
        sessions.clone(),
        broker.clone(),
    ));
    broker.set_continuation(orchestrator.clone());

    let executor = Arc::new(WorkflowExecutor::new(
        store.clone(),
        store.clone(),
        mcp.clone(),
        gateway.clone(),
        registry,
    ));
    automation_tool.set_executor(executor.clone());

    seed::sync_system_definitions(&store).await?;

    let scheduler = Scheduler::new();
    register_builtin_jobs(
        &scheduler,
        ModelSyncJob {
            gateway: gateway.clone(),
            catalog: store.clone(),
        },
        EmptyChatGcJob {
            chats: store.clone(),
            max_age_days: settings.chat_gc_days,
        },
        ValidationExpiryJob {
            broker: broker.clone(),
        },
        SessionCleanupJob {
            sessions: sessions.clone(),
            validations: store.clone(),
        },
        settings.validation_sweep_interval_secs,
    );
    register_automation_triggers(&scheduler, store.clone(), executor).await?;

    info!(
        providers = ?gateway.provider_names(),
        jobs = ?scheduler.job_ids(),
        "maestro is up"
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutting down");
    scheduler.shutdown();
    mcp.shutdown().await;
    Ok(())
}

/// Plain client used only until the pool exists; the gateway is re-bound to
/// the pooled client right after construction.
fn reqwest_bootstrap_client() -> reqwest::Client {
    reqwest::Client::new()
}
