use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use researchd_core::{
    ConfigLoader, CoreConfig, CostAccountant, CostSummary, DynSessionStore, EngineOutcome,
    EngineRequest, MemorySessionStore, Orchestrator, OrchestratorConfig, RateTable,
    ResearchEngine, Session, SessionStatus, StubEngine, filter_reasoning,
    format_for_api,
};
use tokio::runtime::Runtime;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "researchd", version, about = "Research session orchestration demo")]
struct Cli {
    /// Optional path to a TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute a research session end-to-end with the offline stub engine.
    Run(RunArgs),
    /// Reap stuck sessions: simulate an abandoned worker, then sweep it up.
    Sweep(SweepArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Query to research.
    #[arg(long, default_value = "Assess lithium battery market drivers 2025")]
    query: String,

    /// User the session belongs to.
    #[arg(long, default_value = "demo-user")]
    user: String,

    /// Optional follow-up query executed as a continuation of the first.
    #[arg(long)]
    follow_up: Option<String>,

    /// Use an engine that reports failure, to exercise the failure path.
    #[arg(long, default_value_t = false)]
    fail: bool,
}

#[derive(Args, Debug)]
struct SweepArgs {
    /// Age in seconds after which a processing session counts as stuck.
    /// Defaults to the configured threshold.
    #[arg(long)]
    max_age_secs: Option<u64>,
}

/// Engine that always reports a failure result.
struct FailingEngine;

#[async_trait]
impl ResearchEngine for FailingEngine {
    async fn invoke(&self, _request: EngineRequest) -> anyhow::Result<EngineOutcome> {
        Ok(EngineOutcome::failure("simulated engine failure"))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ConfigLoader::load(cli.config.clone())?;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{level},researchd_core={level}",
            level = config.logging.level
        ))
    });
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let rt = Runtime::new()?;
    rt.block_on(async move {
        match cli.command {
            Command::Run(args) => run_command(args, &config).await?,
            Command::Sweep(args) => sweep_command(args, &config).await?,
        }
        Ok::<(), anyhow::Error>(())
    })?;

    Ok(())
}

async fn run_command(args: RunArgs, config: &CoreConfig) -> Result<()> {
    let store: DynSessionStore = Arc::new(MemorySessionStore::new());
    let engine: Arc<dyn ResearchEngine> = if args.fail {
        Arc::new(FailingEngine)
    } else {
        Arc::new(StubEngine::new())
    };
    let accountant = CostAccountant::new(store.clone(), None, RateTable::builtin())
        .with_currency(config.accounting.currency.clone());
    let orchestrator = Orchestrator::new(
        store.clone(),
        engine,
        accountant,
        OrchestratorConfig::from(&config.orchestrator),
    );

    info!(query = %args.query, user = %args.user, "starting research session");
    let session = Session::new(&args.user, &args.query);
    let first_id = session.id;
    store.insert(session).await?;
    execute_and_report(&orchestrator, &store, first_id).await?;

    if let Some(follow_up) = args.follow_up {
        info!(query = %follow_up, "starting continuation session");
        let child = Session::new(&args.user, follow_up).with_parent(first_id);
        let child_id = child.id;
        store.insert(child).await?;
        execute_and_report(&orchestrator, &store, child_id).await?;

        let lineage = store.lineage(child_id).await?;
        let chain: Vec<String> = lineage
            .iter()
            .map(|session| format!("{} ({})", session.id, session.status.as_str()))
            .collect();
        println!("lineage: {}", chain.join(" -> "));
    }

    Ok(())
}

async fn sweep_command(args: SweepArgs, config: &CoreConfig) -> Result<()> {
    let store: DynSessionStore = Arc::new(MemorySessionStore::new());
    let engine: Arc<dyn ResearchEngine> = Arc::new(StubEngine::new());
    let accountant = CostAccountant::new(store.clone(), None, RateTable::builtin())
        .with_currency(config.accounting.currency.clone());
    let orchestrator_config = OrchestratorConfig::from(&config.orchestrator);
    let max_age = args
        .max_age_secs
        .map(Duration::from_secs)
        .unwrap_or(orchestrator_config.stuck_after);
    let orchestrator = Orchestrator::new(store.clone(), engine, accountant, orchestrator_config);

    // Stage one session abandoned by a dead worker and one still live, so
    // the sweep has something real to discriminate on.
    let mut abandoned = Session::new("demo-user", "left behind by a crashed worker");
    abandoned.status = SessionStatus::Processing;
    abandoned.updated_at = Utc::now() - chrono::Duration::hours(2);
    let abandoned_id = abandoned.id;
    store.insert(abandoned).await?;

    let mut live = Session::new("demo-user", "still being processed");
    live.status = SessionStatus::Processing;
    let live_id = live.id;
    store.insert(live).await?;

    let swept = orchestrator.sweep_stuck(max_age).await?;
    println!("swept {swept} stuck session(s)");
    for id in [abandoned_id, live_id] {
        if let Some(session) = store.get(id).await? {
            println!("{id}: {}", session.status.as_str());
        }
    }

    Ok(())
}

async fn execute_and_report(
    orchestrator: &Orchestrator,
    store: &DynSessionStore,
    session_id: uuid::Uuid,
) -> Result<()> {
    let outcome = orchestrator.execute(session_id, None).await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if let Some(session) = store.get(session_id).await? {
        let redacted = filter_reasoning(session.reasoning.as_ref());
        println!(
            "reasoning: {}",
            serde_json::to_string_pretty(&format_for_api(&redacted))?
        );
    }

    if let Some(cost) = store.get_cost(session_id).await? {
        println!(
            "cost: {}",
            serde_json::to_string_pretty(&CostSummary::from(&cost))?
        );
    }

    Ok(())
}
