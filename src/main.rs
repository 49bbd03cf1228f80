use anyhow::{Context, Result};
use rollout::cli::commands::{DeployCommand, HistoryCommand, PlanCommand, ValidateCommand};
use rollout::cli::output::*;
use rollout::cli::{Cli, Command};
use rollout::core::{DeploymentPlan, RunContext, RunStatus, StepAction};
use rollout::execution::{ExecutionEvent, Orchestrator};
use rollout::persistence::{PersistenceBackend, RunSummary};
use rollout::platform::{InMemoryCluster, Platform};
use std::sync::Arc;
use tracing::{error, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; the human-readable run output goes through events
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Deploy(cmd) => {
            let status = deploy(cmd, cli.verbose).await?;
            std::process::exit(status.exit_code());
        }
        Command::Validate(cmd) => validate(cmd)?,
        Command::Plan(cmd) => show_plan(cmd)?,
        Command::History(cmd) => show_history(cmd).await?,
    }

    Ok(())
}

async fn deploy(cmd: &DeployCommand, verbose: bool) -> Result<RunStatus> {
    let (plan, plan_variables) = cmd.plan.load()?;
    let mut ctx = cmd.build_context(&plan, plan_variables)?;

    eprintln!(
        "{} Deploying {} to {} ({}, namespace {})",
        INFO,
        style(&plan.name).bold(),
        style(&ctx.target.cluster).cyan(),
        ctx.target.region,
        ctx.target.namespace
    );

    let platform = if cmd.dry_run {
        eprintln!("{} Dry run: using an in-memory cluster", WARN);
        Platform::in_memory(Arc::new(dry_run_cluster(&ctx)))
    } else {
        Platform::kubernetes(&cmd.region)
    };

    let store = open_store(cmd.no_history).await?;

    let mut orchestrator = Orchestrator::new(platform, cmd.strategy);

    let progress = (!verbose).then(|| create_progress_bar(plan.len()));
    let bar = progress.clone();
    orchestrator.add_event_handler(move |event| {
        let line = format_execution_event(&event);
        match &bar {
            Some(bar) => {
                if let ExecutionEvent::StepStarted { step_id, .. } = &event {
                    bar.set_message(step_id.clone());
                }
                if matches!(event, ExecutionEvent::StepFinished { .. }) {
                    bar.inc(1);
                }
                bar.println(line);
            }
            None => eprintln!("{}", line),
        }
    });

    let cancel = orchestrator.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, aborting the run");
            cancel.cancel();
        }
    });

    let status = orchestrator.run(&plan, &mut ctx).await;
    if let Some(bar) = progress {
        bar.finish_and_clear();
    }

    eprintln!("\n{}", style("Step log").bold());
    eprintln!("{}", format_step_log(ctx.log(), terminal_width()));

    if let Some(store) = store {
        let summary = RunSummary::from(&ctx);
        match store.save_run(&summary).await {
            Ok(()) => eprintln!(
                "\n{} Run saved to history (ID: {})",
                INFO,
                style(&summary.run_id.to_string()[..8]).dim()
            ),
            Err(e) => error!("Failed to save run history: {:#}", e),
        }
    }

    print_outcome(&plan, &ctx, status);
    Ok(status)
}

fn print_outcome(plan: &DeploymentPlan, ctx: &RunContext, status: RunStatus) {
    match status {
        RunStatus::Completed => {
            eprintln!(
                "\n{} {} deployed {}",
                CHECK,
                style(&plan.name).bold(),
                style("successfully").green()
            );
        }
        RunStatus::CompletedWithWarning => {
            eprintln!(
                "\n{} {} deployed {}",
                WARN,
                style(&plan.name).bold(),
                style("with warnings").yellow()
            );
            for warning in ctx.warnings() {
                eprintln!("  {}", style(warning).yellow());
            }
            if ctx.endpoint().is_none() {
                eprintln!(
                    "  {}",
                    style("public address not available yet; check the ingress again later").yellow()
                );
            }
        }
        _ => {
            eprintln!("\n{} {} {}", CROSS, style(&plan.name).bold(), style("aborted").red());
        }
    }

    if let Some(endpoint) = ctx.endpoint() {
        // The endpoint is the run's one machine-readable output
        println!("{}", endpoint);
    }
}

/// In-memory stand-in for the cluster that lets a full plan run through
fn dry_run_cluster(ctx: &RunContext) -> InMemoryCluster {
    let mut cluster =
        InMemoryCluster::new().with_ingress_hostname(format!("{}.dry-run.elb.amazonaws.com", ctx.target.namespace));
    if let Some(reference) = &ctx.secret_ref {
        cluster = cluster.with_secret(reference.clone(), [("username", "dbadmin"), ("password", "dry-run")]);
    }
    cluster
}

async fn open_store(disabled: bool) -> Result<Option<Arc<dyn PersistenceBackend>>> {
    if disabled {
        return Ok(None);
    }
    Ok(Some(history_store().await?))
}

#[cfg(feature = "sqlite")]
async fn history_store() -> Result<Arc<dyn PersistenceBackend>> {
    Ok(Arc::new(rollout::persistence::SqliteRunStore::with_default_path().await?))
}

#[cfg(not(feature = "sqlite"))]
async fn history_store() -> Result<Arc<dyn PersistenceBackend>> {
    warn!("Built without sqlite; run history is kept in memory only");
    Ok(Arc::new(rollout::persistence::InMemoryPersistence::new()))
}

fn validate(cmd: &ValidateCommand) -> Result<()> {
    eprintln!("{} Validating deployment plan...", INFO);

    match cmd.plan.load() {
        Ok((plan, variables)) => {
            eprintln!("{} Deployment plan is valid!", CHECK);
            eprintln!("  Name: {}", style(&plan.name).bold());
            eprintln!("  Steps: {}", style(plan.len()).cyan());
            eprintln!("  Variables: {}", style(variables.len()).cyan());
            eprintln!("  Order: {}", plan.execution_order().join(" → "));

            if cmd.json {
                let steps: Vec<_> = plan
                    .ordered_steps()
                    .map(|s| {
                        serde_json::json!({
                            "id": s.id,
                            "name": s.name,
                            "action": s.action.label(),
                            "depends_on": s.dependencies,
                            "gate": s.gate.as_ref().map(|c| c.to_string()),
                            "exposure": s.exposure,
                        })
                    })
                    .collect();
                let data = serde_json::json!({ "name": plan.name, "steps": steps });
                println!("{}", serde_json::to_string_pretty(&data)?);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("{} Validation failed:", CROSS);
            eprintln!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}

fn show_plan(cmd: &PlanCommand) -> Result<()> {
    let (plan, _) = cmd.plan.load()?;
    println!("{} {}", ROCKET, style(&plan.name).bold());

    for (index, step) in plan.ordered_steps().enumerate() {
        let detail = match &step.action {
            StepAction::Apply { resources, .. } => resources
                .iter()
                .map(|r| r.resource_ref().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            StepAction::Command(command) => command.display(),
            StepAction::Wait(condition) => format!("until {}", condition),
        };
        println!(
            "{:>3}. {} [{}] {}",
            index + 1,
            style(&step.id).cyan(),
            step.action.label(),
            style(detail).dim()
        );
        if !step.dependencies.is_empty() {
            println!("       after: {}", step.dependencies.join(", "));
        }
        if let Some(gate) = &step.gate {
            println!("       gate: {} (deadline {}s)", gate, gate.deadline.as_secs());
        }
        if let Some(retry) = &step.retry {
            println!("       retry: up to {} attempts", retry.max_attempts);
        }
        if step.exposure {
            println!("       {}", style("exposes the public endpoint").yellow());
        }
    }
    Ok(())
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let store = history_store().await?;

    if let Some(run_id) = &cmd.run_id {
        let run_id = uuid::Uuid::parse_str(run_id).context("Invalid run ID format")?;
        match store.load_run(run_id).await? {
            Some(summary) => print_run_details(&summary, cmd.verbose, cmd.json)?,
            None => println!("{} Run not found", WARN),
        }
        return Ok(());
    }

    let mut runs = match &cmd.plan {
        Some(plan_name) => store.list_runs(plan_name).await?,
        None => {
            let mut all = Vec::new();
            for plan_name in store.list_plans().await? {
                all.extend(store.list_runs(&plan_name).await?);
            }
            all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            all
        }
    };
    runs.truncate(cmd.limit);

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(());
    }

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    println!("{} Run history (showing latest {}):", INFO, runs.len());
    for summary in &runs {
        println!("  {}", format_run_summary(summary));
        if cmd.verbose {
            for line in format_step_log(&summary.steps, terminal_width()).lines() {
                println!("      {}", line);
            }
        }
    }

    Ok(())
}

fn print_run_details(summary: &RunSummary, verbose: bool, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!("{} Run Details", INFO);
    println!("  ID: {}", style(summary.run_id).cyan());
    println!("  Plan: {}", style(&summary.plan_name).bold());
    println!(
        "  Target: {} / {} / {}",
        summary.target.cluster, summary.target.region, summary.target.namespace
    );
    println!("  Status: {}", format_status(summary.status));
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(completed) = summary.completed_at {
        println!("  Completed: {}", style(completed.to_rfc3339()).dim());
        if let Ok(duration) = completed.signed_duration_since(summary.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }
    println!(
        "  Endpoint: {}",
        style(summary.endpoint.as_deref().unwrap_or("-")).cyan()
    );

    println!("\n  {}", style("Steps:").bold());
    let width = if verbose { usize::MAX / 2 } else { terminal_width() };
    for line in format_step_log(&summary.steps, width).lines() {
        println!("    {}", line);
    }

    Ok(())
}
