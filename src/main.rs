use anyhow::{Context, Result};
use leadflow::cli::commands::{
    parse_override_value, HistoryCommand, RunCommand, StagesCommand, ValidateCommand,
};
use leadflow::cli::output::*;
use leadflow::cli::{Cli, Command};
use leadflow::core::{ProcessEnvironment, RuntimeSettings, WorkflowDefinition};
use leadflow::execution::{ExecutionEvent, WorkflowOrchestrator};
use leadflow::persistence::{create_summary, InMemoryRunHistory, RunHistory, RunSummary};
use leadflow::stage::StageRegistry;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    let settings = RuntimeSettings::from_env(&ProcessEnvironment);

    // Initialize logging: RUST_LOG wins, then --verbose, then LOG_LEVEL
    let default_level = settings.log_filter(cli.verbose);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    // Execute command
    match &cli.command {
        Command::Run(cmd) => run_workflow(cmd, settings).await?,
        Command::Validate(cmd) => validate_workflow(cmd)?,
        Command::Stages(cmd) => list_stages(cmd)?,
        Command::History(cmd) => show_history(cmd).await?,
    }

    Ok(())
}

fn load_definition(path: &std::path::Path) -> WorkflowDefinition {
    match WorkflowDefinition::from_file(path) {
        Ok(definition) => definition,
        Err(e) => {
            println!("{} Failed to load workflow definition:", CROSS);
            println!("  {}", style(e).red());
            std::process::exit(1);
        }
    }
}

#[cfg(feature = "sqlite")]
async fn open_history() -> Result<Arc<dyn RunHistory>> {
    let store = leadflow::persistence::SqliteRunHistory::with_default_path()
        .await
        .context("Failed to open run history")?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sqlite"))]
async fn open_history() -> Result<Arc<dyn RunHistory>> {
    println!("{} Built without sqlite; run history is not kept", WARN);
    Ok(Arc::new(InMemoryRunHistory::new()))
}

async fn run_workflow(cmd: &RunCommand, mut settings: RuntimeSettings) -> Result<()> {
    let mut definition = load_definition(&cmd.file);

    println!(
        "{} Loaded workflow: {}",
        INFO,
        style(&definition.name).bold()
    );

    // Apply config overrides
    for (key, raw) in &cmd.overrides {
        definition.set_config_value(key, parse_override_value(raw));
        println!(
            "{} Config override: {} = {}",
            INFO,
            style(key).cyan(),
            style(raw).dim()
        );
    }

    if let Some(dry_run) = cmd.dry_run {
        settings = settings.with_dry_run(dry_run);
    }
    if let Some(output_dir) = &cmd.output_dir {
        settings = settings.with_output_dir(output_dir);
    }
    if cmd.halt_on_failure {
        settings = settings.with_halt_on_failure(true);
    }
    if !settings.dry_run {
        println!("{} Dry run is {}: stages may act for real", WARN, style("off").yellow());
    }

    // Set up history
    let history: Arc<dyn RunHistory> = if cmd.no_history {
        Arc::new(InMemoryRunHistory::new())
    } else {
        open_history().await?
    };

    let total = definition.stages.len();
    let mut orchestrator = WorkflowOrchestrator::new(definition, StageRegistry::builtin())
        .with_settings(settings);

    // Console output goes through the progress bar so the two don't interleave
    let progress = create_progress_bar(total);
    let bar = progress.clone();
    orchestrator.add_event_handler(move |event| {
        match &event {
            ExecutionEvent::StageStarted { stage_id, .. } => bar.set_message(stage_id.clone()),
            ExecutionEvent::StageSucceeded { .. } | ExecutionEvent::StageFailed { .. } => bar.inc(1),
            _ => {}
        }
        bar.println(format_execution_event(&event));
    });

    if let Err(e) = orchestrator.build() {
        progress.finish_and_clear();
        println!("{} Workflow could not be built:", CROSS);
        println!("  {}", style(e).red());
        std::process::exit(1);
    }

    let result = orchestrator.run().await;
    progress.finish_and_clear();

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            error!("{}", e);
            println!("\n{} {}", CROSS, style(e).red());
            std::process::exit(1);
        }
    };

    // Save to history
    if !cmd.no_history {
        let summary = create_summary(&report);
        history.save_run(&summary).await?;
        println!(
            "\n{} Run saved to history (ID: {})",
            INFO,
            style(summary.run_id).dim()
        );
    }

    println!("\n{}", format_run_report(&report));
    if let Ok(duration) = report
        .completed_at
        .signed_duration_since(report.started_at)
        .to_std()
    {
        println!("  Duration: {}", style(format_duration(duration)).dim());
    }

    Ok(())
}

fn validate_workflow(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating workflow...", INFO);

    let definition = load_definition(&cmd.file);
    let warnings = definition.lint();

    // Building constructs every stage without running anything
    let mut orchestrator = WorkflowOrchestrator::new(definition.clone(), StageRegistry::builtin());
    if let Err(e) = orchestrator.build() {
        println!("{} Validation failed:", CROSS);
        println!("  {}", style(e).red());
        std::process::exit(1);
    }

    println!("{} Workflow definition is valid!", CHECK);
    println!("  Name: {}", style(&definition.name).bold());
    println!("  Stages: {}", style(definition.stages.len()).cyan());
    for stage in &definition.stages {
        println!("    {} {}", style(&stage.id).cyan(), style(&stage.stage_type).dim());
    }
    println!("  Config keys: {}", style(definition.config.len()).cyan());
    for warning in &warnings {
        println!("{} {}", WARN, style(warning).yellow());
    }

    if cmd.json {
        let json = serde_json::to_string_pretty(&definition)?;
        println!("\n{}", json);
    }

    Ok(())
}

fn list_stages(cmd: &StagesCommand) -> Result<()> {
    let registry = StageRegistry::builtin();
    let types = registry.stage_types();

    if cmd.json {
        let data = serde_json::json!({ "stage_types": types });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    println!("{} Available stage types:", INFO);
    for stage_type in types {
        println!("  {}", style(stage_type).bold());
    }

    Ok(())
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let history = open_history().await?;

    // If a specific run ID is requested
    if let Some(run_id) = &cmd.run_id {
        let run_id = uuid::Uuid::parse_str(run_id).context("Invalid run ID format")?;
        match history.load_run(run_id).await? {
            Some(summary) => print_run_details(&summary, cmd.json)?,
            None => println!("{} Run not found", WARN),
        }
        return Ok(());
    }

    let runs = match &cmd.workflow {
        Some(workflow_name) => {
            let mut runs = history.list_runs(workflow_name).await?;
            runs.truncate(cmd.limit);
            runs
        }
        None => history.recent_runs(cmd.limit).await?,
    };

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(());
    }

    println!("{} Run history (showing latest {}):", INFO, cmd.limit);
    for summary in &runs {
        println!("  {}", format_run_summary(summary));
    }

    Ok(())
}

fn print_run_details(summary: &RunSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!("{} Run Details", INFO);
    println!("  ID: {}", style(summary.run_id).cyan());
    println!("  Workflow: {}", style(&summary.workflow_name).bold());
    println!("  Status: {}", format_status(summary.status));
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(completed) = summary.completed_at {
        println!("  Completed: {}", style(completed.to_rfc3339()).dim());
        if let Ok(duration) = completed.signed_duration_since(summary.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }
    println!(
        "  Stages: {} succeeded, {} failed (of {})",
        style(summary.succeeded).green(),
        style(summary.failed).red(),
        summary.total_stages
    );
    if let Some(snapshot) = &summary.snapshot {
        println!("  Snapshot: {}", style(snapshot).dim());
    }

    Ok(())
}
