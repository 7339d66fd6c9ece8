use anyhow::{Context, Result};
use shipwright::adapters::{CommandDeployTarget, DockerRegistry, GitCli, GithubSecretStore, HttpHealthEndpoint};
use shipwright::cli::commands::{
    AbortCommand, ApproveCommand, HistoryCommand, PromoteCommand, ReleaseCommand, RollbackCommand,
    SecretsCommand, StatusCommand, ValidateCommand,
};
use shipwright::cli::output::*;
use shipwright::cli::{Cli, Command};
use shipwright::core::config::{ShipwrightConfig, DEFAULT_CONFIG_FILE};
use shipwright::core::{Environment, PipelineRun, PipelineStage};
use shipwright::execution::{ExecutionEvent, OrchestratorSettings, PipelineOrchestrator};
use shipwright::persistence::{create_summary, InMemoryPersistence, RunStore};
use shipwright::release::ReleaseManager;
use shipwright::secrets::{SecretBundle, SecretPropagator};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{error, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    let config_path = cli.config.clone().unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());

    if let Command::Validate(cmd) = &cli.command {
        return validate_config(&config_path, cmd);
    }

    let config = ShipwrightConfig::from_file(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    // Execute command
    match &cli.command {
        Command::Release(cmd) => cut_release(cmd, &cli, &config).await?,
        Command::Promote(cmd) => promote(cmd, &cli, &config).await?,
        Command::Approve(cmd) => approve(cmd, &cli, &config).await?,
        Command::Abort(cmd) => abort(cmd, &cli, &config).await?,
        Command::Rollback(cmd) => rollback(cmd, &cli, &config).await?,
        Command::Status(cmd) => show_status(cmd, &cli, &config).await?,
        Command::History(cmd) => show_history(cmd, &cli, &config).await?,
        Command::Resume(_) => resume(&cli, &config).await?,
        Command::Secrets(cmd) => provision_secrets(cmd, &config).await?,
        Command::Validate(_) => {}
    }

    Ok(())
}

async fn open_store(cli: &Cli, config: &ShipwrightConfig) -> Result<Arc<dyn RunStore>> {
    if cli.no_history {
        return Ok(Arc::new(InMemoryPersistence::new()));
    }

    #[cfg(feature = "sqlite")]
    let store: Arc<dyn RunStore> = {
        let path = config.state_path();
        let store = shipwright::persistence::SqliteRunStore::new(&path)
            .await
            .with_context(|| format!("Failed to open state database {}", path.display()))?;
        Arc::new(store)
    };

    #[cfg(not(feature = "sqlite"))]
    let store: Arc<dyn RunStore> = {
        let _ = config;
        warn!("Built without sqlite support; run history is not persisted");
        Arc::new(InMemoryPersistence::new())
    };

    Ok(store)
}

async fn build_orchestrator(cli: &Cli, config: &ShipwrightConfig) -> Result<PipelineOrchestrator> {
    let store = open_store(cli, config).await?;
    let health = HttpHealthEndpoint::new().context("Failed to create HTTP client")?;

    let orchestrator = PipelineOrchestrator::new(
        OrchestratorSettings::from_config(config),
        Arc::new(DockerRegistry::new(&config.registry)),
        Arc::new(CommandDeployTarget::new(&config.environments)),
        Arc::new(health),
        store,
    );
    attach_console(&orchestrator);
    Ok(orchestrator)
}

/// Print events, with a spinner while health polling is in progress
fn attach_console(orchestrator: &PipelineOrchestrator) {
    let spinner: Mutex<Option<indicatif::ProgressBar>> = Mutex::new(None);

    orchestrator.add_event_handler(move |event| {
        let Ok(mut active) = spinner.lock() else {
            return;
        };

        match &event {
            ExecutionEvent::ProbeAttempt { .. } => {
                if let Some(bar) = active.as_ref() {
                    bar.set_message(format_execution_event(&event));
                    return;
                }
            }
            _ => {
                if let Some(bar) = active.take() {
                    bar.finish_and_clear();
                }
            }
        }

        println!("{}", format_execution_event(&event));

        if let ExecutionEvent::StageChanged {
            to: PipelineStage::TestHealthCheck | PipelineStage::ProdHealthCheck,
            environment,
            ..
        } = &event
        {
            *active = Some(create_spinner(format!("Waiting for {} to report healthy", environment)));
        }
    });
}

/// Print the outcome of a run and exit non-zero unless it succeeded
fn report_run(run: &PipelineRun) {
    println!();
    match run.stage {
        PipelineStage::Succeeded => println!(
            "{} {} {} in {}",
            CHECK,
            style(&run.release.version).bold(),
            style("deployed").green(),
            style(run.environment).cyan()
        ),
        PipelineStage::AwaitingProdApproval => println!(
            "{} {} is awaiting approval: shipwright approve --version {}",
            INFO,
            style(&run.release.version).bold(),
            run.release.version
        ),
        _ => {
            println!(
                "{} {} {} in {}",
                CROSS,
                style(&run.release.version).bold(),
                style("failed").red(),
                style(run.environment).cyan()
            );
            if let Some(reason) = run.terminal_reason() {
                println!("  {}", style(reason).red());
            }
            if run.failure.as_ref().is_some_and(|f| f.kind.requires_operator()) {
                println!("  {} {}", WARN, style("Operator intervention required").yellow().bold());
            }
            std::process::exit(1);
        }
    }
}

fn fail(message: impl std::fmt::Display) -> ! {
    println!("{} {}", CROSS, style(message).red());
    std::process::exit(1);
}

async fn cut_release(cmd: &ReleaseCommand, cli: &Cli, config: &ShipwrightConfig) -> Result<()> {
    let scm = Arc::new(GitCli::new(config.release.git.clone(), "."));
    let mut manager = ReleaseManager::new(scm, config.release.clone());

    let (tx, rx) = mpsc::channel(1);
    if !cmd.no_deploy {
        manager = manager.with_events(tx);
    } else {
        drop(tx);
    }

    println!("{} Cutting {} release of {}", INFO, style(cmd.to_request().bump).cyan(), style(&config.name).bold());
    let cut = match manager.cut(&cmd.to_request()).await {
        Ok(cut) => cut,
        Err(e) => fail(e),
    };
    // Closes the channel so the listener stops after this release
    drop(manager);

    for warning in &cut.warnings {
        println!("{} {}", WARN, style(warning).yellow());
    }
    println!(
        "{} Tagged {} at {}",
        CHECK,
        style(&cut.release.version).bold(),
        style(&cut.release.source_ref).dim()
    );

    if cmd.no_deploy {
        return Ok(());
    }

    let orchestrator = build_orchestrator(cli, config).await?;
    orchestrator.listen(rx).await;

    let runs = orchestrator.history(Some(Environment::Test), None).await?;
    match runs.iter().find(|r| r.release.version == cut.release.version) {
        Some(run) => report_run(run),
        None => fail(format!("No test run was started for {}", cut.release.version)),
    }
    Ok(())
}

async fn promote(cmd: &PromoteCommand, cli: &Cli, config: &ShipwrightConfig) -> Result<()> {
    let orchestrator = build_orchestrator(cli, config).await?;

    let result = if cmd.hold {
        orchestrator
            .request_promotion(cmd.env, cmd.version, cmd.override_validation)
            .await
    } else {
        orchestrator
            .promote(cmd.env, cmd.version, cmd.override_validation)
            .await
    };

    match result {
        Ok(run) => report_run(&run),
        Err(e) => fail(e),
    }
    Ok(())
}

async fn approve(cmd: &ApproveCommand, cli: &Cli, config: &ShipwrightConfig) -> Result<()> {
    let orchestrator = build_orchestrator(cli, config).await?;
    match orchestrator.approve(cmd.env, cmd.version).await {
        Ok(run) => report_run(&run),
        Err(e) => fail(e),
    }
    Ok(())
}

async fn abort(cmd: &AbortCommand, cli: &Cli, config: &ShipwrightConfig) -> Result<()> {
    let orchestrator = build_orchestrator(cli, config).await?;
    match orchestrator.abort(cmd.run_id).await {
        Ok(run) => println!(
            "{} Aborted promotion of {} ({})",
            WARN,
            style(&run.release.version).bold(),
            style(&run.id.to_string()[..8]).dim()
        ),
        Err(e) => fail(e),
    }
    Ok(())
}

async fn rollback(cmd: &RollbackCommand, cli: &Cli, config: &ShipwrightConfig) -> Result<()> {
    let orchestrator = build_orchestrator(cli, config).await?;
    match orchestrator.rollback_environment(cmd.env).await {
        Ok(record) => {
            println!("{} Rolled back", CHECK);
            println!("  {}", format_record(&record));
        }
        Err(e) => {
            error!("{}", e);
            fail(e)
        }
    }
    Ok(())
}

async fn show_status(cmd: &StatusCommand, cli: &Cli, config: &ShipwrightConfig) -> Result<()> {
    let orchestrator = build_orchestrator(cli, config).await?;
    let environments = match cmd.env {
        Some(env) => vec![env],
        None => Environment::ALL.to_vec(),
    };

    let mut records = Vec::new();
    for env in environments {
        records.push(orchestrator.record(env).await?);
    }

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    println!("{} Deployment status of {}:", INFO, style(&config.name).bold());
    for record in &records {
        println!("  {}", format_record(record));
    }
    Ok(())
}

async fn show_history(cmd: &HistoryCommand, cli: &Cli, config: &ShipwrightConfig) -> Result<()> {
    let orchestrator = build_orchestrator(cli, config).await?;

    // If specific run ID is requested
    if let Some(run_id) = cmd.run_id {
        match orchestrator.run(run_id).await {
            Ok(run) if cmd.json => println!("{}", serde_json::to_string_pretty(&run)?),
            Ok(run) => println!("{}", format_run_details(&run)),
            Err(_) => println!("{} Run not found", WARN),
        }
        return Ok(());
    }

    let runs = orchestrator.history(cmd.env, Some(cmd.limit)).await?;
    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(());
    }

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    println!("{} Run history (showing latest {}):", INFO, cmd.limit);
    for run in &runs {
        if cmd.full {
            println!("{}\n", format_run_details(run));
        } else {
            println!("  {}", format_run_summary(&create_summary(run)));
        }
    }
    Ok(())
}

async fn resume(cli: &Cli, config: &ShipwrightConfig) -> Result<()> {
    let orchestrator = build_orchestrator(cli, config).await?;
    let resumed = match orchestrator.resume().await {
        Ok(runs) => runs,
        Err(e) => fail(e),
    };

    if resumed.is_empty() {
        println!("{} Nothing to resume", INFO);
        return Ok(());
    }

    let mut failed = false;
    for run in &resumed {
        println!("  {}", format_run_summary(&create_summary(run)));
        failed |= run.stage != PipelineStage::Succeeded;
    }
    if failed {
        std::process::exit(1);
    }
    Ok(())
}

async fn provision_secrets(cmd: &SecretsCommand, config: &ShipwrightConfig) -> Result<()> {
    let bundle = SecretBundle::from_file(&cmd.file)?;
    let mirror = cmd.mirror || config.secrets.mirror_test_to_production;
    if mirror && bundle.production.is_none() {
        warn!("Production will reuse the test credentials");
    }

    let propagator = SecretPropagator::new(Arc::new(GithubSecretStore::new(&config.secrets)), mirror);
    let reports = match cmd.env {
        Some(Environment::Test) => vec![propagator.propagate(Environment::Test, &bundle.test).await],
        Some(Environment::Production) => vec![propagator.provision_production(&bundle).await],
        None => propagator.provision(&bundle).await,
    };

    for report in &reports {
        println!("{}", format_propagation_report(report));
    }
    if reports.iter().any(|r| !r.is_success()) {
        std::process::exit(1);
    }
    Ok(())
}

fn validate_config(path: &str, cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating {}...", INFO, path);

    match ShipwrightConfig::from_file(path) {
        Ok(config) => {
            println!("{} Configuration is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Repository: {}", style(&config.registry.repository).cyan());
            for env in Environment::ALL {
                let settings = config.environment(env);
                println!(
                    "  {}: {} (budget {}s, poll every {}s)",
                    style(env).bold(),
                    style(&settings.health_url).cyan(),
                    settings.health.budget.as_secs(),
                    settings.health.poll_interval.as_secs()
                );
            }

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(e).red());
            std::process::exit(1);
        }
    }
}
