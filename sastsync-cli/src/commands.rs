use std::io::{self, IsTerminal, Read};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use sastsync::config::{BranchConfig, ConfigDocument};
use sastsync::context::{ExecutionContext, PersistedContext};
use sastsync::error::SyncError;
use sastsync::naming::NamingInputs;
use sastsync::output::formatter;
use sastsync::pipeline::Pipeline;
use sastsync::poller::parse_report;
use sastsync::report::aggregate;
use sastsync::service::ScanService;
use sastsync::stages::{LaunchStage, ResultsStage, ScanTarget, TicketSyncReport, TicketSyncStage};
use sastsync::tickets::create_tracker;
use sastsync::veracode::{Credentials, VeracodeClient};
use sastsync::vcs;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::cli::{Cli, Command};

type TicketHandle = Arc<Mutex<TicketSyncReport>>;

pub async fn execute(cli: Cli) -> Result<ExitCode> {
    match &cli.command {
        Command::Skeleton { pattern } => skeleton(&cli.config, pattern),
        Command::Report { file, json } => report(file, *json),
        command => scan(&cli, command).await,
    }
}

fn skeleton(path: &Path, pattern: &str) -> Result<ExitCode> {
    // Reject patterns that are not valid regexes.
    BranchConfig::skeleton(pattern).matches("")?;

    let mut document = ConfigDocument::load(path)?;
    if document.add_skeleton(pattern) {
        document.save(path)?;
        info!(path = %path.display(), pattern, "added skeleton segment");
    } else {
        warn!(path = %path.display(), pattern, "segment already exists; left unchanged");
    }
    println!("{}", document.to_string_for(path)?.trim_end());
    Ok(ExitCode::SUCCESS)
}

fn report(file: &Path, json: bool) -> Result<ExitCode> {
    let body = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let tree = parse_report(&body).with_context(|| format!("failed to parse {}", file.display()))?;
    let report = aggregate(&tree)?;
    formatter(json).write_report(&report, &mut io::stdout().lock())?;
    Ok(ExitCode::SUCCESS)
}

async fn scan(cli: &Cli, command: &Command) -> Result<ExitCode> {
    let work_dir = std::env::current_dir().context("failed to read the working directory")?;
    let branch = match &cli.branch {
        Some(branch) => branch.clone(),
        None => vcs::current_branch(&work_dir).context("could not determine the branch; pass --branch")?,
    };

    let mut ctx = initial_context(cli, command, &branch);

    let setup = resolve_config(&cli.config, &branch)
        .map_err(|e| ("config", e))
        .and_then(|config| {
            build_pipeline(cli, command, &branch, &work_dir, config).map_err(|e| ("setup", e))
        });

    let mut tickets = None;
    match setup {
        Ok((pipeline, handle)) => {
            pipeline.run(&mut ctx).await;
            if let Some(handle) = handle {
                tickets = Some(handle.lock().await.clone());
            }
        }
        Err((stage, e)) => fail(&mut ctx, stage, e),
    }

    // Planned actions are only meaningful when the ticket stage got to run.
    let tickets = tickets.filter(|_| ctx.error.as_ref().is_none_or(|e| e.stage == "tickets"));
    emit(cli, &ctx, tickets.as_ref())
}

fn initial_context(cli: &Cli, command: &Command, branch: &str) -> ExecutionContext {
    if command.starts_fresh() {
        return ExecutionContext::new(branch);
    }

    let prior = match load_prior(cli) {
        Ok(prior) => prior,
        Err(e) => {
            let mut ctx = ExecutionContext::new(branch);
            ctx.record_error("context", &e);
            return ctx;
        }
    };
    match prior {
        None => ExecutionContext::new(branch),
        Some(prior) => prior.claim(branch).unwrap_or_else(|e| {
            warn!(branch, error = %e, "refusing to carry another branch's context");
            let mut ctx = ExecutionContext::new(branch);
            ctx.record_error("context", &e.into());
            ctx
        }),
    }
}

fn load_prior(cli: &Cli) -> Result<Option<PersistedContext>> {
    if cli.console {
        let stdin = io::stdin();
        if stdin.is_terminal() {
            return Ok(None);
        }
        let mut content = String::new();
        stdin
            .lock()
            .read_to_string(&mut content)
            .context("failed to read context from stdin")?;
        return PersistedContext::parse(&content);
    }
    PersistedContext::load(&cli.output)
}

fn resolve_config(path: &Path, branch: &str) -> Result<BranchConfig> {
    let document = ConfigDocument::load(path)
        .map_err(|e| e.context(SyncError::InvalidConfig(format!("cannot load {}", path.display()))))?;
    Ok(document.resolve(branch)?.clone())
}

fn build_pipeline(
    cli: &Cli,
    command: &Command,
    branch: &str,
    work_dir: &Path,
    config: BranchConfig,
) -> Result<(Pipeline, Option<TicketHandle>)> {
    let inputs = NamingInputs::new(branch, work_dir);
    match command {
        Command::Start { name, sandbox } => {
            let inputs = inputs
                .with_scan_name_param(name.clone())
                .with_sandbox_param(sandbox.clone());
            let target = scan_target(cli, config, inputs, work_dir)?;
            Ok((Pipeline::builder().stage(LaunchStage::new(target)).build(), None))
        }
        Command::Results { build_id, sandbox } => {
            let inputs = inputs.with_sandbox_param(sandbox.clone());
            let target = scan_target(cli, config, inputs, work_dir)?;
            let stage = ResultsStage::new(target).with_build_id(build_id.clone());
            Ok((Pipeline::builder().stage(stage).build(), None))
        }
        Command::Tickets { dry_run } => {
            let stage = ticket_stage(cli, config, *dry_run, None)?;
            let handle = stage.report_handle();
            Ok((Pipeline::builder().stage(stage).build(), Some(handle)))
        }
        Command::Run {
            name,
            sandbox,
            dry_run,
        } => {
            let inputs = inputs
                .with_scan_name_param(name.clone())
                .with_sandbox_param(sandbox.clone());
            let target = scan_target(cli, config, inputs, work_dir)?;
            let mut builder = Pipeline::builder()
                .stage(LaunchStage::new(target.clone()))
                .stage(ResultsStage::new(target.clone()));

            let mut handle = None;
            if target.config.ticketing.is_some() {
                let stage = ticket_stage(cli, target.config.clone(), *dry_run, Some(target.service.clone()))?;
                handle = Some(stage.report_handle());
                builder = builder.stage(stage);
            } else {
                info!(pattern = %target.config.branch_pattern, "no ticketing block; skipping ticket sync");
            }
            Ok((builder.build(), handle))
        }
        Command::Skeleton { .. } | Command::Report { .. } => {
            bail!("command does not run a scan pipeline")
        }
    }
}

fn scan_target(cli: &Cli, config: BranchConfig, inputs: NamingInputs, work_dir: &Path) -> Result<ScanTarget> {
    Ok(ScanTarget {
        service: scan_service(cli)?,
        config,
        inputs,
        work_dir: work_dir.to_path_buf(),
    })
}

fn scan_service(cli: &Cli) -> Result<Arc<dyn ScanService>> {
    let credentials = Credentials::resolve(cli.vid.clone(), cli.vkey.clone()).map_err(|e| {
        e.context(SyncError::InvalidConfig("scan service credentials unavailable".into()))
    })?;
    Ok(Arc::new(VeracodeClient::new(credentials)?))
}

fn ticket_stage(
    cli: &Cli,
    config: BranchConfig,
    dry_run: bool,
    service: Option<Arc<dyn ScanService>>,
) -> Result<TicketSyncStage> {
    // Without a ticketing block the stage reports the problem itself.
    let Some(ticketing) = config.ticketing.clone().filter(|_| !dry_run) else {
        return Ok(TicketSyncStage::new(config));
    };

    let tracker = create_tracker(&ticketing).map_err(|e| {
        e.context(SyncError::InvalidConfig(format!(
            "issue tracker '{}' unavailable",
            ticketing.tracker
        )))
    })?;
    let service = match service {
        Some(service) => service,
        None => scan_service(cli)?,
    };
    Ok(TicketSyncStage::new(config).applying(tracker, service))
}

fn fail(ctx: &mut ExecutionContext, stage: &str, err: anyhow::Error) {
    match &ctx.error {
        Some(prior) => warn!(
            stage,
            error = %format!("{err:#}"),
            prior = %prior.kind,
            "context already carries a failure; not recording"
        ),
        None => ctx.record_error(stage, &err),
    }
}

fn emit(cli: &Cli, ctx: &ExecutionContext, tickets: Option<&TicketSyncReport>) -> Result<ExitCode> {
    let mut stdout = io::stdout().lock();
    if cli.console {
        formatter(true).write_context(ctx, tickets, &mut stdout)?;
    } else {
        ctx.save(&cli.output)?;
        info!(path = %cli.output.display(), "context saved");
        formatter(false).write_context(ctx, tickets, &mut stdout)?;
    }

    Ok(if ctx.has_error() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
