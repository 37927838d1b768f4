mod app;
mod cli;
mod logging;

use crate::app::{App, report};
use crate::cli::{Cli, Commands, ConsolidateCommand, ImportArgs, PolicyCommand, ResumeArgs, ThumbnailCommand};
use clap::Parser;
use meshvault_catalog::{ModelStore, Repository};
use meshvault_config::{Config, ExtraFileDecision, ExtraFilePolicy};
use meshvault_library::classify::is_safe;
use meshvault_library::consolidate::{ConsolidationPlan, build_plan, execute_plan, record_consolidated};
use meshvault_library::import::{ImportEvent, ImportObserver, ImportOutcome, ImportRequest, ImportStage};
use meshvault_storage::{CancellationToken, ContentHasher, WalkOptions, walk_all};
use miette::IntoDiagnostic;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let config = Config::load(cli.config.as_deref()).map_err(report)?;
    let app = App::new(config)?;

    match cli.command {
        Commands::Import(args) => import(&app, args).await,
        Commands::Pending => pending(&app),
        Commands::Resume(args) => resume(&app, args).await,
        Commands::Consolidate(ConsolidateCommand::Plan { source, root, output }) => {
            plan(&app, &source, root, &output).await
        },
        Commands::Consolidate(ConsolidateCommand::Run { plan }) => run_plan(&app, &plan).await,
        Commands::Policy(command) => policy(&app, command),
        Commands::Thumbnails(ThumbnailCommand::Cleanup) => cleanup_thumbnails(&app).await,
        Commands::Config => show_config(&app),
    }
}

async fn import(app: &App, args: ImportArgs) -> miette::Result<()> {
    let paths = expand(&args.paths).await?;
    let options = app.import_options(args.placement);
    let database = app.database().await?;
    let coordinator = Arc::new(app.coordinator(&database, options.generate_thumbnails)?);
    let interrupt = on_interrupt({
        let coordinator = Arc::clone(&coordinator);
        move || coordinator.cancel()
    });

    let outcome = coordinator.start(ImportRequest { paths, options }, &Console::default()).await;
    interrupt.abort();
    database.close().await;
    print_outcome(&outcome.map_err(report)?);
    Ok(())
}

fn pending(app: &App) -> miette::Result<()> {
    let batches = app.state.pending_batches().map_err(report)?;
    if batches.is_empty() {
        println!("No pending batches.");
        return Ok(());
    }
    for (n, batch) in batches.iter().enumerate() {
        let first = batch.first().map(|p| p.display().to_string()).unwrap_or_default();
        println!("batch {}: {} files, starting with {first}", n + 1, batch.len());
    }
    println!("Run `meshvault resume` to import the next batch.");
    Ok(())
}

async fn resume(app: &App, args: ResumeArgs) -> miette::Result<()> {
    let all = args.all;
    let options = app.import_options(args.placement);
    let database = app.database().await?;
    let coordinator = Arc::new(app.coordinator(&database, options.generate_thumbnails)?);
    let interrupt = on_interrupt({
        let coordinator = Arc::clone(&coordinator);
        move || coordinator.cancel()
    });

    let console = Console::default();
    let mut batches = 0;
    let result = loop {
        match coordinator.process_next_pending(options.clone(), &console).await {
            Ok(Some(outcome)) => {
                batches += 1;
                print_outcome(&outcome);
                coordinator.acknowledge();
                if !all || outcome.is_cancelled() || outcome.pending_batches == 0 {
                    break Ok(());
                }
            },
            Ok(None) => {
                if batches == 0 {
                    println!("No pending batches.");
                }
                break Ok(());
            },
            Err(e) => break Err(report(e)),
        }
    };
    interrupt.abort();
    database.close().await;
    result
}

async fn plan(app: &App, source: &Path, root: Option<PathBuf>, output: &Path) -> miette::Result<()> {
    let root = app.root(root).ok_or_else(|| miette::miette!("no library root given and none configured"))?;
    let policy = app.state.extra_file_policy().map_err(report)?;
    let plan = build_plan(source, &root, &policy).await.map_err(report)?;
    plan.save(output).map_err(report)?;

    let summary = plan.summary();
    println!(
        "{} models, {} thumbnails, {} extras: {} moves, {} copies, {} left in place",
        summary.models, summary.thumbnails, summary.extras, summary.moves, summary.copies, summary.skips
    );
    let undecided = plan.undecided_extensions(&policy);
    if !undecided.is_empty() {
        let list: Vec<String> = undecided.into_iter().collect();
        println!("No decision recorded for {}; those files stay where they are.", list.join(", "));
        println!("Record one with `meshvault policy set <extension> misc|leave` and plan again.");
    }
    println!("Plan saved to {}; run it with `meshvault consolidate run {}`.", output.display(), output.display());
    Ok(())
}

async fn run_plan(app: &App, path: &Path) -> miette::Result<()> {
    let mut plan = ConsolidationPlan::load(path).map_err(report)?;
    let cancel = CancellationToken::new();
    let interrupt = on_interrupt({
        let cancel = cancel.clone();
        move || cancel.cancel()
    });

    let execution = execute_plan(
        &mut plan,
        |p| tracing::debug!(completed = p.completed, total = p.total, file = %p.current, "Consolidating"),
        &cancel,
        |item| tracing::trace!(image = %item.dest_path.display(), "Thumbnail in place"),
    )
    .await;
    interrupt.abort();
    // Saved even when interrupted: completed items are the resume point.
    plan.save(path).map_err(report)?;

    let thumbnails = match app.thumbnail_cache() {
        Ok(service) => Some(service),
        Err(e) => {
            tracing::warn!(error = %e, "Thumbnail cache unavailable; skipping registration");
            None
        },
    };
    let database = app.database().await?;
    let hasher = ContentHasher::new(app.config.import.chunk_size);
    let recorded =
        record_consolidated(&plan, &Repository::from(&database), thumbnails.as_deref(), &hasher).await;
    database.close().await;

    println!(
        "{} moved, {} copied, {} already in place, {} failed; {} models cataloged, {} thumbnails registered",
        execution.moved,
        execution.copied,
        execution.already_present,
        execution.failed,
        recorded.stored,
        recorded.thumbnails
    );
    for item in plan.items.iter().filter(|i| i.error.is_some()) {
        println!("  failed: {}: {}", item.source_path.display(), item.error.as_deref().unwrap_or_default());
    }
    if execution.cancelled {
        println!("Interrupted; run the same command again to resume.");
    }
    Ok(())
}

fn policy(app: &App, command: PolicyCommand) -> miette::Result<()> {
    match command {
        PolicyCommand::Set { extension, decision } => {
            let decision = ExtraFileDecision::from(decision);
            app.state.set_extra_file_decision(&extension, decision).map_err(report)?;
            println!("{}: {}", ExtraFilePolicy::normalize(&extension), describe(decision));
        },
        PolicyCommand::Forget { extension } => {
            let extension = ExtraFilePolicy::normalize(&extension);
            match app.state.forget_extra_file_decision(&extension).map_err(report)? {
                true => println!("{extension}: undecided"),
                false => println!("No decision recorded for {extension}"),
            }
        },
        PolicyCommand::List => {
            let policy = app.state.extra_file_policy().map_err(report)?;
            if policy.is_empty() {
                println!("No decisions recorded.");
            }
            for (extension, decision) in policy.iter() {
                println!("{extension}: {}", describe(decision));
            }
        },
    }
    Ok(())
}

fn describe(decision: ExtraFileDecision) -> &'static str {
    match decision {
        ExtraFileDecision::MoveToMisc => "move to Misc",
        ExtraFileDecision::LeaveInPlace => "leave in place",
    }
}

async fn cleanup_thumbnails(app: &App) -> miette::Result<()> {
    let database = app.database().await?;
    let hashes = Repository::from(&database).content_hashes().await.map_err(report);
    database.close().await;
    let valid: HashSet<String> = hashes?.into_iter().collect();

    let cleanup = app.thumbnail_cache()?.cleanup_orphaned(&valid).await;
    println!("Removed {} orphaned thumbnails, kept {}, {} errors", cleanup.removed, cleanup.kept, cleanup.errors);
    Ok(())
}

fn show_config(app: &App) -> miette::Result<()> {
    println!("{}", serde_json::to_string_pretty(&app.config).into_diagnostic()?);
    let locations =
        [("database", app.config.database_path()), ("state", app.config.state_dir()), ("thumbnails", app.config.thumbnail_dir())];
    for (label, location) in locations {
        match location {
            Ok(path) => println!("{label}: {}", path.display()),
            Err(e) => println!("{label}: {}", *e),
        }
    }
    Ok(())
}

/// Lists every file an import argument stands for: files as given, and
/// directories recursively through the security filter.
async fn expand(inputs: &[PathBuf]) -> miette::Result<Vec<PathBuf>> {
    let options = WalkOptions { exclude: Vec::new(), skip_hidden_dirs: true };
    let mut paths = Vec::new();
    for input in inputs {
        if !input.is_dir() {
            paths.push(input.clone());
            continue;
        }
        let entries = walk_all(input, &options).await.map_err(report)?;
        let before = paths.len();
        paths.extend(entries.into_iter().map(|e| e.path).filter(|p| is_safe(p)));
        tracing::info!(dir = %input.display(), files = paths.len() - before, "Expanded directory");
    }
    Ok(paths)
}

/// Calls `cancel` on the first Ctrl-C.
fn on_interrupt(cancel: impl FnOnce() + Send + 'static) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; stopping at the next safe point");
            cancel();
        }
    })
}

/// Logs import progress, once per stage and ten-percent step.
#[derive(Default)]
struct Console {
    last: Mutex<Option<(ImportStage, u32)>>,
}
impl ImportObserver for Console {
    fn on_event(&self, event: ImportEvent) {
        match event {
            ImportEvent::Progress(p) => {
                let step = (p.percent / 10.0) as u32;
                {
                    let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
                    if *last == Some((p.stage, step)) {
                        return;
                    }
                    *last = Some((p.stage, step));
                }
                tracing::info!(
                    stage = ?p.stage,
                    percent = p.percent.round() as u32,
                    file = p.current_file.as_deref().unwrap_or_default(),
                    remaining_secs = ?p.remaining.map(|d| d.as_secs()),
                    "Importing"
                );
            },
            ImportEvent::DuplicateInLibrary { path, existing } => {
                println!("already in library: {} (as {})", path.display(), existing.display());
            },
            ImportEvent::Finished(stage) => tracing::debug!(?stage, "Import finished"),
        }
    }
}

fn print_outcome(outcome: &ImportOutcome) {
    let result = &outcome.result;
    match outcome.stage {
        ImportStage::Cancelled => {
            let removed = outcome.rollback.as_ref().map_or(0, |r| r.removed_files);
            println!("Import cancelled; {removed} placed files were removed again.");
        },
        ImportStage::Failed => println!("Import failed: none of {} files could be imported.", result.total_files),
        _ => println!(
            "Imported {} of {} files ({} skipped, {} failed, {} duplicates, {} bytes, {} copied) in {:.1}s",
            result.processed_files,
            result.total_files,
            result.skipped_files,
            result.failed_files,
            result.duplicate_count,
            result.total_bytes,
            result.bytes_written,
            result.duration.as_secs_f64()
        ),
    }
    let thumbnails = outcome.thumbnails;
    if thumbnails.total() + thumbnails.failed > 0 {
        println!(
            "Thumbnails: {} rendered, {} cached, {} from images alongside, {} failed",
            thumbnails.generated, thumbnails.cached, thumbnails.registered, thumbnails.failed
        );
    }
    for (path, error) in &result.errors {
        println!("  failed: {}: {error}", path.display());
    }
    if outcome.pending_batches > 0 {
        println!("{} batches pending; run `meshvault resume` to continue.", outcome.pending_batches);
    }
}
