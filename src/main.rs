//! CLI entry point for drivemirror.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use drivemirror::remote::http::HttpRemoteStore;
use drivemirror::summary::{SummarySort, summarize};
use drivemirror::transfer::{WalkOptions, Walker, collect_cached};
use drivemirror::{
    Config, CopyOptions, CredentialPool, Database, FileCredentialSource, RateGate, RemoteCaller,
    ResumeChoice, ResumePrompt, TaskCoordinator, TaskStore, validate_object_id,
};

mod cli;

use cli::{Args, Command, ResumeArg};

/// Interactive resume prompt on stdin.
struct StdinPrompt;

impl ResumePrompt for StdinPrompt {
    fn choose(&self) -> ResumeChoice {
        eprintln!("A previous copy of this source/target pair exists.");
        eprint!("  [c] Continue  [r] Restart  [x] Exit > ");
        let _ = std::io::stderr().flush();
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).is_err() {
            return ResumeChoice::Exit;
        }
        match line.trim().to_ascii_lowercase().as_str() {
            "c" | "continue" => ResumeChoice::Continue,
            "r" | "restart" => ResumeChoice::Restart,
            _ => ResumeChoice::Exit,
        }
    }
}

/// Everything the remote-facing commands share.
struct Engine {
    caller: Arc<RemoteCaller>,
    store: TaskStore,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    config: Config,
}

async fn build_engine(config: Config, base_url: Option<&str>) -> Result<Engine> {
    let db = Database::new(&config.db_path).await?;
    let store = TaskStore::new(db);

    let source = FileCredentialSource::new(&config.sa_location);
    let pool = CredentialPool::init(Arc::new(source), config.parallel_limit)
        .await
        .context("failed to initialize credential pool")?;
    if pool.active_count() == 0 {
        bail!(
            "no usable service-account credentials under {}",
            config.sa_location.display()
        );
    }
    info!(
        active = pool.active_count(),
        capacity = pool.capacity(),
        "credential pool ready"
    );

    let remote = match base_url {
        Some(url) => HttpRemoteStore::with_base_url(url)?,
        None => HttpRemoteStore::new()?,
    };
    let gate = Arc::new(RateGate::new(config.rate_per_sec));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling in-flight work");
                cancel.cancel();
            }
        });
    }

    let caller = Arc::new(RemoteCaller::new(
        Arc::new(remote),
        Arc::new(pool),
        gate,
        config.retry_limit,
        cancel.clone(),
    ));
    let semaphore = Arc::new(Semaphore::new(config.parallel_limit));

    Ok(Engine {
        caller,
        store,
        semaphore,
        cancel,
        config,
    })
}

fn write_summary(
    summary: &drivemirror::summary::ListingSummary,
    format: &str,
    output: Option<&PathBuf>,
) -> Result<()> {
    let text = if format.eq_ignore_ascii_case("json") {
        serde_json::to_string_pretty(summary)?
    } else {
        summary.render_table()
    };
    match output {
        Some(path) => {
            std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
            info!(path = %path.display(), "summary written");
        }
        None => println!("{text}"),
    }
    Ok(())
}

async fn run_copy(
    engine: Engine,
    source: String,
    target: String,
    options: CopyOptions,
    resume: ResumeArg,
) -> Result<()> {
    let coordinator = TaskCoordinator::new(
        Arc::clone(&engine.caller),
        engine.store.clone(),
        Arc::clone(&engine.semaphore),
        engine.cancel.clone(),
        engine.config.effective_page_size(),
    );

    let prompt: Box<dyn ResumePrompt> = match resume {
        ResumeArg::Ask => Box::new(StdinPrompt),
        ResumeArg::Continue => Box::new(ResumeChoice::Continue),
        ResumeArg::Restart => Box::new(ResumeChoice::Restart),
        ResumeArg::Exit => Box::new(ResumeChoice::Exit),
    };

    match coordinator.copy(&source, &target, &options, prompt.as_ref()).await? {
        Some(report) => {
            info!(
                task_id = report.task_id,
                dest_root = %report.dest_root_id,
                folders = report.folders,
                files = report.files,
                copied = report.copied,
                failed = report.failed,
                "copy request complete"
            );
            println!(
                "\nCopied {} of {} files ({} folders) into {}",
                report.copied, report.files, report.folders, report.dest_root_id
            );
            if report.failed > 0 {
                bail!("{} file(s) failed to copy; rerun with --resume continue", report.failed);
            }
        }
        None => println!("Existing task left untouched."),
    }
    Ok(())
}

async fn run_count(
    engine: Engine,
    id: String,
    sort: String,
    format: String,
    output: Option<PathBuf>,
    update: bool,
    not_team_drive: bool,
) -> Result<()> {
    let sort = SummarySort::parse(&sort);

    if !update {
        // Serve a stored summary without touching anything else.
        if let Some(row) = engine.store.listing_get(&id).await? {
            if let Some(summary) = row.stored_summary() {
                debug!("serving stored summary");
                return write_summary(&summary, &format, output.as_ref());
            }
        }
        // No stored summary; a cached subtree still avoids the remote.
        let cached = collect_cached(&engine.store, &id).await?;
        if !cached.is_empty() {
            debug!(count = cached.len(), "counting cached subtree");
            return write_summary(&summarize(&cached, sort), &format, output.as_ref());
        }
    }

    let walker = Walker::new(
        Arc::clone(&engine.caller),
        engine.store.clone(),
        Arc::clone(&engine.semaphore),
        engine.cancel.clone(),
    );
    let listing = walker
        .walk(
            &id,
            &WalkOptions {
                update,
                not_team_drive,
                with_modified: false,
                page_size: engine.config.effective_page_size(),
            },
        )
        .await?;
    write_summary(&summarize(&listing, sort), &format, output.as_ref())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let config = Config {
        parallel_limit: usize::from(args.parallel),
        page_size: args.page_size,
        retry_limit: args.retry_limit,
        rate_per_sec: args.rate,
        default_target: args.default_target.clone(),
        sa_location: args.sa_dir.clone(),
        db_path: args.db.clone(),
    };

    match args.command {
        Command::Copy {
            source,
            target,
            name,
            min_size,
            dncr,
            update,
            not_team_drive,
            resume,
        } => {
            if !validate_object_id(&source) {
                bail!("invalid source identifier: {source}");
            }
            let target = target
                .or_else(|| config.default_target.clone())
                .context("destination target is required (pass it or set --default-target)")?;
            if !validate_object_id(&target) {
                bail!("invalid destination identifier: {target}");
            }
            let options = CopyOptions {
                name,
                min_size,
                update,
                dncr,
                not_team_drive,
            };
            let engine = build_engine(config, args.base_url.as_deref()).await?;
            run_copy(engine, source, target, options, resume).await
        }
        Command::Count {
            id,
            sort,
            format,
            output,
            update,
            not_team_drive,
        } => {
            if !validate_object_id(&id) {
                bail!("invalid folder identifier: {id}");
            }
            let engine = build_engine(config, args.base_url.as_deref()).await?;
            run_count(engine, id, sort, format, output, update, not_team_drive).await
        }
    }
}
