use anyhow::{Context, Result};
use axum::Router;
use clap::Parser;
use media_cloud_sync::{
    BatchCheckpoint, BatchControl, BatchOutcome, FixedPolicy, NewMediaObject, PageDecision, SyncEngine,
    config::{AppConfig, Cli, Command, FailureAction},
    db,
    handlers::AppState,
    routes,
};
use serde::Serialize;
use std::{io::ErrorKind, path::Path, sync::Arc, time::Duration};
use tokio::{net::TcpListener, sync::oneshot};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config ---
    let cli = Cli::parse();
    let cfg = AppConfig::from_env_and_args(&cli.config)?;
    tracing::info!("Starting media-cloud-sync with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    let db = Arc::new(
        db::connect(&cfg.database_url)
            .await
            .with_context(|| format!("opening database {}", cfg.database_url))?,
    );
    db::run_migrations(&db).await.context("running migrations")?;

    if let Command::Migrate = cli.command {
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    let engine = SyncEngine::connect(cfg.sync.clone(), db).context("building sync engine")?;

    match cli.command {
        Command::Serve => serve(&cfg, engine).await?,
        Command::Migrate => {}
        Command::Register {
            id,
            path,
            variants,
            mime_type,
        } => {
            let object = engine
                .register(NewMediaObject {
                    id,
                    local_path: path,
                    variant_paths: variants,
                    mime_type,
                    size_bytes: None,
                })
                .await?;
            print_json(&object)?;
        }
        Command::Sync { id } => print_json(&engine.sync(id).await?)?,
        Command::Batch {
            checkpoint,
            restart,
            on_page_failure,
        } => run_batch(&engine, Path::new(&checkpoint), restart, on_page_failure).await?,
        Command::DeleteLocalAll => {
            print_json(&engine.delete_local_all(&BatchControl::new()).await?)?
        }
        Command::Rewrite { id, value } => println!("{}", engine.rewrite_url(id, &value).await?),
        Command::DeleteLocal { id } => print_json(&engine.delete_local(id).await?)?,
        Command::Reset { id } => {
            engine.reset(id).await?;
            print_json(&engine.object_details(id).await?)?
        }
        Command::TestConnection => print_json(&engine.test_connection().await?)?,
        Command::DownloadLink { file } => println!("{}", engine.download_link(&file).await?),
        Command::CleanupLocks { older_than_secs } => {
            let cleaned = engine
                .cleanup_locks(Duration::from_secs(older_than_secs))
                .await?;
            println!("cleared {} abandoned leases", cleaned);
        }
        Command::CleanupDuplicates => {
            let cleaned = engine.cleanup_duplicates().await?;
            println!("reset {} duplicated records", cleaned);
        }
        Command::Status => print_json(&engine.status().await?)?,
    }

    Ok(())
}

async fn serve(cfg: &AppConfig, engine: SyncEngine) -> Result<()> {
    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(AppState::new(engine));

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Run a batch, persisting the checkpoint after every page so that an
/// interrupted run resumes where it stopped.
async fn run_batch(
    engine: &SyncEngine,
    checkpoint_path: &Path,
    restart: bool,
    on_page_failure: FailureAction,
) -> Result<()> {
    let resume = if restart {
        None
    } else {
        load_checkpoint(checkpoint_path).await?
    };

    let control = Arc::new(BatchControl::new());
    let mut progress = control.subscribe();
    let writer_path = checkpoint_path.to_path_buf();
    let (stop_writer, mut writer_stopped) = oneshot::channel::<()>();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = &mut writer_stopped => break,
                changed = progress.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let latest = progress.borrow_and_update().clone();
                    if let Some(checkpoint) = latest {
                        if let Err(err) = save_checkpoint(&writer_path, &checkpoint).await {
                            tracing::warn!("could not save checkpoint: {:#}", err);
                        }
                    }
                }
            }
        }
    });

    let interrupt = control.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after the current page");
            interrupt.cancel();
        }
    });

    let policy = FixedPolicy(match on_page_failure {
        FailureAction::Skip => PageDecision::Skip,
        FailureAction::Stop => PageDecision::Stop,
    });
    let report = engine.sync_batch(resume, &control, &policy).await;
    let _ = stop_writer.send(());
    let _ = writer.await;

    let report = report?;
    if report.outcome == BatchOutcome::Completed {
        // a finished run leaves nothing to resume
        match tokio::fs::remove_file(checkpoint_path).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err).context("removing finished checkpoint"),
        }
    } else {
        save_checkpoint(checkpoint_path, &report.checkpoint).await?;
    }
    print_json(&report)
}

async fn load_checkpoint(path: &Path) -> Result<Option<BatchCheckpoint>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let checkpoint: BatchCheckpoint = serde_json::from_slice(&bytes)
                .with_context(|| format!("parsing checkpoint {}", path.display()))?;
            tracing::info!(
                page = checkpoint.current_page,
                "resuming from {}",
                path.display()
            );
            Ok(Some(checkpoint))
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading checkpoint {}", path.display())),
    }
}

async fn save_checkpoint(path: &Path, checkpoint: &BatchCheckpoint) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, serde_json::to_vec_pretty(checkpoint)?)
        .await
        .with_context(|| format!("writing checkpoint {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
