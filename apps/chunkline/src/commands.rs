//! Subcommand implementations.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chunkline_client::{
    HttpConnection, ResumeStore, TransferEvent, TransferOrchestrator,
    TransferOutcome, UploadConnection,
};
use chunkline_server::{ChunkServer, ServerConfig};

use crate::config::AppConfig;

pub async fn serve(config: ServerConfig) -> Result<()> {
    let server = ChunkServer::new(config);

    let stopper = Arc::clone(&server);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            stopper.shutdown();
        }
    });

    server.run().await.context("server failed")
}

pub async fn upload(config: &AppConfig, server: Option<String>, file: PathBuf) -> Result<()> {
    let file = std::fs::canonicalize(&file)
        .with_context(|| format!("cannot open {}", file.display()))?;
    let store = ResumeStore::load(&config.client.resume_file)?;
    if let Some(existing) = store.find_by_path(&file) {
        warn!(
            session_id = %existing.session_id,
            "an incomplete upload of this file exists; `chunkline resume {}` continues it",
            existing.session_id
        );
    }

    let url = server.unwrap_or_else(|| config.client.server_url.clone());
    let orch = orchestrator(config, &url)?;
    run_transfer(orch, store, Run::Start(file)).await
}

pub async fn resume(
    config: &AppConfig,
    server: Option<String>,
    session_id: Option<String>,
) -> Result<()> {
    let store = ResumeStore::load(&config.client.resume_file)?;
    let record = match session_id {
        Some(id) => store
            .get(&id)
            .cloned()
            .with_context(|| format!("no incomplete upload with session {id}"))?,
        None => store
            .list()
            .last()
            .cloned()
            .context("no incomplete uploads")?,
    };

    let url = server
        .or_else(|| Some(record.server_url.clone()).filter(|u| !u.is_empty()))
        .unwrap_or_else(|| config.client.server_url.clone());
    let orch = orchestrator(config, &url)?;
    let session_id = record.session_id.clone();
    orch.restore(record)?;

    run_transfer(orch, store, Run::Resume(session_id)).await
}

pub fn list(config: &AppConfig) -> Result<()> {
    let store = ResumeStore::load(&config.client.resume_file)?;
    if store.list().is_empty() {
        println!("No incomplete uploads.");
        return Ok(());
    }
    for record in store.list() {
        println!(
            "{}  {:>6.2}%  {}  ({})",
            record.session_id,
            record.progress,
            record.file_path.display(),
            record.updated_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

pub async fn cancel(config: &AppConfig, server: Option<String>, session_id: String) -> Result<()> {
    let mut store = ResumeStore::load(&config.client.resume_file)?;
    let url = server
        .or_else(|| {
            store
                .get(&session_id)
                .map(|r| r.server_url.clone())
                .filter(|u| !u.is_empty())
        })
        .unwrap_or_else(|| config.client.server_url.clone());

    let conn = connect(config, &url)?;
    conn.cancel_session(session_id.clone()).await?;
    if store.remove(&session_id).is_some() {
        store.save()?;
    }
    println!("Cancelled {session_id}");
    Ok(())
}

pub async fn status(config: &AppConfig, server: Option<String>, session_id: Option<String>) -> Result<()> {
    let url = server.unwrap_or_else(|| config.client.server_url.clone());
    let conn = connect(config, &url)?;
    let json = match session_id {
        Some(id) => serde_json::to_string_pretty(&conn.session_status(id).await?)?,
        None => serde_json::to_string_pretty(&conn.server_status().await?)?,
    };
    println!("{json}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Transfer driver
// ---------------------------------------------------------------------------

enum Run {
    Start(PathBuf),
    Resume(String),
}

fn connect(config: &AppConfig, url: &str) -> Result<HttpConnection> {
    HttpConnection::new(url, config.client.request_timeout)
        .with_context(|| format!("invalid server URL {url}"))
}

fn orchestrator(config: &AppConfig, url: &str) -> Result<Arc<TransferOrchestrator>> {
    let conn = connect(config, url)?;
    Ok(Arc::new(TransferOrchestrator::with_retry(
        Arc::new(conn),
        config.client.retry.clone(),
    )))
}

/// Runs a transfer, pausing on Ctrl-C, and keeps the resume store in step
/// with the result.
async fn run_transfer(
    orch: Arc<TransferOrchestrator>,
    mut store: ResumeStore,
    run: Run,
) -> Result<()> {
    let reporting_done = CancellationToken::new();
    let reporter = orch
        .take_events()
        .map(|rx| tokio::spawn(report_events(rx, reporting_done.clone())));

    let pauser = {
        let orch = Arc::clone(&orch);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, pausing");
                orch.pause();
            }
        })
    };

    let (result, resumed_id) = match run {
        Run::Start(path) => (orch.start(&path).await, None),
        Run::Resume(id) => (orch.resume().await, Some(id)),
    };
    pauser.abort();

    // Whatever the orchestrator still holds is resumable; anything else is
    // done with.
    let snapshot = orch.snapshot();
    if let Some(id) = &resumed_id {
        if snapshot.as_ref().is_none_or(|s| &s.session_id != id) {
            store.remove(id);
        }
    }
    if let Some(record) = &snapshot {
        store.upsert(record.clone());
    }
    store.save()?;

    reporting_done.cancel();
    if let Some(task) = reporter {
        if let Ok(reported) = task.await {
            debug!(reported, "transfer events reported");
        }
    }

    match result {
        Ok(TransferOutcome::Completed(resp)) => {
            println!("Uploaded {} ({} bytes)", resp.artifact_path, resp.size);
            Ok(())
        }
        Ok(TransferOutcome::Paused) => {
            match snapshot {
                Some(record) => println!(
                    "Paused at {:.2}%. Continue with `chunkline resume {}`",
                    record.progress, record.session_id
                ),
                None => println!("Paused."),
            }
            Ok(())
        }
        Ok(TransferOutcome::Cancelled) => {
            println!("Cancelled.");
            Ok(())
        }
        Err(e) => {
            if let Some(record) = snapshot {
                eprintln!(
                    "Upload interrupted. Retry with `chunkline resume {}`",
                    record.session_id
                );
            }
            Err(anyhow::Error::new(e).context("upload failed"))
        }
    }
}

/// Logs transfer events until `done` fires, then logs whatever is still
/// queued. Returns the number of events seen.
async fn report_events(mut rx: mpsc::Receiver<TransferEvent>, done: CancellationToken) -> usize {
    let mut seen = 0;
    loop {
        tokio::select! {
            biased;

            event = rx.recv() => match event {
                Some(event) => {
                    report_event(event);
                    seen += 1;
                }
                None => break,
            },
            _ = done.cancelled() => {
                while let Ok(event) = rx.try_recv() {
                    report_event(event);
                    seen += 1;
                }
                break;
            }
        }
    }
    seen
}

fn report_event(event: TransferEvent) {
    match event {
        TransferEvent::SessionCreated {
            session_id,
            total_chunks,
            ..
        } => info!(%session_id, total_chunks, "session opened"),
        TransferEvent::Progress {
            chunk_index,
            bytes_sent,
            total_bytes,
            progress,
        } => info!(
            chunk_index,
            bytes_sent,
            total_bytes,
            "progress {progress:.1}%"
        ),
        TransferEvent::Retrying {
            chunk_index,
            attempt,
            error,
            ..
        } => warn!(chunk_index, attempt, %error, "retrying chunk"),
        TransferEvent::Resumed { next_index } => info!(next_index, "resumed"),
        TransferEvent::Resynced {
            last_acknowledged_index,
            progress,
        } => warn!(
            last_acknowledged_index = ?last_acknowledged_index,
            "adopted the server's acknowledged chunks, progress now {progress:.1}%"
        ),
        // Terminal events are reported by the caller.
        TransferEvent::Paused { .. }
        | TransferEvent::Completed { .. }
        | TransferEvent::Failed { .. }
        | TransferEvent::Cancelled => {}
    }
}
