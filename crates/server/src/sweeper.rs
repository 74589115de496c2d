//! Expiry sweep for abandoned sessions.
//!
//! A session that is never completed or cancelled would otherwise pin its
//! registry entry and staged chunks forever.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::state::AppState;

/// What one sweep removed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Sessions past their TTL.
    pub expired: usize,
    /// Staging directories with no live session behind them.
    pub orphaned: usize,
}

/// Runs one sweep as of `now`.
pub async fn sweep_once(state: &AppState, now: DateTime<Utc>) -> SweepReport {
    let mut report = SweepReport::default();

    let cutoff = chrono::Duration::from_std(state.session_ttl)
        .ok()
        .and_then(|ttl| now.checked_sub_signed(ttl));

    if let Some(cutoff) = cutoff {
        for id in state.registry.expired_before(cutoff).await {
            if state.registry.remove_session(&id).await.is_none() {
                continue;
            }
            if let Err(e) = state.store.delete_session_chunks(&id).await {
                warn!(session_id = %id, error = %e, "failed to delete expired chunks");
            }
            info!(session_id = %id, "expired session swept");
            report.expired += 1;
        }
    }

    match state.store.staged_sessions().await {
        Ok(staged) => {
            for id in staged {
                if state.registry.contains(&id).await {
                    continue;
                }
                match state.store.delete_session_chunks(&id).await {
                    Ok(()) => {
                        debug!(session_id = %id, "orphaned staging directory removed");
                        report.orphaned += 1;
                    }
                    Err(e) => {
                        warn!(session_id = %id, error = %e, "failed to remove orphaned chunks")
                    }
                }
            }
        }
        Err(e) => warn!(error = %e, "failed to scan staging directory"),
    }

    report
}

/// Sweeps every `interval` until `cancel` fires.
pub async fn run(state: AppState, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; skip it so startup stays quiet.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("sweeper stopped");
                break;
            }

            _ = ticker.tick() => {
                let report = sweep_once(&state, Utc::now()).await;
                if report != SweepReport::default() {
                    info!(
                        expired = report.expired,
                        orphaned = report.orphaned,
                        "sweep finished"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chunkline_transfer::{ChunkStore, SessionId, SessionRegistry};
    use tempfile::TempDir;

    fn state(dir: &TempDir, ttl: Duration) -> AppState {
        let registry = Arc::new(SessionRegistry::with_exact_chunk_size(4));
        AppState::new(registry, ChunkStore::new(dir.path()), ttl)
    }

    #[tokio::test]
    async fn expired_sessions_and_chunks_are_removed() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir, Duration::from_secs(60));

        let record = state.registry.create_session("a.bin", 8).await.unwrap();
        state.store.write_chunk(&record.id, 0, b"abcd").await.unwrap();
        state
            .registry
            .record_chunk_received(&record.id, 0)
            .await
            .unwrap();

        // Nothing is old enough yet.
        let report = sweep_once(&state, Utc::now()).await;
        assert_eq!(report, SweepReport::default());
        assert!(state.registry.contains(&record.id).await);

        // Two minutes later the session is past its TTL.
        let later = Utc::now() + chrono::Duration::minutes(2);
        let report = sweep_once(&state, later).await;
        assert_eq!(report.expired, 1);
        assert!(!state.registry.contains(&record.id).await);
        assert!(!state.store.session_dir(&record.id).exists());
    }

    #[tokio::test]
    async fn orphaned_staging_dirs_are_removed() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir, Duration::from_secs(60));

        let live = state.registry.create_session("a.bin", 8).await.unwrap();
        state.store.write_chunk(&live.id, 0, b"abcd").await.unwrap();

        let orphan = SessionId::generate();
        state.store.write_chunk(&orphan, 0, b"abcd").await.unwrap();

        let report = sweep_once(&state, Utc::now()).await;
        assert_eq!(report.orphaned, 1);
        assert!(state.store.session_dir(&live.id).exists());
        assert!(!state.store.session_dir(&orphan).exists());
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir, Duration::from_secs(60));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run(state, Duration::from_millis(10), cancel.clone()));
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("sweeper should stop")
            .unwrap();
    }
}
