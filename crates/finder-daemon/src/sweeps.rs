//! Periodic background work.
//!
//! Three independent schedules run until shutdown:
//! expiry of overdue requests, purging of expired contact details, and
//! (when configured) rotation of the encryption key. Each run happens on the
//! blocking pool, since the stores are synchronous.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use finder_exchange::engine::system_actor;
use finder_exchange::service::{ContactExchangeService, SweepReport};
use finder_types::HOUR_SECS;

use crate::DaemonState;

/// Run every enabled schedule until `shutdown` fires.
pub async fn run(state: Arc<DaemonState>, mut shutdown: broadcast::Receiver<()>) {
    let sweeps = &state.config.sweeps;
    let mut expiry = ticker(sweeps.expiry_interval_secs);
    let mut cleanup = ticker(sweeps.cleanup_interval_secs);
    let rotation_secs = sweeps.key_rotation_interval_hours.saturating_mul(HOUR_SECS);
    let mut rotation = (rotation_secs > 0).then(|| ticker(rotation_secs));

    loop {
        tokio::select! {
            _ = expiry.tick() => {
                expire_requests(&state).await;
            }
            _ = cleanup.tick() => {
                purge_expired_contacts(&state).await;
            }
            _ = async {
                match rotation.as_mut() {
                    Some(t) => { t.tick().await; }
                    None => std::future::pending::<()>().await,
                }
            } => {
                rotate_key(&state).await;
            }
            _ = shutdown.recv() => {
                info!("sweeps stopping");
                break;
            }
        }
    }
}

fn ticker(secs: u64) -> tokio::time::Interval {
    let mut t = interval(Duration::from_secs(secs.max(1)));
    t.set_missed_tick_behavior(MissedTickBehavior::Delay);
    t
}

async fn on_blocking_pool<T: Send + 'static>(
    state: &Arc<DaemonState>,
    what: &'static str,
    f: impl FnOnce(&ContactExchangeService) -> finder_exchange::Result<T> + Send + 'static,
) -> Option<T> {
    let service = state.service.clone();
    match tokio::task::spawn_blocking(move || f(&service)).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            error!(error = %e, kind = ?e.kind(), "{what} failed");
            None
        }
        Err(e) => {
            error!(error = %e, "{what} task panicked");
            None
        }
    }
}

/// One expiry pass.
pub async fn expire_requests(state: &Arc<DaemonState>) -> Option<SweepReport> {
    let report = on_blocking_pool(state, "expiry sweep", |s| s.process_expired_requests()).await?;
    if report.processed > 0 || report.failed > 0 {
        info!(processed = report.processed, failed = report.failed, "expired requests");
    }
    Some(report)
}

/// One purge pass.
pub async fn purge_expired_contacts(state: &Arc<DaemonState>) -> Option<SweepReport> {
    let report = on_blocking_pool(state, "cleanup sweep", |s| s.cleanup_expired_tokens()).await?;
    if report.processed > 0 || report.failed > 0 {
        info!(processed = report.processed, failed = report.failed, "purged expired contact details");
    }
    Some(report)
}

async fn rotate_key(state: &Arc<DaemonState>) {
    if let Some(key) = on_blocking_pool(state, "scheduled key rotation", |s| s.rotate_keys(&system_actor())).await {
        info!(fingerprint = %key.fingerprint, "scheduled key rotation complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::{seeded_state, ApprovedRequest};
    use finder_types::exchange::ExchangeStatus;

    #[tokio::test]
    async fn test_expiry_and_purge_passes() {
        let (state, clock, seed) = seeded_state();
        let ApprovedRequest { request_id, .. } = seed.approved(&state);

        clock.advance_hours(73);
        let report = expire_requests(&state).await.expect("expiry");
        assert_eq!(report.processed, 1);

        let report = purge_expired_contacts(&state).await.expect("purge");
        assert_eq!(report.processed, 1);

        let record = state
            .service
            .get_request(&request_id, &seed.owner)
            .expect("get");
        assert_eq!(record.status, ExchangeStatus::Expired);
        assert!(record.encrypted_contact_info.is_none());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (state, _clock, _seed) = seeded_state();
        let task = tokio::spawn(run(state.clone(), state.shutdown_tx.subscribe()));
        tokio::task::yield_now().await;
        state.shutdown_tx.send(()).expect("signal");
        task.await.expect("sweeps exit");
    }
}
