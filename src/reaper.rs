//! Periodic reclamation of abandoned multipart sessions.
//!
//! Expiry is a data-driven deadline on the session row, not a live
//! timer: whatever happens to the uploading task, the reaper finds the
//! overdue session and walks it to Aborted, releasing its quota
//! reservations. Sessions are handled independently; one failure is
//! logged and skipped, the sweep continues.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::ReaperConfig;
use crate::db::{now_timestamp, parse_timestamp, DbPool, SQL_NOW};
use crate::quota::{QuotaRepository, QuotaSubject, ReservationProtocol};
use crate::store::ObjectStore;
use crate::upload::{MultipartUploadSession, SessionRepository};
use crate::Result;

/// Outcome of one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    /// Expired sessions found.
    pub examined: usize,
    /// Sessions fully reclaimed.
    pub reaped: usize,
    /// Sessions skipped after an error.
    pub failed: usize,
}

/// Background sweep over expired sessions and quota pressure.
pub struct ExpiryReaper {
    pool: DbPool,
    store: Arc<dyn ObjectStore>,
    config: ReaperConfig,
}

impl ExpiryReaper {
    /// Create a new reaper.
    pub fn new(pool: DbPool, store: Arc<dyn ObjectStore>, config: ReaperConfig) -> Self {
        Self { pool, store, config }
    }

    /// Run sweeps forever at the configured interval.
    ///
    /// Intended to be spawned as its own task alongside the request
    /// handlers.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(interval_secs = self.config.interval_secs, "expiry reaper started");
        loop {
            ticker.tick().await;

            match self.sweep_once().await {
                Ok(stats) if stats.examined > 0 => {
                    info!(
                        examined = stats.examined,
                        reaped = stats.reaped,
                        failed = stats.failed,
                        "reaper sweep finished"
                    );
                }
                Ok(_) => debug!("reaper sweep found nothing to do"),
                Err(e) => warn!(error = %e, "reaper sweep failed"),
            }

            if let Err(e) = self.run_alert_pass().await {
                warn!(error = %e, "quota alert pass failed");
            }
        }
    }

    /// Reclaim expired in-progress sessions.
    pub async fn sweep_once(&self) -> Result<SweepStats> {
        let sessions = SessionRepository::new(&self.pool)
            .list_expired(&now_timestamp(), self.config.batch_size)
            .await?;

        let mut stats = SweepStats {
            examined: sessions.len(),
            ..SweepStats::default()
        };

        for session in sessions {
            match self.reap_session(&session).await {
                Ok(true) => stats.reaped += 1,
                Ok(false) => {}
                Err(e) => {
                    stats.failed += 1;
                    warn!(session = session.id, error = %e, "failed to reap session, skipping");
                }
            }
        }

        Ok(stats)
    }

    /// Walk one expired session to Aborted and remove it.
    ///
    /// Returns false when another path won the terminal transition, in
    /// which case that path already settled the reservations.
    async fn reap_session(&self, session: &MultipartUploadSession) -> Result<bool> {
        if let Err(e) = self
            .store
            .abort_multipart_session(&session.storage_key, &session.session_id)
            .await
        {
            // Staged backend parts may linger; the reservation matters more.
            warn!(session = session.id, error = %e, "backend abort failed during sweep");
        }

        let repo = SessionRepository::new(&self.pool);
        if repo.mark_aborted(session.id).await?.is_none() {
            debug!(session = session.id, "session reached a terminal state before the sweep");
            return Ok(false);
        }

        let quota_repo = QuotaRepository::new(&self.pool);
        let protocol = ReservationProtocol::new(&self.pool);
        let subjects = [
            QuotaSubject::tenant(&session.tenant_id),
            QuotaSubject::user(&session.tenant_id, &session.created_by),
        ];
        for subject in &subjects {
            match quota_repo.get(subject).await? {
                Some(quota) => {
                    protocol.release(quota.id, session.total_size).await?;
                }
                None => warn!(
                    session = session.id,
                    ?subject,
                    "quota row missing while releasing reaped session"
                ),
            }
        }

        repo.delete(session.id).await?;
        info!(
            session = session.id,
            tenant = %session.tenant_id,
            size = session.total_size,
            "reclaimed expired upload session"
        );

        Ok(true)
    }

    /// Emit rate-limited warnings for quotas above the usage threshold.
    ///
    /// Returns the quota ids that were notified this pass.
    pub async fn run_alert_pass(&self) -> Result<Vec<i64>> {
        let over = QuotaRepository::new(&self.pool)
            .list_above_usage(self.config.alert_threshold_percent)
            .await?;

        let now = Utc::now();
        let mut notified = Vec::new();

        for quota in over {
            let last = self.last_notified(quota.id).await?;
            if !should_notify(last, now, self.config.alert_interval_secs) {
                continue;
            }

            warn!(
                quota = quota.id,
                tenant = %quota.tenant_id,
                subject_type = quota.subject_type.as_str(),
                usage_percent = quota.usage_percent(),
                limit = quota.limit_bytes,
                "quota usage above threshold"
            );
            self.mark_notified(quota.id).await?;
            notified.push(quota.id);
        }

        Ok(notified)
    }

    async fn last_notified(&self, quota_id: i64) -> Result<Option<DateTime<Utc>>> {
        let last: Option<String> =
            sqlx::query_scalar("SELECT last_notified_at FROM quota_alerts WHERE quota_id = $1")
                .bind(quota_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(last.as_deref().and_then(parse_timestamp))
    }

    async fn mark_notified(&self, quota_id: i64) -> Result<()> {
        let sql = format!(
            "INSERT INTO quota_alerts (quota_id, last_notified_at)
             VALUES ($1, {SQL_NOW})
             ON CONFLICT(quota_id) DO UPDATE SET last_notified_at = excluded.last_notified_at"
        );
        sqlx::query(&sql).bind(quota_id).execute(&self.pool).await?;
        Ok(())
    }
}

/// Whether a repeat notification is due: never notified before, or the
/// configured interval has elapsed since the last one.
pub fn should_notify(
    last: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    interval_secs: i64,
) -> bool {
    match last {
        None => true,
        Some(last) => now.signed_duration_since(last).num_seconds() >= interval_secs,
    }
}
