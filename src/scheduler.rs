//! Daily background triage.
//!
//! A single tokio task sleeps until the next configured UTC `hour:minute`,
//! runs [`Triage::triage_unread`], and repeats. It wakes only for the
//! deadline or shutdown; failures are logged and never stop the server.

use std::sync::Arc;

use chrono::{DateTime, Days, NaiveTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::triage::Triage;

/// First `hour:minute` UTC strictly after `now`.
pub fn next_run_after(now: DateTime<Utc>, hour: u32, minute: u32) -> DateTime<Utc> {
    let at = NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN);
    let today = now.date_naive().and_time(at).and_utc();
    if today > now {
        return today;
    }
    now.date_naive()
        .checked_add_days(Days::new(1))
        .map(|d| d.and_time(at).and_utc())
        .unwrap_or(today)
}

/// Spawn the daily loop. Returns `None` when scheduling is disabled.
pub fn spawn(
    triage: Arc<Triage>,
    config: &SchedulerConfig,
    shutdown: CancellationToken,
) -> Option<tokio::task::JoinHandle<()>> {
    if !config.enabled {
        info!("scheduler disabled");
        return None;
    }
    Some(tokio::spawn(run(triage, config.clone(), shutdown)))
}

async fn run(triage: Arc<Triage>, config: SchedulerConfig, shutdown: CancellationToken) {
    loop {
        let now = Utc::now();
        let next = next_run_after(now, config.hour, config.minute);
        let wait = (next - now).to_std().unwrap_or_default();
        info!(next_run = %next.to_rfc3339(), "scheduler: waiting for next daily triage");

        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("scheduler: shutdown");
                return;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        run_once(&triage, config.max_results).await;
    }
}

async fn run_once(triage: &Triage, max_results: u32) {
    if !triage.is_authenticated() {
        warn!("scheduler: not authenticated with Google, skipping daily triage");
        return;
    }
    match triage.triage_unread(max_results).await {
        Ok(report) => info!(%report, "scheduler: daily triage finished"),
        Err(e) => warn!(error = %e, "scheduler: daily triage failed"),
    }
}
