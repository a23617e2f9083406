//! Background purge of expired relay states and unredeemed codes.

use std::{sync::Arc, time::Duration as StdDuration};

use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;

use crate::{
    config::SamlConfig,
    db::{DbPool, DbResult},
};

/// Lifetimes enforced by the sweeper.
#[derive(Debug, Clone, Copy)]
pub struct SweepSettings {
    pub interval: StdDuration,
    pub relay_state_ttl: Duration,
    pub code_ttl: Duration,
}

impl From<&SamlConfig> for SweepSettings {
    fn from(config: &SamlConfig) -> Self {
        Self {
            interval: StdDuration::from_secs(config.sweep_interval_secs),
            relay_state_ttl: Duration::seconds(config.relay_state_ttl_secs as i64),
            code_ttl: Duration::seconds(config.code_ttl_secs as i64),
        }
    }
}

/// Results from a single sweep.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepResult {
    pub relay_states_deleted: u64,
    pub codes_deleted: u64,
}

impl SweepResult {
    pub fn total(&self) -> u64 {
        self.relay_states_deleted + self.codes_deleted
    }
}

/// Run the sweeper until `shutdown` is cancelled.
///
/// A zero interval disables it.
pub async fn start_sweeper(db: Arc<DbPool>, settings: SweepSettings, shutdown: CancellationToken) {
    if settings.interval.is_zero() {
        tracing::info!("Sweeper disabled by configuration");
        return;
    }

    tracing::info!(
        interval_secs = settings.interval.as_secs(),
        relay_state_ttl_secs = settings.relay_state_ttl.num_seconds(),
        code_ttl_secs = settings.code_ttl.num_seconds(),
        "Starting sweeper"
    );

    loop {
        match sweep(&db, &settings, Utc::now()).await {
            Ok(result) if result.total() > 0 => tracing::info!(
                relay_states = result.relay_states_deleted,
                codes = result.codes_deleted,
                "Sweep complete"
            ),
            Ok(_) => tracing::debug!("Sweep complete, nothing expired"),
            Err(e) => tracing::error!(error = %e, "Error running sweep"),
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(settings.interval) => {}
        }
    }

    tracing::info!("Sweeper stopped");
}

/// Delete everything that expired as of `now`.
pub async fn sweep(db: &DbPool, settings: &SweepSettings, now: DateTime<Utc>) -> DbResult<SweepResult> {
    let relay_states_deleted = db
        .relay_states()
        .delete_created_before(now - settings.relay_state_ttl)
        .await?;
    let codes_deleted = db
        .saml_claims()
        .delete_created_before(now - settings.code_ttl)
        .await?;

    Ok(SweepResult {
        relay_states_deleted,
        codes_deleted,
    })
}
