use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};

pub mod tasks;

pub use tasks::ExpirationSweeper;

/// Job scheduler for background tasks
pub struct JobScheduler {
    context: crate::context::AppContext,
    shutdown: watch::Receiver<bool>,
}

impl JobScheduler {
    pub fn new(context: crate::context::AppContext, shutdown: watch::Receiver<bool>) -> Self {
        Self { context, shutdown }
    }

    /// Start all background jobs. Each stops once `true` is sent on the shutdown channel.
    pub fn start(self) -> Vec<JoinHandle<()>> {
        info!("Starting background job scheduler");

        let sweep_interval = Duration::from_secs(self.context.config.jobs.sweep_interval_secs);
        let handles = vec![
            tokio::spawn(expiration_sweep_job(
                Arc::clone(&self.context.sweeper),
                sweep_interval,
                self.shutdown.clone(),
            )),
            tokio::spawn(health_check_job(self.context.clone(), self.shutdown.clone())),
        ];

        info!("Background jobs started");
        handles
    }
}

/// Remove expired accounts (runs every `period`, once per minute by default)
pub async fn expiration_sweep_job(
    sweeper: Arc<ExpirationSweeper>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("Expiration sweep stopped");
                    return;
                }
                continue;
            }
        }

        let started = Instant::now();
        match sweeper.run_once().await {
            Ok(report) => {
                let status = if report.failed.is_empty() { "success" } else { "partial" };
                crate::metrics::record_sweep_run(status, started.elapsed().as_secs_f64());
                if report.expired > 0 {
                    info!(
                        "Sweep removed {} of {} expired accounts",
                        report.removed.len(),
                        report.expired
                    );
                }
            }
            Err(e) => {
                crate::metrics::record_sweep_run("failure", started.elapsed().as_secs_f64());
                error!("Expiration sweep failed: {}", e);
            }
        }
    }
}

/// Health check job (runs every 5 minutes)
async fn health_check_job(context: crate::context::AppContext, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(Duration::from_secs(300));

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
                continue;
            }
        }

        if let Err(e) = tasks::health_check(&context.account_store, &context.clock).await {
            error!("Health check failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        account::AccountStore,
        clock::testing::ManualClock,
        db::{
            account::{NewAccount, Protocol},
            test_pool,
        },
        publish::{ConfigPublisher, ConfigSync},
    };
    use chrono::{TimeDelta, Utc};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_sweep_job_runs_until_shutdown() {
        let dir = tempdir().unwrap();
        let store = Arc::new(AccountStore::new(test_pool().await, Duration::from_secs(5)));
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let sync = Arc::new(ConfigSync::new(
            store.clone(),
            ConfigPublisher::new(
                dir.path().join("config.json"),
                dir.path().join("config.yaml"),
            ),
            clock.clone(),
            "vpn.example.com".to_string(),
            Duration::from_secs(5),
        ));
        store
            .insert(
                NewAccount {
                    username: "old".to_string(),
                    protocol: Protocol::Vmess,
                    identifier: uuid::Uuid::new_v4().to_string(),
                    secret: "00ff".repeat(8),
                    expires_at: clock.utc() - TimeDelta::hours(1),
                },
                clock.utc(),
            )
            .await
            .unwrap();

        let sweeper = Arc::new(ExpirationSweeper::new(store.clone(), sync, clock.clone()));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(expiration_sweep_job(
            sweeper,
            Duration::from_millis(20),
            rx,
        ));

        // The first tick fires immediately
        let mut removed = false;
        for _ in 0..50 {
            if store.find_by_username("old").await.is_err() {
                removed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(removed);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("sweep job should stop after shutdown")
            .unwrap();
    }
}
