//! Periodic cleanup of stale connections and sessions

use log::{debug, error, info};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::ServerConfig;
use crate::core::server::SharedCollabServer;
use crate::error::Result;

#[derive(Debug, Clone, Copy)]
pub struct SweeperSettings {
    pub interval: Duration,
    /// Connections without a ping for this long are evicted
    pub connection_timeout: Duration,
    /// Sessions without a heartbeat for this long are flagged idle
    pub idle_timeout: Duration,
}

impl SweeperSettings {
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        Ok(Self {
            interval: config.cleanup_interval,
            connection_timeout: config.connection_timeout,
            idle_timeout: config.idle_timeout()?,
        })
    }
}

/// Handle to the running sweeper task
pub struct CleanupSweeper {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl CleanupSweeper {
    /// Start sweeping; the first cycle runs one interval from now
    pub fn spawn(server: SharedCollabServer, settings: SweeperSettings) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = interval(settings.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => run_cycle(&server, settings).await,
                    _ = shutdown_rx.changed() => break,
                }
            }
            debug!("Cleanup sweeper stopped");
        });

        info!(
            "Cleanup sweeper started (interval {:?}, timeout {:?})",
            settings.interval, settings.connection_timeout
        );
        Self { shutdown, task }
    }

    /// Stop the sweeper and wait for it to finish the current cycle
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!("Cleanup sweeper task failed: {}", e);
        }
    }
}

async fn run_cycle(server: &SharedCollabServer, settings: SweeperSettings) {
    // A panicking cycle surfaces as a JoinError instead of killing the sweeper
    let server = SharedCollabServer::clone(server);
    let cycle = tokio::spawn(async move {
        server
            .run_cleanup_cycle(settings.connection_timeout, settings.idle_timeout)
            .await
    });

    match cycle.await {
        Ok(Ok(report)) if report.evicted + report.orphaned > 0 => info!(
            "Cleanup cycle: {} evicted, {} idle, {} orphaned",
            report.evicted, report.idled, report.orphaned
        ),
        Ok(Ok(report)) => debug!("Cleanup cycle: {} idle", report.idled),
        Ok(Err(e)) => error!("Cleanup cycle failed: {}", e),
        Err(e) => error!("Cleanup cycle aborted: {}", e),
    }
}
