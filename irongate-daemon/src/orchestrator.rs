//! Daemon lifecycle -- assembly, background tasks and shutdown.
//!
//! # Startup
//!
//! 1. Validate configuration
//! 2. Install the Prometheus recorder (if `[metrics] enabled`)
//! 3. Build the [`Gateway`] and load rule files
//! 4. Spawn the NAT aging task and the uptime updater
//!
//! # Shutdown
//!
//! A single [`CancellationToken`] stops every background task. Final
//! statistics are logged after the tasks have exited.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use irongate_core::config::IronGateConfig;
use irongate_nat::spawn_aging_task;

use crate::gateway::{Gateway, LoadedRules};
use crate::metrics_server;

/// Uptime gauge refresh period.
const UPTIME_INTERVAL: Duration = Duration::from_secs(10);

/// Owns the gateway and its background tasks.
pub struct Orchestrator {
    config: IronGateConfig,
    gateway: Arc<Gateway>,
    cancel: CancellationToken,
    start_time: Instant,
    loaded: LoadedRules,
    tasks: Vec<JoinHandle<()>>,
}

impl Orchestrator {
    /// Load `irongate.toml` (with environment overrides) and build.
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = IronGateConfig::load(config_path)
            .await
            .map_err(|e| anyhow!("failed to load config: {e}"))?;
        Self::build_from_config(config).await
    }

    /// Build from an already-loaded configuration.
    ///
    /// # Errors
    ///
    /// - configuration validation fails
    /// - the metrics recorder cannot be installed
    /// - a rule file cannot be read or contains an invalid rule
    pub async fn build_from_config(config: IronGateConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow!("config validation failed: {e}"))?;

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
        }

        let gateway = Gateway::new(&config);
        let loaded = gateway
            .load_rule_files(&config)
            .await
            .map_err(|e| anyhow!("failed to load rules: {e}"))?;

        tracing::info!(
            nat_enabled = config.nat.enabled,
            qos_enabled = config.qos.enabled,
            nat_rules = loaded.nat,
            qos_rules = loaded.qos,
            max_repeats = config.hook.max_repeats,
            "gateway assembled"
        );

        Ok(Self {
            config,
            gateway: Arc::new(gateway),
            cancel: CancellationToken::new(),
            start_time: Instant::now(),
            loaded,
            tasks: Vec::new(),
        })
    }

    /// Spawn background tasks. Idempotent.
    pub fn start(&mut self) {
        if !self.tasks.is_empty() {
            return;
        }
        if self.gateway.nat_enabled() {
            let interval = Duration::from_secs(self.config.nat.aging_interval_secs.max(1));
            self.tasks.push(spawn_aging_task(
                Arc::clone(self.gateway.nat()),
                interval,
                self.cancel.child_token(),
            ));
            tracing::info!(interval_secs = interval.as_secs(), "nat aging task started");
        }
        if self.config.metrics.enabled {
            self.tasks
                .push(spawn_uptime_updater(self.start_time, self.cancel.child_token()));
        }
    }

    /// Start, wait for SIGTERM/SIGINT, then shut down.
    pub async fn run(&mut self) -> Result<()> {
        self.start();
        tracing::info!("irongate-daemon running");

        let signal = wait_for_shutdown_signal().await?;
        tracing::info!(signal, "shutdown signal received");

        self.shutdown().await;
        Ok(())
    }

    /// Cancel background tasks, wait for them and log final statistics.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "background task failed");
            }
        }

        match serde_json::to_string(&self.gateway.status()) {
            Ok(status) => tracing::info!(status = status.as_str(), "final gateway status"),
            Err(e) => tracing::warn!(error = %e, "failed to serialize gateway status"),
        }
        for line in self.gateway.dump_stats().lines() {
            tracing::debug!("{line}");
        }
        tracing::info!(
            uptime_secs = self.start_time.elapsed().as_secs(),
            "irongate-daemon shut down"
        );
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    pub fn config(&self) -> &IronGateConfig {
        &self.config
    }

    pub fn loaded_rules(&self) -> LoadedRules {
        self.loaded
    }

    /// Number of running background tasks.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }
}

/// Wait for SIGTERM or SIGINT and return its name.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow!("failed to install SIGTERM handler: {e}"))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow!("failed to install SIGINT handler: {e}"))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Refresh the uptime gauge until cancelled.
fn spawn_uptime_updater(start_time: Instant, cancel: CancellationToken) -> JoinHandle<()> {
    use irongate_core::metrics as m;

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(UPTIME_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    #[allow(clippy::cast_precision_loss)]
                    metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(start_time.elapsed().as_secs() as f64);
                }
                _ = cancel.cancelled() => {
                    tracing::debug!("uptime updater shutting down");
                    break;
                }
            }
        }
    })
}
