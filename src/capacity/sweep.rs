//! Background hold-expiry sweep
//!
//! Runs a periodic task that frees tentative holds whose TTL lapsed,
//! making their windows available to other bookings again. Sweep
//! failures are logged and retried on the next tick; they are never
//! fatal to the process.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time;

use crate::capacity::CapacityModel;
use crate::Result;

/// Configuration for hold-expiry sweeping
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Sweep interval in seconds (default: 60). Zero disables the sweep.
    pub interval_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

impl SweepConfig {
    pub fn new(interval_secs: u64) -> Self {
        Self { interval_secs }
    }

    /// Create a config for testing (faster intervals)
    #[cfg(test)]
    pub fn for_testing() -> Self {
        Self { interval_secs: 1 }
    }
}

/// Background sweep manager
///
/// Spawns a tokio task that periodically calls
/// [`CapacityModel::sweep_expired`] until stopped.
pub struct HoldSweeper {
    config: SweepConfig,
    running: Arc<RwLock<bool>>,
}

impl HoldSweeper {
    pub fn new(config: SweepConfig) -> Self {
        Self {
            config,
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub fn disabled() -> Self {
        Self::new(SweepConfig { interval_secs: 0 })
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    pub fn is_enabled(&self) -> bool {
        self.config.interval_secs > 0
    }

    /// Start the sweep task for the given capacity model.
    pub async fn start(&self, capacity: Arc<CapacityModel>) -> Result<()> {
        if !self.is_enabled() {
            tracing::info!("Hold-expiry sweep is disabled");
            return Ok(());
        }

        {
            let mut running = self.running.write().await;
            if *running {
                tracing::warn!("HoldSweeper already running");
                return Ok(());
            }
            *running = true;
        }

        let config = self.config.clone();
        let running = self.running.clone();

        tokio::spawn(async move {
            tracing::info!(
                "Starting hold-expiry sweep with interval: {} seconds",
                config.interval_secs
            );

            let mut interval = time::interval(Duration::from_secs(config.interval_secs));
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

            loop {
                interval.tick().await;

                {
                    let running_guard = running.read().await;
                    if !*running_guard {
                        tracing::info!("HoldSweeper stopped");
                        break;
                    }
                }

                let freed = capacity.sweep_expired();
                if freed > 0 {
                    tracing::info!(freed, "Released expired holds");
                } else {
                    tracing::debug!("No expired holds");
                }
            }
        });

        Ok(())
    }

    /// Stop the background sweep task
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        tracing::info!("Stopping hold sweeper");
    }
}

impl Drop for HoldSweeper {
    fn drop(&mut self) {
        // Can't await in Drop; the task observes the flag on its next tick.
        if let Ok(mut running) = self.running.try_write() {
            *running = false;
        }
    }
}
