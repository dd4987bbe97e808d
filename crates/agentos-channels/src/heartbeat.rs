//! Heartbeat monitor — marks silent channels ERROR.
//!
//! Heartbeats are advisory: a channel with no heartbeat for the configured
//! window is marked ERROR but never disabled. Adapters call
//! [`crate::config_store::ChannelConfigStore::heartbeat`] from their receive
//! loops; this task only sweeps.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use agentos_core::error::KernelResult;

use crate::config_store::ChannelConfigStore;

/// Default sweep interval.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Background sweeper over the channel config store.
pub struct HeartbeatMonitor {
    store: Arc<ChannelConfigStore>,
    stale_after: chrono::Duration,
    shutdown: Arc<Notify>,
}

impl HeartbeatMonitor {
    pub fn new(store: Arc<ChannelConfigStore>, stale_minutes: u32) -> Self {
        HeartbeatMonitor {
            store,
            stale_after: chrono::Duration::minutes(stale_minutes as i64),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// One sweep: mark every stale channel ERROR. Returns how many were
    /// marked.
    pub fn sweep(&self) -> KernelResult<usize> {
        let stale = self.store.stale_channels(self.stale_after)?;
        for channel_id in &stale {
            warn!(channel = %channel_id, "heartbeat stale, marking ERROR");
            self.store
                .mark_error(channel_id, "heartbeat missed")?;
        }
        Ok(stale.len())
    }

    /// Run sweeps until shutdown.
    pub async fn run(&self) {
        info!("heartbeat monitor started");
        let mut tick = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match self.sweep() {
                        Ok(0) => debug!("heartbeat sweep clean"),
                        Ok(n) => warn!(stale = n, "heartbeat sweep marked channels"),
                        Err(e) => warn!(error = %e, "heartbeat sweep failed"),
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("heartbeat monitor stopping");
                    break;
                }
            }
        }
    }

    pub fn signal_shutdown(&self) {
        self.shutdown.notify_waiters();
    }
}
