//! Shared holder for the effective configuration
//!
//! Readers take an `Arc` snapshot and never see a half-applied update.
//! Writers replace the whole snapshot and then poke a single-slot
//! change signal that the monitoring loop listens on.

use super::AgentConfig;
use crate::error::Result;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::debug;

/// Cloneable handle to the current configuration
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<Inner>,
}

struct Inner {
    current: RwLock<Arc<AgentConfig>>,
    signal_tx: mpsc::Sender<()>,
    signal_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl ConfigHandle {
    /// Wrap a validated configuration
    pub fn new(config: AgentConfig) -> Result<Self> {
        config.validate()?;

        // One slot: pending notifications coalesce
        let (signal_tx, signal_rx) = mpsc::channel(1);

        Ok(Self {
            inner: Arc::new(Inner {
                current: RwLock::new(Arc::new(config)),
                signal_tx,
                signal_rx: Mutex::new(Some(signal_rx)),
            }),
        })
    }

    /// The configuration in effect right now
    pub fn current_snapshot(&self) -> Arc<AgentConfig> {
        let guard = self
            .inner
            .current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    /// Validate and install a new configuration, then signal the change
    ///
    /// An invalid configuration is rejected and the current one stays.
    pub fn update(&self, config: AgentConfig) -> Result<Arc<AgentConfig>> {
        config.validate()?;

        let config = Arc::new(config);
        {
            let mut guard = self
                .inner
                .current
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *guard = Arc::clone(&config);
        }

        self.notify_changed();
        Ok(config)
    }

    /// Signal the monitoring loop without changing anything
    ///
    /// Never blocks. If a signal is already pending this is a no-op.
    pub fn notify_changed(&self) {
        match self.inner.signal_tx.try_send(()) {
            Ok(()) => debug!("Configuration change signalled"),
            Err(mpsc::error::TrySendError::Full(())) => {
                debug!("Configuration change already pending")
            }
            Err(mpsc::error::TrySendError::Closed(())) => {
                debug!("No listener for configuration changes")
            }
        }
    }

    /// Take the receiving side of the change signal
    ///
    /// There is exactly one listener; later calls return `None`.
    pub fn subscribe(&self) -> Option<ConfigSignal> {
        let mut slot = self
            .inner
            .signal_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        slot.take().map(|rx| ConfigSignal { rx })
    }
}

/// Receiving side of the configuration change signal
pub struct ConfigSignal {
    rx: mpsc::Receiver<()>,
}

impl ConfigSignal {
    /// Wait for the next change notification
    ///
    /// Returns `false` once every handle has been dropped.
    pub async fn changed(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }
}
