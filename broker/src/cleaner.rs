//! Periodic eager sweep of expired tickets.
//!
//! Lazy deletion on access already keeps expired tickets from being used;
//! the cleaner bounds how long unreachable ones occupy storage.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ticket_broker::BrokerConfig;
//! use ticket_broker::cleaner::RegistryCleaner;
//! use ticket_broker::stores::InMemoryTicketRegistry;
//! use ticket_broker_core::environment::system_clock;
//!
//! # async fn example() -> ticket_broker::Result<()> {
//! let config = BrokerConfig::from_env()?;
//! let registry = Arc::new(InMemoryTicketRegistry::new(system_clock()));
//! let (mut cleaner, shutdown) = RegistryCleaner::from_config(registry, &config);
//!
//! let handle = tokio::spawn(async move { cleaner.run().await });
//!
//! // Later, on shutdown:
//! shutdown.send(true).ok();
//! handle.await.ok();
//! # Ok(())
//! # }
//! ```

use crate::config::BrokerConfig;
use crate::metrics::TICKETS_SWEPT;
use crate::providers::TicketRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Runs [`TicketRegistry::sweep_expired`] on a fixed interval until told to stop.
pub struct RegistryCleaner<R: TicketRegistry> {
    registry: Arc<R>,
    interval: Duration,
    /// Shutdown signal
    shutdown: watch::Receiver<bool>,
}

impl<R: TicketRegistry> RegistryCleaner<R> {
    /// Create a cleaner sweeping `registry` every `interval`.
    ///
    /// Returns the cleaner and a shutdown sender. Send `true` to stop it.
    #[must_use]
    pub fn new(registry: Arc<R>, interval: Duration) -> (Self, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let cleaner = Self {
            registry,
            interval,
            shutdown: shutdown_rx,
        };

        (cleaner, shutdown_tx)
    }

    /// Create a cleaner sweeping `registry` every
    /// [`BrokerConfig::cleaner_interval`].
    #[must_use]
    pub fn from_config(registry: Arc<R>, config: &BrokerConfig) -> (Self, watch::Sender<bool>) {
        Self::new(registry, config.cleaner_interval)
    }

    /// Time between sweeps.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Run a single sweep, recording the result.
    ///
    /// Failures are logged, not returned: one failed sweep must not stop
    /// the next.
    pub async fn sweep_once(&self) -> usize {
        match self.registry.sweep_expired().await {
            Ok(removed) => {
                if removed > 0 {
                    metrics::counter!(TICKETS_SWEPT)
                        .increment(u64::try_from(removed).unwrap_or(u64::MAX));
                    tracing::info!(removed = removed, "Swept expired tickets");
                } else {
                    tracing::trace!("Sweep found no expired tickets");
                }
                removed
            }
            Err(e) => {
                tracing::error!(error = %e, "Ticket sweep failed");
                0
            }
        }
    }

    /// Sweep every `interval` until a shutdown signal is received.
    ///
    /// The first sweep runs one full interval after start.
    pub async fn run(&mut self) {
        tracing::info!(interval = ?self.interval, "Starting registry cleaner");

        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.interval,
            self.interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !*self.shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }

                // Handle shutdown
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        tracing::info!("Shutdown signal received");
                        break;
                    }
                }
            }
        }

        tracing::info!("Registry cleaner stopped");
    }
}
