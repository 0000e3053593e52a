//! # Ticket Broker Core
//!
//! Shared abstractions for the ticket broker workspace.
//!
//! Every component that needs to know "what time is it" (expiration
//! policies, the ticket registry, the ticket factory) reads time through
//! the [`environment::Clock`] trait instead of calling `Utc::now()`
//! directly. Production code injects [`environment::SystemClock`]; tests
//! inject a deterministic clock from `ticket-broker-testing`.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use ticket_broker_core::environment::{Clock, SystemClock};
//!
//! let clock: Arc<dyn Clock> = Arc::new(SystemClock);
//! let before = clock.now();
//! assert!(clock.now() >= before);
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

/// Environment module - injected dependencies shared by all crates.
///
/// All external dependencies are abstracted behind traits and injected
/// at construction time.
pub mod environment {
    use chrono::{DateTime, Utc};
    use std::sync::Arc;

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::{DateTime, Utc};
    /// use ticket_broker_core::environment::Clock;
    ///
    /// // Test - fixed time for deterministic tests
    /// struct FrozenClock { time: DateTime<Utc> }
    /// impl Clock for FrozenClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    ///
    /// let clock = FrozenClock { time: Utc::now() };
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    impl<C: Clock + ?Sized> Clock for Arc<C> {
        fn now(&self) -> DateTime<Utc> {
            (**self).now()
        }
    }

    /// Shared system clock, ready to hand to components that take `Arc<dyn Clock>`.
    #[must_use]
    pub fn system_clock() -> Arc<dyn Clock> {
        Arc::new(SystemClock)
    }
}

#[cfg(test)]
mod tests {
    use super::environment::{Clock, SystemClock, system_clock};
    use chrono::Utc;

    #[test]
    fn test_system_clock_tracks_wall_time() {
        let before = Utc::now();
        let now = SystemClock.now();
        let after = Utc::now();

        assert!(now >= before);
        assert!(now <= after);
    }

    #[test]
    fn test_shared_clock_delegates() {
        let clock = system_clock();
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
