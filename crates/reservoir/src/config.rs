//! # Context configuration.
//!
//! [`ContextConfig`] holds the settings shared by every instance of a
//! [`Context`](crate::Context). It is set once through the
//! [`ContextBuilder`](crate::ContextBuilder) and read when instances are created.
//!
//! ## Sentinel values
//! - `clear_delay = 0s` → evict as soon as the effect queue drains.

use std::time::Duration;

/// Default grace period before an unused instance is evicted.
pub const DEFAULT_CLEAR_DELAY: Duration = Duration::from_millis(15_000);

/// Settings shared by all instances of a context.
#[derive(Clone, Debug)]
pub struct ContextConfig {
    /// Grace period used when a die handle calls
    /// [`DieContext::clear_data`](crate::DieContext::clear_data) without an
    /// explicit delay.
    ///
    /// Eviction happens only after both this delay elapsed **and** the
    /// instance's effect queue drained, and only if nobody subscribed again.
    pub clear_delay: Duration,
}

impl Default for ContextConfig {
    /// Default configuration:
    ///
    /// - `clear_delay = 15s`
    fn default() -> Self {
        Self {
            clear_delay: DEFAULT_CLEAR_DELAY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_delay_is_fifteen_seconds() {
        assert_eq!(ContextConfig::default().clear_delay, Duration::from_secs(15));
    }
}
