//! Error taxonomy for the hostwatch core.
//!
//! Per-tick source failures are recoverable and isolated; configuration
//! problems fail fast at startup; store capacity inconsistencies are
//! programming faults contained to the offending key.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostwatchError {
    /// A metric source or log tailer failed for one tick. Recorded as a
    /// degraded marker; the sampling loop continues.
    #[error("source '{component}' unavailable: {reason}")]
    SourceUnavailable { component: String, reason: String },

    /// Malformed configuration reached the core. Raised before any
    /// sampling begins.
    #[error("invalid configuration: {0}")]
    ConfigurationInvalid(String),

    /// Internal invariant violation in the store (e.g. a zero capacity
    /// after reconfiguration). The affected key's buffer is reset.
    #[error("store capacity inconsistent for key '{key}'")]
    StoreCapacityInconsistent { key: String },
}

impl HostwatchError {
    pub fn source_unavailable(source: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            component: source.into(),
            reason: reason.into(),
        }
    }
}
