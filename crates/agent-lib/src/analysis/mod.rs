//! Statistical analysis over stored history
//!
//! This module provides detection of deviations from a trailing baseline,
//! correlation of detected anomalies with nearby log events, and assembly
//! of the self-describing analysis report.

mod correlator;
mod detector;
mod report;

pub use correlator::{Correlator, CorrelatorConfig};
pub use detector::{AnomalyDetector, DetectorConfig, SCORE_CEILING};
pub use report::Analyzer;
