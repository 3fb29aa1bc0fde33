// Erasure engine
//
// selector.rs turns (mode, descriptor) into an ordered method plan,
// executor.rs runs it step by step, hidden.rs handles HPA/DCO extents,
// sampler.rs does the statistical post-wipe verification.

pub mod executor;
pub mod hidden;
pub mod sampler;
pub mod selector;

use crate::WipeMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-hidden-area outcome recorded in the wipe result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HiddenAreaStatus {
    /// Extent was exposed and overwritten
    Addressed,
    /// Extent could not be exposed; data may remain
    Skipped,
    /// Remapped blocks, covered by the firmware-level erase guarantee
    AssumedCovered,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HiddenAreaOutcome {
    pub kind: crate::devices::HiddenAreaKind,
    pub start_sector: u64,
    pub sectors: u64,
    pub status: HiddenAreaStatus,
    pub detail: String,
}

/// Result of the statistical verification pass.
///
/// Sampling is an explicit confidence-bounded estimator: the method string
/// and ratio travel with the certificate so auditors can apply their own
/// confidence policy. This never claims full-device verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub method: String,
    pub sample_count: u32,
    pub matched_samples: u32,
    pub match_ratio: f64,
    pub threshold: f64,
    pub passed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub average_throughput_mbps: f64,
    pub peak_throughput_mbps: f64,
    pub retry_count: u32,
}

/// Timestamped action/result/detail triple for the certificate audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub result: String,
    pub detail: Option<String>,
}

impl AuditEntry {
    pub fn new(action: &str, result: &str, detail: Option<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            action: action.to_string(),
            result: result.to_string(),
            detail,
        }
    }
}

/// Outcome of one executed wipe. Immutable once execution terminates;
/// consumed exactly once by the certificate builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WipeResult {
    pub mode: WipeMode,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub bytes_written: u64,
    pub passes_completed: u32,
    pub hidden_areas: Vec<HiddenAreaOutcome>,
    pub verification: Option<VerificationOutcome>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub metrics: PerformanceMetrics,
}

impl WipeResult {
    /// The erase itself succeeded: no fatal step error was recorded.
    /// Verification is reported separately and does not change this.
    pub fn wipe_succeeded(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn verification_passed(&self) -> bool {
        self.verification.as_ref().map(|v| v.passed).unwrap_or(false)
    }

    pub fn duration_seconds(&self) -> u64 {
        (self.end_time - self.start_time).num_seconds().max(0) as u64
    }
}
