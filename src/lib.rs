// Allow uppercase acronyms for industry-standard terms like HDD, HPA, DCO
#![allow(clippy::upper_case_acronyms)]

pub mod certificates;
pub mod crypto;
pub mod devices;
pub mod engine;
pub mod error;
pub mod platform;

pub use engine::executor::{ErasureExecutor, ProgressSnapshot};
pub use engine::selector::MethodSelector;
pub use engine::WipeResult;
pub use error::{Result, WipeError};

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

// Global flag for handling Ctrl+C interrupts. Cancellation is honored only
// at step boundaries; an in-flight hardware erase runs to completion.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Set the interrupt flag (called by signal handler)
pub fn set_interrupted() {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Check if an interrupt has been received
pub fn is_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Reset the interrupt flag (primarily for testing)
pub fn reset_interrupted() {
    INTERRUPTED.store(false, Ordering::SeqCst);
}

/// Requested sanitization mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WipeMode {
    /// Single pass or TRIM-equivalent
    Quick,
    /// Multi-pass overwrite with alternating patterns
    Full,
    /// Hardware-assisted: secure erase / sanitize / crypto erase
    Advanced,
}

impl WipeMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "quick" => Some(WipeMode::Quick),
            "full" => Some(WipeMode::Full),
            "advanced" => Some(WipeMode::Advanced),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WipeMode::Quick => "quick",
            WipeMode::Full => "full",
            WipeMode::Advanced => "advanced",
        }
    }
}

/// How hidden HPA/DCO boundaries are treated after their extent is wiped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HiddenAreaPolicy {
    /// Restore the original boundary after wiping the hidden extent
    Restore,
    /// Leave the full capacity exposed permanently
    PermanentRemove,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WipeConfig {
    /// Overwrite passes for Full mode (3-7 per policy)
    pub full_passes: u32,
    /// Run the verification sampler after the wipe
    pub verify: bool,
    /// Number of sectors sampled during verification
    pub sample_count: u32,
    /// Required match ratio for deterministic patterns
    pub deterministic_threshold: f64,
    /// Required match ratio for random patterns
    pub random_threshold: f64,
    /// Bounded retry count for transient device errors
    pub max_retries: u32,
    /// Base delay for exponential backoff, in milliseconds
    pub retry_base_delay_ms: u64,
    /// Per-step timeout in seconds
    pub step_timeout_secs: u64,
    pub hidden_area_policy: HiddenAreaPolicy,
    /// When set, a failed verification also fails the wipe exit status
    pub strict_verification: bool,
}

impl Default for WipeConfig {
    fn default() -> Self {
        Self {
            full_passes: 3,
            verify: true,
            sample_count: 100,
            deterministic_threshold: 1.0,
            random_threshold: 0.9,
            max_retries: 3,
            retry_base_delay_ms: 500,
            step_timeout_secs: 7200,
            hidden_area_policy: HiddenAreaPolicy::Restore,
            strict_verification: false,
        }
    }
}
