use thiserror::Error;

/// Error kinds for the sanitization engine and certificate trust system.
///
/// Verifier failures are deliberately separate variants: an expired chain, a
/// revoked station key and a forged signature are different situations and
/// must stay distinguishable for the caller.
#[derive(Error, Debug)]
pub enum WipeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("device {device} lacks required capability for {mode} mode: {detail}")]
    CapabilityUnsupported {
        device: String,
        mode: String,
        detail: String,
    },

    #[error("device busy or transient failure: {0}")]
    DeviceBusy(String),

    #[error("wipe already in progress on {0}")]
    DeviceInUse(String),

    #[error("hardware command failed: {0}")]
    HardwareCommandFailed(String),

    #[error("hidden area inaccessible: {0}")]
    HiddenAreaInaccessible(String),

    #[error("verification below threshold: matched {ratio:.4}, required {threshold:.4}")]
    VerificationBelowThreshold { ratio: f64, threshold: f64 },

    #[error("signing key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("key material malformed: {0}")]
    KeyFormatInvalid(String),

    #[error("certificate integrity mismatch: {0}")]
    CertificateIntegrityMismatch(String),

    #[error("certificate signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("trust chain untrusted: {0}")]
    ChainUntrusted(String),

    #[error("certificate with serial {0} has been revoked")]
    CertificateRevoked(u64),

    #[error("certificate expired: {0}")]
    CertificateExpired(String),

    #[error("operation interrupted by user")]
    Interrupted,

    #[error("operation timed out: {0}")]
    Timeout(String),
}

impl WipeError {
    /// Transient errors are retried with backoff; everything else escalates
    /// immediately.
    pub fn is_transient(&self) -> bool {
        matches!(self, WipeError::DeviceBusy(_) | WipeError::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, WipeError>;
