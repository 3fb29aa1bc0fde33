//! Offline certificate verification.
//!
//! Checks run in a fixed order: integrity hash, signature, trust chain
//! (when one is supplied), compliance plausibility. The first failure
//! short-circuits the rest, but every check's status still appears in the
//! report so an auditor sees exactly how far trust extends.

use super::authority::TrustChain;
use super::{Certificate, KNOWN_STANDARDS};
use crate::crypto;
use crate::error::WipeError;
use chrono::Utc;
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckStatus {
    Passed,
    Failed,
    /// Not evaluated: either short-circuited by an earlier failure or no
    /// input was supplied (e.g. no trust chain)
    Skipped,
}

/// Structured verification outcome. `is_valid` is the conjunction of the
/// evaluated checks; a bare boolean would hide which link broke.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertVerificationReport {
    pub certificate_id: String,
    pub is_valid: bool,
    pub hash_check: CheckStatus,
    pub signature_check: CheckStatus,
    pub chain_check: CheckStatus,
    pub compliance_check: CheckStatus,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl CertVerificationReport {
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Certificate {}", self.certificate_id);
        let _ = writeln!(out, "  integrity hash: {:?}", self.hash_check);
        let _ = writeln!(out, "  signature:      {:?}", self.signature_check);
        let _ = writeln!(out, "  trust chain:    {:?}", self.chain_check);
        let _ = writeln!(out, "  compliance:     {:?}", self.compliance_check);
        for w in &self.warnings {
            let _ = writeln!(out, "  warning: {}", w);
        }
        for e in &self.errors {
            let _ = writeln!(out, "  error: {}", e);
        }
        let _ = writeln!(out, "  verdict: {}", if self.is_valid { "VALID" } else { "INVALID" });
        out
    }
}

pub struct CertificateVerifier {
    verifying_key: VerifyingKey,
    trust_chain: Option<TrustChain>,
}

impl CertificateVerifier {
    pub fn new(verifying_key: VerifyingKey) -> Self {
        Self {
            verifying_key,
            trust_chain: None,
        }
    }

    /// Also walk a trust chain; without one the chain check is `Skipped`.
    pub fn with_trust_chain(mut self, chain: TrustChain) -> Self {
        self.trust_chain = Some(chain);
        self
    }

    pub fn verify(&self, certificate: &Certificate) -> CertVerificationReport {
        let mut report = CertVerificationReport {
            certificate_id: certificate.certificate_id.clone(),
            is_valid: false,
            hash_check: CheckStatus::Skipped,
            signature_check: CheckStatus::Skipped,
            chain_check: CheckStatus::Skipped,
            compliance_check: CheckStatus::Skipped,
            warnings: Vec::new(),
            errors: Vec::new(),
        };

        let canonical = match certificate.canonical_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                report.hash_check = CheckStatus::Failed;
                report.errors.push(format!("cannot canonicalize: {}", e));
                return report;
            }
        };

        // 1. Integrity hash
        if crypto::sha256_hex(&canonical) == certificate.integrity_hash {
            report.hash_check = CheckStatus::Passed;
        } else {
            report.hash_check = CheckStatus::Failed;
            report.errors.push(
                WipeError::CertificateIntegrityMismatch(
                    "stored hash does not match certificate content".into(),
                )
                .to_string(),
            );
            return report;
        }

        // 2. Signature
        match crypto::verify_signature(&canonical, &certificate.signature, &self.verifying_key) {
            Ok(()) => report.signature_check = CheckStatus::Passed,
            Err(e) => {
                report.signature_check = CheckStatus::Failed;
                report.errors.push(e.to_string());
                return report;
            }
        }

        // 3. Trust chain, when supplied
        if let Some(chain) = &self.trust_chain {
            match chain.validate(Utc::now()) {
                Ok(()) => {
                    let leaf_matches = chain
                        .leaf()
                        .map(|leaf| {
                            hex::encode(self.verifying_key.to_bytes()) == leaf.public_key
                        })
                        .unwrap_or(false);
                    if leaf_matches {
                        report.chain_check = CheckStatus::Passed;
                    } else {
                        report.chain_check = CheckStatus::Failed;
                        report.errors.push(
                            WipeError::ChainUntrusted(
                                "verifying key is not the chain's station key".into(),
                            )
                            .to_string(),
                        );
                        return report;
                    }
                }
                Err(e) => {
                    report.chain_check = CheckStatus::Failed;
                    report.errors.push(e.to_string());
                    return report;
                }
            }
        }

        // 4. Compliance plausibility
        match Self::check_compliance(certificate, &mut report.warnings) {
            Ok(()) => report.compliance_check = CheckStatus::Passed,
            Err(msg) => {
                report.compliance_check = CheckStatus::Failed;
                report.errors.push(msg);
                return report;
            }
        }

        report.is_valid = true;
        info!(id = %certificate.certificate_id, "certificate verified");
        report
    }

    /// Sanity checks on the claims themselves. Cryptographic validity does
    /// not make an implausible claim true.
    fn check_compliance(certificate: &Certificate, warnings: &mut Vec<String>) -> Result<(), String> {
        for standard in &certificate.compliance.standards {
            if !KNOWN_STANDARDS.contains(&standard.as_str()) {
                return Err(format!("asserted standard is not recognized: {}", standard));
            }
        }

        let result = &certificate.result;
        if result.end_time < result.start_time {
            return Err("wipe end time precedes start time".into());
        }

        // An overwrite cannot have written more than passes x capacity plus
        // the hidden extents.
        let hidden_bytes: u64 = certificate
            .device
            .hidden_areas
            .iter()
            .map(|a| a.size_bytes())
            .sum();
        let max_plausible = (result.passes_completed as u64)
            .saturating_mul(certificate.device.size.saturating_add(hidden_bytes));
        if result.bytes_written > max_plausible {
            return Err(format!(
                "claimed {} bytes written exceeds plausible maximum {}",
                result.bytes_written, max_plausible
            ));
        }

        if result.bytes_written > 0 && result.duration_seconds() == 0 {
            warnings.push("sub-second duration for a non-trivial write volume".into());
        }
        if !result.wipe_succeeded() {
            warnings.push("certificate records a failed wipe".into());
        }
        if !result.verification_passed() {
            warnings.push("certificate records no passing verification".into());
        }
        Ok(())
    }
}
