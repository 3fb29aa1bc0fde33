//! Signed wipe certificates.
//!
//! A certificate is built from an immutable wipe result, hashed over a
//! canonical serialization, then signed. The canonical form is the JSON of
//! the certificate with `integrity_hash` and `signature` empty; serde keeps
//! struct field order stable, so identical field values always produce
//! byte-identical canonical bytes.

pub mod authority;
pub mod verifier;

use crate::crypto;
use crate::devices::DeviceDescriptor;
use crate::engine::{AuditEntry, WipeResult};
use crate::error::{Result, WipeError};
use chrono::{DateTime, Utc};
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use tracing::info;
use uuid::Uuid;

pub const CERTIFICATE_VERSION: &str = "1.0";

/// Standards this tool can truthfully assert compliance with.
pub const KNOWN_STANDARDS: &[&str] = &[
    "NIST SP 800-88 Rev. 1",
    "DoD 5220.22-M",
    "ISO/IEC 27040:2015",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuerInfo {
    pub name: String,
    pub organization: String,
    pub station_id: Option<String>,
    pub public_key_fingerprint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceInfo {
    pub standards: Vec<String>,
    pub compliance_level: String,
    pub audit_trail: Vec<AuditEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub tool_version: String,
    pub platform: String,
    pub architecture: String,
}

impl ToolMetadata {
    fn current() -> Self {
        Self {
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            platform: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
        }
    }
}

/// A signed record of one wipe operation. Immutable once signed: any field
/// change invalidates the integrity hash and signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Certificate {
    pub version: String,
    pub certificate_id: String,
    pub issued_at: DateTime<Utc>,
    pub issuer: IssuerInfo,
    pub device: DeviceDescriptor,
    pub result: WipeResult,
    pub compliance: ComplianceInfo,
    pub metadata: ToolMetadata,
    /// SHA-256 (hex) over the canonical serialization
    pub integrity_hash: String,
    /// Ed25519 detached signature (hex) over the canonical serialization
    pub signature: String,
}

impl Certificate {
    /// The byte sequence the hash and signature commit to: this certificate
    /// with `integrity_hash` and `signature` cleared.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        let mut cleared = self.clone();
        cleared.integrity_hash = String::new();
        cleared.signature = String::new();
        Ok(serde_json::to_vec(&cleared)?)
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!(path = %path.display(), id = %self.certificate_id, "certificate written");
        Ok(())
    }

    pub fn load_json(path: &Path) -> Result<Certificate> {
        let data = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Plain-text report for operators and auditors, written next to the
    /// JSON when requested.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "ERASURE CERTIFICATE");
        let _ = writeln!(out, "===================");
        let _ = writeln!(out, "Certificate ID:  {}", self.certificate_id);
        let _ = writeln!(out, "Issued:          {}", self.issued_at.format("%Y-%m-%d %H:%M:%S UTC"));
        let _ = writeln!(out, "Issuer:          {} ({})", self.issuer.name, self.issuer.organization);
        if let Some(station) = &self.issuer.station_id {
            let _ = writeln!(out, "Station:         {}", station);
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "Device");
        let _ = writeln!(out, "  Path:          {}", self.device.path);
        let _ = writeln!(out, "  Model:         {}", self.device.model);
        let _ = writeln!(out, "  Serial:        {}", self.device.serial);
        let _ = writeln!(out, "  Capacity:      {} bytes", self.device.size);
        let _ = writeln!(out);
        let _ = writeln!(out, "Sanitization");
        let _ = writeln!(out, "  Mode:          {}", self.result.mode.as_str());
        let _ = writeln!(out, "  Passes:        {}", self.result.passes_completed);
        let _ = writeln!(out, "  Bytes written: {}", self.result.bytes_written);
        let _ = writeln!(out, "  Duration:      {} s", self.result.duration_seconds());
        let _ = writeln!(
            out,
            "  Wipe result:   {}",
            if self.result.wipe_succeeded() { "SUCCESS" } else { "FAILED" }
        );
        if let Some(v) = &self.result.verification {
            let _ = writeln!(
                out,
                "  Verification:  {} ({}/{} sampled sectors matched, threshold {:.2})",
                if v.passed { "PASSED" } else { "FAILED" },
                v.matched_samples,
                v.sample_count,
                v.threshold
            );
        }
        for area in &self.result.hidden_areas {
            let _ = writeln!(
                out,
                "  Hidden area:   {:?} @ sector {} ({} sectors): {:?}",
                area.kind, area.start_sector, area.sectors, area.status
            );
        }
        for w in &self.result.warnings {
            let _ = writeln!(out, "  Warning:       {}", w);
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "Compliance:      {}", self.compliance.standards.join(", "));
        let _ = writeln!(out, "Level:           {}", self.compliance.compliance_level);
        let _ = writeln!(out);
        let _ = writeln!(out, "Integrity hash:  {}", self.integrity_hash);
        let _ = writeln!(out, "Signature:       {}", self.signature);
        let _ = writeln!(out, "Key fingerprint: {}", self.issuer.public_key_fingerprint);
        out
    }
}

/// Builds and signs certificates. Construction is pure: no I/O happens
/// until the caller persists the certificate.
#[derive(Debug)]
pub struct CertificateBuilder {
    issuer_name: String,
    organization: String,
    station_id: Option<String>,
    standards: Vec<String>,
}

impl CertificateBuilder {
    pub fn new(issuer_name: &str, organization: &str) -> Self {
        Self {
            issuer_name: issuer_name.to_string(),
            organization: organization.to_string(),
            station_id: None,
            standards: vec![KNOWN_STANDARDS[0].to_string()],
        }
    }

    pub fn station_id(mut self, id: &str) -> Self {
        self.station_id = Some(id.to_string());
        self
    }

    /// Assert additional standards. Unknown names are rejected so a
    /// certificate never claims compliance this tool cannot back.
    pub fn standards(mut self, standards: &[&str]) -> Result<Self> {
        for s in standards {
            if !KNOWN_STANDARDS.contains(s) {
                return Err(WipeError::CertificateIntegrityMismatch(format!(
                    "unknown compliance standard: {}",
                    s
                )));
            }
        }
        self.standards = standards.iter().map(|s| s.to_string()).collect();
        Ok(self)
    }

    /// Build and sign in one step. The result is consumed: a wipe result
    /// backs exactly one certificate.
    pub fn build_signed(
        self,
        device: &DeviceDescriptor,
        result: WipeResult,
        audit_trail: Vec<AuditEntry>,
        signing_key: &SigningKey,
    ) -> Result<Certificate> {
        let compliance_level = match result.mode {
            crate::WipeMode::Quick => "clear",
            crate::WipeMode::Full => "clear",
            crate::WipeMode::Advanced => "purge",
        };

        let mut certificate = Certificate {
            version: CERTIFICATE_VERSION.to_string(),
            certificate_id: Uuid::new_v4().to_string(),
            issued_at: Utc::now(),
            issuer: IssuerInfo {
                name: self.issuer_name,
                organization: self.organization,
                station_id: self.station_id,
                public_key_fingerprint: crypto::public_key_fingerprint(
                    &signing_key.verifying_key(),
                ),
            },
            device: device.clone(),
            result,
            compliance: ComplianceInfo {
                standards: self.standards,
                compliance_level: compliance_level.to_string(),
                audit_trail,
            },
            metadata: ToolMetadata::current(),
            integrity_hash: String::new(),
            signature: String::new(),
        };

        let canonical = certificate.canonical_bytes()?;
        certificate.integrity_hash = crypto::sha256_hex(&canonical);
        certificate.signature = crypto::sign_data(&canonical, signing_key);

        info!(
            id = %certificate.certificate_id,
            device = %certificate.device.path,
            "certificate signed"
        );
        Ok(certificate)
    }
}
