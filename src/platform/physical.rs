use super::{DeviceBackend, WipePattern};
use crate::devices::DeviceCapabilities;
use crate::error::{Result, WipeError};
use rand::RngCore;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::process::Command;
use tracing::{debug, info};

const CHUNK_SIZE: usize = 4 * 1024 * 1024; // 4MB write chunks

/// Production backend for Linux block devices.
///
/// Overwrite and read go through direct file I/O on the device node;
/// hardware primitives shell out to the same tools an operator would use
/// (blkdiscard, hdparm, nvme). Capabilities come from the descriptor
/// snapshot and are enforced here a second time so a stale snapshot can
/// never trigger a primitive the hardware does not have.
pub struct PhysicalDevice {
    path: String,
    capabilities: DeviceCapabilities,
}

impl PhysicalDevice {
    pub fn open(path: &str, capabilities: DeviceCapabilities) -> Result<Self> {
        if !std::path::Path::new(path).exists() {
            return Err(WipeError::DeviceNotFound(path.to_string()));
        }
        Ok(Self {
            path: path.to_string(),
            capabilities,
        })
    }

    fn open_rw(&self) -> Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| match e.raw_os_error() {
                // EBUSY / EAGAIN are worth a bounded retry upstream
                Some(16) | Some(11) => WipeError::DeviceBusy(format!("{}: {}", self.path, e)),
                _ => WipeError::Io(e),
            })
    }

    fn run_tool(&self, tool: &str, args: &[&str]) -> Result<()> {
        debug!(tool, ?args, "invoking platform sanitize tool");
        let output = Command::new(tool)
            .args(args)
            .output()
            .map_err(|e| WipeError::HardwareCommandFailed(format!("{} failed to start: {}", tool, e)))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("busy") || stderr.contains("Resource temporarily unavailable") {
                Err(WipeError::DeviceBusy(format!("{}: {}", tool, stderr.trim())))
            } else {
                Err(WipeError::HardwareCommandFailed(format!(
                    "{} exited with {}: {}",
                    tool,
                    output.status,
                    stderr.trim()
                )))
            }
        }
    }
}

impl DeviceBackend for PhysicalDevice {
    fn overwrite(
        &mut self,
        offset: u64,
        length: u64,
        pattern: WipePattern,
        progress: &mut dyn FnMut(u64),
    ) -> Result<u64> {
        let mut file = self.open_rw()?;
        file.seek(SeekFrom::Start(offset))?;

        let mut rng = rand::thread_rng();
        let mut buffer = vec![0u8; CHUNK_SIZE];
        if let Some(byte) = pattern.fixed_byte() {
            buffer.fill(byte);
        }

        let mut written = 0u64;
        while written < length {
            let to_write = CHUNK_SIZE.min((length - written) as usize);
            if pattern.fixed_byte().is_none() {
                rng.fill_bytes(&mut buffer[..to_write]);
            }
            file.write_all(&buffer[..to_write])?;
            written += to_write as u64;
            progress(to_write as u64);
        }

        file.sync_all()?;
        Ok(written)
    }

    fn trim(&mut self) -> Result<()> {
        if !self.capabilities.supports_trim {
            return Err(WipeError::CapabilityUnsupported {
                device: self.path.clone(),
                mode: "trim".into(),
                detail: "device does not advertise discard support".into(),
            });
        }
        info!(device = %self.path, "issuing full-device discard");
        self.run_tool("blkdiscard", &["-f", &self.path])
    }

    fn secure_erase(&mut self) -> Result<()> {
        if !self.capabilities.supports_secure_erase {
            return Err(WipeError::CapabilityUnsupported {
                device: self.path.clone(),
                mode: "secure-erase".into(),
                detail: "ATA security erase not supported".into(),
            });
        }
        info!(device = %self.path, "issuing ATA security erase");
        // Security erase requires a password to be set first; NULL is the
        // conventional throwaway value.
        self.run_tool(
            "hdparm",
            &[
                "--user-master",
                "u",
                "--security-set-pass",
                "NULL",
                &self.path,
            ],
        )?;
        self.run_tool(
            "hdparm",
            &[
                "--user-master",
                "u",
                "--security-erase",
                "NULL",
                &self.path,
            ],
        )
    }

    fn sanitize(&mut self) -> Result<()> {
        if !self.capabilities.supports_sanitize {
            return Err(WipeError::CapabilityUnsupported {
                device: self.path.clone(),
                mode: "sanitize".into(),
                detail: "NVMe sanitize not supported".into(),
            });
        }
        info!(device = %self.path, "issuing NVMe sanitize (block erase)");
        self.run_tool("nvme", &["sanitize", &self.path, "-a", "2"])
    }

    fn crypto_erase(&mut self) -> Result<()> {
        if !self.capabilities.supports_crypto_erase {
            return Err(WipeError::CapabilityUnsupported {
                device: self.path.clone(),
                mode: "crypto-erase".into(),
                detail: "cryptographic erase not supported".into(),
            });
        }
        info!(device = %self.path, "issuing NVMe format with crypto erase");
        self.run_tool("nvme", &["format", &self.path, "--ses=2"])
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn expose_hidden_area(&mut self, native_max_sector: u64) -> Result<u64> {
        // Read the current boundary first so it can be restored
        let output = Command::new("hdparm")
            .args(["-N", &self.path])
            .output()
            .map_err(|e| WipeError::HiddenAreaInaccessible(format!("hdparm -N: {}", e)))?;
        let text = String::from_utf8_lossy(&output.stdout);
        let original = crate::devices::DeviceDetector::parse_max_sectors(&text)
            .map(|(current, _)| current)
            .ok_or_else(|| {
                WipeError::HiddenAreaInaccessible("could not read current max address".into())
            })?;

        info!(device = %self.path, native_max_sector, "raising max address to expose hidden extent");
        self.run_tool(
            "hdparm",
            &[
                "--yes-i-know-what-i-am-doing",
                "-N",
                &format!("{}", native_max_sector),
                &self.path,
            ],
        )
        .map_err(|e| WipeError::HiddenAreaInaccessible(e.to_string()))?;

        Ok(original)
    }

    fn restore_hidden_area(&mut self, original_max_sector: u64) -> Result<()> {
        info!(device = %self.path, original_max_sector, "restoring original max address");
        self.run_tool(
            "hdparm",
            &[
                "--yes-i-know-what-i-am-doing",
                "-N",
                &format!("{}", original_max_sector),
                &self.path,
            ],
        )
        .map_err(|e| WipeError::HiddenAreaInaccessible(e.to_string()))
    }
}
