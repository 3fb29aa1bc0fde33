//! Mock device backends for integration tests.
//!
//! `MockDevice` models media state symbolically so tests can describe
//! terabyte-class devices without allocating their backing storage; reads
//! synthesize the bytes the state implies. `FileBackedDevice` wraps a real
//! temp file for tests that want to inspect actual written bytes.

use certwipe::devices::{
    DeviceCapabilities, DeviceDescriptor, HiddenArea, HiddenAreaKind, MediaClass, SECTOR_SIZE,
};
use certwipe::error::{Result, WipeError};
use certwipe::platform::{DeviceBackend, WipePattern};
use rand::RngCore;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use tempfile::NamedTempFile;

/// What the media currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaState {
    /// Stale user data from before the wipe
    Dirty,
    /// Every byte equals the given value
    Filled(u8),
    /// High-entropy content (random pass or crypto erase)
    RandomFilled,
    /// Trimmed: reads return zeros
    Trimmed,
}

pub struct MockDevice {
    capabilities: DeviceCapabilities,
    pub state: MediaState,
    /// Separate state for the hidden extent
    pub hidden_state: MediaState,
    pub exposed_boundary: Option<u64>,
    pub restore_count: u32,
    pub trim_count: u32,
    pub hardware_erase_count: u32,
    /// Remaining overwrite attempts that fail with DeviceBusy
    pub busy_failures: u32,
    pub expose_fails: bool,
    hidden_start_byte: Option<u64>,
}

impl MockDevice {
    pub fn new(capabilities: DeviceCapabilities) -> Self {
        Self {
            capabilities,
            state: MediaState::Dirty,
            hidden_state: MediaState::Dirty,
            exposed_boundary: None,
            restore_count: 0,
            trim_count: 0,
            hardware_erase_count: 0,
            busy_failures: 0,
            expose_fails: false,
            hidden_start_byte: None,
        }
    }

    pub fn with_hidden_extent(mut self, start_sector: u64) -> Self {
        self.hidden_start_byte = Some(start_sector * SECTOR_SIZE);
        self
    }

    fn require(&self, supported: bool, what: &str) -> Result<()> {
        if supported {
            Ok(())
        } else {
            Err(WipeError::CapabilityUnsupported {
                device: "mock".into(),
                mode: what.into(),
                detail: "not supported by mock capabilities".into(),
            })
        }
    }

    fn synthesize(state: MediaState, buf: &mut [u8]) {
        match state {
            // Repeating text-like bytes: low entropy, nonzero
            MediaState::Dirty => {
                const STALE: &[u8] = b"lost+found ext4 superblock journal inode ";
                for (i, b) in buf.iter_mut().enumerate() {
                    *b = STALE[i % STALE.len()];
                }
            }
            MediaState::Filled(byte) => buf.fill(byte),
            MediaState::RandomFilled => rand::thread_rng().fill_bytes(buf),
            MediaState::Trimmed => buf.fill(0),
        }
    }
}

impl DeviceBackend for MockDevice {
    fn overwrite(
        &mut self,
        offset: u64,
        length: u64,
        pattern: WipePattern,
        progress: &mut dyn FnMut(u64),
    ) -> Result<u64> {
        if self.busy_failures > 0 {
            self.busy_failures -= 1;
            return Err(WipeError::DeviceBusy("mock device busy".into()));
        }
        let new_state = match pattern.fixed_byte() {
            Some(b) => MediaState::Filled(b),
            None => MediaState::RandomFilled,
        };
        if Some(offset) == self.hidden_start_byte {
            self.hidden_state = new_state;
        } else {
            self.state = new_state;
        }
        progress(length);
        Ok(length)
    }

    fn trim(&mut self) -> Result<()> {
        self.require(self.capabilities.supports_trim, "trim")?;
        self.state = MediaState::Trimmed;
        self.trim_count += 1;
        Ok(())
    }

    fn secure_erase(&mut self) -> Result<()> {
        self.require(self.capabilities.supports_secure_erase, "secure erase")?;
        self.state = MediaState::Filled(0);
        self.hardware_erase_count += 1;
        Ok(())
    }

    fn sanitize(&mut self) -> Result<()> {
        self.require(self.capabilities.supports_sanitize, "sanitize")?;
        self.state = MediaState::Filled(0);
        self.hardware_erase_count += 1;
        Ok(())
    }

    fn crypto_erase(&mut self) -> Result<()> {
        self.require(self.capabilities.supports_crypto_erase, "crypto erase")?;
        self.state = MediaState::RandomFilled;
        self.hardware_erase_count += 1;
        Ok(())
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let state = match self.hidden_start_byte {
            Some(start) if offset >= start => self.hidden_state,
            _ => self.state,
        };
        Self::synthesize(state, buf);
        Ok(())
    }

    fn expose_hidden_area(&mut self, native_max_sector: u64) -> Result<u64> {
        if self.expose_fails {
            return Err(WipeError::HiddenAreaInaccessible(
                "mock refuses set-max".into(),
            ));
        }
        self.exposed_boundary = Some(native_max_sector);
        Ok(native_max_sector.saturating_sub(1024))
    }

    fn restore_hidden_area(&mut self, _original_max_sector: u64) -> Result<()> {
        self.restore_count += 1;
        Ok(())
    }
}

/// Backend over a real temp file, for tests that check the bytes on disk.
pub struct FileBackedDevice {
    file: NamedTempFile,
    size: u64,
}

impl FileBackedDevice {
    pub fn new(size: u64) -> Result<Self> {
        let file = NamedTempFile::new()?;
        file.as_file().set_len(size)?;
        Ok(Self { file, size })
    }

    pub fn read_range(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let f: &mut File = self.file.as_file_mut();
        f.seek(SeekFrom::Start(offset))?;
        f.read_exact(&mut buf)?;
        Ok(buf)
    }
}

impl DeviceBackend for FileBackedDevice {
    fn overwrite(
        &mut self,
        offset: u64,
        length: u64,
        pattern: WipePattern,
        progress: &mut dyn FnMut(u64),
    ) -> Result<u64> {
        let f: &mut File = self.file.as_file_mut();
        f.seek(SeekFrom::Start(offset))?;
        let mut remaining = length;
        let mut chunk = vec![0u8; 64 * 1024];
        let mut written = 0u64;
        while remaining > 0 {
            let n = chunk.len().min(remaining as usize);
            match pattern.fixed_byte() {
                Some(b) => chunk[..n].fill(b),
                None => rand::thread_rng().fill_bytes(&mut chunk[..n]),
            }
            f.write_all(&chunk[..n])?;
            written += n as u64;
            remaining -= n as u64;
            progress(n as u64);
        }
        f.sync_all()?;
        Ok(written)
    }

    fn trim(&mut self) -> Result<()> {
        self.overwrite(0, self.size, WipePattern::Zeros, &mut |_| {})?;
        Ok(())
    }

    fn secure_erase(&mut self) -> Result<()> {
        Err(WipeError::CapabilityUnsupported {
            device: "file".into(),
            mode: "secure erase".into(),
            detail: "file-backed mock has no firmware".into(),
        })
    }

    fn sanitize(&mut self) -> Result<()> {
        Err(WipeError::CapabilityUnsupported {
            device: "file".into(),
            mode: "sanitize".into(),
            detail: "file-backed mock has no firmware".into(),
        })
    }

    fn crypto_erase(&mut self) -> Result<()> {
        Err(WipeError::CapabilityUnsupported {
            device: "file".into(),
            mode: "crypto erase".into(),
            detail: "file-backed mock has no firmware".into(),
        })
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let f: &mut File = self.file.as_file_mut();
        f.seek(SeekFrom::Start(offset))?;
        f.read_exact(buf)?;
        Ok(())
    }

    fn expose_hidden_area(&mut self, _native_max_sector: u64) -> Result<u64> {
        Err(WipeError::HiddenAreaInaccessible(
            "file-backed mock has no hidden areas".into(),
        ))
    }

    fn restore_hidden_area(&mut self, _original_max_sector: u64) -> Result<()> {
        Ok(())
    }
}

pub fn nvme_1tb() -> DeviceDescriptor {
    DeviceDescriptor {
        path: "/dev/nvme9n1".into(),
        model: "Samsung SSD 980 PRO 1TB".into(),
        serial: "S5GXNX0T900001".into(),
        firmware_version: "5B2QGXA7".into(),
        size: 1_000_204_886_016,
        media_class: MediaClass::NVMe,
        capabilities: DeviceCapabilities {
            supports_trim: true,
            supports_sanitize: true,
            supports_crypto_erase: false,
            supports_secure_erase: false,
        },
        hidden_areas: Vec::new(),
    }
}

pub fn hdd_with_hpa(path: &str) -> DeviceDescriptor {
    DeviceDescriptor {
        path: path.into(),
        model: "WDC WD40EFRX".into(),
        serial: "WD-WCC7K1234567".into(),
        firmware_version: "82.00A82".into(),
        size: 500 * 1024 * 1024,
        media_class: MediaClass::HDD,
        capabilities: DeviceCapabilities::default(),
        hidden_areas: vec![HiddenArea {
            kind: HiddenAreaKind::HPA,
            start_sector: (500 * 1024 * 1024) / SECTOR_SIZE,
            sectors: 2048,
        }],
    }
}
