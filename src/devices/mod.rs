// Device descriptor model
//
// A DeviceDescriptor is an immutable snapshot of a storage device taken at
// selection time. If the media changes the snapshot must be re-queried; the
// engine never mutates it.

pub mod detection;

pub use detection::DeviceDetector;

use serde::{Deserialize, Serialize};

pub const SECTOR_SIZE: u64 = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaClass {
    HDD,
    SSD,
    NVMe,
    USB,
    EMMC,
}

/// Capability flags as reported by the device. Backends must report these
/// truthfully; the selector refuses modes the hardware cannot honor.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub supports_secure_erase: bool,
    pub supports_trim: bool,
    pub supports_crypto_erase: bool,
    pub supports_sanitize: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HiddenAreaKind {
    /// Host Protected Area
    HPA,
    /// Device Configuration Overlay
    DCO,
    /// Remapped / over-provisioned blocks not addressable by the host
    RemappedReserved,
}

/// An extent hidden from the normal logical block range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HiddenArea {
    pub kind: HiddenAreaKind,
    /// First sector of the hidden extent
    pub start_sector: u64,
    /// Length in sectors
    pub sectors: u64,
}

impl HiddenArea {
    pub fn size_bytes(&self) -> u64 {
        self.sectors * SECTOR_SIZE
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub path: String,
    pub model: String,
    pub serial: String,
    pub firmware_version: String,
    /// Capacity in bytes of the addressable range
    pub size: u64,
    pub media_class: MediaClass,
    pub capabilities: DeviceCapabilities,
    /// Ordered: HPA/DCO extents first, remapped-reserved last
    pub hidden_areas: Vec<HiddenArea>,
}

impl DeviceDescriptor {
    /// Addressable sector count (hidden areas excluded)
    pub fn sector_count(&self) -> u64 {
        self.size / SECTOR_SIZE
    }

    pub fn has_hidden_areas(&self) -> bool {
        !self.hidden_areas.is_empty()
    }
}
