// Capability-oriented hardware abstraction
//
// Each backend implements the subset of sanitization primitives its platform
// actually supports and reports everything else as CapabilityUnsupported.
// Backends never simulate an unsupported primitive: a TRIM that silently
// falls back to nothing would misrepresent the compliance claim recorded in
// the certificate.

pub mod physical;

pub use physical::PhysicalDevice;

use crate::error::Result;

/// A fixed byte pattern or cryptographically random data for overwrite passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WipePattern {
    Zeros,
    Ones,
    /// Alternating bit pattern (0xAA or 0x55)
    Alternating(u8),
    Random,
}

impl WipePattern {
    /// The byte value for deterministic patterns; None for random data.
    pub fn fixed_byte(&self) -> Option<u8> {
        match self {
            WipePattern::Zeros => Some(0x00),
            WipePattern::Ones => Some(0xFF),
            WipePattern::Alternating(b) => Some(*b),
            WipePattern::Random => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            WipePattern::Zeros => "zeros".to_string(),
            WipePattern::Ones => "ones".to_string(),
            WipePattern::Alternating(b) => format!("alternating 0x{:02X}", b),
            WipePattern::Random => "random".to_string(),
        }
    }
}

/// Sanitization primitives for one open device.
///
/// `overwrite` reports written byte counts through the `progress` callback so
/// the executor can expose live progress without owning the I/O loop.
pub trait DeviceBackend: Send {
    /// Overwrite `length` bytes starting at `offset` with the pattern.
    /// Returns total bytes written.
    fn overwrite(
        &mut self,
        offset: u64,
        length: u64,
        pattern: WipePattern,
        progress: &mut dyn FnMut(u64),
    ) -> Result<u64>;

    /// Discard the full addressable range (TRIM / blkdiscard equivalent).
    fn trim(&mut self) -> Result<()>;

    /// ATA security erase covering remapped blocks at firmware level.
    fn secure_erase(&mut self) -> Result<()>;

    /// NVMe sanitize (block erase).
    fn sanitize(&mut self) -> Result<()>;

    /// Cryptographic erase (key rotation on self-encrypting media).
    fn crypto_erase(&mut self) -> Result<()>;

    /// Read `buf.len()` bytes at `offset` for verification sampling.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Raise the addressable boundary so a hidden HPA/DCO extent becomes
    /// reachable. Returns the boundary to restore later.
    fn expose_hidden_area(&mut self, native_max_sector: u64) -> Result<u64>;

    /// Restore a previously raised boundary.
    fn restore_hidden_area(&mut self, original_max_sector: u64) -> Result<()>;
}
