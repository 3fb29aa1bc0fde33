use super::{
    DeviceCapabilities, DeviceDescriptor, HiddenArea, HiddenAreaKind, MediaClass, SECTOR_SIZE,
};
use crate::error::Result;
use std::fs;
use std::path::Path;
use std::process::Command;
use tracing::warn;

pub struct DeviceDetector;

impl DeviceDetector {
    /// Enumerate physical block devices with capability probes.
    ///
    /// A device that fails its capability probes is still listed with basic
    /// information; enumeration only fails when /sys/block itself is
    /// unreadable.
    pub fn detect_all() -> Result<Vec<DeviceDescriptor>> {
        let mut devices = Vec::new();

        let block_devices = fs::read_dir("/sys/block")?;
        for entry in block_devices {
            let entry = entry?;
            let device_name = entry.file_name();
            let device_name = device_name.to_string_lossy().to_string();

            if Self::should_skip_device(&device_name) {
                continue;
            }

            let device_path = format!("/dev/{}", device_name);
            if !Path::new(&device_path).exists() {
                continue;
            }

            match Self::analyze_device(&device_path, &device_name) {
                Ok(descriptor) => devices.push(descriptor),
                Err(e) => {
                    warn!(device = %device_path, error = %e, "capability probe failed, using basic info");
                    if let Ok(basic) = Self::basic_descriptor(&device_path, &device_name) {
                        devices.push(basic);
                    }
                }
            }
        }

        Ok(devices)
    }

    /// Snapshot a single device by path.
    pub fn snapshot(device_path: &str) -> Result<DeviceDescriptor> {
        if !Path::new(device_path).exists() {
            return Err(crate::error::WipeError::DeviceNotFound(
                device_path.to_string(),
            ));
        }
        let name = device_path.trim_start_matches("/dev/").to_string();
        match Self::analyze_device(device_path, &name) {
            Ok(descriptor) => Ok(descriptor),
            Err(_) => Self::basic_descriptor(device_path, &name),
        }
    }

    // Skip loop devices, ram disks, device mapper, optical drives
    pub(crate) fn should_skip_device(device_name: &str) -> bool {
        device_name.starts_with("loop")
            || device_name.starts_with("ram")
            || device_name.starts_with("dm-")
            || device_name.starts_with("sr")
            || device_name.starts_with("zram")
    }

    fn analyze_device(device_path: &str, device_name: &str) -> Result<DeviceDescriptor> {
        let mut descriptor = Self::basic_descriptor(device_path, device_name)?;

        let mut capabilities = DeviceCapabilities::default();
        capabilities.supports_trim = Self::probe_trim(device_name);

        match descriptor.media_class {
            MediaClass::NVMe => {
                // NVMe controllers expose sanitize and format with crypto erase
                let (sanitize, crypto) = Self::probe_nvme_sanitize(device_path);
                capabilities.supports_sanitize = sanitize;
                capabilities.supports_crypto_erase = crypto;
            }
            MediaClass::HDD | MediaClass::SSD => {
                capabilities.supports_secure_erase = Self::probe_ata_secure_erase(device_path);
                if let Some(area) = Self::probe_hpa(device_path) {
                    descriptor.hidden_areas.push(area);
                }
                if let Some(area) = Self::probe_dco(device_path) {
                    descriptor.hidden_areas.push(area);
                }
            }
            MediaClass::USB | MediaClass::EMMC => {}
        }

        // SSD over-provisioning is only reachable through firmware-level erase
        if matches!(descriptor.media_class, MediaClass::SSD | MediaClass::NVMe) {
            descriptor.hidden_areas.push(HiddenArea {
                kind: HiddenAreaKind::RemappedReserved,
                start_sector: descriptor.sector_count(),
                sectors: 0,
            });
        }

        descriptor.capabilities = capabilities;
        Ok(descriptor)
    }

    fn basic_descriptor(device_path: &str, device_name: &str) -> Result<DeviceDescriptor> {
        let sys = format!("/sys/block/{}", device_name);

        let size_sectors = fs::read_to_string(format!("{}/size", sys))
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(0);

        let model = Self::read_sys_attr(&sys, "device/model");
        let serial = Self::read_sys_attr(&sys, "device/serial");
        let firmware_version = Self::read_sys_attr(&sys, "device/firmware_rev");

        Ok(DeviceDescriptor {
            path: device_path.to_string(),
            model,
            serial,
            firmware_version,
            size: size_sectors * SECTOR_SIZE,
            media_class: Self::classify(device_name, &sys),
            capabilities: DeviceCapabilities::default(),
            hidden_areas: Vec::new(),
        })
    }

    fn read_sys_attr(sys: &str, attr: &str) -> String {
        fs::read_to_string(format!("{}/{}", sys, attr))
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| "Unknown".to_string())
    }

    fn classify(device_name: &str, sys: &str) -> MediaClass {
        if device_name.starts_with("nvme") {
            return MediaClass::NVMe;
        }
        if device_name.starts_with("mmcblk") {
            return MediaClass::EMMC;
        }
        // USB devices are reachable through the usb subsystem symlink
        if let Ok(target) = fs::read_link(format!("{}/device", sys)) {
            if target.to_string_lossy().contains("usb") {
                return MediaClass::USB;
            }
        }
        // rotational flag distinguishes HDD from SSD
        match fs::read_to_string(format!("{}/queue/rotational", sys)) {
            Ok(s) if s.trim() == "0" => MediaClass::SSD,
            _ => MediaClass::HDD,
        }
    }

    fn probe_trim(device_name: &str) -> bool {
        fs::read_to_string(format!(
            "/sys/block/{}/queue/discard_granularity",
            device_name
        ))
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(|g| g > 0)
        .unwrap_or(false)
    }

    fn probe_ata_secure_erase(device_path: &str) -> bool {
        let output = Command::new("hdparm").args(["-I", device_path]).output();
        match output {
            Ok(out) if out.status.success() => {
                let text = String::from_utf8_lossy(&out.stdout);
                text.contains("supported: enhanced erase")
                    || text
                        .lines()
                        .any(|l| l.trim_start().starts_with("supported") && text.contains("SECURITY ERASE"))
            }
            _ => false,
        }
    }

    fn probe_nvme_sanitize(device_path: &str) -> (bool, bool) {
        let output = Command::new("nvme")
            .args(["id-ctrl", device_path])
            .output();
        match output {
            Ok(out) if out.status.success() => {
                let text = String::from_utf8_lossy(&out.stdout);
                // sanicap != 0 means at least one sanitize action is supported
                let sanitize = text
                    .lines()
                    .find(|l| l.contains("sanicap"))
                    .map(|l| !l.contains(": 0") || l.contains("0x"))
                    .unwrap_or(false);
                // fna bit 2 advertises crypto erase during format
                let crypto = text
                    .lines()
                    .find(|l| l.contains("fna"))
                    .map(|l| l.contains("0x4") || l.contains("0x6") || l.contains("0x7"))
                    .unwrap_or(false);
                (sanitize, crypto)
            }
            _ => (false, false),
        }
    }

    /// HPA exists when the native max address exceeds the current max.
    fn probe_hpa(device_path: &str) -> Option<HiddenArea> {
        let output = Command::new("hdparm")
            .args(["-N", device_path])
            .output()
            .ok()?;
        let text = String::from_utf8_lossy(&output.stdout);
        let (current, native) = Self::parse_max_sectors(&text)?;
        if native > current {
            Some(HiddenArea {
                kind: HiddenAreaKind::HPA,
                start_sector: current,
                sectors: native - current,
            })
        } else {
            None
        }
    }

    fn probe_dco(device_path: &str) -> Option<HiddenArea> {
        let output = Command::new("hdparm")
            .args(["--dco-identify", device_path])
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let text = String::from_utf8_lossy(&output.stdout);
        let real = Self::number_after(&text, "Real max sectors")?;
        let dco = Self::number_after(&text, "DCO max sectors")?;
        if real > dco {
            Some(HiddenArea {
                kind: HiddenAreaKind::DCO,
                start_sector: dco,
                sectors: real - dco,
            })
        } else {
            None
        }
    }

    /// Parse hdparm -N output: "max sectors = 1953523055/1953525168, HPA ..."
    pub(crate) fn parse_max_sectors(output: &str) -> Option<(u64, u64)> {
        for line in output.lines() {
            if let Some(pos) = line.find("max sectors") {
                let rest = &line[pos..];
                let after = rest.split('=').nth(1)?.trim();
                let mut parts = after.split('/');
                let current = parts.next()?.trim().parse::<u64>().ok()?;
                let native: u64 = parts
                    .next()?
                    .trim()
                    .chars()
                    .take_while(|c| c.is_ascii_digit())
                    .collect::<String>()
                    .parse()
                    .ok()?;
                return Some((current, native));
            }
        }
        None
    }

    pub(crate) fn number_after(output: &str, label: &str) -> Option<u64> {
        output
            .lines()
            .find(|l| l.contains(label))?
            .split(|c: char| !c.is_ascii_digit())
            .filter(|s| !s.is_empty())
            .filter_map(|s| s.parse::<u64>().ok())
            .max()
    }
}
