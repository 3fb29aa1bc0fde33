use super::VerificationOutcome;
use crate::devices::{DeviceDescriptor, SECTOR_SIZE};
use crate::engine::selector::ExpectedPattern;
use crate::error::Result;
use crate::platform::DeviceBackend;
use crate::WipeConfig;
use rand::Rng;
use tracing::{debug, info, warn};

/// Shannon entropy floor (bits per byte) above which a sector is accepted
/// as high-entropy random content. CSPRNG output over 512 bytes sits near
/// 7.0; constant fills and stale filesystem structures sit far below 6.0.
const RANDOM_ENTROPY_FLOOR: f64 = 6.0;

/// Statistical post-wipe verification.
///
/// Reads a uniformly distributed set of sectors and checks each against the
/// expected post-wipe pattern. This is an estimator with explicit sampling
/// parameters, not a full-device guarantee; the outcome carries the method
/// description so auditors can judge the confidence themselves.
pub struct VerificationSampler {
    sample_count: u32,
    deterministic_threshold: f64,
    random_threshold: f64,
}

impl VerificationSampler {
    pub fn new(config: &WipeConfig) -> Self {
        Self {
            sample_count: config.sample_count,
            deterministic_threshold: config.deterministic_threshold,
            random_threshold: config.random_threshold,
        }
    }

    /// Sample the addressable range of `device` through `backend`.
    pub fn verify(
        &self,
        backend: &mut dyn DeviceBackend,
        device: &DeviceDescriptor,
        expected: ExpectedPattern,
    ) -> Result<VerificationOutcome> {
        let sector_count = device.sector_count();

        let threshold = match expected {
            ExpectedPattern::Fixed(_) => self.deterministic_threshold,
            ExpectedPattern::Random => self.random_threshold,
        };

        // A zero-capacity descriptor has nothing to sample; detection falls
        // back to size 0 when sysfs is unreadable, so this is reachable.
        if sector_count == 0 {
            warn!(device = %device.path, "device reports zero capacity, nothing to verify");
            return Ok(VerificationOutcome {
                method: "uniform random sector sampling (0 addressable sectors)".into(),
                sample_count: 0,
                matched_samples: 0,
                match_ratio: 0.0,
                threshold,
                passed: false,
            });
        }

        // Sample count can never exceed the addressable sector count; the
        // floor of one sample stays within it because sector_count >= 1 here.
        let samples = (self.sample_count as u64).min(sector_count).max(1) as u32;

        info!(
            device = %device.path,
            samples,
            ?expected,
            "sampling sectors for post-wipe verification"
        );

        let mut rng = rand::thread_rng();
        let mut buf = vec![0u8; SECTOR_SIZE as usize];
        let mut matched = 0u32;

        for _ in 0..samples {
            let sector = rng.gen_range(0..sector_count);
            backend.read_at(sector * SECTOR_SIZE, &mut buf)?;

            if Self::sector_matches(&buf, expected) {
                matched += 1;
            } else {
                debug!(sector, "sampled sector does not match expected pattern");
            }
        }

        let ratio = matched as f64 / samples as f64;
        let passed = ratio >= threshold;

        Ok(VerificationOutcome {
            method: format!(
                "uniform random sector sampling ({} of {} sectors)",
                samples, sector_count
            ),
            sample_count: samples,
            matched_samples: matched,
            match_ratio: ratio,
            threshold,
            passed,
        })
    }

    fn sector_matches(buf: &[u8], expected: ExpectedPattern) -> bool {
        match expected {
            ExpectedPattern::Fixed(byte) => buf.iter().all(|&b| b == byte),
            ExpectedPattern::Random => shannon_entropy(buf) >= RANDOM_ENTROPY_FLOOR,
        }
    }
}

/// Shannon entropy in bits per byte.
pub fn shannon_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut counts = [0u32; 256];
    for &b in data {
        counts[b as usize] += 1;
    }
    let len = data.len() as f64;
    counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / len;
            -p * p.log2()
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{DeviceCapabilities, MediaClass};
    use crate::error::WipeError;
    use crate::platform::WipePattern;

    /// In-memory backend that serves a constant byte on every read.
    struct ConstantBackend {
        byte: u8,
    }

    impl DeviceBackend for ConstantBackend {
        fn overwrite(
            &mut self,
            _offset: u64,
            length: u64,
            _pattern: WipePattern,
            progress: &mut dyn FnMut(u64),
        ) -> Result<u64> {
            progress(length);
            Ok(length)
        }
        fn trim(&mut self) -> Result<()> {
            Ok(())
        }
        fn secure_erase(&mut self) -> Result<()> {
            Err(WipeError::CapabilityUnsupported {
                device: "mem".into(),
                mode: "secure-erase".into(),
                detail: "unsupported".into(),
            })
        }
        fn sanitize(&mut self) -> Result<()> {
            Err(WipeError::CapabilityUnsupported {
                device: "mem".into(),
                mode: "sanitize".into(),
                detail: "unsupported".into(),
            })
        }
        fn crypto_erase(&mut self) -> Result<()> {
            Err(WipeError::CapabilityUnsupported {
                device: "mem".into(),
                mode: "crypto-erase".into(),
                detail: "unsupported".into(),
            })
        }
        fn read_at(&mut self, _offset: u64, buf: &mut [u8]) -> Result<()> {
            buf.fill(self.byte);
            Ok(())
        }
        fn expose_hidden_area(&mut self, _native_max_sector: u64) -> Result<u64> {
            Ok(0)
        }
        fn restore_hidden_area(&mut self, _original_max_sector: u64) -> Result<()> {
            Ok(())
        }
    }

    fn device(size: u64) -> DeviceDescriptor {
        DeviceDescriptor {
            path: "/dev/mem0".into(),
            model: "Mem".into(),
            serial: "M1".into(),
            firmware_version: "1".into(),
            size,
            media_class: MediaClass::SSD,
            capabilities: DeviceCapabilities::default(),
            hidden_areas: Vec::new(),
        }
    }

    #[test]
    fn all_zero_sectors_pass_deterministic_check() {
        let sampler = VerificationSampler::new(&WipeConfig::default());
        let mut backend = ConstantBackend { byte: 0x00 };
        let outcome = sampler
            .verify(&mut backend, &device(1024 * 1024), ExpectedPattern::Fixed(0x00))
            .unwrap();
        assert!(outcome.passed);
        assert_eq!(outcome.match_ratio, 1.0);
        assert_eq!(outcome.sample_count, 100);
    }

    #[test]
    fn residual_data_fails_deterministic_check() {
        let sampler = VerificationSampler::new(&WipeConfig::default());
        let mut backend = ConstantBackend { byte: 0xAB };
        let outcome = sampler
            .verify(&mut backend, &device(1024 * 1024), ExpectedPattern::Fixed(0x00))
            .unwrap();
        assert!(!outcome.passed);
        assert_eq!(outcome.match_ratio, 0.0);
    }

    #[test]
    fn ratio_bounded_and_samples_capped_by_sector_count() {
        let sampler = VerificationSampler::new(&WipeConfig {
            sample_count: 10_000,
            ..Default::default()
        });
        // 16 sectors only
        let dev = device(16 * SECTOR_SIZE);
        let mut backend = ConstantBackend { byte: 0x00 };
        let outcome = sampler
            .verify(&mut backend, &dev, ExpectedPattern::Fixed(0x00))
            .unwrap();
        assert!(outcome.sample_count as u64 <= dev.sector_count());
        assert!((0.0..=1.0).contains(&outcome.match_ratio));
    }

    #[test]
    fn zero_capacity_device_fails_without_sampling() {
        // Detection degrades to size 0 when the sysfs size attribute is
        // unreadable; verification must report that honestly, not panic.
        let sampler = VerificationSampler::new(&WipeConfig::default());
        let mut backend = ConstantBackend { byte: 0x00 };
        let outcome = sampler
            .verify(&mut backend, &device(0), ExpectedPattern::Fixed(0x00))
            .unwrap();
        assert!(!outcome.passed);
        assert_eq!(outcome.sample_count, 0);
        assert_eq!(outcome.matched_samples, 0);
        assert_eq!(outcome.match_ratio, 0.0);
        assert!(outcome.sample_count as u64 <= device(0).sector_count());
    }

    #[test]
    fn constant_fill_fails_random_expectation() {
        let sampler = VerificationSampler::new(&WipeConfig::default());
        let mut backend = ConstantBackend { byte: 0x55 };
        let outcome = sampler
            .verify(&mut backend, &device(1024 * 1024), ExpectedPattern::Random)
            .unwrap();
        assert!(!outcome.passed);
    }

    #[test]
    fn entropy_of_constant_data_is_zero() {
        assert_eq!(shannon_entropy(&[0u8; 512]), 0.0);
    }

    #[test]
    fn entropy_of_random_data_clears_floor() {
        let mut data = vec![0u8; 512];
        rand::Rng::fill(&mut rand::thread_rng(), data.as_mut_slice());
        assert!(shannon_entropy(&data) >= RANDOM_ENTROPY_FLOOR);
    }

    #[test]
    fn entropy_never_exceeds_eight_bits() {
        let data: Vec<u8> = (0..=255).collect();
        let e = shannon_entropy(&data);
        assert!(e <= 8.0 + 1e-9);
        assert!((e - 8.0).abs() < 1e-9);
    }
}
