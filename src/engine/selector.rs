use crate::devices::DeviceDescriptor;
use crate::error::{Result, WipeError};
use crate::platform::WipePattern;
use crate::{WipeConfig, WipeMode};
use serde::{Deserialize, Serialize};

/// One concrete operation in a method plan, tagged with the hardware
/// primitive it invokes.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanStep {
    Overwrite {
        pass: u32,
        total_passes: u32,
        pattern: WipePattern,
    },
    Trim,
    SecureErase,
    Sanitize,
    CryptoErase,
    HiddenAreas,
    Verify { expected: ExpectedPattern },
}

impl PlanStep {
    pub fn describe(&self) -> String {
        match self {
            PlanStep::Overwrite {
                pass,
                total_passes,
                pattern,
            } => format!("overwrite pass {}/{} ({})", pass, total_passes, pattern.describe()),
            PlanStep::Trim => "trim".to_string(),
            PlanStep::SecureErase => "ata secure erase".to_string(),
            PlanStep::Sanitize => "nvme sanitize".to_string(),
            PlanStep::CryptoErase => "crypto erase".to_string(),
            PlanStep::HiddenAreas => "hidden areas".to_string(),
            PlanStep::Verify { .. } => "verification".to_string(),
        }
    }
}

/// The post-wipe state the sampler checks sectors against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpectedPattern {
    /// All bytes equal to this value
    Fixed(u8),
    /// High-entropy content (random final pass or firmware crypto erase)
    Random,
}

#[derive(Debug, Clone)]
pub struct MethodPlan {
    pub mode: WipeMode,
    pub steps: Vec<PlanStep>,
}

impl MethodPlan {
    /// Overwrite passes the plan will run against the main extent; hidden
    /// areas reuse the same sequence.
    pub fn overwrite_patterns(&self) -> Vec<WipePattern> {
        self.steps
            .iter()
            .filter_map(|s| match s {
                PlanStep::Overwrite { pattern, .. } => Some(*pattern),
                _ => None,
            })
            .collect()
    }

    /// Whether the plan includes a firmware-level erase that covers
    /// remapped/reserved blocks.
    pub fn covers_remapped_blocks(&self) -> bool {
        self.steps.iter().any(|s| {
            matches!(
                s,
                PlanStep::SecureErase | PlanStep::Sanitize | PlanStep::CryptoErase
            )
        })
    }
}

/// Maps a requested mode plus device capabilities to a concrete method plan.
pub struct MethodSelector;

impl MethodSelector {
    /// Build the ordered plan for `mode` on `device`.
    ///
    /// Advanced mode requires a hardware erase primitive; downgrading
    /// silently would misrepresent the compliance claim, so the selector
    /// fails instead.
    pub fn select(
        mode: WipeMode,
        device: &DeviceDescriptor,
        config: &WipeConfig,
    ) -> Result<MethodPlan> {
        let mut steps = Vec::new();
        let expected;

        match mode {
            WipeMode::Quick => {
                if device.capabilities.supports_trim {
                    steps.push(PlanStep::Trim);
                    expected = ExpectedPattern::Fixed(0x00);
                } else {
                    steps.push(PlanStep::Overwrite {
                        pass: 1,
                        total_passes: 1,
                        pattern: WipePattern::Zeros,
                    });
                    expected = ExpectedPattern::Fixed(0x00);
                }
            }
            WipeMode::Full => {
                // Overwrite passes regardless of hardware capability, with
                // alternating patterns and a random final pass.
                let total = config.full_passes.clamp(3, 7);
                for pass in 1..=total {
                    let pattern = Self::full_pass_pattern(pass, total);
                    steps.push(PlanStep::Overwrite {
                        pass,
                        total_passes: total,
                        pattern,
                    });
                }
                expected = ExpectedPattern::Random;
            }
            WipeMode::Advanced => {
                let caps = &device.capabilities;
                if !caps.supports_secure_erase && !caps.supports_sanitize {
                    return Err(WipeError::CapabilityUnsupported {
                        device: device.path.clone(),
                        mode: mode.as_str().to_string(),
                        detail: "neither secure erase nor sanitize is supported".into(),
                    });
                }
                if caps.supports_crypto_erase {
                    steps.push(PlanStep::CryptoErase);
                } else if caps.supports_sanitize {
                    steps.push(PlanStep::Sanitize);
                } else {
                    steps.push(PlanStep::SecureErase);
                }
                expected = ExpectedPattern::Random;
            }
        }

        if device.has_hidden_areas() {
            steps.push(PlanStep::HiddenAreas);
        }

        if config.verify {
            steps.push(PlanStep::Verify { expected });
        }

        Ok(MethodPlan { mode, steps })
    }

    fn full_pass_pattern(pass: u32, total: u32) -> WipePattern {
        if pass == total {
            return WipePattern::Random;
        }
        match (pass - 1) % 4 {
            0 => WipePattern::Zeros,
            1 => WipePattern::Ones,
            2 => WipePattern::Alternating(0xAA),
            _ => WipePattern::Alternating(0x55),
        }
    }
}
