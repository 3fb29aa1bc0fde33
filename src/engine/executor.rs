use super::hidden::HiddenAreaHandler;
use super::sampler::VerificationSampler;
use super::selector::{MethodPlan, PlanStep};
use super::{AuditEntry, PerformanceMetrics, WipeResult};
use crate::devices::DeviceDescriptor;
use crate::error::{Result, WipeError};
use crate::platform::DeviceBackend;
use crate::WipeConfig;
use chrono::Utc;
use rand::Rng;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

// Devices with a wipe in flight. Concurrent wipes of the same path are
// rejected at admission, not serialized: interleaved low-level commands to
// one device are undefined.
static ACTIVE_DEVICES: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();

fn active_devices() -> &'static Mutex<HashSet<String>> {
    ACTIVE_DEVICES.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Observable execution progress. Snapshots are cheap and may be taken from
/// any thread for the duration of the wipe.
pub struct ProgressState {
    bytes_done: AtomicU64,
    total_bytes: AtomicU64,
    current_step: Mutex<String>,
}

#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub bytes_done: u64,
    pub total_bytes: u64,
    pub current_step: String,
}

impl ProgressState {
    fn new() -> Self {
        Self {
            bytes_done: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            current_step: Mutex::new(String::from("pending")),
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            bytes_done: self.bytes_done.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            current_step: self.current_step.lock().unwrap().clone(),
        }
    }

    fn set_step(&self, name: &str) {
        *self.current_step.lock().unwrap() = name.to_string();
    }

    fn add_bytes(&self, n: u64) {
        self.bytes_done.fetch_add(n, Ordering::Relaxed);
    }
}

/// Exponential backoff with jitter for transient device errors.
/// delay = base * 2^attempt, capped, with ±30% randomness so parallel wipes
/// of distinct devices do not retry in lockstep.
#[derive(Debug, Clone)]
struct ExponentialBackoff {
    base_delay: Duration,
    max_delay: Duration,
    jitter_factor: f64,
}

impl ExponentialBackoff {
    fn new(base_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.3,
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        let exponential_ms = self.base_delay.as_millis().saturating_mul(1u128 << attempt.min(16));
        let capped_ms = exponential_ms.min(self.max_delay.as_millis()) as f64;
        let jitter = (rand::thread_rng().gen::<f64>() - 0.5) * 2.0 * capped_ms * self.jitter_factor;
        Duration::from_millis((capped_ms + jitter).max(0.0) as u64)
    }
}

/// Executes a method plan sequentially against one device.
///
/// Steps run one at a time: overlapping writes to the same device are
/// unsafe. Transient failures are retried with bounded backoff; a fatal
/// step failure stops further destructive steps but preserves everything
/// already recorded, so a partially wiped device stays auditable.
/// Cancellation is honored only between steps.
pub struct ErasureExecutor {
    device: DeviceDescriptor,
    config: WipeConfig,
    progress: Arc<ProgressState>,
    cancel: Arc<AtomicBool>,
    audit_trail: Vec<AuditEntry>,
}

impl ErasureExecutor {
    /// Admit a new wipe for `device`. Fails with `DeviceInUse` if another
    /// executor already holds the path.
    pub fn new(device: DeviceDescriptor, config: WipeConfig) -> Result<Self> {
        let mut active = active_devices().lock().unwrap();
        if !active.insert(device.path.clone()) {
            return Err(WipeError::DeviceInUse(device.path.clone()));
        }
        drop(active);

        Ok(Self {
            device,
            config,
            progress: Arc::new(ProgressState::new()),
            cancel: Arc::new(AtomicBool::new(false)),
            audit_trail: Vec::new(),
        })
    }

    pub fn progress(&self) -> Arc<ProgressState> {
        Arc::clone(&self.progress)
    }

    /// Handle for requesting cancellation; honored at the next step boundary.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn audit_trail(&self) -> &[AuditEntry] {
        &self.audit_trail
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst) || crate::is_interrupted()
    }

    /// Run the plan to completion (or to the first fatal error / honored
    /// cancellation) and return the immutable result.
    pub async fn execute(
        &mut self,
        backend: &mut dyn DeviceBackend,
        plan: &MethodPlan,
    ) -> Result<WipeResult> {
        let start_time = Utc::now();
        let wall_start = Instant::now();

        info!(
            device = %self.device.path,
            mode = plan.mode.as_str(),
            steps = plan.steps.len(),
            "starting wipe execution"
        );
        self.audit_trail.push(AuditEntry::new(
            "wipe started",
            "ok",
            Some(format!("mode {}, {} steps", plan.mode.as_str(), plan.steps.len())),
        ));

        self.progress
            .total_bytes
            .store(self.estimated_total_bytes(plan), Ordering::Relaxed);

        let mut bytes_written = 0u64;
        let mut passes_completed = 0u32;
        let mut hidden_outcomes = Vec::new();
        let mut verification = None;
        let mut warnings = Vec::new();
        let mut errors: Vec<String> = Vec::new();
        let mut retry_count = 0u32;
        let mut peak_mbps = 0.0f64;
        let mut hardware_erase_ran = false;

        let overwrite_patterns = plan.overwrite_patterns();

        for step in &plan.steps {
            // Cancellation only at step boundaries: an issued erase command
            // must run to completion or hardware failure.
            if self.cancelled() {
                let msg = "cancellation honored at step boundary; remaining steps skipped";
                warn!(device = %self.device.path, "{}", msg);
                warnings.push(msg.to_string());
                errors.push(WipeError::Interrupted.to_string());
                self.audit_trail
                    .push(AuditEntry::new("wipe cancelled", "interrupted", None));
                break;
            }

            let step_name = step.describe();
            self.progress.set_step(&step_name);
            let step_start = Instant::now();

            let step_result: Result<u64> = match step {
                PlanStep::Overwrite { pattern, .. } => {
                    let progress = Arc::clone(&self.progress);
                    self.with_retries(&step_name, &mut retry_count, || {
                        let mut cb = |n: u64| progress.add_bytes(n);
                        backend.overwrite(0, self.device.size, *pattern, &mut cb)
                    })
                    .await
                }
                PlanStep::Trim => {
                    let r = self
                        .with_retries(&step_name, &mut retry_count, || {
                            backend.trim().map(|_| 0u64)
                        })
                        .await;
                    if r.is_ok() {
                        self.progress
                            .bytes_done
                            .store(self.device.size, Ordering::Relaxed);
                    }
                    r
                }
                PlanStep::SecureErase => {
                    let r = self
                        .with_retries(&step_name, &mut retry_count, || {
                            backend.secure_erase().map(|_| 0u64)
                        })
                        .await;
                    hardware_erase_ran |= r.is_ok();
                    r
                }
                PlanStep::Sanitize => {
                    let r = self
                        .with_retries(&step_name, &mut retry_count, || {
                            backend.sanitize().map(|_| 0u64)
                        })
                        .await;
                    hardware_erase_ran |= r.is_ok();
                    r
                }
                PlanStep::CryptoErase => {
                    let r = self
                        .with_retries(&step_name, &mut retry_count, || {
                            backend.crypto_erase().map(|_| 0u64)
                        })
                        .await;
                    hardware_erase_ran |= r.is_ok();
                    r
                }
                PlanStep::HiddenAreas => {
                    let handler = HiddenAreaHandler::new(&self.config);
                    match handler.process(
                        backend,
                        &self.device,
                        &overwrite_patterns,
                        hardware_erase_ran,
                    ) {
                        Ok(report) => {
                            hidden_outcomes = report.outcomes;
                            warnings.extend(report.warnings);
                            Ok(report.bytes_written)
                        }
                        Err(e) => Err(e),
                    }
                }
                PlanStep::Verify { expected } => {
                    let sampler = VerificationSampler::new(&self.config);
                    match sampler.verify(backend, &self.device, *expected) {
                        Ok(outcome) => {
                            if !outcome.passed {
                                // Recorded, never upgraded to success
                                warnings.push(
                                    WipeError::VerificationBelowThreshold {
                                        ratio: outcome.match_ratio,
                                        threshold: outcome.threshold,
                                    }
                                    .to_string(),
                                );
                            }
                            self.audit_trail.push(AuditEntry::new(
                                "verification sampled",
                                if outcome.passed { "passed" } else { "failed" },
                                Some(format!(
                                    "{}/{} sectors matched",
                                    outcome.matched_samples, outcome.sample_count
                                )),
                            ));
                            verification = Some(outcome);
                            Ok(0)
                        }
                        Err(e) => Err(e),
                    }
                }
            };

            let elapsed = step_start.elapsed();
            match step_result {
                Ok(step_bytes) => {
                    bytes_written += step_bytes;
                    if matches!(
                        step,
                        PlanStep::Overwrite { .. }
                            | PlanStep::Trim
                            | PlanStep::SecureErase
                            | PlanStep::Sanitize
                            | PlanStep::CryptoErase
                    ) {
                        passes_completed += 1;
                    }
                    if step_bytes > 0 && elapsed.as_secs_f64() > 0.0 {
                        let mbps = step_bytes as f64 / (1024.0 * 1024.0) / elapsed.as_secs_f64();
                        peak_mbps = peak_mbps.max(mbps);
                    }
                    info!(
                        device = %self.device.path,
                        step = %step_name,
                        elapsed = %humantime::format_duration(Duration::from_secs(elapsed.as_secs())),
                        "step completed"
                    );
                    self.audit_trail
                        .push(AuditEntry::new(&step_name, "completed", None));
                }
                Err(e) => {
                    error!(device = %self.device.path, step = %step_name, error = %e, "step failed");
                    self.audit_trail
                        .push(AuditEntry::new(&step_name, "failed", Some(e.to_string())));
                    errors.push(format!("{}: {}", step_name, e));
                    // Prior steps' outcomes stay recorded; nothing destructive
                    // runs after a fatal step failure.
                    break;
                }
            }
        }

        let end_time = Utc::now();
        let total_secs = wall_start.elapsed().as_secs_f64();
        let average_mbps = if total_secs > 0.0 {
            bytes_written as f64 / (1024.0 * 1024.0) / total_secs
        } else {
            0.0
        };

        self.progress.set_step("complete");
        self.audit_trail.push(AuditEntry::new(
            "wipe finished",
            if errors.is_empty() { "ok" } else { "failed" },
            Some(format!("{} bytes written", bytes_written)),
        ));

        Ok(WipeResult {
            mode: plan.mode,
            start_time,
            end_time,
            bytes_written,
            passes_completed,
            hidden_areas: hidden_outcomes,
            verification,
            warnings,
            errors,
            metrics: PerformanceMetrics {
                average_throughput_mbps: average_mbps,
                peak_throughput_mbps: peak_mbps.max(average_mbps),
                retry_count,
            },
        })
    }

    /// Retry `op` on transient errors with exponential backoff, bounded by
    /// the configured attempt count and the per-step time budget.
    async fn with_retries<F>(
        &self,
        step_name: &str,
        retry_count: &mut u32,
        mut op: F,
    ) -> Result<u64>
    where
        F: FnMut() -> Result<u64>,
    {
        let backoff = ExponentialBackoff::new(Duration::from_millis(self.config.retry_base_delay_ms));
        let budget = Duration::from_secs(self.config.step_timeout_secs);
        let started = Instant::now();

        let mut attempt = 0u32;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    if started.elapsed() >= budget {
                        return Err(WipeError::Timeout(format!(
                            "{} exceeded step budget while retrying",
                            step_name
                        )));
                    }
                    let delay = backoff.delay(attempt);
                    warn!(
                        step = step_name,
                        attempt = attempt + 1,
                        delay = %humantime::format_duration(Duration::from_millis(delay.as_millis() as u64)),
                        error = %e,
                        "transient failure, backing off"
                    );
                    *retry_count += 1;
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn estimated_total_bytes(&self, plan: &MethodPlan) -> u64 {
        let overwrite_passes = plan.overwrite_patterns().len() as u64;
        if overwrite_passes > 0 {
            overwrite_passes * self.device.size
        } else {
            self.device.size
        }
    }
}

impl Drop for ErasureExecutor {
    fn drop(&mut self) {
        if let Ok(mut active) = active_devices().lock() {
            active.remove(&self.device.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{DeviceCapabilities, MediaClass};
    use crate::engine::selector::MethodSelector;
    use crate::platform::WipePattern;
    use crate::WipeMode;

    struct FlakyBackend {
        failures_remaining: u32,
        overwrite_calls: u32,
    }

    impl DeviceBackend for FlakyBackend {
        fn overwrite(
            &mut self,
            _offset: u64,
            length: u64,
            _pattern: WipePattern,
            progress: &mut dyn FnMut(u64),
        ) -> Result<u64> {
            self.overwrite_calls += 1;
            if self.failures_remaining > 0 {
                self.failures_remaining -= 1;
                return Err(WipeError::DeviceBusy("simulated EBUSY".into()));
            }
            progress(length);
            Ok(length)
        }
        fn trim(&mut self) -> Result<()> {
            Ok(())
        }
        fn secure_erase(&mut self) -> Result<()> {
            Ok(())
        }
        fn sanitize(&mut self) -> Result<()> {
            Ok(())
        }
        fn crypto_erase(&mut self) -> Result<()> {
            Ok(())
        }
        fn read_at(&mut self, _offset: u64, buf: &mut [u8]) -> Result<()> {
            buf.fill(0);
            Ok(())
        }
        fn expose_hidden_area(&mut self, _n: u64) -> Result<u64> {
            Ok(0)
        }
        fn restore_hidden_area(&mut self, _n: u64) -> Result<()> {
            Ok(())
        }
    }

    fn device(path: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            path: path.into(),
            model: "Test".into(),
            serial: "S".into(),
            firmware_version: "1".into(),
            size: 1024 * 1024,
            media_class: MediaClass::HDD,
            capabilities: DeviceCapabilities::default(),
            hidden_areas: Vec::new(),
        }
    }

    fn fast_config() -> WipeConfig {
        WipeConfig {
            retry_base_delay_ms: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried_then_succeed() {
        crate::reset_interrupted();
        let dev = device("/test/retry-ok");
        let config = fast_config();
        let plan = MethodSelector::select(WipeMode::Quick, &dev, &config).unwrap();

        let mut backend = FlakyBackend {
            failures_remaining: 2,
            overwrite_calls: 0,
        };
        let mut executor = ErasureExecutor::new(dev, config).unwrap();
        let result = executor.execute(&mut backend, &plan).await.unwrap();

        assert!(result.wipe_succeeded());
        assert_eq!(result.metrics.retry_count, 2);
        assert_eq!(result.passes_completed, 1);
        assert_eq!(backend.overwrite_calls, 3);
    }

    #[tokio::test]
    async fn exhausted_retries_become_fatal_step_error() {
        crate::reset_interrupted();
        let dev = device("/test/retry-fail");
        let config = WipeConfig {
            max_retries: 2,
            retry_base_delay_ms: 1,
            ..Default::default()
        };
        let plan = MethodSelector::select(WipeMode::Quick, &dev, &config).unwrap();

        let mut backend = FlakyBackend {
            failures_remaining: 10,
            overwrite_calls: 0,
        };
        let mut executor = ErasureExecutor::new(dev, config).unwrap();
        let result = executor.execute(&mut backend, &plan).await.unwrap();

        assert!(!result.wipe_succeeded());
        assert_eq!(result.errors.len(), 1);
        // Verification never ran after the fatal step
        assert!(result.verification.is_none());
    }

    #[tokio::test]
    async fn concurrent_wipe_on_same_path_rejected_at_admission() {
        crate::reset_interrupted();
        let dev = device("/test/exclusive");
        let _first = ErasureExecutor::new(dev.clone(), fast_config()).unwrap();
        let second = ErasureExecutor::new(dev, fast_config());
        assert!(matches!(second, Err(WipeError::DeviceInUse(_))));
    }

    #[tokio::test]
    async fn admission_slot_released_on_drop() {
        crate::reset_interrupted();
        let dev = device("/test/release");
        {
            let _executor = ErasureExecutor::new(dev.clone(), fast_config()).unwrap();
        }
        assert!(ErasureExecutor::new(dev, fast_config()).is_ok());
    }

    #[tokio::test]
    async fn cancellation_honored_at_step_boundary() {
        crate::reset_interrupted();
        let dev = device("/test/cancel");
        let config = fast_config();
        let plan = MethodSelector::select(WipeMode::Full, &dev, &config).unwrap();

        let mut backend = FlakyBackend {
            failures_remaining: 0,
            overwrite_calls: 0,
        };
        let mut executor = ErasureExecutor::new(dev, config).unwrap();
        executor.cancel_handle().store(true, Ordering::SeqCst);
        let result = executor.execute(&mut backend, &plan).await.unwrap();

        assert!(!result.wipe_succeeded());
        assert_eq!(backend.overwrite_calls, 0);
        assert!(result.errors.iter().any(|e| e.contains("interrupted")));
    }

    #[tokio::test]
    async fn progress_reaches_total_on_success() {
        crate::reset_interrupted();
        let dev = device("/test/progress");
        let config = fast_config();
        let plan = MethodSelector::select(WipeMode::Full, &dev, &config).unwrap();

        let mut backend = FlakyBackend {
            failures_remaining: 0,
            overwrite_calls: 0,
        };
        let mut executor = ErasureExecutor::new(dev.clone(), config).unwrap();
        let progress = executor.progress();
        let result = executor.execute(&mut backend, &plan).await.unwrap();

        let snapshot = progress.snapshot();
        assert_eq!(snapshot.current_step, "complete");
        assert_eq!(snapshot.bytes_done, snapshot.total_bytes);
        assert_eq!(result.bytes_written, 3 * dev.size);
        assert_eq!(result.passes_completed, 3);
    }

    #[tokio::test]
    async fn audit_trail_records_lifecycle() {
        crate::reset_interrupted();
        let dev = device("/test/audit");
        let config = fast_config();
        let plan = MethodSelector::select(WipeMode::Quick, &dev, &config).unwrap();

        let mut backend = FlakyBackend {
            failures_remaining: 0,
            overwrite_calls: 0,
        };
        let mut executor = ErasureExecutor::new(dev, config).unwrap();
        executor.execute(&mut backend, &plan).await.unwrap();

        let trail = executor.audit_trail();
        assert!(trail.first().unwrap().action.contains("wipe started"));
        assert!(trail.last().unwrap().action.contains("wipe finished"));
        assert!(trail.iter().any(|e| e.action.contains("verification")));
    }

    #[test]
    fn backoff_delays_grow_and_cap() {
        let backoff = ExponentialBackoff {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter_factor: 0.0,
        };
        assert_eq!(backoff.delay(0).as_millis(), 100);
        assert_eq!(backoff.delay(1).as_millis(), 200);
        assert_eq!(backoff.delay(2).as_millis(), 400);
        assert_eq!(backoff.delay(20).as_millis(), 10_000);
    }
}
