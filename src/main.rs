use anyhow::Result;
use certwipe::certificates::verifier::CertificateVerifier;
use certwipe::certificates::{Certificate, CertificateBuilder};
use certwipe::crypto;
use certwipe::devices::{DeviceDescriptor, DeviceDetector};
use certwipe::platform::PhysicalDevice;
use certwipe::{ErasureExecutor, MethodSelector, WipeConfig, WipeMode};
use clap::{Parser, Subcommand};
use signal_hook::consts::{SIGINT, SIGTERM};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "certwipe")]
#[command(about = "Storage sanitization with signed, verifiable erasure certificates")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Skip the interactive confirmation prompt
    #[arg(long, global = true)]
    yes: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List detected storage devices with capabilities
    List {
        /// Show capability flags and hidden areas
        #[arg(short, long)]
        detailed: bool,
    },

    /// Generate an Ed25519 signing keypair
    GenerateKeys {
        /// Directory the key files are written to
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Wipe a device and optionally emit a signed certificate
    Wipe {
        /// Device path (e.g. /dev/sdb)
        #[arg(short, long)]
        device: String,

        /// Sanitization mode (quick, full, advanced)
        #[arg(short, long, default_value = "quick")]
        mode: String,

        /// Emit a signed certificate after the wipe
        #[arg(short, long)]
        certificate: bool,

        /// Directory for certificate output
        #[arg(short, long, default_value = "./certificates")]
        output: PathBuf,

        /// Signing key for the certificate
        #[arg(short, long, default_value = "private_key.pem")]
        key: PathBuf,

        /// Fail the exit status when verification falls below threshold
        #[arg(long)]
        strict: bool,

        /// Skip post-wipe verification sampling
        #[arg(long)]
        no_verify: bool,

        /// Overwrite passes for full mode (3-7)
        #[arg(long, default_value = "3")]
        passes: u32,

        /// Issuer name recorded on the certificate
        #[arg(long, default_value = "certwipe operator")]
        issuer: String,

        /// Issuing organization recorded on the certificate
        #[arg(long, default_value = "unspecified")]
        organization: String,
    },

    /// Verify a previously issued certificate
    Verify {
        /// Path to the certificate JSON
        #[arg(short, long)]
        certificate: PathBuf,

        /// Public key of the issuing station
        #[arg(short, long, default_value = "public_key.pem")]
        public_key: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    setup_signal_handlers()?;

    let cli = Cli::parse();
    let exit_code = match &cli.command {
        Commands::List { detailed } => list_devices(*detailed),
        Commands::GenerateKeys { output } => generate_keys(output),
        Commands::Wipe {
            device,
            mode,
            certificate,
            output,
            key,
            strict,
            no_verify,
            passes,
            issuer,
            organization,
        } => {
            wipe_device(WipeRequest {
                device,
                mode,
                certificate: *certificate,
                output,
                key,
                strict: *strict,
                verify: !no_verify,
                passes: *passes,
                issuer,
                organization,
                skip_confirm: cli.yes,
            })
            .await
        }
        Commands::Verify {
            certificate,
            public_key,
        } => verify_certificate(certificate, public_key),
    };

    std::process::exit(exit_code);
}

fn setup_signal_handlers() -> Result<()> {
    let mut signals = signal_hook::iterator::Signals::new([SIGINT, SIGTERM])?;
    std::thread::spawn(move || {
        for _ in signals.forever() {
            certwipe::set_interrupted();
            eprintln!("\nInterrupt received; stopping at the next step boundary.");
        }
    });
    Ok(())
}

fn list_devices(detailed: bool) -> i32 {
    let devices = match DeviceDetector::detect_all() {
        Ok(devices) => devices,
        Err(e) => {
            eprintln!("Error: device enumeration failed: {}", e);
            return 1;
        }
    };

    if devices.is_empty() {
        println!("No storage devices detected.");
        return 0;
    }

    if detailed {
        for dev in &devices {
            print_device_detailed(dev);
        }
    } else {
        println!(
            "{:<15} {:<24} {:<18} {:<10} {:<8}",
            "Device", "Model", "Serial", "Size", "Class"
        );
        println!("{}", "-".repeat(80));
        for dev in &devices {
            println!(
                "{:<15} {:<24} {:<18} {:<10} {:<8?}",
                dev.path,
                truncate(&dev.model, 24),
                truncate(&dev.serial, 18),
                format!("{}GB", dev.size / (1024 * 1024 * 1024)),
                dev.media_class,
            );
        }
    }
    0
}

fn print_device_detailed(dev: &DeviceDescriptor) {
    println!("\n{}", "=".repeat(60));
    println!("Device: {}", dev.path);
    println!("Model: {}", dev.model);
    println!("Serial: {}", dev.serial);
    println!("Firmware: {}", dev.firmware_version);
    println!("Size: {} GB", dev.size / (1024 * 1024 * 1024));
    println!("Class: {:?}", dev.media_class);
    println!("\nCapabilities:");
    println!("  Secure Erase: {}", dev.capabilities.supports_secure_erase);
    println!("  TRIM:         {}", dev.capabilities.supports_trim);
    println!("  Crypto Erase: {}", dev.capabilities.supports_crypto_erase);
    println!("  Sanitize:     {}", dev.capabilities.supports_sanitize);
    for area in &dev.hidden_areas {
        println!(
            "  Hidden area:  {:?} @ sector {} ({} sectors)",
            area.kind, area.start_sector, area.sectors
        );
    }
}

fn generate_keys(output: &Path) -> i32 {
    match crypto::generate_keypair(output) {
        Ok((private_path, public_path)) => {
            println!("Private key: {}", private_path.display());
            println!("Public key:  {}", public_path.display());
            println!("Keep the private key offline; distribute only the public key.");
            0
        }
        Err(e) => {
            eprintln!("Error: key generation failed: {}", e);
            1
        }
    }
}

struct WipeRequest<'a> {
    device: &'a str,
    mode: &'a str,
    certificate: bool,
    output: &'a Path,
    key: &'a Path,
    strict: bool,
    verify: bool,
    passes: u32,
    issuer: &'a str,
    organization: &'a str,
    skip_confirm: bool,
}

async fn wipe_device(req: WipeRequest<'_>) -> i32 {
    let mode = match WipeMode::parse(req.mode) {
        Some(mode) => mode,
        None => {
            eprintln!("Error: unknown mode '{}' (quick, full, advanced)", req.mode);
            return 1;
        }
    };

    let descriptor = match DeviceDetector::snapshot(req.device) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    // The signing key is loaded before anything destructive happens so a
    // missing key never leaves a wiped device without its certificate.
    let signing_key = if req.certificate {
        match crypto::load_signing_key(req.key) {
            Ok(key) => Some(key),
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!("Run 'certwipe generate-keys' first or pass --key.");
                return 1;
            }
        }
    } else {
        None
    };

    let config = WipeConfig {
        full_passes: req.passes,
        verify: req.verify,
        strict_verification: req.strict,
        ..Default::default()
    };

    // Capability check happens before the confirmation prompt: an advanced
    // wipe the hardware cannot honor must fail without a certificate.
    let plan = match MethodSelector::select(mode, &descriptor, &config) {
        Ok(plan) => plan,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    if !req.skip_confirm && !confirm_destruction(&descriptor) {
        println!("Operation cancelled.");
        return 1;
    }

    println!(
        "\nStarting {} wipe of {} ({}, {})",
        mode.as_str(),
        descriptor.path,
        descriptor.model,
        descriptor.serial
    );
    for step in &plan.steps {
        println!("  - {}", step.describe());
    }

    let mut backend = match PhysicalDevice::open(req.device, descriptor.capabilities) {
        Ok(backend) => backend,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    let mut executor = match ErasureExecutor::new(descriptor.clone(), config.clone()) {
        Ok(executor) => executor,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    let result = match executor.execute(&mut backend, &plan).await {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Error: wipe execution failed: {}", e);
            return 1;
        }
    };

    println!("\nWipe finished in {} s", result.duration_seconds());
    println!("  Passes completed: {}", result.passes_completed);
    println!("  Bytes written:    {}", result.bytes_written);
    if let Some(v) = &result.verification {
        println!(
            "  Verification:     {} ({}/{} sampled sectors, threshold {:.2})",
            if v.passed { "PASSED" } else { "FAILED" },
            v.matched_samples,
            v.sample_count,
            v.threshold
        );
    }
    for w in &result.warnings {
        println!("  Warning: {}", w);
    }
    for e in &result.errors {
        eprintln!("  Error: {}", e);
    }

    let wipe_ok = result.wipe_succeeded();
    let verification_ok = !config.verify || result.verification_passed();

    if let Some(signing_key) = signing_key {
        let audit_trail = executor.audit_trail().to_vec();
        let cert = CertificateBuilder::new(req.issuer, req.organization)
            .build_signed(&descriptor, result, audit_trail, &signing_key);
        match cert {
            Ok(cert) => {
                let json_path = req.output.join(format!("{}.json", cert.certificate_id));
                let text_path = req.output.join(format!("{}.txt", cert.certificate_id));
                if let Err(e) = cert.save_json(&json_path) {
                    eprintln!("Error: failed to write certificate: {}", e);
                    return 1;
                }
                if let Err(e) = std::fs::write(&text_path, cert.render_text()) {
                    eprintln!("Error: failed to write text report: {}", e);
                    return 1;
                }
                println!("\nCertificate: {}", json_path.display());
                println!("Report:      {}", text_path.display());
            }
            Err(e) => {
                eprintln!("Error: certificate generation failed: {}", e);
                return 1;
            }
        }
    }

    if !wipe_ok {
        return 1;
    }
    if req.strict && !verification_ok {
        eprintln!("Verification below threshold and --strict is set.");
        return 1;
    }
    0
}

fn confirm_destruction(descriptor: &DeviceDescriptor) -> bool {
    println!(
        "\nWARNING: This will permanently erase ALL data on {}",
        descriptor.path
    );
    println!("Drive: {} ({})", descriptor.model, descriptor.serial);
    println!("Size: {} GB", descriptor.size / (1024 * 1024 * 1024));
    if descriptor.has_hidden_areas() {
        println!("Hidden areas detected:");
        for area in &descriptor.hidden_areas {
            println!("  - {:?} ({} sectors)", area.kind, area.sectors);
        }
    }
    print!("\nType 'YES' to confirm: ");
    if io::stdout().flush().is_err() {
        return false;
    }
    let mut input = String::new();
    if io::stdin().read_line(&mut input).is_err() {
        return false;
    }
    input.trim() == "YES"
}

fn verify_certificate(certificate: &Path, public_key: &Path) -> i32 {
    let cert = match Certificate::load_json(certificate) {
        Ok(cert) => cert,
        Err(e) => {
            eprintln!("Error: cannot read certificate: {}", e);
            return 1;
        }
    };

    let key = match crypto::load_verifying_key(public_key) {
        Ok(key) => key,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    let report = CertificateVerifier::new(key).verify(&cert);
    print!("{}", report.summary());
    if report.is_valid {
        0
    } else {
        1
    }
}

// Sysfs model strings are not guaranteed ASCII, so cut on char boundaries
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
