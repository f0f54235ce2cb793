use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser};
use keyport_transcode::{convert, ConversionReport, ConversionRequest, ConversionSettings};
use secrecy::SecretString;

/// Converts a password-protected PKCS#12 file into a keyset
#[derive(Parser)]
#[clap(version = "0.1")]
struct Cli {
    /// Path to the PKCS#12 file
    p12_file: PathBuf,
    /// Password of the PKCS#12 file
    p12_password: String,
    /// Path of the keyset to create
    keyset_file: PathBuf,
    /// Label of the key inside the keyset
    label: String,
    /// Password protecting the key inside the keyset
    keyset_password: String,
    /// Replace an existing keyset
    #[clap(long, action = ArgAction::SetTrue)]
    force: bool,
    /// Refuse certificates whose key usage permits neither signing nor decryption
    #[clap(long, action = ArgAction::SetTrue)]
    strict_key_usage: bool,
}

fn load_settings(cli: &Cli) -> Result<ConversionSettings> {
    let mut settings: ConversionSettings = keyport_util::settings_for("keyport-convert")?
        .try_deserialize()
        .context("Error parsing configuration")?;
    if cli.force {
        settings.overwrite = true;
    }
    if cli.strict_key_usage {
        settings.strict_key_usage = true;
    }
    if settings.kdf_iterations < ConversionSettings::minimum_kdf_iterations() {
        bail!(
            "Configured kdf_iterations {} is below the minimum of {}",
            settings.kdf_iterations,
            ConversionSettings::minimum_kdf_iterations()
        );
    }
    log::debug!("Conversion settings: {:?}", settings);
    Ok(settings)
}

fn print_report(report: &ConversionReport, request: &ConversionRequest) {
    println!(
        "Stored key '{}' for '{}' in {}",
        report.label,
        report.subject,
        request.destination.display()
    );
    if report.chain_len > 0 {
        println!(
            "Skipped {} chain certificate(s) that the keyset does not store",
            report.chain_len
        );
    }
    for warning in &report.warnings {
        println!("Warning: {}", warning);
    }
}

fn main() -> Result<()> {
    keyport_util::add_version!();
    keyport_util::init_logging();

    let cli = Cli::parse();
    let settings = load_settings(&cli)?;

    let request = ConversionRequest {
        source: cli.p12_file,
        source_password: SecretString::from(cli.p12_password),
        destination: cli.keyset_file,
        label: cli.label,
        destination_password: SecretString::from(cli.keyset_password),
    };
    let report = convert(&request, &settings).with_context(|| {
        format!(
            "Error converting {} into {}",
            request.source.display(),
            request.destination.display()
        )
    })?;
    print_report(&report, &request);

    Ok(())
}
