use std::fs;
use std::path::PathBuf;

use keyport_keyset::{DEFAULT_KDF_ITERATIONS, MIN_KDF_ITERATIONS};
use secrecy::SecretString;
use serde::Deserialize;

use crate::{
    assembler::{self, AssemblyOptions},
    certificate::LeafCertificate,
    container::SourceContainer,
    errors::{Error, Result, Warning},
    material::PrivateKeyMaterial,
};

pub struct ConversionRequest {
    pub source: PathBuf,
    pub source_password: SecretString,
    pub destination: PathBuf,
    pub label: String,
    pub destination_password: SecretString,
}

impl std::fmt::Debug for ConversionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionRequest")
            .field("source", &self.source)
            .field("destination", &self.destination)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

fn default_kdf_iterations() -> u32 {
    DEFAULT_KDF_ITERATIONS
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConversionSettings {
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,
    #[serde(default)]
    pub strict_key_usage: bool,
}

impl Default for ConversionSettings {
    fn default() -> Self {
        ConversionSettings {
            overwrite: false,
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
            strict_key_usage: false,
        }
    }
}

impl ConversionSettings {
    pub fn minimum_kdf_iterations() -> u32 {
        MIN_KDF_ITERATIONS
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Opened,
    Extracted,
    Assembled,
    Done,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionReport {
    pub label: String,
    pub subject: String,
    pub chain_len: usize,
    pub warnings: Vec<Warning>,
}

pub struct Converter<'a> {
    request: &'a ConversionRequest,
    settings: &'a ConversionSettings,
    state: State,
    warnings: Vec<Warning>,
}

impl<'a> Converter<'a> {
    pub fn new(request: &'a ConversionRequest, settings: &'a ConversionSettings) -> Self {
        Converter {
            request,
            settings,
            state: State::Idle,
            warnings: Vec::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    fn transition(&mut self, next: State) {
        log::debug!("Conversion state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Runs the conversion to completion or to the first error.
    ///
    /// On error the converter ends up `Aborted`, and a destination file that
    /// did not exist before the run is removed.
    pub fn run(&mut self) -> Result<ConversionReport> {
        if self.state != State::Idle {
            return Err(Error::AlreadyRun(self.state));
        }
        let request = self.request;
        let destination = &request.destination;
        let preexisting = fs::symlink_metadata(destination).is_ok();

        let result = self.steps();
        if result.is_err() {
            self.transition(State::Aborted);
            if !preexisting && fs::symlink_metadata(destination).is_ok() {
                log::debug!("Removing partial output {}", destination.display());
                if let Err(e) = fs::remove_file(destination) {
                    log::warn!("Error removing {}: {}", destination.display(), e);
                }
            }
        }
        result
    }

    fn check_key_usage(&mut self, leaf: &LeafCertificate) -> Result<()> {
        let warning = match leaf.key_usage() {
            None => Warning::KeyUsageAbsent,
            Some(usage) if usage.permits_signing() || usage.permits_decryption() => {
                return Ok(())
            }
            Some(usage) if self.settings.strict_key_usage => {
                return Err(Error::UnsuitableKeyUsage(usage))
            }
            Some(usage) => Warning::KeyUsageIncompatible(usage),
        };
        log::warn!("{}", warning);
        self.warnings.push(warning);
        Ok(())
    }

    fn steps(&mut self) -> Result<ConversionReport> {
        let request = self.request;
        let source_name = request.source.display().to_string();

        let raw = fs::read(&request.source).map_err(|e| Error::SourceUnreadable {
            path: request.source.clone(),
            source: e,
        })?;
        let container = SourceContainer::open(&raw, &request.source_password, &source_name)?;
        self.transition(State::Opened);

        let material = PrivateKeyMaterial::extract(container.private_key())?;
        let leaf = LeafCertificate::canonicalize(container.leaf())?;
        let chain_len = container.chain().len();
        drop(container);
        self.check_key_usage(&leaf)?;
        self.transition(State::Extracted);

        assembler::build(
            &request.destination,
            &request.label,
            &request.destination_password,
            &material,
            &leaf,
            &AssemblyOptions {
                overwrite: self.settings.overwrite,
                kdf_iterations: self.settings.kdf_iterations,
            },
        )?;
        self.transition(State::Assembled);

        log::info!(
            "Converted {} into {} as '{}'",
            source_name,
            request.destination.display(),
            request.label
        );
        self.transition(State::Done);
        Ok(ConversionReport {
            label: request.label.clone(),
            subject: leaf.subject().to_string(),
            chain_len,
            warnings: self.warnings.clone(),
        })
    }
}

/// Converts in one call.
pub fn convert(
    request: &ConversionRequest,
    settings: &ConversionSettings,
) -> Result<ConversionReport> {
    Converter::new(request, settings).run()
}
