//! A password-protected keyset file holding labelled RSA private keys and
//! their certificates.
//!
//! A keyset is written to a hidden temporary file next to its final path and
//! only renamed into place by [`Keyset::close`]. Dropping a keyset that was
//! never closed removes the temporary file, so an interrupted or failed build
//! never leaves a file at the final path.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use openssl::rsa::Rsa;
use serde_bytes::ByteBuf;

mod errors;
pub use errors::{ErrorLocus, KeysetError, Result};

pub mod certificate;
pub use certificate::Certificate;

pub mod components;
pub use components::{Component, RsaComponents};

pub mod context;
pub use context::{ContextBuilder, KeyContext, MAX_LABEL_LENGTH};

mod file;
use file::{KeysetFile, StoredEntry};

pub const DEFAULT_KDF_ITERATIONS: u32 = 100_000;
pub const MIN_KDF_ITERATIONS: u32 = 1_000;

#[derive(Debug, Clone)]
pub struct CreateOptions {
    /// Replace a keyset that already exists at the path.
    pub overwrite: bool,
    /// PBKDF2 iterations used to protect private keys.
    pub kdf_iterations: u32,
}

impl Default for CreateOptions {
    fn default() -> Self {
        CreateOptions {
            overwrite: false,
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
        }
    }
}

#[derive(Debug)]
enum Mode {
    Writable {
        temp_path: PathBuf,
        kdf_iterations: u32,
    },
    ReadOnly,
}

#[derive(Debug)]
pub struct Keyset {
    path: PathBuf,
    mode: Mode,
    entries: Vec<StoredEntry>,
}

fn temporary_path(path: &Path) -> Option<PathBuf> {
    let file_name = path.file_name()?.to_str()?;
    Some(path.with_file_name(format!(".{}.tmp", file_name)))
}

fn create_private(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

impl Keyset {
    /// Creates a new, empty keyset that will be written to `path` on close.
    pub fn create<P: AsRef<Path>>(path: P, options: &CreateOptions) -> Result<Keyset> {
        let path = path.as_ref().to_path_buf();
        if options.kdf_iterations < MIN_KDF_ITERATIONS {
            return Err(KeysetError::IterationsTooLow(
                options.kdf_iterations,
                MIN_KDF_ITERATIONS,
            ));
        }
        if path.is_dir() {
            return Err(KeysetError::Create {
                source: std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "destination is a directory",
                ),
                path,
            });
        }
        if !options.overwrite && path.exists() {
            return Err(KeysetError::AlreadyExists(path));
        }
        let temp_path = match temporary_path(&path) {
            Some(temp_path) => temp_path,
            None => {
                return Err(KeysetError::Create {
                    source: std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "path has no usable file name",
                    ),
                    path,
                })
            }
        };

        log::trace!(
            "Creating keyset {} (temporary at {})",
            path.display(),
            temp_path.display()
        );
        create_private(&temp_path).map_err(|e| KeysetError::Create {
            path: path.clone(),
            source: e,
        })?;

        Ok(Keyset {
            path,
            mode: Mode::Writable {
                temp_path,
                kdf_iterations: options.kdf_iterations,
            },
            entries: Vec::new(),
        })
    }

    /// Opens an existing keyset for reading.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Keyset> {
        let path = path.as_ref().to_path_buf();
        log::trace!("Opening keyset {}", path.display());
        let contents = fs::read(&path).map_err(|e| KeysetError::Open {
            path: path.clone(),
            source: e,
        })?;
        let file: KeysetFile = serde_cbor::from_slice(&contents)
            .map_err(|e| KeysetError::InvalidFormat(e.to_string()))?;
        file.check()?;

        Ok(Keyset {
            path,
            mode: Mode::ReadOnly,
            entries: file.entries,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.label.as_str())
    }

    fn entry(&self, label: &str) -> Result<&StoredEntry> {
        self.entries
            .iter()
            .find(|entry| entry.label == label)
            .ok_or_else(|| KeysetError::NotFound(label.to_string()))
    }

    fn kdf_iterations(&self) -> Result<u32> {
        match self.mode {
            Mode::Writable { kdf_iterations, .. } => Ok(kdf_iterations),
            Mode::ReadOnly => Err(KeysetError::ReadOnly),
        }
    }

    /// Adds a private key, encrypted under `password`.
    pub fn add_private_key(&mut self, context: &KeyContext, password: &str) -> Result<()> {
        let iterations = self.kdf_iterations()?;
        if self.entries.iter().any(|e| e.label == context.label()) {
            return Err(KeysetError::DuplicateLabel(context.label().to_string()));
        }

        let key_id = context.key_id()?;
        let plaintext = zeroize::Zeroizing::new(context.rsa().private_key_to_der()?);
        let (protection, encrypted_key) =
            file::seal(context.label(), &key_id, &plaintext, password, iterations)?;

        log::debug!(
            "Adding private key '{}' with key ID {}",
            context.label(),
            hex::encode(&key_id)
        );
        self.entries.push(StoredEntry {
            label: context.label().to_string(),
            key_id,
            protection,
            encrypted_key,
            certificate: None,
        });
        Ok(())
    }

    /// Attaches a certificate to the private key entry with the same public key.
    pub fn add_public_key(&mut self, certificate: &Certificate) -> Result<()> {
        self.kdf_iterations()?;
        let entry = self
            .entries
            .iter_mut()
            .find(|entry| entry.key_id == certificate.key_id())
            .ok_or(KeysetError::CertificateKeyMismatch)?;
        if entry.certificate.is_some() {
            return Err(KeysetError::CertificateAlreadyPresent(entry.label.clone()));
        }

        log::debug!(
            "Binding certificate '{}' to key '{}'",
            certificate.subject(),
            entry.label
        );
        entry.certificate = Some(ByteBuf::from(certificate.der().to_vec()));
        Ok(())
    }

    /// Decrypts the private key stored under `label`.
    pub fn get_private_key(&self, label: &str, password: &str) -> Result<KeyContext> {
        let entry = self.entry(label)?;
        let der = file::unseal(entry, password)?;
        let rsa = Rsa::private_key_from_der(&der)?;
        let context = KeyContext::from_parts(entry.label.clone(), rsa);
        if context.key_id()? != entry.key_id {
            return Err(KeysetError::InvalidFormat(format!(
                "key ID mismatch for '{}'",
                label
            )));
        }
        Ok(context)
    }

    pub fn get_certificate(&self, label: &str) -> Result<Option<Certificate>> {
        match &self.entry(label)?.certificate {
            None => Ok(None),
            Some(der) => Certificate::import(der).map(Some),
        }
    }

    /// Writes the keyset and moves it to its final path.
    pub fn close(mut self) -> Result<()> {
        let temp_path = match &self.mode {
            Mode::ReadOnly => return Ok(()),
            Mode::Writable { temp_path, .. } => temp_path.clone(),
        };
        let persist_error = |source: std::io::Error| KeysetError::Persist {
            path: self.path.clone(),
            source,
        };

        let contents = serde_cbor::to_vec(&KeysetFile::new(self.entries.clone()))?;
        let mut file = create_private(&temp_path).map_err(persist_error)?;
        file.write_all(&contents).map_err(persist_error)?;
        file.sync_all().map_err(persist_error)?;
        drop(file);

        fs::rename(&temp_path, &self.path).map_err(persist_error)?;
        log::debug!(
            "Wrote keyset {} with {} entries",
            self.path.display(),
            self.entries.len()
        );
        self.mode = Mode::ReadOnly;
        Ok(())
    }
}

impl Drop for Keyset {
    fn drop(&mut self) {
        if let Mode::Writable { temp_path, .. } = &self.mode {
            log::trace!("Discarding unfinished keyset {}", temp_path.display());
            match fs::remove_file(temp_path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                    log::warn!("Error removing {}: {}", temp_path.display(), e)
                }
                _ => {}
            }
        }
    }
}
