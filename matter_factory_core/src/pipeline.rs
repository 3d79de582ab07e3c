//! Provisioning of a single device, from raw inputs to files on disk.

use crate::cipher::{Aes256Ctr, CipherKey, OpensslCipher, RecordCipher};
use crate::onboarding::{self, OnboardingCodes, OnboardingEncoder, SetupPayload};
use crate::record::{self, AttestationPaths};
use crate::spake2p::VerifierGenerator;
use crate::validate::{self, DeviceArgs};
use crate::{codec, tool, ProvisionError};
use core::fmt;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::*;

pub const FACTORY_DATA_FILE: &str = "factory_data.bin";
pub const MANUAL_CODE_FILE: &str = "manual_pairing_code.txt";
pub const QR_TEXT_FILE: &str = "qrcode.txt";
pub const QR_IMAGE_FILE: &str = "qrcode.png";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validating,
    ParamGen,
    Building,
    Serializing,
    Encrypting,
    Framing,
    Onboarding,
    Writing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A [`ProvisionError`] tagged with the stage it happened in.
#[derive(Debug)]
pub struct PipelineError {
    pub stage: Stage,
    pub source: ProvisionError,
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} during {}: {}", self.source.kind(), self.stage, self.source)
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, PipelineError>;
}

impl<T> AtStage<T> for Result<T, ProvisionError> {
    fn at(self, stage: Stage) -> Result<T, PipelineError> {
        self.map_err(|source| PipelineError { stage, source })
    }
}

/// Which implementation encrypts the record when a key is supplied.
#[derive(Debug, Clone, Default)]
pub enum CipherBackend {
    #[default]
    InProcess,
    Openssl { path: PathBuf, timeout: Duration },
}

impl CipherBackend {
    pub fn openssl(path: impl Into<PathBuf>) -> Self {
        CipherBackend::Openssl {
            path: path.into(),
            timeout: tool::DEFAULT_TOOL_TIMEOUT,
        }
    }

    fn cipher(&self, key: CipherKey) -> Box<dyn RecordCipher> {
        match self {
            CipherBackend::InProcess => Box::new(Aes256Ctr::new(key)),
            CipherBackend::Openssl { path, timeout } => {
                Box::new(OpensslCipher::new(path, key).with_timeout(*timeout))
            }
        }
    }
}

/// Where each output of a run goes. Onboarding outputs set to `None` are not
/// generated.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    pub factory_data: PathBuf,
    pub manual_code: Option<PathBuf>,
    pub qr_text: Option<PathBuf>,
    pub qr_image: Option<PathBuf>,
}

impl OutputLayout {
    pub fn in_dir(dir: &Path, gen_manual_code: bool, gen_qrcode: bool) -> Self {
        Self {
            factory_data: dir.join(FACTORY_DATA_FILE),
            manual_code: gen_manual_code.then(|| dir.join(MANUAL_CODE_FILE)),
            qr_text: gen_qrcode.then(|| dir.join(QR_TEXT_FILE)),
            qr_image: gen_qrcode.then(|| dir.join(QR_IMAGE_FILE)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProvisionedDevice {
    /// Plaintext record length, also the value of the length prefix
    pub record_len: usize,
    pub encrypted: bool,
    pub codes: OnboardingCodes,
    /// SHA-256 of the framed artifact as written
    pub digest: [u8; 32],
}

pub struct DeviceProvisioner<'a> {
    verifier: &'a dyn VerifierGenerator,
    encoder: &'a dyn OnboardingEncoder,
    cipher_backend: CipherBackend,
}

impl<'a> DeviceProvisioner<'a> {
    pub fn new(verifier: &'a dyn VerifierGenerator, encoder: &'a dyn OnboardingEncoder) -> Self {
        Self {
            verifier,
            encoder,
            cipher_backend: CipherBackend::default(),
        }
    }

    pub fn with_cipher_backend(mut self, cipher_backend: CipherBackend) -> Self {
        self.cipher_backend = cipher_backend;
        self
    }

    /// Runs every stage for one device. Nothing is written unless all stages
    /// before [`Stage::Writing`] succeed.
    pub fn run(
        &self,
        args: &DeviceArgs,
        paths: &AttestationPaths,
        layout: &OutputLayout,
    ) -> Result<ProvisionedDevice, PipelineError> {
        debug!(stage = %Stage::Validating);
        let params = validate::validate(args).at(Stage::Validating)?;
        info!(
            discriminator = params.discriminator,
            passcode = params.passcode,
            "validated device inputs"
        );

        debug!(stage = %Stage::ParamGen);
        let spake2p = self.verifier.generate(params.passcode).at(Stage::ParamGen)?;

        debug!(stage = %Stage::Building);
        let record = record::build(&params, spake2p, paths).at(Stage::Building)?;

        debug!(stage = %Stage::Serializing);
        let plaintext = codec::serialize(record);
        let record_len = plaintext.len();

        let payload = match &params.encryption {
            Some(key) => {
                debug!(stage = %Stage::Encrypting);
                let ciphertext = self
                    .cipher_backend
                    .cipher(key.clone())
                    .encrypt(&plaintext)
                    .at(Stage::Encrypting)?;
                if ciphertext.len() != record_len {
                    return Err(ProvisionError::external_tool(
                        "cipher",
                        format!(
                            "ciphertext is {} bytes but the record is {}",
                            ciphertext.len(),
                            record_len
                        ),
                    ))
                    .at(Stage::Encrypting);
                }
                ciphertext
            }
            None => plaintext,
        };

        debug!(stage = %Stage::Framing);
        let artifact = codec::frame(record_len, &payload).at(Stage::Framing)?;

        debug!(stage = %Stage::Onboarding);
        let setup_payload = SetupPayload::ble_standard(
            params.discriminator,
            params.passcode,
            params.instance.vendor_id.unwrap_or(0),
            params.instance.product_id.unwrap_or(0),
        );
        let codes = self.encoder.encode(&setup_payload).at(Stage::Onboarding)?;
        let qr_image = match &layout.qr_image {
            Some(_) => {
                Some(onboarding::render_qr_png(&codes.qr_payload).at(Stage::Onboarding)?)
            }
            None => None,
        };

        debug!(stage = %Stage::Writing);
        let mut staged = Vec::new();
        if let Some(path) = &layout.manual_code {
            let contents = format!("{}\n", codes.manual_code);
            staged.push(stage_file(path, contents.as_bytes()).at(Stage::Writing)?);
        }
        if let Some(path) = &layout.qr_text {
            staged.push(stage_file(path, codes.qr_payload.as_bytes()).at(Stage::Writing)?);
        }
        if let (Some(path), Some(png)) = (&layout.qr_image, &qr_image) {
            staged.push(stage_file(path, png).at(Stage::Writing)?);
        }
        // factory data goes last so it only exists if everything else landed
        staged.push(stage_file(&layout.factory_data, &artifact).at(Stage::Writing)?);
        commit_all(staged).at(Stage::Writing)?;

        let digest: [u8; 32] = Sha256::digest(&artifact).into();
        info!(
            path = layout.factory_data.display().to_string(),
            record_len,
            encrypted = params.encryption.is_some(),
            sha256 = hex::encode(digest),
            "factory data written"
        );

        Ok(ProvisionedDevice {
            record_len,
            encrypted: params.encryption.is_some(),
            codes,
            digest,
        })
    }
}

/// A fully written temporary file waiting to be renamed into place.
struct StagedFile {
    temp: NamedTempFile,
    path: PathBuf,
}

impl StagedFile {
    fn commit(self) -> Result<(), ProvisionError> {
        let path = self.path;
        self.temp
            .persist(&path)
            .map(|_| ())
            .map_err(|e| ProvisionError::Output {
                path,
                source: e.error,
            })
    }
}

/// Renames every staged file into place. If one fails, the ones already
/// renamed are removed again.
fn commit_all(staged: Vec<StagedFile>) -> Result<(), ProvisionError> {
    let mut committed: Vec<PathBuf> = Vec::with_capacity(staged.len());
    for file in staged {
        let path = file.path.clone();
        if let Err(e) = file.commit() {
            for path in &committed {
                if let Err(remove_err) = fs::remove_file(path) {
                    warn!(
                        path = path.display().to_string(),
                        error = %remove_err,
                        "unable to remove partial output"
                    );
                }
            }
            return Err(e);
        }
        committed.push(path);
    }
    Ok(())
}

fn stage_file(path: &Path, contents: &[u8]) -> Result<StagedFile, ProvisionError> {
    let output_err = |source| ProvisionError::Output {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(output_err)?;
    let mut temp = NamedTempFile::new_in(dir).map_err(output_err)?;
    temp.write_all(contents).map_err(output_err)?;
    temp.as_file().sync_all().map_err(output_err)?;
    Ok(StagedFile {
        temp,
        path: path.to_path_buf(),
    })
}
