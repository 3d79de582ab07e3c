//! The factory data record and how it is assembled from validated inputs.

use crate::spake2p::Spake2pParams;
use crate::validate::DeviceParams;
use crate::ProvisionError;
use core::fmt;
use num_bigint_dig::BigUint;
use p256::pkcs8::DecodePrivateKey;
use p256::SecretKey;
use std::path::{Path, PathBuf};
use tracing::*;

/// Key files with this suffix are already encrypted and are stored verbatim.
pub const ENCRYPTED_KEY_SUFFIX: &str = ".enc";

/// The device loader refuses any single field this large or larger.
pub const LOADER_FIELD_LIMIT: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct FactoryRecord {
    pub commissioning: CommissioningData,
    pub attestation: AttestationCredentials,
    pub instance_info: InstanceInfo,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommissioningData {
    pub passcode: u32,
    pub discriminator: u16,
    pub spake_iteration_count: u32,
    pub spake_salt: Vec<u8>,
    pub spake_verifier: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttestationCredentials {
    pub device_cert: Vec<u8>,
    pub product_attestation_intermediate_cert: Vec<u8>,
    pub certification_declaration: Vec<u8>,
    pub device_private_key: DevicePrivateKey,
}

/// The DAC private key in exactly one of its two on-disk provenances.
#[derive(Clone, PartialEq, Eq)]
pub enum DevicePrivateKey {
    /// Raw 32 byte big-endian P-256 scalar
    Raw([u8; 32]),
    /// Opaque blob that was encrypted before it reached us
    PreEncrypted(Vec<u8>),
}

impl DevicePrivateKey {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            DevicePrivateKey::Raw(scalar) => &scalar[..],
            DevicePrivateKey::PreEncrypted(blob) => blob,
        }
    }
}

impl fmt::Debug for DevicePrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DevicePrivateKey::Raw(_) => write!(f, "Raw(<redacted>)"),
            DevicePrivateKey::PreEncrypted(blob) => {
                write!(f, "PreEncrypted({} bytes)", blob.len())
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceInfo {
    pub vendor_id: Option<u16>,
    pub vendor_name: Option<String>,
    pub product_id: Option<u16>,
    pub product_name: Option<String>,
    pub hardware_version: Option<u16>,
    pub hardware_version_string: Option<String>,
    pub manufacturing_date: Option<String>,
    pub serial_number: Option<String>,
    /// Little-endian integer encoding of the seed, see [`encode_rotating_id`]
    pub rotating_id_seed: Option<Vec<u8>>,
}

impl InstanceInfo {
    pub fn is_empty(&self) -> bool {
        *self == InstanceInfo::default()
    }
}

/// Where the attestation material for one device lives.
#[derive(Debug, Clone)]
pub struct AttestationPaths {
    pub dac_cert: PathBuf,
    pub dac_key: PathBuf,
    pub pai_cert: PathBuf,
    pub cd: PathBuf,
    /// Password protecting an unencrypted-on-disk DER key, if any
    pub dac_key_password: Option<String>,
}

/// Re-encodes a hex seed as a little-endian unsigned integer using the minimal
/// byte length plus one.
pub fn encode_rotating_id(seed_hex: &str) -> Result<Vec<u8>, ProvisionError> {
    let value = BigUint::parse_bytes(seed_hex.as_bytes(), 16).ok_or_else(|| {
        ProvisionError::validation("rotating device unique id", "not a hex string")
    })?;
    let length = value.bits().div_ceil(8) + 1;
    let mut bytes = value.to_bytes_le();
    bytes.resize(length, 0);
    Ok(bytes)
}

fn read_artifact(path: &Path) -> Result<Vec<u8>, ProvisionError> {
    let bytes = std::fs::read(path).map_err(|source| ProvisionError::MissingArtifact {
        path: path.to_path_buf(),
        source,
    })?;
    if bytes.len() >= LOADER_FIELD_LIMIT {
        warn!(
            path = path.display().to_string(),
            len = bytes.len(),
            "artifact is larger than the device loader accepts"
        );
    }
    Ok(bytes)
}

/// Pulls the raw P-256 scalar out of a DER key container. PKCS#8 and SEC1 are
/// accepted; a password means encrypted PKCS#8.
pub fn extract_raw_private_key(der: &[u8], password: Option<&str>) -> Result<[u8; 32], String> {
    let secret = match password {
        Some(password) => SecretKey::from_pkcs8_encrypted_der(der, password)
            .map_err(|e| format!("unable to decrypt PKCS#8 key: {}", e))?,
        None => match SecretKey::from_pkcs8_der(der) {
            Ok(secret) => secret,
            Err(pkcs8_error) => SecretKey::from_sec1_der(der).map_err(|_| {
                format!("neither PKCS#8 ({}) nor SEC1 P-256 key", pkcs8_error)
            })?,
        },
    };
    Ok(secret.to_bytes().into())
}

pub fn load_private_key(
    path: &Path,
    password: Option<&str>,
) -> Result<DevicePrivateKey, ProvisionError> {
    let bytes = read_artifact(path)?;
    let is_pre_encrypted = path
        .file_name()
        .map(|name| name.to_string_lossy().ends_with(ENCRYPTED_KEY_SUFFIX))
        .unwrap_or(false);

    if is_pre_encrypted {
        debug!(path = path.display().to_string(), "using pre-encrypted DAC key");
        return Ok(DevicePrivateKey::PreEncrypted(bytes));
    }

    if password.is_none() {
        warn!("DAC key password has not been provided, assuming the key is not encrypted");
    }
    let scalar =
        extract_raw_private_key(&bytes, password).map_err(|detail| ProvisionError::KeyExtraction {
            path: path.to_path_buf(),
            detail,
        })?;
    Ok(DevicePrivateKey::Raw(scalar))
}

pub fn read_attestation(paths: &AttestationPaths) -> Result<AttestationCredentials, ProvisionError> {
    Ok(AttestationCredentials {
        device_cert: read_artifact(&paths.dac_cert)?,
        product_attestation_intermediate_cert: read_artifact(&paths.pai_cert)?,
        certification_declaration: read_artifact(&paths.cd)?,
        device_private_key: load_private_key(&paths.dac_key, paths.dac_key_password.as_deref())?,
    })
}

/// Assembles a fresh record for one device.
pub fn build(
    params: &DeviceParams,
    spake2p: Spake2pParams,
    paths: &AttestationPaths,
) -> Result<FactoryRecord, ProvisionError> {
    let attestation = read_attestation(paths)?;
    let instance = &params.instance;

    let instance_info = InstanceInfo {
        vendor_id: instance.vendor_id,
        vendor_name: instance.vendor_name.clone(),
        product_id: instance.product_id,
        product_name: instance.product_name.clone(),
        hardware_version: instance.hw_ver,
        hardware_version_string: instance.hw_ver_str.clone(),
        manufacturing_date: instance.mfg_date.clone(),
        serial_number: instance.serial_num.clone(),
        rotating_id_seed: instance
            .rd_id_uid
            .as_deref()
            .map(encode_rotating_id)
            .transpose()?,
    };

    Ok(FactoryRecord {
        commissioning: CommissioningData {
            passcode: params.passcode,
            discriminator: params.discriminator,
            spake_iteration_count: spake2p.iteration_count,
            spake_salt: spake2p.salt.into_bytes(),
            spake_verifier: spake2p.verifier.into_bytes(),
        },
        attestation,
        instance_info,
    })
}
