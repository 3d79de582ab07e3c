#![allow(dead_code)]
use matter_factory_core::record::AttestationPaths;
use matter_factory_core::spake2p::{Spake2pParams, VerifierGenerator};
use matter_factory_core::validate::DeviceArgs;
use matter_factory_core::ProvisionError;
use p256::pkcs8::pkcs5::pbes2;
use p256::pkcs8::{EncodePrivateKey, PrivateKeyInfo};
use p256::SecretKey;
use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const SALT: &str = "U1BBS0UyUCBLZXkgU2FsdA==";
pub const VERIFIER: &str =
    "uWFwqugDNGiEck/po7KHwwMwwqZgN10XuyBajPGuyzUEV/iree4lOrao5GuwnlQ65CJzbeUB49s31EH+NEkg0JVI5MGCQGMMT/SRPFNRODm3wH/MBiehuFc6FJ/NH6Rmzw==";

/// A verifier that counts how often it is asked.
pub struct StubVerifier {
    pub calls: Cell<usize>,
}

impl StubVerifier {
    pub fn new() -> Self {
        Self {
            calls: Cell::new(0),
        }
    }
}

impl VerifierGenerator for StubVerifier {
    fn generate(&self, _passcode: u32) -> Result<Spake2pParams, ProvisionError> {
        self.calls.set(self.calls.get() + 1);
        Ok(Spake2pParams {
            iteration_count: 1000,
            salt: SALT.into(),
            verifier: VERIFIER.into(),
        })
    }
}

pub struct FailingVerifier;

impl VerifierGenerator for FailingVerifier {
    fn generate(&self, _passcode: u32) -> Result<Spake2pParams, ProvisionError> {
        Err(ProvisionError::external_tool(
            "spake2p",
            "exited with status 1; stderr=boom",
        ))
    }
}

pub fn dac_secret() -> SecretKey {
    SecretKey::from_slice(&[0x11; 32]).unwrap()
}

pub enum KeyFormat {
    Pkcs8,
    Sec1,
    EncryptedPkcs8 { password: &'static str },
    PreEncrypted(Vec<u8>),
}

pub fn key_file_bytes(format: &KeyFormat) -> Vec<u8> {
    let secret = dac_secret();
    match format {
        KeyFormat::Pkcs8 => secret.to_pkcs8_der().unwrap().as_bytes().to_vec(),
        KeyFormat::Sec1 => secret.to_sec1_der().unwrap().to_vec(),
        KeyFormat::EncryptedPkcs8 { password } => {
            let plain = secret.to_pkcs8_der().unwrap();
            let info = PrivateKeyInfo::try_from(plain.as_bytes()).unwrap();
            // pbkdf2 keeps the test fast, the default scrypt parameters don't
            let params = pbes2::Parameters::pbkdf2_sha256_aes256cbc(2048, b"saltsalt", &[7; 16])
                .unwrap();
            info.encrypt_with_params(params, password)
                .unwrap()
                .as_bytes()
                .to_vec()
        }
        KeyFormat::PreEncrypted(bytes) => bytes.clone(),
    }
}

/// Attestation files for one device in a scratch directory.
pub struct DeviceFiles {
    pub dir: TempDir,
    pub paths: AttestationPaths,
}

impl DeviceFiles {
    pub fn new(format: KeyFormat) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let key_name = match format {
            KeyFormat::PreEncrypted(_) => "dac_key.der.enc",
            _ => "dac_key.der",
        };
        let password = match format {
            KeyFormat::EncryptedPkcs8 { password } => Some(password.to_string()),
            _ => None,
        };
        let paths = AttestationPaths {
            dac_cert: dir.path().join("dac_cert.der"),
            dac_key: dir.path().join(key_name),
            pai_cert: dir.path().join("pai_cert.der"),
            cd: dir.path().join("cd.der"),
            dac_key_password: password,
        };
        fs::write(&paths.dac_cert, fake_der("dac")).unwrap();
        fs::write(&paths.pai_cert, fake_der("pai")).unwrap();
        fs::write(&paths.cd, fake_der("cd")).unwrap();
        fs::write(&paths.dac_key, key_file_bytes(&format)).unwrap();
        Self { dir, paths }
    }

    pub fn out_dir(&self) -> PathBuf {
        self.dir.path().join("out")
    }
}

/// Opaque bytes standing in for a certificate.
pub fn fake_der(label: &str) -> Vec<u8> {
    let mut der = vec![0x30, 0x82, 0x01, 0x00];
    der.extend_from_slice(label.as_bytes());
    der.resize(260, 0xA5);
    der
}

pub fn test_device_args() -> DeviceArgs {
    DeviceArgs {
        passcode: 20202021,
        discriminator: 3840,
        vendor_id: Some(0xFFF1),
        vendor_name: Some("TEST_VENDOR".into()),
        product_id: Some(0x8000),
        product_name: Some("TEST_PRODUCT".into()),
        hw_ver: Some(1),
        hw_ver_str: Some("1.0".into()),
        mfg_date: Some("2024-01-01".into()),
        serial_num: Some("TEST_SN".into()),
        rd_id_uid: Some("00112233445566778899aabbccddeeff".into()),
        ..Default::default()
    }
}

/// Builds a certificate tree laid out the way the factory ships it.
pub struct TreeBuilder {
    pub root: TempDir,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self {
            root: tempfile::tempdir().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    pub fn authority(&self, file_name: &str) -> &Self {
        fs::write(self.path().join(file_name), fake_der(file_name)).unwrap();
        self
    }

    /// `unit` is a unit directory name like `DAC-0123-ABCD-00001-00000001`.
    pub fn unit(&self, unit: &str) -> &Self {
        let id: matter_factory_core::naming::UnitId = unit.parse().unwrap();
        let unit_dir = self.path().join(id.batch.to_string()).join(unit);
        fs::create_dir_all(&unit_dir).unwrap();
        fs::write(unit_dir.join(id.dac_cert_file_name()), fake_der(unit)).unwrap();
        let [_, plain_key] = id.dac_key_file_names();
        fs::write(unit_dir.join(plain_key), key_file_bytes(&KeyFormat::Pkcs8)).unwrap();
        self
    }
}

/// Every file under `dir`, relative to it, sorted.
pub fn list_files(dir: &Path) -> Vec<String> {
    fn walk(base: &Path, dir: &Path, out: &mut Vec<String>) {
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        for entry in entries {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(base, &path, out);
            } else {
                out.push(path.strip_prefix(base).unwrap().display().to_string());
            }
        }
    }
    let mut out = Vec::new();
    walk(dir, dir, &mut out);
    out.sort();
    out
}

/// Writes an executable shell script standing in for an external tool.
#[cfg(unix)]
pub fn tool_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}
