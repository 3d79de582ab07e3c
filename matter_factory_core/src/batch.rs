//! Provisioning a whole production run from a certificate tree.

use crate::discovery::{self, BatchDir, CertTree, UnitDir};
use crate::ledger::{self, Ledger, LedgerEntry};
use crate::pipeline::{DeviceProvisioner, OutputLayout, PipelineError, ProvisionedDevice, Stage};
use crate::record::AttestationPaths;
use crate::validate::{self, DeviceArgs};
use crate::{BatchError, LedgerError, ProvisionError};
use std::path::{Path, PathBuf};
use tracing::*;

pub const PAIRING_CODE_FILE: &str = "pairing_code.txt";
pub const MANUAL_CODE_FILE: &str = "manual_pairing_code.txt";
pub const QR_IMAGE_FILE: &str = "qrcode.png";

/// The values every unit of a run shares.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceProfile {
    pub passcode: u32,
    pub discriminator: u32,
    pub vendor_name: String,
    pub product_name: String,
    pub hw_ver: u32,
    pub hw_ver_str: String,
    pub mfg_date: Option<String>,
    pub rd_id_uid: Option<String>,
    pub factorydata_key: Option<String>,
    pub factorydata_iv: Option<String>,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            passcode: 20202021,
            discriminator: 3840,
            vendor_name: "Realtech".into(),
            product_name: "bee4".into(),
            hw_ver: 1,
            hw_ver_str: "1.0".into(),
            mfg_date: None,
            rd_id_uid: Some("00112233445566778899aabbccddeeff".into()),
            factorydata_key: None,
            factorydata_iv: None,
        }
    }
}

impl DeviceProfile {
    fn device_args(&self, vid: u16, pid: u16, serial: &str) -> DeviceArgs {
        DeviceArgs {
            passcode: self.passcode,
            discriminator: self.discriminator,
            vendor_id: Some(vid.into()),
            vendor_name: Some(self.vendor_name.clone()),
            product_id: Some(pid.into()),
            product_name: Some(self.product_name.clone()),
            hw_ver: Some(self.hw_ver),
            hw_ver_str: Some(self.hw_ver_str.clone()),
            mfg_date: self.mfg_date.clone(),
            serial_num: Some(serial.to_string()),
            rd_id_uid: self.rd_id_uid.clone(),
            factorydata_key: self.factorydata_key.clone(),
            factorydata_iv: self.factorydata_iv.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Root of the certificate tree
    pub root: PathBuf,
    /// Where per-device outputs and the ledger go
    pub output_root: PathBuf,
    pub start_serial: u64,
    /// Root authority certificate to use instead of the one found in `root`
    pub paa_override: Option<PathBuf>,
    pub dac_key_password: Option<String>,
    pub profile: DeviceProfile,
}

impl BatchConfig {
    /// A run that writes its outputs next to the certificates.
    pub fn new(root: impl Into<PathBuf>, start_serial: u64) -> Self {
        let root = root.into();
        Self {
            output_root: root.clone(),
            root,
            start_serial,
            paa_override: None,
            dac_key_password: None,
            profile: DeviceProfile::default(),
        }
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.output_root.join(ledger::LEDGER_FILE)
    }

    /// `<output_root>/device_<VID>_<PID>/<SERIAL>/`
    pub fn unit_output_dir(&self, vid: u16, pid: u16, serial: &str) -> PathBuf {
        self.output_root
            .join(format!("device_{:04X}_{:04X}", vid, pid))
            .join(serial)
    }

    pub fn unit_layout(&self, vid: u16, pid: u16, serial: &str) -> OutputLayout {
        let dir = self.unit_output_dir(vid, pid, serial);
        OutputLayout {
            factory_data: dir.join(format!("factory_data_{}.bin", serial)),
            manual_code: Some(dir.join(MANUAL_CODE_FILE)),
            qr_text: Some(dir.join(PAIRING_CODE_FILE)),
            qr_image: Some(dir.join(QR_IMAGE_FILE)),
        }
    }
}

#[derive(Debug)]
pub struct UnitFailure {
    pub unit: String,
    /// Serial the unit would have been given
    pub serial: String,
    pub error: PipelineError,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub provisioned: Vec<LedgerEntry>,
    /// Units already in the ledger
    pub skipped: Vec<String>,
    pub failed: Vec<UnitFailure>,
    /// Next serial that hasn't been handed out
    pub next_serial: u64,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct BatchRunner<'a> {
    config: BatchConfig,
    provisioner: DeviceProvisioner<'a>,
}

impl<'a> BatchRunner<'a> {
    pub fn new(config: BatchConfig, provisioner: DeviceProvisioner<'a>) -> Self {
        Self {
            config,
            provisioner,
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Provisions every unit in the tree one after another. A unit that fails
    /// is logged and reported, the rest of the run carries on. Only an invalid
    /// profile, ledger and discovery problems stop the run, including a serial
    /// that the ledger already holds.
    pub fn run(&self) -> Result<BatchReport, BatchError> {
        // the profile is shared by every unit, reject it before touching the disk
        let shared_args = self.config.profile.device_args(
            0,
            0,
            &ledger::serial_string(self.config.start_serial),
        );
        validate::validate(&shared_args).map_err(BatchError::Validation)?;

        let tree = CertTree::scan(&self.config.root)?;
        let mut ledger = Ledger::open(self.config.ledger_path())?;
        info!(
            root = self.config.root.display().to_string(),
            batches = tree.batches.len(),
            units = tree.unit_count(),
            already_provisioned = ledger.len(),
            "starting batch"
        );

        let mut report = BatchReport {
            next_serial: self.config.start_serial,
            ..Default::default()
        };

        for batch in &tree.batches {
            for unit in &batch.units {
                let unit_name = unit.id.to_string();
                if ledger.contains_unit(&unit.id) {
                    info!(unit = unit_name, "already in the ledger, skipping");
                    report.skipped.push(unit_name);
                    continue;
                }

                let serial = report.next_serial;
                let serial_str = ledger::serial_string(serial);
                if ledger.contains_serial(serial) {
                    // the unit's outputs would land on top of an earlier unit's
                    return Err(LedgerError::DuplicateSerial { serial: serial_str }.into());
                }
                let span = info_span!("unit", unit = unit_name, serial = serial_str);
                let outcome =
                    span.in_scope(|| self.provision_unit(&tree, batch, unit, &serial_str));

                match outcome {
                    Ok(device) => {
                        let entry = LedgerEntry::new(serial, unit.id);
                        ledger.append(&entry)?;
                        info!(
                            unit = unit_name,
                            serial = serial_str,
                            record_len = device.record_len,
                            "unit provisioned"
                        );
                        report.provisioned.push(entry);
                        report.next_serial = serial
                            .checked_add(1)
                            .ok_or(BatchError::SerialsExhausted)?;
                    }
                    Err(error) => {
                        error!(
                            unit = unit_name,
                            serial = serial_str,
                            stage = %error.stage,
                            error = %error,
                            "unit failed"
                        );
                        report.failed.push(UnitFailure {
                            unit: unit_name,
                            serial: serial_str,
                            error,
                        });
                    }
                }
            }
        }

        info!(
            provisioned = report.provisioned.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "batch finished"
        );
        Ok(report)
    }

    fn provision_unit(
        &self,
        tree: &CertTree,
        batch: &BatchDir,
        unit: &UnitDir,
        serial: &str,
    ) -> Result<ProvisionedDevice, PipelineError> {
        let (vid, pid) = (batch.id.vid, batch.id.pid);
        let paths = self
            .attestation_paths(tree, unit, vid, pid)
            .map_err(|source| PipelineError {
                stage: Stage::Building,
                source,
            })?;
        let args = self.config.profile.device_args(vid, pid, serial);
        let layout = self.config.unit_layout(vid, pid, serial);
        self.provisioner.run(&args, &paths, &layout)
    }

    fn attestation_paths(
        &self,
        tree: &CertTree,
        unit: &UnitDir,
        vid: u16,
        pid: u16,
    ) -> Result<AttestationPaths, ProvisionError> {
        let pai_cert = tree
            .find_pai(vid)
            .ok_or_else(|| discovery::missing_authority(&tree.root, "PAI certificate"))?;
        let paa_cert = match &self.config.paa_override {
            Some(path) if path.is_file() => path.clone(),
            Some(path) => return Err(discovery::missing_authority(path, "PAA certificate")),
            None => tree
                .find_paa()
                .ok_or_else(|| discovery::missing_authority(&tree.root, "PAA certificate"))?,
        };
        let cd = tree
            .find_cd(vid, pid)
            .ok_or_else(|| discovery::missing_authority(&tree.root, "certification declaration"))?;
        debug!(
            pai = display_name(&pai_cert),
            paa = display_name(&paa_cert),
            cd = display_name(&cd),
            "located authority files"
        );

        Ok(AttestationPaths {
            dac_cert: unit.dac_cert()?,
            dac_key: unit.dac_key()?,
            pai_cert,
            cd,
            dac_key_password: self.config.dac_key_password.clone(),
        })
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
