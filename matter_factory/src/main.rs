use anyhow::{bail, Context};
use clap::Parser;
use cli::{BatchCmd, Cli, Command, DeviceCmd, EncryptionArgs, InspectCmd, ToolArgs};
use matter_factory_core::pipeline::CipherBackend;
use matter_factory_core::wire::{FactoryDataProvider, LengthBytes};
use matter_factory_core::{
    codec, validate, Aes256Ctr, AttestationPaths, BatchConfig, BatchRunner, DeviceArgs,
    DeviceProfile, DeviceProvisioner, MatterSetupCodec, OutputLayout, Spake2pTool,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::*;

mod cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .pretty()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Command::Device(cmd) => device(cmd),
        Command::Batch(cmd) => batch(cmd),
        Command::Inspect(cmd) => inspect(cmd),
    }
}

fn absolute(path: &Path) -> anyhow::Result<PathBuf> {
    std::path::absolute(path).with_context(|| format!("unable to resolve {}", path.display()))
}

/// A bare program name is left for `PATH` lookup, anything else is made absolute.
fn tool_path(path: &Path) -> anyhow::Result<PathBuf> {
    if path.components().count() > 1 {
        absolute(path)
    } else {
        Ok(path.to_path_buf())
    }
}

fn tools(
    spake2p_path: &Path,
    args: &ToolArgs,
) -> anyhow::Result<(Spake2pTool, CipherBackend)> {
    let timeout = Duration::from_secs(args.tool_timeout_secs);
    let spake2p = Spake2pTool::new(tool_path(spake2p_path)?).with_timeout(timeout);
    let cipher = match &args.cipher_tool {
        Some(path) => CipherBackend::Openssl {
            path: tool_path(path)?,
            timeout,
        },
        None => CipherBackend::InProcess,
    };
    Ok((spake2p, cipher))
}

fn device(cmd: DeviceCmd) -> anyhow::Result<()> {
    let (spake2p, cipher) = tools(&cmd.spake2p_path, &cmd.tools)?;
    let args = DeviceArgs {
        passcode: cmd.passcode,
        discriminator: cmd.discriminator,
        vendor_id: cmd.vendor_id,
        vendor_name: cmd.vendor_name,
        product_id: cmd.product_id,
        product_name: cmd.product_name,
        hw_ver: cmd.hw_ver,
        hw_ver_str: cmd.hw_ver_str,
        mfg_date: cmd.mfg_date,
        serial_num: cmd.serial_num,
        rd_id_uid: cmd.rd_id_uid,
        factorydata_key: cmd.encryption.factorydata_key,
        factorydata_iv: cmd.encryption.factorydata_iv,
    };
    let paths = AttestationPaths {
        dac_cert: absolute(&cmd.dac_cert)?,
        dac_key: absolute(&cmd.dac_key)?,
        pai_cert: absolute(&cmd.pai_cert)?,
        cd: absolute(&cmd.cd)?,
        dac_key_password: cmd.dac_key_password,
    };
    let layout = OutputLayout::in_dir(
        &absolute(&cmd.out_dir)?,
        cmd.gen_manual_pairing_code,
        cmd.gen_qrcode,
    );

    let provisioner =
        DeviceProvisioner::new(&spake2p, &MatterSetupCodec).with_cipher_backend(cipher);
    let device = provisioner
        .run(&args, &paths, &layout)
        .context("factory data generation failed")?;

    println!("factory data: {}", layout.factory_data.display());
    println!("manual pairing code: {}", device.codes.manual_code);
    println!("QR code payload: {}", device.codes.qr_payload);
    Ok(())
}

fn batch(cmd: BatchCmd) -> anyhow::Result<()> {
    let (spake2p, cipher) = tools(&cmd.spake2p_path, &cmd.tools)?;

    let mut profile = DeviceProfile {
        mfg_date: cmd.mfg_date,
        factorydata_key: cmd.encryption.factorydata_key,
        factorydata_iv: cmd.encryption.factorydata_iv,
        ..DeviceProfile::default()
    };
    if let Some(passcode) = cmd.passcode {
        profile.passcode = passcode;
    }
    if let Some(discriminator) = cmd.discriminator {
        profile.discriminator = discriminator;
    }
    if let Some(vendor_name) = cmd.vendor_name {
        profile.vendor_name = vendor_name;
    }
    if let Some(product_name) = cmd.product_name {
        profile.product_name = product_name;
    }
    if let Some(hw_ver) = cmd.hw_ver {
        profile.hw_ver = hw_ver;
    }
    if let Some(hw_ver_str) = cmd.hw_ver_str {
        profile.hw_ver_str = hw_ver_str;
    }
    if cmd.rd_id_uid.is_some() {
        profile.rd_id_uid = cmd.rd_id_uid;
    }

    let mut config = BatchConfig::new(absolute(&cmd.cert_root)?, cmd.start_serial);
    if let Some(output_dir) = &cmd.output_dir {
        config.output_root = absolute(output_dir)?;
    }
    config.paa_override = cmd.paa_cert.as_deref().map(absolute).transpose()?;
    config.dac_key_password = cmd.dac_key_password;
    config.profile = profile;

    let provisioner =
        DeviceProvisioner::new(&spake2p, &MatterSetupCodec).with_cipher_backend(cipher);
    let runner = BatchRunner::new(config, provisioner);
    let report = runner.run().context("batch aborted")?;

    for failure in &report.failed {
        eprintln!(
            "{} (serial {}): {}",
            failure.unit, failure.serial, failure.error
        );
    }
    println!(
        "provisioned {}, skipped {}, failed {}; next serial 0x{:X}",
        report.provisioned.len(),
        report.skipped.len(),
        report.failed.len(),
        report.next_serial
    );
    if !report.is_success() {
        bail!("{} unit(s) failed to provision", report.failed.len());
    }
    Ok(())
}

fn bytes_summary(field: &Option<LengthBytes>) -> String {
    match field {
        Some(field) => format!("{} bytes", field.length),
        None => "-".into(),
    }
}

fn text(field: &Option<LengthBytes>) -> String {
    match field {
        Some(field) => String::from_utf8_lossy(&field.value).into_owned(),
        None => "-".into(),
    }
}

fn inspect(cmd: InspectCmd) -> anyhow::Result<()> {
    let image = std::fs::read(&cmd.file)
        .with_context(|| format!("unable to read {}", cmd.file.display()))?;
    let (length, payload) = codec::unframe(&image)?;

    let EncryptionArgs {
        factorydata_key,
        factorydata_iv,
    } = cmd.encryption;
    let record = match (factorydata_key, factorydata_iv) {
        (Some(key), Some(iv)) => {
            let cipher = Aes256Ctr::new(validate::cipher_key(&key, &iv)?);
            codec::deserialize(&cipher.decrypt(payload))
        }
        _ => codec::deserialize(payload),
    }
    .context("unable to decode the record, is it encrypted?")?;

    println!("record length: {} bytes", length);
    if image.len() != length as usize + codec::LENGTH_PREFIX_BYTES {
        warn!(
            file_len = image.len(),
            record_len = length,
            "trailing bytes after the record"
        );
    }
    print!("{}", describe(&record));
    Ok(())
}

/// Human readable summary of a decoded record. Secrets are shown by size only.
fn describe(record: &FactoryDataProvider) -> String {
    let mut lines = Vec::new();
    if let Some(cdata) = &record.cdata {
        lines.push(format!("passcode: {}", cdata.passcode));
        lines.push(format!("discriminator: {}", cdata.discriminator));
        lines.push(format!("spake2p iteration count: {}", cdata.spake2_it));
        lines.push(format!("spake2p salt: {}", text(&cdata.spake2_salt)));
        lines.push(format!(
            "spake2p verifier: {}",
            bytes_summary(&cdata.spake2_verifier)
        ));
    }
    if let Some(dac) = &record.dac {
        lines.push(format!("DAC certificate: {}", bytes_summary(&dac.dac_cert)));
        lines.push(format!("DAC private key: {}", bytes_summary(&dac.dac_key)));
        lines.push(format!("PAI certificate: {}", bytes_summary(&dac.pai_cert)));
        lines.push(format!("certification declaration: {}", bytes_summary(&dac.cd)));
    }
    match &record.dii {
        Some(dii) => {
            let id = |v: Option<u32>| v.map(|v| format!("0x{:04X}", v)).unwrap_or("-".into());
            lines.push(format!("vendor id: {}", id(dii.vendor_id)));
            lines.push(format!("vendor name: {}", text(&dii.vendor_name)));
            lines.push(format!("product id: {}", id(dii.product_id)));
            lines.push(format!("product name: {}", text(&dii.product_name)));
            lines.push(format!(
                "hardware version: {}",
                dii.hw_ver.map(|v| v.to_string()).unwrap_or("-".into())
            ));
            lines.push(format!("hardware version string: {}", text(&dii.hw_ver_string)));
            lines.push(format!("manufacturing date: {}", text(&dii.mfg_date)));
            lines.push(format!("serial number: {}", text(&dii.serial_num)));
            lines.push(format!(
                "rotating device id seed: {}",
                bytes_summary(&dii.rd_id_uid)
            ));
        }
        None => lines.push("no device instance info".into()),
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}
