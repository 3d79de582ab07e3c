use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about = "Matter factory data provisioning", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build the factory data image for a single device
    Device(DeviceCmd),
    /// Provision every unit in a certificate tree
    Batch(BatchCmd),
    /// Decode a factory data image and print what it holds
    Inspect(InspectCmd),
}

/// Decimal, or hex with a `0x` prefix.
pub fn any_base_int(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse::<u32>(),
    };
    parsed.map_err(|e| format!("'{}' is not an integer: {}", s, e))
}

pub fn any_base_u64(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse::<u64>(),
    };
    parsed.map_err(|e| format!("'{}' is not an integer: {}", s, e))
}

/// External tool settings shared by `device` and `batch`.
#[derive(Args, Debug)]
pub struct ToolArgs {
    /// Encrypt with this openssl binary instead of in process
    #[arg(long, value_name = "OPENSSL")]
    pub cipher_tool: Option<PathBuf>,
    /// Seconds an external tool may run before it is killed
    #[arg(long, default_value_t = 30)]
    pub tool_timeout_secs: u64,
}

#[derive(Args, Debug)]
pub struct EncryptionArgs {
    /// 32-byte key (hex) to encrypt the factory data with
    #[arg(long, requires = "factorydata_iv")]
    pub factorydata_key: Option<String>,
    /// 16-byte IV (hex) for the factory data encryption
    #[arg(long)]
    pub factorydata_iv: Option<String>,
}

#[derive(Args, Debug)]
pub struct DeviceCmd {
    /// Setup passcode, range 0x01-0x5F5E0FE
    #[arg(short, long, value_parser = any_base_int)]
    pub passcode: u32,
    /// Discriminator, range 0x00-0x0FFF
    #[arg(short, long, value_parser = any_base_int)]
    pub discriminator: u32,

    /// DAC certificate (DER)
    #[arg(long)]
    pub dac_cert: PathBuf,
    /// DAC private key (DER, or pre-encrypted with a `.enc` suffix)
    #[arg(long)]
    pub dac_key: PathBuf,
    /// Password for an encrypted PKCS#8 DAC key
    #[arg(long)]
    pub dac_key_password: Option<String>,
    /// PAI certificate (DER)
    #[arg(long)]
    pub pai_cert: PathBuf,
    /// Certification declaration (DER)
    #[arg(long)]
    pub cd: PathBuf,
    /// The spake2p binary
    #[arg(long, env = "SPAKE2P_PATH")]
    pub spake2p_path: PathBuf,

    #[arg(long, value_parser = any_base_int)]
    pub vendor_id: Option<u32>,
    #[arg(long)]
    pub vendor_name: Option<String>,
    #[arg(long, value_parser = any_base_int)]
    pub product_id: Option<u32>,
    #[arg(long)]
    pub product_name: Option<String>,
    #[arg(long, value_parser = any_base_int)]
    pub hw_ver: Option<u32>,
    #[arg(long)]
    pub hw_ver_str: Option<String>,
    /// Manufacturing date, YYYY-MM-DD
    #[arg(long)]
    pub mfg_date: Option<String>,
    #[arg(long)]
    pub serial_num: Option<String>,
    /// 128-bit rotating device id seed as 32 hex characters
    #[arg(long)]
    pub rd_id_uid: Option<String>,

    #[command(flatten)]
    pub encryption: EncryptionArgs,

    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    pub gen_qrcode: bool,
    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    pub gen_manual_pairing_code: bool,

    /// Where factory_data.bin and the onboarding codes are written
    #[arg(long, default_value = ".")]
    pub out_dir: PathBuf,

    #[command(flatten)]
    pub tools: ToolArgs,
}

#[derive(Args, Debug)]
pub struct BatchCmd {
    /// Root of the certificate tree
    #[arg(long, alias = "rtk-dir")]
    pub cert_root: PathBuf,
    /// Serial number of the first device
    #[arg(long, alias = "sn", value_parser = any_base_u64)]
    pub start_serial: u64,
    /// PAA certificate to use instead of the one in the certificate root
    #[arg(long)]
    pub paa_cert: Option<PathBuf>,
    /// Where outputs and the ledger go, defaults to the certificate root
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
    /// Password for encrypted PKCS#8 DAC keys
    #[arg(long)]
    pub dac_key_password: Option<String>,
    /// The spake2p binary
    #[arg(long, env = "SPAKE2P_PATH", default_value = "./spake2p")]
    pub spake2p_path: PathBuf,

    #[arg(long, value_parser = any_base_int)]
    pub passcode: Option<u32>,
    #[arg(long, value_parser = any_base_int)]
    pub discriminator: Option<u32>,
    #[arg(long)]
    pub vendor_name: Option<String>,
    #[arg(long)]
    pub product_name: Option<String>,
    #[arg(long, value_parser = any_base_int)]
    pub hw_ver: Option<u32>,
    #[arg(long)]
    pub hw_ver_str: Option<String>,
    #[arg(long)]
    pub mfg_date: Option<String>,
    #[arg(long)]
    pub rd_id_uid: Option<String>,

    #[command(flatten)]
    pub encryption: EncryptionArgs,

    #[command(flatten)]
    pub tools: ToolArgs,
}

#[derive(Args, Debug)]
pub struct InspectCmd {
    /// A factory data image
    pub file: PathBuf,
    #[command(flatten)]
    pub encryption: EncryptionArgs,
}
