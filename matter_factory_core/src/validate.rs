//! Input validation for a single device.
//!
//! Everything here is pure. [`validate`] runs before any file is opened or
//! external tool spawned and turns the loosely typed values that come off the
//! command line into [`DeviceParams`].

use crate::cipher::CipherKey;
use crate::ProvisionError;

pub const PASSCODE_MIN: u32 = 0x0000001;
pub const PASSCODE_MAX: u32 = 0x5F5E0FE;
pub const DISCRIMINATOR_MAX: u32 = 0x0FFF;

/// Passcodes that are trivially guessable and must never be provisioned.
pub const INVALID_PASSCODES: [u32; 12] = [
    0, 11111111, 22222222, 33333333, 44444444, 55555555, 66666666, 77777777, 88888888, 99999999,
    12345678, 87654321,
];

/// Raw, unvalidated device inputs.
#[derive(Debug, Clone, Default)]
pub struct DeviceArgs {
    pub passcode: u32,
    pub discriminator: u32,
    pub vendor_id: Option<u32>,
    pub vendor_name: Option<String>,
    pub product_id: Option<u32>,
    pub product_name: Option<String>,
    pub hw_ver: Option<u32>,
    pub hw_ver_str: Option<String>,
    pub mfg_date: Option<String>,
    pub serial_num: Option<String>,
    /// 128-bit rotating device id seed as 32 hex characters
    pub rd_id_uid: Option<String>,
    /// 32 byte AES key as hex
    pub factorydata_key: Option<String>,
    /// 16 byte IV as hex
    pub factorydata_iv: Option<String>,
}

/// Device inputs that passed every range and length check.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceParams {
    pub passcode: u32,
    pub discriminator: u16,
    pub instance: InstanceFields,
    pub encryption: Option<CipherKey>,
}

/// Optional device instance fields. Absent fields stay absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceFields {
    pub vendor_id: Option<u16>,
    pub vendor_name: Option<String>,
    pub product_id: Option<u16>,
    pub product_name: Option<String>,
    pub hw_ver: Option<u16>,
    pub hw_ver_str: Option<String>,
    pub mfg_date: Option<String>,
    pub serial_num: Option<String>,
    pub rd_id_uid: Option<String>,
}

pub fn check_passcode(passcode: u32) -> Result<u32, ProvisionError> {
    if !(PASSCODE_MIN..=PASSCODE_MAX).contains(&passcode) {
        return Err(ProvisionError::validation(
            "passcode",
            format!(
                "{} is out of range, should be in range [{}, {}]",
                passcode, PASSCODE_MIN, PASSCODE_MAX
            ),
        ));
    }
    if INVALID_PASSCODES.contains(&passcode) {
        return Err(ProvisionError::validation(
            "passcode",
            format!("{} is trivially guessable", passcode),
        ));
    }
    Ok(passcode)
}

pub fn check_int_range(
    value: u32,
    min: u32,
    max: u32,
    field: &'static str,
) -> Result<u32, ProvisionError> {
    if value < min || value > max {
        return Err(ProvisionError::validation(
            field,
            format!(
                "{} is out of range, should be in range [{}, {}]",
                value, min, max
            ),
        ));
    }
    Ok(value)
}

pub fn check_str_range(
    s: &str,
    min_len: usize,
    max_len: usize,
    field: &'static str,
) -> Result<(), ProvisionError> {
    let len = s.chars().count();
    if len < min_len || len > max_len {
        return Err(ProvisionError::validation(
            field,
            format!(
                "must be between {} and {} characters, got {}",
                min_len, max_len, len
            ),
        ));
    }
    Ok(())
}

fn check_u16(value: Option<u32>, field: &'static str) -> Result<Option<u16>, ProvisionError> {
    value
        .map(|v| check_int_range(v, 0, u16::MAX as u32, field).map(|v| v as u16))
        .transpose()
}

fn check_opt_str(
    value: &Option<String>,
    min_len: usize,
    max_len: usize,
    field: &'static str,
) -> Result<Option<String>, ProvisionError> {
    if let Some(s) = value {
        check_str_range(s, min_len, max_len, field)?;
    }
    Ok(value.clone())
}

fn decode_hex_exact<const N: usize>(s: &str, field: &'static str) -> Result<[u8; N], ProvisionError> {
    let bytes = hex::decode(s)
        .map_err(|e| ProvisionError::validation(field, format!("not a hex string: {}", e)))?;
    bytes.try_into().map_err(|bytes: Vec<u8>| {
        ProvisionError::validation(
            field,
            format!("must be {} bytes, got {}", N, bytes.len()),
        )
    })
}

/// Decodes a hex AES-256 key and IV.
pub fn cipher_key(key_hex: &str, iv_hex: &str) -> Result<CipherKey, ProvisionError> {
    Ok(CipherKey {
        key: decode_hex_exact::<32>(key_hex, "factory data key")?,
        iv: decode_hex_exact::<16>(iv_hex, "factory data iv")?,
    })
}

pub fn validate(args: &DeviceArgs) -> Result<DeviceParams, ProvisionError> {
    let passcode = check_passcode(args.passcode)?;
    let discriminator = check_int_range(args.discriminator, 0, DISCRIMINATOR_MAX, "discriminator")? as u16;

    let instance = InstanceFields {
        vendor_id: check_u16(args.vendor_id, "vendor id")?,
        vendor_name: check_opt_str(&args.vendor_name, 1, 32, "vendor name")?,
        product_id: check_u16(args.product_id, "product id")?,
        product_name: check_opt_str(&args.product_name, 1, 32, "product name")?,
        hw_ver: check_u16(args.hw_ver, "hardware version")?,
        hw_ver_str: check_opt_str(&args.hw_ver_str, 1, 64, "hardware version string")?,
        mfg_date: check_opt_str(&args.mfg_date, 8, 16, "manufacturing date")?,
        serial_num: check_opt_str(&args.serial_num, 1, 32, "serial number")?,
        rd_id_uid: match &args.rd_id_uid {
            Some(uid) => {
                check_str_range(uid, 32, 32, "rotating device unique id")?;
                decode_hex_exact::<16>(uid, "rotating device unique id")?;
                Some(uid.clone())
            }
            None => None,
        },
    };

    let encryption = match (&args.factorydata_key, &args.factorydata_iv) {
        (Some(key), Some(iv)) => Some(cipher_key(key, iv)?),
        (Some(_), None) => {
            return Err(ProvisionError::validation(
                "factory data iv",
                "an explicit IV is required when an encryption key is given",
            ))
        }
        (None, Some(_)) => {
            return Err(ProvisionError::validation(
                "factory data key",
                "an IV was given without an encryption key",
            ))
        }
        (None, None) => None,
    };

    Ok(DeviceParams {
        passcode,
        discriminator,
        instance,
        encryption,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn base_args() -> DeviceArgs {
        DeviceArgs {
            passcode: 20202021,
            discriminator: 3840,
            ..Default::default()
        }
    }

    #[test]
    fn accepts_minimal_args() {
        let params = validate(&base_args()).unwrap();
        assert_eq!(params.passcode, 20202021);
        assert_eq!(params.discriminator, 3840);
        assert_eq!(params.instance, InstanceFields::default());
        assert!(params.encryption.is_none());
    }

    #[test]
    fn rejects_every_deny_listed_passcode() {
        for passcode in INVALID_PASSCODES {
            let args = DeviceArgs {
                passcode,
                ..base_args()
            };
            assert!(matches!(
                validate(&args),
                Err(ProvisionError::Validation {
                    field: "passcode",
                    ..
                })
            ));
        }
    }

    #[test]
    fn passcode_range_edges() {
        assert!(check_passcode(PASSCODE_MIN).is_ok());
        assert!(check_passcode(PASSCODE_MAX).is_ok());
        assert!(check_passcode(PASSCODE_MAX + 1).is_err());
    }

    #[test]
    fn discriminator_is_twelve_bits() {
        let args = DeviceArgs {
            discriminator: 0x1000,
            ..base_args()
        };
        assert!(validate(&args).is_err());
    }

    #[test]
    fn string_lengths() {
        let args = DeviceArgs {
            mfg_date: Some("2024-01".into()),
            ..base_args()
        };
        assert!(validate(&args).is_err());

        let args = DeviceArgs {
            vendor_name: Some("x".repeat(33)),
            ..base_args()
        };
        assert!(validate(&args).is_err());

        let args = DeviceArgs {
            hw_ver_str: Some("x".repeat(64)),
            mfg_date: Some("2024-01-01".into()),
            serial_num: Some("TEST_SN".into()),
            ..base_args()
        };
        let params = validate(&args).unwrap();
        assert_eq!(params.instance.serial_num.as_deref(), Some("TEST_SN"));
    }

    #[test]
    fn rotating_id_must_be_128_bit_hex() {
        let args = DeviceArgs {
            rd_id_uid: Some("00112233445566778899aabbccddeeff".into()),
            ..base_args()
        };
        assert!(validate(&args).is_ok());

        let args = DeviceArgs {
            rd_id_uid: Some("0011223344556677".into()),
            ..base_args()
        };
        assert!(validate(&args).is_err());

        let args = DeviceArgs {
            rd_id_uid: Some("zz112233445566778899aabbccddeeff".into()),
            ..base_args()
        };
        assert!(validate(&args).is_err());
    }

    #[test]
    fn key_without_iv_is_rejected() {
        let args = DeviceArgs {
            factorydata_key: Some(
                "ff0102030405060708090a0b0c0d0e0fff0102030405060708090a0b0c0d0e0f".into(),
            ),
            ..base_args()
        };
        assert!(matches!(
            validate(&args),
            Err(ProvisionError::Validation {
                field: "factory data iv",
                ..
            })
        ));

        let args = DeviceArgs {
            factorydata_iv: Some("ff0102030405060708090a0b0c0d0e0f".into()),
            ..args
        };
        let params = validate(&args).unwrap();
        let key = params.encryption.unwrap();
        assert_eq!(key.key[0], 0xff);
        assert_eq!(key.iv[15], 0x0f);
    }

    proptest! {
        #[test]
        fn out_of_range_ids_are_rejected(vendor_id in 0x1_0000u32..) {
            let args = DeviceArgs {
                vendor_id: Some(vendor_id),
                ..base_args()
            };
            prop_assert!(validate(&args).is_err());
        }

        #[test]
        fn passcodes_outside_range_are_rejected(passcode in (PASSCODE_MAX + 1)..) {
            prop_assert!(check_passcode(passcode).is_err());
        }
    }
}
