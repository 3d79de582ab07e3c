//! Serialization and length-prefix framing of factory data.
//!
//! An artifact is `len (u16 LE) || payload` where `len` is always the
//! plaintext record size and the payload may be encrypted.

use crate::record::{FactoryRecord, InstanceInfo};
use crate::wire::{
    CommissionableData, DeviceAttestationCredentials, DeviceInstanceInfo, FactoryDataProvider,
    LengthBytes,
};
use crate::ProvisionError;
use prost::Message;

pub const LENGTH_PREFIX_BYTES: usize = 2;
pub const MAX_RECORD_LEN: usize = u16::MAX as usize;

fn string_field(s: Option<String>) -> Option<LengthBytes> {
    s.map(|s| LengthBytes::new(s.into_bytes()))
}

fn instance_to_wire(info: InstanceInfo) -> Option<DeviceInstanceInfo> {
    if info.is_empty() {
        return None;
    }
    Some(DeviceInstanceInfo {
        vendor_id: info.vendor_id.map(u32::from),
        vendor_name: string_field(info.vendor_name),
        product_id: info.product_id.map(u32::from),
        product_name: string_field(info.product_name),
        hw_ver: info.hardware_version.map(u32::from),
        hw_ver_string: string_field(info.hardware_version_string),
        mfg_date: string_field(info.manufacturing_date),
        serial_num: string_field(info.serial_number),
        rd_id_uid: info.rotating_id_seed.map(LengthBytes::new),
    })
}

impl From<FactoryRecord> for FactoryDataProvider {
    fn from(record: FactoryRecord) -> Self {
        let FactoryRecord {
            commissioning,
            attestation,
            instance_info,
        } = record;

        FactoryDataProvider {
            cdata: Some(CommissionableData {
                passcode: commissioning.passcode,
                discriminator: commissioning.discriminator.into(),
                spake2_it: commissioning.spake_iteration_count,
                spake2_salt: Some(LengthBytes::new(commissioning.spake_salt)),
                spake2_verifier: Some(LengthBytes::new(commissioning.spake_verifier)),
            }),
            dac: Some(DeviceAttestationCredentials {
                cd: Some(LengthBytes::new(attestation.certification_declaration)),
                dac_cert: Some(LengthBytes::new(attestation.device_cert)),
                dac_key: Some(LengthBytes::new(
                    attestation.device_private_key.as_bytes().to_vec(),
                )),
                pai_cert: Some(LengthBytes::new(
                    attestation.product_attestation_intermediate_cert,
                )),
            }),
            dii: instance_to_wire(instance_info),
        }
    }
}

/// Encodes a record. The record is consumed, it can't be changed afterwards.
pub fn serialize(record: FactoryRecord) -> Vec<u8> {
    FactoryDataProvider::from(record).encode_to_vec()
}

pub fn deserialize(bytes: &[u8]) -> Result<FactoryDataProvider, ProvisionError> {
    FactoryDataProvider::decode(bytes)
        .map_err(|e| ProvisionError::validation("factory data", format!("not a valid record: {}", e)))
}

/// Prepends the plaintext `length` to `payload`.
pub fn frame(length: usize, payload: &[u8]) -> Result<Vec<u8>, ProvisionError> {
    let prefix = u16::try_from(length).map_err(|_| ProvisionError::Overflow { length })?;
    let mut framed = Vec::with_capacity(LENGTH_PREFIX_BYTES + payload.len());
    framed.extend_from_slice(&prefix.to_le_bytes());
    framed.extend_from_slice(payload);
    Ok(framed)
}

/// Splits an artifact into its length prefix and exactly that many payload bytes.
pub fn unframe(bytes: &[u8]) -> Result<(u16, &[u8]), ProvisionError> {
    let (prefix, rest) = bytes
        .split_first_chunk::<LENGTH_PREFIX_BYTES>()
        .ok_or_else(|| ProvisionError::validation("factory data image", "missing length prefix"))?;
    let length = u16::from_le_bytes(*prefix);
    let payload = rest.get(..length as usize).ok_or_else(|| {
        ProvisionError::validation(
            "factory data image",
            format!("length prefix says {} bytes but only {} follow", length, rest.len()),
        )
    })?;
    Ok((length, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{AttestationCredentials, CommissioningData, DevicePrivateKey};
    use proptest::prelude::*;

    fn record(instance_info: InstanceInfo) -> FactoryRecord {
        FactoryRecord {
            commissioning: CommissioningData {
                passcode: 20202021,
                discriminator: 3840,
                spake_iteration_count: 1000,
                spake_salt: b"U1BBS0UyUCBLZXkgU2FsdA==".to_vec(),
                spake_verifier: b"dmVyaWZpZXI=".to_vec(),
            },
            attestation: AttestationCredentials {
                device_cert: vec![0x30, 0x82, 0x01, 0x0a],
                product_attestation_intermediate_cert: vec![0x30, 0x82, 0x02],
                certification_declaration: vec![0x30, 0x81],
                device_private_key: DevicePrivateKey::Raw([7; 32]),
            },
            instance_info,
        }
    }

    #[test]
    fn partial_record_omits_instance_info() {
        let bytes = serialize(record(InstanceInfo::default()));
        let decoded = deserialize(&bytes).unwrap();
        assert!(decoded.dii.is_none());
        let cdata = decoded.cdata.unwrap();
        assert_eq!(cdata.passcode, 20202021);
        assert_eq!(cdata.discriminator, 3840);
        assert_eq!(cdata.spake2_salt.unwrap().length, 24);
    }

    #[test]
    fn supplied_instance_fields_survive_and_absent_ones_stay_absent() {
        let bytes = serialize(record(InstanceInfo {
            vendor_id: Some(0),
            serial_number: Some("TEST_SN".into()),
            ..Default::default()
        }));
        let dii = deserialize(&bytes).unwrap().dii.unwrap();
        assert_eq!(dii.vendor_id, Some(0));
        assert_eq!(dii.product_id, None);
        assert_eq!(dii.vendor_name, None);
        assert_eq!(dii.serial_num, Some(LengthBytes::new(b"TEST_SN".to_vec())));
    }

    #[test]
    fn serialization_is_deterministic() {
        let info = InstanceInfo {
            vendor_id: Some(0xFFF1),
            product_name: Some("TEST_PRODUCT".into()),
            rotating_id_seed: Some(vec![1, 2, 3]),
            ..Default::default()
        };
        assert_eq!(serialize(record(info.clone())), serialize(record(info)));
    }

    #[test]
    fn key_bytes_are_stored_as_given() {
        let mut r = record(InstanceInfo::default());
        r.attestation.device_private_key = DevicePrivateKey::PreEncrypted(vec![9; 48]);
        let dac = deserialize(&serialize(r)).unwrap().dac.unwrap();
        assert_eq!(dac.dac_key.unwrap().value, vec![9; 48]);
    }

    #[test]
    fn frame_rejects_oversized_length() {
        assert!(matches!(
            frame(MAX_RECORD_LEN + 1, &[]),
            Err(ProvisionError::Overflow { length }) if length == MAX_RECORD_LEN + 1
        ));
        assert!(frame(MAX_RECORD_LEN, &[]).is_ok());
    }

    #[test]
    fn frame_is_little_endian() {
        let framed = frame(0x0102, &[0xaa]).unwrap();
        assert_eq!(framed, vec![0x02, 0x01, 0xaa]);
    }

    #[test]
    fn unframe_rejects_truncation() {
        assert!(unframe(&[0x05]).is_err());
        assert!(unframe(&[0x05, 0x00, 1, 2]).is_err());
    }

    proptest! {
        #[test]
        fn framing_decomposes(payload in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let framed = frame(payload.len(), &payload).unwrap();
            let (length, body) = unframe(&framed).unwrap();
            prop_assert_eq!(length as usize, payload.len());
            prop_assert_eq!(body, &payload[..]);
            prop_assert_eq!(framed.len(), payload.len() + LENGTH_PREFIX_BYTES);
        }
    }
}
