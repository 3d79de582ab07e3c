//! Onboarding payloads: the manual pairing code and the `MT:` QR code string.

use crate::ProvisionError;
use image::Luma;
use qrcode::QrCode;
use std::io::Cursor;

pub const QR_PREFIX: &str = "MT:";
const BASE38_ALPHABET: &[u8; 38] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ-.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommissioningFlow {
    Standard = 0,
    UserIntent = 1,
    Custom = 2,
}

/// Discovery capabilities bitmask
pub mod rendezvous {
    pub const SOFT_AP: u8 = 1 << 0;
    pub const BLE: u8 = 1 << 1;
    pub const ON_NETWORK: u8 = 1 << 2;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupPayload {
    pub discriminator: u16,
    pub passcode: u32,
    pub rendezvous: u8,
    pub flow: CommissioningFlow,
    pub vendor_id: u16,
    pub product_id: u16,
}

impl SetupPayload {
    /// BLE rendezvous with the standard commissioning flow.
    pub fn ble_standard(discriminator: u16, passcode: u32, vendor_id: u16, product_id: u16) -> Self {
        Self {
            discriminator,
            passcode,
            rendezvous: rendezvous::BLE,
            flow: CommissioningFlow::Standard,
            vendor_id,
            product_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnboardingCodes {
    pub manual_code: String,
    pub qr_payload: String,
}

pub trait OnboardingEncoder {
    fn encode(&self, payload: &SetupPayload) -> Result<OnboardingCodes, ProvisionError>;
}

/// Encodes onboarding payloads natively.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatterSetupCodec;

impl OnboardingEncoder for MatterSetupCodec {
    fn encode(&self, payload: &SetupPayload) -> Result<OnboardingCodes, ProvisionError> {
        Ok(OnboardingCodes {
            manual_code: manual_pairing_code(payload),
            qr_payload: qr_code_payload(payload),
        })
    }
}

pub fn manual_pairing_code(payload: &SetupPayload) -> String {
    let short_discriminator = u32::from(payload.discriminator >> 8) & 0xF;
    let vid_pid_present = payload.flow != CommissioningFlow::Standard;

    let chunk1 = (u32::from(vid_pid_present) << 2) | (short_discriminator >> 2);
    let chunk2 = ((short_discriminator & 0x3) << 14) | (payload.passcode & 0x3FFF);
    let chunk3 = (payload.passcode >> 14) & 0x1FFF;

    let mut code = format!("{}{:05}{:04}", chunk1, chunk2, chunk3);
    if vid_pid_present {
        code.push_str(&format!("{:05}{:05}", payload.vendor_id, payload.product_id));
    }
    code.push(verhoeff_check_digit(&code));
    code
}

pub fn qr_code_payload(payload: &SetupPayload) -> String {
    // (value, bit width), packed LSB first
    let fields: [(u128, u32); 8] = [
        (0, 3), // version
        (payload.vendor_id.into(), 16),
        (payload.product_id.into(), 16),
        (payload.flow as u128, 2),
        (payload.rendezvous.into(), 8),
        (u128::from(payload.discriminator & 0x0FFF), 12),
        (u128::from(payload.passcode & 0x7FF_FFFF), 27),
        (0, 4), // padding
    ];

    let mut packed = 0u128;
    let mut offset = 0;
    for (value, width) in fields {
        packed |= value << offset;
        offset += width;
    }
    let bytes = &packed.to_le_bytes()[..(offset / 8) as usize];

    format!("{}{}", QR_PREFIX, base38_encode(bytes))
}

pub fn base38_encode(bytes: &[u8]) -> String {
    let mut out = String::new();
    for chunk in bytes.chunks(3) {
        let mut value = chunk
            .iter()
            .rev()
            .fold(0u32, |acc, byte| (acc << 8) | u32::from(*byte));
        let n_chars = match chunk.len() {
            3 => 5,
            2 => 4,
            _ => 2,
        };
        for _ in 0..n_chars {
            out.push(BASE38_ALPHABET[(value % 38) as usize] as char);
            value /= 38;
        }
    }
    out
}

const VERHOEFF_D: [[u8; 10]; 10] = [
    [0, 1, 2, 3, 4, 5, 6, 7, 8, 9],
    [1, 2, 3, 4, 0, 6, 7, 8, 9, 5],
    [2, 3, 4, 0, 1, 7, 8, 9, 5, 6],
    [3, 4, 0, 1, 2, 8, 9, 5, 6, 7],
    [4, 0, 1, 2, 3, 9, 5, 6, 7, 8],
    [5, 9, 8, 7, 6, 0, 4, 3, 2, 1],
    [6, 5, 9, 8, 7, 1, 0, 4, 3, 2],
    [7, 6, 5, 9, 8, 2, 1, 0, 4, 3],
    [8, 7, 6, 5, 9, 3, 2, 1, 0, 4],
    [9, 8, 7, 6, 5, 4, 3, 2, 1, 0],
];

const VERHOEFF_P: [[u8; 10]; 8] = [
    [0, 1, 2, 3, 4, 5, 6, 7, 8, 9],
    [1, 5, 7, 6, 2, 8, 3, 0, 9, 4],
    [5, 8, 0, 3, 7, 9, 6, 1, 4, 2],
    [8, 9, 1, 6, 0, 4, 3, 5, 2, 7],
    [9, 4, 5, 3, 1, 2, 6, 8, 7, 0],
    [4, 2, 8, 6, 5, 7, 3, 9, 0, 1],
    [2, 7, 9, 3, 8, 0, 6, 4, 1, 5],
    [7, 0, 4, 6, 9, 1, 3, 2, 5, 8],
];

const VERHOEFF_INV: [u8; 10] = [0, 4, 3, 2, 1, 5, 6, 7, 8, 9];

/// Verhoeff check digit over a string of ASCII digits.
pub fn verhoeff_check_digit(digits: &str) -> char {
    let c = digits
        .bytes()
        .rev()
        .enumerate()
        .fold(0u8, |c, (i, digit)| {
            let digit = (digit - b'0') as usize;
            VERHOEFF_D[c as usize][VERHOEFF_P[(i + 1) % 8][digit] as usize]
        });
    (b'0' + VERHOEFF_INV[c as usize]) as char
}

/// Renders a QR payload as a PNG image.
pub fn render_qr_png(qr_payload: &str) -> Result<Vec<u8>, ProvisionError> {
    let code = QrCode::new(qr_payload.as_bytes()).map_err(|e| ProvisionError::Onboarding {
        detail: format!("unable to build QR code: {}", e),
    })?;
    let image = code.render::<Luma<u8>>().build();
    let mut png = Cursor::new(Vec::new());
    image
        .write_to(&mut png, image::ImageOutputFormat::Png)
        .map_err(|e| ProvisionError::Onboarding {
            detail: format!("unable to encode PNG: {}", e),
        })?;
    Ok(png.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verhoeff_reference() {
        assert_eq!(verhoeff_check_digit("236"), '3');
    }

    #[test]
    fn default_test_device_manual_code() {
        let payload = SetupPayload::ble_standard(3840, 20202021, 0xFFF1, 0x8000);
        assert_eq!(manual_pairing_code(&payload), "34970112332");
    }

    #[test]
    fn default_test_device_qr_code() {
        let payload = SetupPayload::ble_standard(3840, 20202021, 0xFFF1, 0x8000);
        assert_eq!(qr_code_payload(&payload), "MT:Y.K9042C00KA0648G00");
    }

    #[test]
    fn custom_flow_manual_code_carries_vid_pid() {
        let payload = SetupPayload {
            flow: CommissioningFlow::Custom,
            ..SetupPayload::ble_standard(3840, 20202021, 0xFFF1, 0x8000)
        };
        let code = manual_pairing_code(&payload);
        assert_eq!(code.len(), 21);
        assert!(code.starts_with('7'));
        assert_eq!(&code[10..20], "6552132768");
    }

    #[test]
    fn base38_chunk_lengths() {
        assert_eq!(base38_encode(&[0]), "00");
        assert_eq!(base38_encode(&[0, 0]), "0000");
        assert_eq!(base38_encode(&[0, 0, 0, 0]), "0000000");
        assert_eq!(base38_encode(&[37]), ".0");
    }

    #[test]
    fn renders_png() {
        let png = render_qr_png("MT:Y.K9042C00KA0648G00").unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn oversized_payload_is_an_onboarding_error() {
        let err = render_qr_png(&"A".repeat(8000)).unwrap_err();
        assert_eq!(err.kind(), "OnboardingError");
    }
}
