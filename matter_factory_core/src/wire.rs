//! Protobuf messages read by the device's factory data loader.
//!
//! Every variable length field is wrapped in [`LengthBytes`] which carries an
//! explicit length next to the bytes, the shape the nanopb decoder on the
//! device expects.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LengthBytes {
    #[prost(bytes = "vec", tag = "1")]
    pub value: Vec<u8>,
    #[prost(uint32, tag = "2")]
    pub length: u32,
}

impl LengthBytes {
    pub fn new(value: Vec<u8>) -> Self {
        Self {
            length: value.len() as u32,
            value,
        }
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CommissionableData {
    #[prost(uint32, tag = "1")]
    pub passcode: u32,
    #[prost(uint32, tag = "2")]
    pub discriminator: u32,
    #[prost(uint32, tag = "3")]
    pub spake2_it: u32,
    #[prost(message, optional, tag = "4")]
    pub spake2_salt: Option<LengthBytes>,
    #[prost(message, optional, tag = "5")]
    pub spake2_verifier: Option<LengthBytes>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeviceAttestationCredentials {
    #[prost(message, optional, tag = "1")]
    pub cd: Option<LengthBytes>,
    #[prost(message, optional, tag = "2")]
    pub dac_cert: Option<LengthBytes>,
    #[prost(message, optional, tag = "3")]
    pub dac_key: Option<LengthBytes>,
    #[prost(message, optional, tag = "4")]
    pub pai_cert: Option<LengthBytes>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeviceInstanceInfo {
    #[prost(uint32, optional, tag = "1")]
    pub vendor_id: Option<u32>,
    #[prost(message, optional, tag = "2")]
    pub vendor_name: Option<LengthBytes>,
    #[prost(uint32, optional, tag = "3")]
    pub product_id: Option<u32>,
    #[prost(message, optional, tag = "4")]
    pub product_name: Option<LengthBytes>,
    #[prost(uint32, optional, tag = "5")]
    pub hw_ver: Option<u32>,
    #[prost(message, optional, tag = "6")]
    pub hw_ver_string: Option<LengthBytes>,
    #[prost(message, optional, tag = "7")]
    pub mfg_date: Option<LengthBytes>,
    #[prost(message, optional, tag = "8")]
    pub serial_num: Option<LengthBytes>,
    #[prost(message, optional, tag = "9")]
    pub rd_id_uid: Option<LengthBytes>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FactoryDataProvider {
    #[prost(message, optional, tag = "1")]
    pub cdata: Option<CommissionableData>,
    #[prost(message, optional, tag = "2")]
    pub dac: Option<DeviceAttestationCredentials>,
    #[prost(message, optional, tag = "3")]
    pub dii: Option<DeviceInstanceInfo>,
}
