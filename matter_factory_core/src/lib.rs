//! Matter factory data provisioning.
//!
//! A single device goes through [`pipeline::DeviceProvisioner`]: validate the
//! inputs, derive the SPAKE2+ verifier, assemble and serialize the record,
//! optionally encrypt it and write it length-prefixed next to its onboarding
//! codes. [`batch::BatchRunner`] drives that over a whole certificate tree and
//! keeps the serial number [`ledger`].
#![forbid(unsafe_code)]

mod error;

pub mod batch;
pub mod cipher;
pub mod codec;
pub mod discovery;
pub mod ledger;
pub mod naming;
pub mod onboarding;
pub mod pipeline;
pub mod record;
pub mod spake2p;
pub mod tool;
pub mod validate;
pub mod wire;

pub use error::*;

pub use batch::{BatchConfig, BatchReport, BatchRunner, DeviceProfile};
pub use cipher::{Aes256Ctr, CipherKey, OpensslCipher, RecordCipher};
pub use onboarding::{MatterSetupCodec, OnboardingEncoder};
pub use pipeline::{CipherBackend, DeviceProvisioner, OutputLayout, PipelineError, Stage};
pub use record::{AttestationPaths, FactoryRecord};
pub use spake2p::{Spake2pTool, VerifierGenerator};
pub use validate::DeviceArgs;
