//! Error types for matter_factory_core

use core::fmt;
use std::io;
use std::path::PathBuf;

#[derive(Debug)]
pub enum ProvisionError {
    /// A user supplied field is out of range or has the wrong length
    Validation {
        /// The name of the offending field
        field: &'static str,
        reason: String,
    },
    /// A required certificate or key file is absent or unreadable
    MissingArtifact { path: PathBuf, source: io::Error },
    /// An external tool failed, timed out, or printed something we can't parse
    ExternalTool { tool: String, detail: String },
    /// The DER private key couldn't be parsed or decrypted
    KeyExtraction { path: PathBuf, detail: String },
    /// The serialized record doesn't fit in the 2-byte length prefix
    Overflow { length: usize },
    /// Writing a finished artifact failed
    Output { path: PathBuf, source: io::Error },
    /// The onboarding codes couldn't be rendered
    Onboarding { detail: String },
}

impl ProvisionError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        ProvisionError::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub fn external_tool(tool: impl Into<String>, detail: impl Into<String>) -> Self {
        ProvisionError::ExternalTool {
            tool: tool.into(),
            detail: detail.into(),
        }
    }

    /// Short name of the error kind, used in batch reports.
    pub fn kind(&self) -> &'static str {
        match self {
            ProvisionError::Validation { .. } => "ValidationError",
            ProvisionError::MissingArtifact { .. } => "MissingArtifactError",
            ProvisionError::ExternalTool { .. } => "ExternalToolError",
            ProvisionError::KeyExtraction { .. } => "KeyExtractionError",
            ProvisionError::Overflow { .. } => "OverflowError",
            ProvisionError::Output { .. } => "OutputError",
            ProvisionError::Onboarding { .. } => "OnboardingError",
        }
    }
}

impl fmt::Display for ProvisionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisionError::Validation { field, reason } => {
                write!(f, "invalid {}: {}", field, reason)
            }
            ProvisionError::MissingArtifact { path, source } => {
                write!(f, "unable to read {}: {}", path.display(), source)
            }
            ProvisionError::ExternalTool { tool, detail } => {
                write!(f, "{} failed: {}", tool, detail)
            }
            ProvisionError::KeyExtraction { path, detail } => {
                write!(
                    f,
                    "unable to extract private key from {}: {}",
                    path.display(),
                    detail
                )
            }
            ProvisionError::Overflow { length } => {
                write!(
                    f,
                    "record is {} bytes which exceeds the {} byte length prefix limit",
                    length,
                    u16::MAX
                )
            }
            ProvisionError::Output { path, source } => {
                write!(f, "unable to write {}: {}", path.display(), source)
            }
            ProvisionError::Onboarding { detail } => {
                write!(f, "unable to render onboarding codes: {}", detail)
            }
        }
    }
}

impl std::error::Error for ProvisionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProvisionError::MissingArtifact { source, .. }
            | ProvisionError::Output { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum LedgerError {
    Io { path: PathBuf, source: io::Error },
    /// A row in an existing ledger doesn't have the expected shape
    Malformed { line: usize, content: String },
    /// The serial has already been committed to the ledger
    DuplicateSerial { serial: String },
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::Io { path, source } => {
                write!(f, "ledger {}: {}", path.display(), source)
            }
            LedgerError::Malformed { line, content } => {
                write!(f, "malformed ledger row {}: '{}'", line, content)
            }
            LedgerError::DuplicateSerial { serial } => {
                write!(f, "serial {} is already recorded in the ledger", serial)
            }
        }
    }
}

impl std::error::Error for LedgerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LedgerError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum BatchError {
    /// The certificate root (or one of its batch directories) couldn't be listed
    Discovery { path: PathBuf, source: io::Error },
    /// The shared device profile is invalid, nothing was read or written
    Validation(ProvisionError),
    Ledger(LedgerError),
    /// Every serial up to `u64::MAX` has been handed out
    SerialsExhausted,
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchError::Discovery { path, source } => {
                write!(f, "unable to list {}: {}", path.display(), source)
            }
            BatchError::Validation(e) => write!(f, "device profile: {}", e),
            BatchError::Ledger(e) => write!(f, "{}", e),
            BatchError::SerialsExhausted => write!(f, "no serial numbers left to assign"),
        }
    }
}

impl std::error::Error for BatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BatchError::Discovery { source, .. } => Some(source),
            BatchError::Validation(e) => Some(e),
            BatchError::Ledger(e) => Some(e),
            BatchError::SerialsExhausted => None,
        }
    }
}

impl From<LedgerError> for BatchError {
    fn from(e: LedgerError) -> Self {
        BatchError::Ledger(e)
    }
}
