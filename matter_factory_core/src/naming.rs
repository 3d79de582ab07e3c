//! Names of the directories and files in a certificate tree.
//!
//! ```text
//! <root>/
//!   ...-PAA-....der
//!   ...PAI-<VID>....der
//!   ...-CD-<VID>-<PID>....der
//!   DAC-<VID>-<PID>-<BATCH>/
//!     DAC-<VID>-<PID>-<BATCH>-<UNIT>/
//!       DAC-<VID>-<PID>-Cert-<BATCH>-<UNIT>.der
//!       DAC-<VID>-<PID>-PrivateKey-<BATCH>-<UNIT>.der[.enc]
//! ```
//!
//! VID and PID are 4 hex digits, BATCH 5 and UNIT 8.

use core::fmt;
use core::str::FromStr;

const DAC_PREFIX: &str = "DAC";
const DER_SUFFIX: &str = ".der";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchId {
    pub vid: u16,
    pub pid: u16,
    pub batch: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId {
    pub batch: BatchId,
    pub unit: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirName {
    Batch(BatchId),
    Unit(UnitId),
}

fn hex_field(s: &str, width: usize) -> Option<u32> {
    if s.len() != width || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(s, 16).ok()
}

/// Classifies a directory name, `None` if it is neither a batch nor a unit.
pub fn parse_dir_name(name: &str) -> Option<DirName> {
    let parts: Vec<&str> = name.split('-').collect();
    let (prefix, fields) = parts.split_first()?;
    if *prefix != DAC_PREFIX {
        return None;
    }
    let batch = match fields {
        [vid, pid, batch] | [vid, pid, batch, _] => BatchId {
            vid: hex_field(vid, 4)? as u16,
            pid: hex_field(pid, 4)? as u16,
            batch: hex_field(batch, 5)?,
        },
        _ => return None,
    };
    match fields {
        [_, _, _, unit] => Some(DirName::Unit(UnitId {
            batch,
            unit: hex_field(unit, 8)?,
        })),
        _ => Some(DirName::Batch(batch)),
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{:04X}-{:04X}-{:05X}",
            DAC_PREFIX, self.vid, self.pid, self.batch
        )
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:08X}", self.batch, self.unit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseDirNameError(pub String);

impl fmt::Display for ParseDirNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' is not a DAC batch or unit directory name", self.0)
    }
}

impl std::error::Error for ParseDirNameError {}

impl FromStr for BatchId {
    type Err = ParseDirNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match parse_dir_name(s) {
            Some(DirName::Batch(batch)) => Ok(batch),
            _ => Err(ParseDirNameError(s.to_string())),
        }
    }
}

impl FromStr for UnitId {
    type Err = ParseDirNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match parse_dir_name(s) {
            Some(DirName::Unit(unit)) => Ok(unit),
            _ => Err(ParseDirNameError(s.to_string())),
        }
    }
}

impl UnitId {
    pub fn dac_cert_file_name(&self) -> String {
        format!(
            "{}-{:04X}-{:04X}-Cert-{:05X}-{:08X}{}",
            DAC_PREFIX, self.batch.vid, self.batch.pid, self.batch.batch, self.unit, DER_SUFFIX
        )
    }

    /// Key file names in order of preference, pre-encrypted first.
    pub fn dac_key_file_names(&self) -> [String; 2] {
        let plain = format!(
            "{}-{:04X}-{:04X}-PrivateKey-{:05X}-{:08X}{}",
            DAC_PREFIX, self.batch.vid, self.batch.pid, self.batch.batch, self.unit, DER_SUFFIX
        );
        [format!("{}.enc", plain), plain]
    }
}

/// Whether any `-<TAG>-` style marker in `name` is followed by hex fields
/// equal to `ids`.
fn tagged_with(name: &str, marker: &str, ids: &[u16]) -> bool {
    name.match_indices(marker).any(|(at, _)| {
        let mut rest = &name[at + marker.len()..];
        ids.iter().enumerate().all(|(i, id)| {
            if i > 0 {
                match rest.strip_prefix('-') {
                    Some(r) => rest = r,
                    None => return false,
                }
            }
            let matched = rest
                .get(..4)
                .and_then(|field| hex_field(field, 4))
                .is_some_and(|value| value == u32::from(*id));
            rest = rest.get(4..).unwrap_or("");
            matched
        })
    })
}

/// `...PAI-<VID>....der`
pub fn is_pai_for(file_name: &str, vid: u16) -> bool {
    file_name.ends_with(DER_SUFFIX) && tagged_with(file_name, "PAI-", &[vid])
}

/// `...-PAA-....der`
pub fn is_paa(file_name: &str) -> bool {
    file_name.ends_with(DER_SUFFIX) && file_name.contains("-PAA-")
}

/// `...-CD-<VID>-<PID>....der`
pub fn is_cd_for(file_name: &str, vid: u16, pid: u16) -> bool {
    file_name.ends_with(DER_SUFFIX) && tagged_with(file_name, "-CD-", &[vid, pid])
}
