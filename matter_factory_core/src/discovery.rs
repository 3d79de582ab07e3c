//! Walking a certificate tree. Entries are visited in name order so serial
//! assignment is reproducible.

use crate::naming::{self, BatchId, DirName, UnitId};
use crate::{BatchError, ProvisionError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::*;

#[derive(Debug, Clone)]
pub struct UnitDir {
    pub id: UnitId,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct BatchDir {
    pub id: BatchId,
    pub path: PathBuf,
    pub units: Vec<UnitDir>,
}

/// Everything found under a certificate root.
#[derive(Debug, Clone)]
pub struct CertTree {
    pub root: PathBuf,
    /// Names of the plain files directly in the root, sorted
    pub root_files: Vec<String>,
    pub batches: Vec<BatchDir>,
}

struct Entry {
    name: String,
    path: PathBuf,
    is_dir: bool,
}

fn list_sorted(dir: &Path) -> Result<Vec<Entry>, BatchError> {
    let discovery_err = |source| BatchError::Discovery {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(discovery_err)? {
        let entry = entry.map_err(discovery_err)?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        let is_dir = entry.file_type().map_err(discovery_err)?.is_dir();
        entries.push(Entry {
            name,
            path: entry.path(),
            is_dir,
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

impl CertTree {
    pub fn scan(root: &Path) -> Result<Self, BatchError> {
        let mut root_files = Vec::new();
        let mut batches = Vec::new();

        for entry in list_sorted(root)? {
            if !entry.is_dir {
                root_files.push(entry.name);
                continue;
            }
            let Some(DirName::Batch(batch_id)) = naming::parse_dir_name(&entry.name) else {
                continue;
            };

            let mut units = Vec::new();
            for unit_entry in list_sorted(&entry.path)? {
                if !unit_entry.is_dir {
                    continue;
                }
                match naming::parse_dir_name(&unit_entry.name) {
                    Some(DirName::Unit(unit_id)) if unit_id.batch == batch_id => units.push(UnitDir {
                        id: unit_id,
                        path: unit_entry.path,
                    }),
                    Some(DirName::Unit(unit_id)) => {
                        warn!(
                            unit = unit_id.to_string(),
                            batch = batch_id.to_string(),
                            "unit directory does not belong to its batch, ignoring"
                        );
                    }
                    _ => {}
                }
            }

            debug!(batch = batch_id.to_string(), units = units.len(), "found batch");
            batches.push(BatchDir {
                id: batch_id,
                path: entry.path,
                units,
            });
        }

        Ok(CertTree {
            root: root.to_path_buf(),
            root_files,
            batches,
        })
    }

    fn find_root_file(&self, pred: impl Fn(&str) -> bool) -> Option<PathBuf> {
        self.root_files
            .iter()
            .find(|name| pred(name.as_str()))
            .map(|name| self.root.join(name))
    }

    pub fn find_pai(&self, vid: u16) -> Option<PathBuf> {
        self.find_root_file(|name| naming::is_pai_for(name, vid))
    }

    pub fn find_paa(&self) -> Option<PathBuf> {
        self.find_root_file(naming::is_paa)
    }

    pub fn find_cd(&self, vid: u16, pid: u16) -> Option<PathBuf> {
        self.find_root_file(|name| naming::is_cd_for(name, vid, pid))
    }

    pub fn unit_count(&self) -> usize {
        self.batches.iter().map(|batch| batch.units.len()).sum()
    }
}

fn not_found(path: PathBuf, what: &str) -> ProvisionError {
    ProvisionError::MissingArtifact {
        path,
        source: io::Error::new(io::ErrorKind::NotFound, format!("no {} found", what)),
    }
}

impl UnitDir {
    pub fn dac_cert(&self) -> Result<PathBuf, ProvisionError> {
        let path = self.path.join(self.id.dac_cert_file_name());
        if path.is_file() {
            Ok(path)
        } else {
            Err(not_found(path, "DAC certificate"))
        }
    }

    /// The pre-encrypted key if there is one, otherwise the plain DER key.
    pub fn dac_key(&self) -> Result<PathBuf, ProvisionError> {
        let candidates = self.id.dac_key_file_names();
        candidates
            .iter()
            .map(|name| self.path.join(name))
            .find(|path| path.is_file())
            .ok_or_else(|| not_found(self.path.join(&candidates[0]), "DAC private key"))
    }
}

/// Error for an authority file that discovery couldn't locate.
pub fn missing_authority(root: &Path, what: &str) -> ProvisionError {
    not_found(root.to_path_buf(), what)
}
