//! The append-only ledger mapping serial numbers to units.
//!
//! One comma separated row per provisioned unit, all values upper-case hex:
//!
//! ```text
//! serial,vid,pid,batch_no,unit_no
//! 0000000000000000,0123,ABCD,00001,00000001
//! ```

use crate::naming::{BatchId, UnitId};
use crate::LedgerError;
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::*;

pub const LEDGER_FILE: &str = "sn_device_map.csv";
pub const HEADER: &str = "serial,vid,pid,batch_no,unit_no";

/// The textual serial number, as stored on the device and in the ledger.
pub fn serial_string(serial: u64) -> String {
    format!("{:016X}", serial)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerEntry {
    pub serial_number: u64,
    pub vendor_id: u16,
    pub product_id: u16,
    pub batch_number: u32,
    pub unit_number: u32,
}

impl LedgerEntry {
    pub fn new(serial_number: u64, unit: UnitId) -> Self {
        Self {
            serial_number,
            vendor_id: unit.batch.vid,
            product_id: unit.batch.pid,
            batch_number: unit.batch.batch,
            unit_number: unit.unit,
        }
    }

    pub fn unit_id(&self) -> UnitId {
        UnitId {
            batch: BatchId {
                vid: self.vendor_id,
                pid: self.product_id,
                batch: self.batch_number,
            },
            unit: self.unit_number,
        }
    }

    pub fn to_row(&self) -> String {
        format!(
            "{},{:04X},{:04X},{:05X},{:08X}",
            serial_string(self.serial_number),
            self.vendor_id,
            self.product_id,
            self.batch_number,
            self.unit_number
        )
    }

    pub fn from_row(row: &str) -> Option<Self> {
        let fields: Vec<&str> = row.trim().split(',').collect();
        let [serial, vid, pid, batch, unit] = fields.as_slice() else {
            return None;
        };
        Some(Self {
            serial_number: u64::from_str_radix(serial, 16).ok()?,
            vendor_id: u16::from_str_radix(vid, 16).ok()?,
            product_id: u16::from_str_radix(pid, 16).ok()?,
            batch_number: u32::from_str_radix(batch, 16).ok()?,
            unit_number: u32::from_str_radix(unit, 16).ok()?,
        })
    }
}

/// Single writer handle on a ledger file plus an index of what it already holds.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    serials: HashSet<u64>,
    units: HashSet<UnitId>,
    /// Length to cut the file back to before the next append, set when the
    /// last line was never completed
    committed_len: Option<u64>,
}

impl Ledger {
    /// Opens the ledger at `path`, loading existing rows. A missing file is an
    /// empty ledger; nothing is created until the first append.
    ///
    /// A final line without a newline is a row whose append was interrupted.
    /// It is ignored and removed before the next append.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let mut ledger = Ledger {
            path,
            serials: HashSet::new(),
            units: HashSet::new(),
            committed_len: None,
        };

        if !ledger.path.exists() {
            return Ok(ledger);
        }

        let contents = fs::read_to_string(&ledger.path).map_err(|source| LedgerError::Io {
            path: ledger.path.clone(),
            source,
        })?;
        let complete = contents.rfind('\n').map_or(0, |at| at + 1);
        if complete < contents.len() {
            warn!(
                path = ledger.path.display().to_string(),
                line = contents[complete..].trim_end(),
                "ignoring an unfinished last ledger row"
            );
            ledger.committed_len = Some(complete as u64);
        }
        for (i, line) in contents[..complete].lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || (i == 0 && line == HEADER) {
                continue;
            }
            let entry = LedgerEntry::from_row(line).ok_or_else(|| LedgerError::Malformed {
                line: i + 1,
                content: line.to_string(),
            })?;
            ledger.serials.insert(entry.serial_number);
            ledger.units.insert(entry.unit_id());
        }
        debug!(
            path = ledger.path.display().to_string(),
            rows = ledger.serials.len(),
            "loaded ledger"
        );
        Ok(ledger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.serials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.serials.is_empty()
    }

    pub fn contains_unit(&self, unit: &UnitId) -> bool {
        self.units.contains(unit)
    }

    pub fn contains_serial(&self, serial: u64) -> bool {
        self.serials.contains(&serial)
    }

    /// Durably appends one row, writing the header first if the file is new.
    pub fn append(&mut self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        if self.contains_serial(entry.serial_number) {
            return Err(LedgerError::DuplicateSerial {
                serial: serial_string(entry.serial_number),
            });
        }

        let io_err = |source| LedgerError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(len) = self.committed_len {
            let file = OpenOptions::new()
                .write(true)
                .open(&self.path)
                .map_err(io_err)?;
            file.set_len(len).map_err(io_err)?;
            file.sync_all().map_err(io_err)?;
            self.committed_len = None;
        }
        let is_new = fs::metadata(&self.path)
            .map(|meta| meta.len() == 0)
            .unwrap_or(true);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;

        let mut rows = String::new();
        if is_new {
            rows.push_str(HEADER);
            rows.push('\n');
        }
        rows.push_str(&entry.to_row());
        rows.push('\n');
        file.write_all(rows.as_bytes()).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;

        self.serials.insert(entry.serial_number);
        self.units.insert(entry.unit_id());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(n: u32) -> UnitId {
        UnitId {
            batch: BatchId {
                vid: 0x0123,
                pid: 0xABCD,
                batch: 1,
            },
            unit: n,
        }
    }

    #[test]
    fn row_format() {
        let entry = LedgerEntry::new(0, unit(1));
        assert_eq!(entry.to_row(), "0000000000000000,0123,ABCD,00001,00000001");
        assert_eq!(LedgerEntry::from_row(&entry.to_row()), Some(entry));
        assert_eq!(LedgerEntry::from_row("0,1,2,3"), None);
    }

    #[test]
    fn header_written_once_and_rows_appended_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LEDGER_FILE);

        let mut ledger = Ledger::open(&path).unwrap();
        assert!(ledger.is_empty());
        assert!(!path.exists());
        ledger.append(&LedgerEntry::new(0x10, unit(1))).unwrap();
        ledger.append(&LedgerEntry::new(0x11, unit(2))).unwrap();
        drop(ledger);

        // a fresh handle, like a restarted process
        let mut ledger = Ledger::open(&path).unwrap();
        assert_eq!(ledger.len(), 2);
        assert!(ledger.contains_unit(&unit(2)));
        ledger.append(&LedgerEntry::new(0x12, unit(3))).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents,
            "serial,vid,pid,batch_no,unit_no\n\
             0000000000000010,0123,ABCD,00001,00000001\n\
             0000000000000011,0123,ABCD,00001,00000002\n\
             0000000000000012,0123,ABCD,00001,00000003\n"
        );
    }

    #[test]
    fn duplicate_serial_is_refused_and_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LEDGER_FILE);
        let mut ledger = Ledger::open(&path).unwrap();
        ledger.append(&LedgerEntry::new(7, unit(1))).unwrap();
        let before = fs::read_to_string(&path).unwrap();

        assert!(matches!(
            ledger.append(&LedgerEntry::new(7, unit(2))),
            Err(LedgerError::DuplicateSerial { .. })
        ));
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
    }

    #[test]
    fn malformed_rows_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LEDGER_FILE);
        fs::write(&path, format!("{}\nnot,a,row\n", HEADER)).unwrap();
        assert!(matches!(
            Ledger::open(&path),
            Err(LedgerError::Malformed { line: 2, .. })
        ));
    }

    #[test]
    fn unfinished_last_row_is_dropped_on_next_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LEDGER_FILE);
        fs::write(
            &path,
            format!("{}\n0000000000000000,0123,ABCD,00001,00000001\n00000000000000", HEADER),
        )
        .unwrap();

        let mut ledger = Ledger::open(&path).unwrap();
        assert_eq!(ledger.len(), 1);
        assert!(!ledger.contains_unit(&unit(2)));
        ledger.append(&LedgerEntry::new(1, unit(2))).unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "serial,vid,pid,batch_no,unit_no\n\
             0000000000000000,0123,ABCD,00001,00000001\n\
             0000000000000001,0123,ABCD,00001,00000002\n"
        );
    }

    #[test]
    fn unfinished_header_is_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LEDGER_FILE);
        fs::write(&path, "serial,vid").unwrap();

        let mut ledger = Ledger::open(&path).unwrap();
        assert!(ledger.is_empty());
        ledger.append(&LedgerEntry::new(0, unit(1))).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            format!("{}\n0000000000000000,0123,ABCD,00001,00000001\n", HEADER)
        );
    }
}
