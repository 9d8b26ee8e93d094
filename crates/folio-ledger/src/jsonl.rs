//! JSONL ledger: one file per key, one line per event.
//!
//! ```text
//! <root>/<unit>/unit.jsonl
//! <root>/<unit>/pages/page-NNNN.jsonl
//! <root>/<unit>/gates/<gate>.jsonl
//! ```
//!
//! Appends take the file's lock, write one line and sync before release.
//! Reads refuse files containing NUL or non-UTF-8 bytes rather than guess.

use folio_kernel::record::GateId;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::event::{LEDGER_EVENT_SCHEMA, LedgerEvent};
use crate::ledger::{Ledger, LedgerError, LedgerKey, check_key};
use crate::lock::FileLockGuard;

const UNIT_FILE: &str = "unit.jsonl";
const PAGES_DIR: &str = "pages";
const GATES_DIR: &str = "gates";

/// Read events from a JSONL reader. `source` names the stream in errors.
pub fn read_events(reader: impl BufRead, source: &str) -> Result<Vec<LedgerEvent>, LedgerError> {
    let mut events = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| LedgerError::io(source, e))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let event: LedgerEvent = serde_json::from_str(trimmed).map_err(|e| LedgerError::Parse {
            path: source.to_string(),
            line: line_no + 1,
            message: e.to_string(),
        })?;
        if event.schema != LEDGER_EVENT_SCHEMA {
            return Err(LedgerError::UnsupportedSchema {
                path: source.to_string(),
                line: line_no + 1,
                schema: event.schema,
            });
        }
        events.push(event);
    }
    Ok(events)
}

/// Encode one event as a single JSONL line (without newline).
pub fn encode_event(event: &LedgerEvent) -> Result<String, LedgerError> {
    serde_json::to_string(event).map_err(|e| LedgerError::Serialize(e.to_string()))
}

pub fn read_events_from_path(path: &Path) -> Result<Vec<LedgerEvent>, LedgerError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(LedgerError::io(path.display(), e)),
    };
    validate_substrate_bytes(path, &bytes)?;
    read_events(BufReader::new(bytes.as_slice()), &path.display().to_string())
}

fn validate_substrate_bytes(path: &Path, bytes: &[u8]) -> Result<(), LedgerError> {
    if bytes.contains(&0) {
        return Err(LedgerError::Corrupt(format!(
            "{}: contains NUL byte(s)",
            path.display()
        )));
    }
    if std::str::from_utf8(bytes).is_err() {
        return Err(LedgerError::Corrupt(format!(
            "{}: contains non-UTF-8 byte sequence(s)",
            path.display()
        )));
    }
    Ok(())
}

/// Unit ids become directory names.
pub fn validate_unit_id(unit_id: &str) -> Result<(), LedgerError> {
    let valid = !unit_id.is_empty()
        && !unit_id.starts_with('.')
        && unit_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(LedgerError::InvalidUnitId(unit_id.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct JsonlLedger {
    root: PathBuf,
}

impl JsonlLedger {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &LedgerKey) -> Result<PathBuf, LedgerError> {
        validate_unit_id(key.unit_id())?;
        let unit_dir = self.root.join(key.unit_id());
        Ok(match key {
            LedgerKey::Unit(_) => unit_dir.join(UNIT_FILE),
            LedgerKey::Page(_, page) => unit_dir.join(PAGES_DIR).join(format!("page-{page:04}.jsonl")),
            LedgerKey::Gate(_, gate) => unit_dir.join(GATES_DIR).join(format!("{gate}.jsonl")),
        })
    }
}

fn parse_page_file(name: &str) -> Option<u32> {
    name.strip_prefix("page-")?.strip_suffix(".jsonl")?.parse().ok()
}

impl Ledger for JsonlLedger {
    fn append(&self, key: &LedgerKey, event: LedgerEvent) -> Result<(), LedgerError> {
        check_key(key, &event)?;
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| LedgerError::io(parent.display(), e))?;
        }
        let line = encode_event(&event)?;

        let _guard = FileLockGuard::acquire(&path)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| LedgerError::io(path.display(), e))?;
        writeln!(file, "{line}").map_err(|e| LedgerError::io(path.display(), e))?;
        file.sync_data()
            .map_err(|e| LedgerError::io(path.display(), e))?;

        debug!(key = %key, action = event.action.as_str(), "ledger append");
        Ok(())
    }

    fn history(&self, key: &LedgerKey) -> Result<Vec<LedgerEvent>, LedgerError> {
        read_events_from_path(&self.path_for(key)?)
    }

    fn page_keys(&self, unit_id: &str) -> Result<Vec<LedgerKey>, LedgerError> {
        validate_unit_id(unit_id)?;
        let dir = self.root.join(unit_id).join(PAGES_DIR);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(LedgerError::io(dir.display(), e)),
        };
        let mut pages = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| LedgerError::io(dir.display(), e))?;
            if let Some(page) = entry.file_name().to_str().and_then(parse_page_file) {
                pages.push(page);
            }
        }
        pages.sort_unstable();
        Ok(pages
            .into_iter()
            .map(|page| LedgerKey::Page(unit_id.to_string(), page))
            .collect())
    }

    fn units(&self) -> Result<Vec<String>, LedgerError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(LedgerError::io(self.root.display(), e)),
        };
        let mut units = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| LedgerError::io(self.root.display(), e))?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if validate_unit_id(&name).is_ok() && entry.path().join(UNIT_FILE).is_file() {
                units.push(name);
            }
        }
        units.sort();
        Ok(units)
    }
}

/// Every gate key for a unit, in gate order.
pub fn gate_keys(unit_id: &str) -> Vec<LedgerKey> {
    GateId::ALL
        .into_iter()
        .map(|gate| LedgerKey::Gate(unit_id.to_string(), gate))
        .collect()
}
