use log::{debug, info, warn};
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, TelemetryError};
use crate::record::{schema, PersistedRow, FIXED_COLUMNS};

/// Numeric rows read back from the store, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl Table {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Returns the table without `name`; unchanged if there is no such column.
    pub fn without_column(mut self, name: &str) -> Self {
        if let Some(idx) = self.column_index(name) {
            self.columns.remove(idx);
            for row in &mut self.rows {
                row.remove(idx);
            }
        }
        self
    }
}

/// Append-only CSV log of persisted rows with a fixed header.
///
/// The preprocessor is the only writer and the trainer the only reader. Each
/// row goes out in a single append, and the reader ignores a trailing line that
/// is not yet newline-terminated, so the two never need a lock.
#[derive(Debug, Clone)]
pub struct PersistentStore {
    path: PathBuf,
    columns: Vec<String>,
}

impl PersistentStore {
    pub fn new(path: impl Into<PathBuf>, num_beacons: usize) -> Self {
        Self {
            path: path.into(),
            columns: schema(num_beacons),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn num_beacons(&self) -> usize {
        self.columns.len() - FIXED_COLUMNS
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Creates the store with its header if absent. An existing store is never
    /// rewritten; its header must match the configured columns.
    pub fn prepare(&self) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        match OpenOptions::new().write(true).create_new(true).open(&self.path) {
            Ok(mut file) => {
                file.write_all(&encode_line(&self.columns)?)?;
                info!("Created store {} with {} columns", self.path.display(), self.columns.len());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                self.drop_partial_line()?;
                if fs::metadata(&self.path)?.len() == 0 {
                    // Created but the header never made it to disk.
                    let mut file = OpenOptions::new().append(true).open(&self.path)?;
                    file.write_all(&encode_line(&self.columns)?)?;
                    return Ok(());
                }
                let mut reader = csv::Reader::from_path(&self.path)?;
                self.check_header(reader.headers()?)?;
                debug!("Reusing store {}", self.path.display());
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Cuts a trailing line left without its newline by an interrupted append,
    /// so the next row starts on a line of its own.
    fn drop_partial_line(&self) -> Result<()> {
        let buf = fs::read(&self.path)?;
        if buf.is_empty() || buf.ends_with(b"\n") {
            return Ok(());
        }
        let keep = buf.iter().rposition(|&b| b == b'\n').map_or(0, |i| i + 1);
        warn!(
            "Truncating {} bytes of an interrupted row at the end of {}",
            buf.len() - keep,
            self.path.display()
        );
        OpenOptions::new().write(true).open(&self.path)?.set_len(keep as u64)?;
        Ok(())
    }

    pub fn append(&self, row: &PersistedRow) -> Result<()> {
        if row.values().len() != self.columns.len() {
            return Err(TelemetryError::MalformedRecord(format!(
                "row has {} fields, store expects {}",
                row.values().len(),
                self.columns.len()
            )));
        }
        let line = encode_line(row.fields())?;
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(&line)?;
        Ok(())
    }

    /// Reads the last `limit` complete rows. `None` when the store does not
    /// exist yet (or its header is still being written).
    pub fn read_tail(&self, limit: usize) -> Result<Option<Table>> {
        let mut buf = Vec::new();
        match File::open(&self.path) {
            Ok(mut file) => {
                file.read_to_end(&mut buf)?;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let complete = buf.iter().rposition(|&b| b == b'\n').map_or(0, |i| i + 1);
        if complete == 0 {
            return Ok(None);
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(&buf[..complete]);
        self.check_header(reader.headers()?)?;

        let mut rows: VecDeque<Vec<f64>> = VecDeque::new();
        let mut records = reader.records().peekable();
        while let Some(record) = records.next() {
            let record = record?;
            let line = record.position().map_or(0, |p| p.line());
            if record.len() != self.columns.len() {
                if records.peek().is_none() {
                    debug!("Ignoring short trailing row at line {}", line);
                    break;
                }
                return Err(TelemetryError::CorruptRow {
                    line,
                    reason: format!("{} fields, expected {}", record.len(), self.columns.len()),
                });
            }
            if limit == 0 {
                continue;
            }
            let row = record
                .iter()
                .map(|field| parse_field(field, line))
                .collect::<Result<Vec<f64>>>()?;
            if rows.len() == limit {
                rows.pop_front();
            }
            rows.push_back(row);
        }

        Ok(Some(Table {
            columns: self.columns.clone(),
            rows: rows.into(),
        }))
    }

    pub fn row_count(&self) -> Result<usize> {
        Ok(self.read_tail(usize::MAX)?.map_or(0, |t| t.len()))
    }

    fn check_header(&self, header: &csv::StringRecord) -> Result<()> {
        if header.iter().eq(self.columns.iter().map(String::as_str)) {
            Ok(())
        } else {
            Err(TelemetryError::SchemaMismatch {
                expected: self.columns.clone(),
                found: header.iter().map(str::to_string).collect(),
            })
        }
    }
}

fn parse_field(field: &str, line: u64) -> Result<f64> {
    if field.is_empty() {
        return Ok(f64::NAN);
    }
    field.parse().map_err(|e| TelemetryError::CorruptRow {
        line,
        reason: format!("`{field}`: {e}"),
    })
}

fn encode_line<I, T>(fields: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(fields)?;
    writer.into_inner().map_err(|e| TelemetryError::Io(e.into_error()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Position, TelemetryRecord};
    use tempfile::tempdir;

    fn row(ts: f64, beacon: f64) -> PersistedRow {
        TelemetryRecord {
            position: Position {
                x: 1.0,
                y: 2.0,
                z: 3.0,
            },
            timestamp: ts,
            measurements: [("Beacon1".to_string(), beacon)].into_iter().collect(),
        }
        .to_row(1)
        .unwrap()
    }

    #[test]
    fn test_prepare_writes_header_once() {
        let dir = tempdir().unwrap();
        let store = PersistentStore::new(dir.path().join("data/store.csv"), 2);
        store.prepare().unwrap();
        store.prepare().unwrap();

        let text = fs::read_to_string(store.path()).unwrap();
        assert_eq!(text, "x,y,z,timestamp,beacon_1,beacon_2\n");
    }

    #[test]
    fn test_prepare_keeps_existing_rows() {
        let dir = tempdir().unwrap();
        let store = PersistentStore::new(dir.path().join("store.csv"), 1);
        store.prepare().unwrap();
        store.append(&row(100.0, -50.0)).unwrap();

        let reopened = PersistentStore::new(store.path(), 1);
        reopened.prepare().unwrap();
        assert_eq!(reopened.row_count().unwrap(), 1);
    }

    #[test]
    fn test_header_mismatch_is_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.csv");
        PersistentStore::new(&path, 2).prepare().unwrap();

        let err = PersistentStore::new(&path, 3).prepare().unwrap_err();
        assert!(matches!(err, TelemetryError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_missing_store_reads_as_none() {
        let dir = tempdir().unwrap();
        let store = PersistentStore::new(dir.path().join("absent.csv"), 1);
        assert!(store.read_tail(10).unwrap().is_none());
        assert_eq!(store.row_count().unwrap(), 0);
    }

    #[test]
    fn test_read_tail_keeps_most_recent_rows() {
        let dir = tempdir().unwrap();
        let store = PersistentStore::new(dir.path().join("store.csv"), 1);
        store.prepare().unwrap();
        for ts in 0..10 {
            store.append(&row(ts as f64, -40.0 - ts as f64)).unwrap();
        }

        let table = store.read_tail(3).unwrap().unwrap();
        let stamps: Vec<f64> = table.rows.iter().map(|r| r[3]).collect();
        assert_eq!(stamps, [7.0, 8.0, 9.0]);
        assert_eq!(table.columns, ["x", "y", "z", "timestamp", "beacon_1"]);
    }

    #[test]
    fn test_trailing_partial_line_is_ignored() {
        let dir = tempdir().unwrap();
        let store = PersistentStore::new(dir.path().join("store.csv"), 1);
        store.prepare().unwrap();
        store.append(&row(1.0, -50.0)).unwrap();
        OpenOptions::new()
            .append(true)
            .open(store.path())
            .unwrap()
            .write_all(b"4,5,6,2,-5")
            .unwrap();

        let table = store.read_tail(100).unwrap().unwrap();
        assert_eq!(table.rows, vec![vec![1.0, 2.0, 3.0, 1.0, -50.0]]);
    }

    #[test]
    fn test_interrupted_append_is_cut_on_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.csv");
        let store = PersistentStore::new(&path, 1);
        store.prepare().unwrap();
        store.append(&row(1.0, -50.0)).unwrap();
        OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(b"4,5,6,2")
            .unwrap();

        let restarted = PersistentStore::new(&path, 1);
        restarted.prepare().unwrap();
        restarted.append(&row(2.0, -60.0)).unwrap();
        restarted.append(&row(3.0, -70.0)).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "x,y,z,timestamp,beacon_1\n1,2,3,1,-50\n1,2,3,2,-60\n1,2,3,3,-70\n"
        );
        assert_eq!(restarted.read_tail(100).unwrap().unwrap().len(), 3);
    }

    #[test]
    fn test_interrupted_header_is_rewritten() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.csv");
        fs::write(&path, "x,y,z,time").unwrap();

        PersistentStore::new(&path, 1).prepare().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "x,y,z,timestamp,beacon_1\n");
    }

    #[test]
    fn test_short_rows_only_tolerated_at_the_end() {
        let dir = tempdir().unwrap();
        let store = PersistentStore::new(dir.path().join("store.csv"), 1);
        store.prepare().unwrap();
        store.append(&row(1.0, -50.0)).unwrap();
        let mut file = OpenOptions::new().append(true).open(store.path()).unwrap();
        file.write_all(b"4,5\n").unwrap();
        assert_eq!(store.read_tail(100).unwrap().unwrap().len(), 1);

        file.write_all(b"4,5,6,2,-5\n").unwrap();
        let err = store.read_tail(100).unwrap_err();
        assert!(matches!(err, TelemetryError::CorruptRow { line: 3, .. }), "{err:?}");
    }

    #[test]
    fn test_empty_field_reads_as_nan() {
        let dir = tempdir().unwrap();
        let store = PersistentStore::new(dir.path().join("store.csv"), 2);
        store.prepare().unwrap();
        let partial = TelemetryRecord {
            position: Position {
                x: 0.0,
                y: 0.0,
                z: 0.0,
            },
            timestamp: 5.0,
            measurements: [("Beacon2".to_string(), -70.0)].into_iter().collect(),
        };
        store.append(&partial.to_row(2).unwrap()).unwrap();

        let table = store.read_tail(1).unwrap().unwrap();
        assert!(table.rows[0][4].is_nan());
        assert_eq!(table.rows[0][5], -70.0);
    }

    #[test]
    fn test_without_column() {
        let table = Table {
            columns: vec!["a".into(), "timestamp".into(), "b".into()],
            rows: vec![vec![1.0, 2.0, 3.0]],
        }
        .without_column("timestamp");
        assert_eq!(table.columns, ["a", "b"]);
        assert_eq!(table.rows, vec![vec![1.0, 3.0]]);
    }
}
