//! ==============================================================================
//! store.rs - durable append-only record store
//! ==============================================================================
//!
//! purpose:
//!     keeps every ingested reading as one line of a csv file. the file is the
//!     only authoritative copy; everything the dashboard sees is rebuilt from it.
//!
//! layout:
//!     MQ7,Flame,Temp,Humidity,WaterLevel,Soil,Rain,MQ135,Timestamp,Extra
//!
//!     metric cells are numbers or empty. Timestamp is local time as
//!     "%Y-%m-%d %H:%M:%S". Extra holds unknown frame keys as a json object.
//!
//! guarantees:
//!     - appends are serialized and each is fsync'd before it returns
//!     - a reader sees a row fully or not at all (shared lock vs exclusive lock)
//!     - reads bind cells by header name, appends require the exact header
//!     - a torn last line (crash or failed write) is cut off when the store is
//!       opened and again before every append
//!     - a file that shrinks under a reader's cursor is reread from the top
//!
//! this is all blocking std::fs io. async callers go through spawn_blocking.
//!
//! ==============================================================================

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use chrono::{NaiveDateTime, Timelike};

use crate::domain::{Metric, Reading, TIMESTAMP_FORMAT};
use crate::error::StoreError;

pub const COLUMNS: [&str; 10] = [
    "MQ7",
    "Flame",
    "Temp",
    "Humidity",
    "WaterLevel",
    "Soil",
    "Rain",
    "MQ135",
    "Timestamp",
    "Extra",
];

/// byte offset just past the last row a reader has consumed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    offset: u64,
}

impl Cursor {
    pub fn start() -> Self {
        Self::default()
    }
}

/// rows read by one `read_since` call plus where the next call should resume
#[derive(Debug)]
pub struct Batch {
    pub rows: Vec<Reading>,
    pub cursor: Cursor,
    /// the file shrank below the given cursor, so `rows` starts from the top
    pub rewound: bool,
}

pub struct RecordStore {
    path: PathBuf,
    // guards the file itself; the value is the newest stored timestamp
    last_timestamp: RwLock<Option<NaiveDateTime>>,
}

impl RecordStore {
    /// open the store at `path`, creating an empty one if there is none
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self {
            path: path.into(),
            last_timestamp: RwLock::new(None),
        };

        store.repair_torn_tail()?;
        drop(store.open_for_append()?);

        let last = store.read_all()?.last().map(|r| r.timestamp);
        *store
            .last_timestamp
            .write()
            .unwrap_or_else(PoisonError::into_inner) = last;

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// durably append one reading
    ///
    /// returns the reading as stored: truncated to whole seconds, and raised to
    /// the newest stored timestamp if the wall clock stepped back, so the
    /// column never decreases.
    pub fn append(&self, mut reading: Reading) -> Result<Reading, StoreError> {
        reading.timestamp = reading
            .timestamp
            .with_nanosecond(0)
            .unwrap_or(reading.timestamp);

        let mut last = self
            .last_timestamp
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(prev) = *last {
            if reading.timestamp < prev {
                tracing::debug!(%prev, now = %reading.timestamp, "clock went backwards, clamping timestamp");
                reading.timestamp = prev;
            }
        }

        let mut line = encode_reading(&reading)?;
        let mut file = self.open_for_append()?;

        // a row must start on a fresh line, whatever an earlier writer left
        let len = self.cut_torn_tail(&mut file)?;
        if len == 0 {
            let mut with_header = encode_line(COLUMNS)?;
            with_header.append(&mut line);
            line = with_header;
        }

        if let Err(e) = file.write_all(&line).and_then(|_| file.sync_data()) {
            // drop whatever part of the row made it to disk
            if let Err(rollback) = file.set_len(len).and_then(|_| file.sync_data()) {
                tracing::error!(
                    path = %self.path.display(),
                    error = %rollback,
                    "failed to roll back partial row"
                );
            }
            return Err(StoreError::unavailable(&self.path, e));
        }

        *last = Some(reading.timestamp);
        Ok(reading)
    }

    /// every stored reading, oldest first
    pub fn read_all(&self) -> Result<Vec<Reading>, StoreError> {
        Ok(self.read_since(Cursor::start())?.rows)
    }

    /// readings appended after `cursor`, oldest first
    pub fn read_since(&self, cursor: Cursor) -> Result<Batch, StoreError> {
        let _guard = self
            .last_timestamp
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Batch {
                    rows: Vec::new(),
                    cursor,
                    rewound: false,
                })
            }
            Err(e) => return Err(StoreError::unavailable(&self.path, e)),
        };

        // a file shorter than the cursor was replaced or truncated underneath us
        let len = file
            .metadata()
            .map_err(|e| StoreError::unavailable(&self.path, e))?
            .len();
        let rewound = cursor.offset > len;
        let cursor = if rewound {
            tracing::warn!(
                path = %self.path.display(),
                cursor = cursor.offset,
                len,
                "record store shrank, rereading from the start"
            );
            Cursor::start()
        } else {
            cursor
        };

        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(file);
        let headers = reader.headers()?.clone();
        if headers.is_empty() {
            return Ok(Batch {
                rows: Vec::new(),
                cursor,
                rewound,
            });
        }
        let columns = ColumnMap::from_headers(&self.path, &headers)?;

        if cursor.offset > reader.position().byte() {
            let mut pos = csv::Position::new();
            pos.set_byte(cursor.offset);
            reader.seek(pos)?;
        }

        let mut rows = Vec::new();
        let mut record = csv::StringRecord::new();
        while reader.read_record(&mut record)? {
            match columns.decode(&record) {
                Ok(reading) => rows.push(reading),
                Err(e) => tracing::warn!(
                    line = ?record.position().map(|p| p.line()),
                    error = %e,
                    "skipping unreadable row"
                ),
            }
        }

        Ok(Batch {
            rows,
            cursor: Cursor {
                offset: reader.position().byte(),
            },
            rewound,
        })
    }

    /// open for appending, writing the header into a new or empty file and
    /// refusing a file whose header is not exactly `COLUMNS`
    fn open_for_append(&self) -> Result<File, StoreError> {
        let io_err = |e: io::Error| StoreError::unavailable(&self.path, e);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(io_err)?;

        if file.metadata().map_err(io_err)?.len() == 0 {
            let header = encode_line(COLUMNS)?;
            file.write_all(&header)
                .and_then(|_| file.sync_data())
                .map_err(io_err)?;
            tracing::info!(path = %self.path.display(), "initialized empty record store");
            return Ok(file);
        }

        let mut first = String::new();
        BufReader::new(&file)
            .read_line(&mut first)
            .map_err(io_err)?;
        let found = first.trim_end_matches(['\r', '\n']);
        if found != COLUMNS.join(",") {
            return Err(StoreError::SchemaMismatch {
                path: self.path.clone(),
                found: found.to_string(),
            });
        }

        Ok(file)
    }

    fn repair_torn_tail(&self) -> Result<(), StoreError> {
        let io_err = |e: io::Error| StoreError::unavailable(&self.path, e);

        let mut file = match OpenOptions::new().read(true).write(true).open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(io_err(e)),
        };

        self.cut_torn_tail(&mut file)?;
        Ok(())
    }

    /// truncate anything after the last newline, returning the new length
    fn cut_torn_tail(&self, file: &mut File) -> Result<u64, StoreError> {
        let io_err = |e: io::Error| StoreError::unavailable(&self.path, e);

        let len = file.metadata().map_err(io_err)?.len();
        let keep = complete_prefix_len(file, len).map_err(io_err)?;
        if keep < len {
            tracing::warn!(
                path = %self.path.display(),
                dropped_bytes = len - keep,
                "truncating incomplete last row"
            );
            file.set_len(keep)
                .and_then(|_| file.sync_data())
                .map_err(io_err)?;
        }
        Ok(keep)
    }
}

/// length of the file up to and including its last newline
fn complete_prefix_len(file: &mut File, len: u64) -> io::Result<u64> {
    const CHUNK: u64 = 4096;
    let mut buf = [0u8; CHUNK as usize];
    let mut end = len;

    while end > 0 {
        let start = end.saturating_sub(CHUNK);
        let n = (end - start) as usize;
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut buf[..n])?;
        if let Some(pos) = buf[..n].iter().rposition(|&b| b == b'\n') {
            return Ok(start + pos as u64 + 1);
        }
        end = start;
    }
    Ok(0)
}

fn encode_line<I, T>(fields: I) -> Result<Vec<u8>, StoreError>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(fields)?;
    writer
        .into_inner()
        .map_err(|e| StoreError::Csv(e.into_error().into()))
}

fn encode_reading(reading: &Reading) -> Result<Vec<u8>, StoreError> {
    let mut fields: Vec<String> = reading
        .values()
        .iter()
        .map(|v| v.map(|n| n.to_string()).unwrap_or_default())
        .collect();
    fields.push(reading.formatted_timestamp());
    fields.push(if reading.extra.is_empty() {
        String::new()
    } else {
        serde_json::to_string(&reading.extra).map_err(|e| StoreError::BadRow(e.to_string()))?
    });

    encode_line(&fields)
}

/// header positions, looked up by name
struct ColumnMap {
    metrics: [usize; 8],
    timestamp: usize,
    extra: usize,
}

impl ColumnMap {
    fn from_headers(path: &Path, headers: &csv::StringRecord) -> Result<Self, StoreError> {
        let find = |name: &str| {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| StoreError::SchemaMismatch {
                    path: path.to_path_buf(),
                    found: headers.iter().collect::<Vec<_>>().join(","),
                })
        };

        let mut metrics = [0usize; 8];
        for (slot, metric) in metrics.iter_mut().zip(Metric::ALL) {
            *slot = find(metric.column())?;
        }

        Ok(Self {
            metrics,
            timestamp: find("Timestamp")?,
            extra: find("Extra")?,
        })
    }

    fn decode(&self, record: &csv::StringRecord) -> Result<Reading, StoreError> {
        let cell = |idx: usize| {
            record
                .get(idx)
                .ok_or_else(|| StoreError::BadRow(format!("missing column {idx}")))
        };

        let raw_ts = cell(self.timestamp)?;
        let timestamp = NaiveDateTime::parse_from_str(raw_ts, TIMESTAMP_FORMAT)
            .map_err(|e| StoreError::BadRow(format!("Timestamp {raw_ts:?}: {e}")))?;

        let mut reading = Reading::new(timestamp);
        for (metric, &idx) in Metric::ALL.iter().zip(&self.metrics) {
            let raw = cell(idx)?;
            let value = if raw.is_empty() {
                None
            } else {
                let n = raw
                    .parse::<f64>()
                    .map_err(|e| StoreError::BadRow(format!("{} {raw:?}: {e}", metric.column())))?;
                Some(n)
            };
            reading.set(*metric, value);
        }

        let raw_extra = cell(self.extra)?;
        if !raw_extra.is_empty() {
            reading.extra = serde_json::from_str(raw_extra)
                .map_err(|e| StoreError::BadRow(format!("Extra: {e}")))?;
        }

        Ok(reading)
    }
}
