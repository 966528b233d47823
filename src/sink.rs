//! Append-only result sinks shared by all workers.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use clap::ValueEnum;

use crate::error::SinkError;

/// Shared destination for completed-task lines.
///
/// Implementations serialize whole lines: concurrent callers never see their
/// bytes interleaved.
pub trait ResultSink: Send + Sync {
    fn append(&self, line: &str) -> Result<(), SinkError>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum SinkMode {
    /// Open, write and close the file on every append.
    #[default]
    PerWrite,
    /// Keep one handle open for the run and flush after every line.
    Held,
}

impl SinkMode {
    /// Build the sink for `path`; held mode opens the file immediately.
    pub fn open(self, path: &Path) -> Result<Box<dyn ResultSink>, SinkError> {
        Ok(match self {
            SinkMode::PerWrite => Box::new(FileSink::new(path)),
            SinkMode::Held => Box::new(HeldFileSink::open(path)?),
        })
    }
}

fn open_append(path: &Path) -> Result<File, SinkError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| SinkError::Open {
            path: path.to_path_buf(),
            source,
        })
}

fn encode_line(line: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(line.len() + 1);
    buf.extend_from_slice(line.as_bytes());
    buf.push(b'\n');
    buf
}

/// File sink with no long-lived handle; each append is self-contained.
pub struct FileSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSink {
    /// No I/O happens until the first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }
}

impl ResultSink for FileSink {
    fn append(&self, line: &str) -> Result<(), SinkError> {
        let _guard = self.lock.lock().map_err(|_| SinkError::Poisoned)?;
        let mut file = open_append(&self.path)?;
        // Single buffer so the line and its newline land in one write.
        file.write_all(&encode_line(line))
            .map_err(|source| SinkError::Write {
                path: self.path.clone(),
                source,
            })
    }
}

/// File sink holding one handle behind the lock, flushed per line.
pub struct HeldFileSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl HeldFileSink {
    /// Open (creating if needed) `path` in append mode and keep the handle.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let path = path.into();
        let file = open_append(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }
}

impl ResultSink for HeldFileSink {
    fn append(&self, line: &str) -> Result<(), SinkError> {
        let mut file = self.file.lock().map_err(|_| SinkError::Poisoned)?;
        file.write_all(&encode_line(line))
            .and_then(|()| file.flush())
            .map_err(|source| SinkError::Write {
                path: self.path.clone(),
                source,
            })
    }
}

/// Empty (or create) the output file before a run.
pub fn truncate_output(path: &Path) -> Result<(), SinkError> {
    File::create(path)
        .map(drop)
        .map_err(|source| SinkError::Open {
            path: path.to_path_buf(),
            source,
        })
}
