//! Diagnostic log stream setup.
//!
//! A run builds one [`Dispatch`] and installs it on every thread it owns, so
//! nothing here touches the process-wide default subscriber.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::Dispatch;
use tracing_subscriber::EnvFilter;

/// Where progress lines go.
#[derive(Clone, Debug)]
pub enum LogTarget<'a> {
    Console,
    File(&'a Path),
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Build the run's log dispatcher for `target`.
pub fn build_dispatch(target: LogTarget<'_>) -> io::Result<Dispatch> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(false)
        .with_thread_names(true);
    let dispatch = match target {
        LogTarget::Console => Dispatch::new(builder.with_writer(io::stderr).finish()),
        LogTarget::File(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let file = Arc::new(Mutex::new(file));
            Dispatch::new(
                builder
                    .with_ansi(false)
                    .with_writer(move || FileLogWriter::new(Arc::clone(&file)))
                    .finish(),
            )
        }
    };
    Ok(dispatch)
}

/// Dispatcher that drops every event; used by callers that want a silent run.
pub fn silent_dispatch() -> Dispatch {
    Dispatch::none()
}

struct FileLogWriter {
    file: Arc<Mutex<File>>,
}

impl FileLogWriter {
    fn new(file: Arc<Mutex<File>>) -> Self {
        Self { file }
    }
}

impl Write for FileLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .file
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        guard.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = self
            .file
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        guard.flush()
    }
}
