//! Process logging: `timestamp - target - LEVEL - message` lines on stdout, mirrored to an
//! append-only log file when one can be opened.

use env_logger::{Builder, Env, Target, WriteStyle};
use log::LevelFilter;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Writes every buffer to `primary` and, when present, to `secondary`.
/// A failing secondary is dropped so logging to the primary keeps working.
pub struct TeeWriter<A, B> {
    primary: A,
    secondary: Option<B>,
}

impl<A: Write, B: Write> TeeWriter<A, B> {
    pub fn new(primary: A, secondary: Option<B>) -> Self {
        Self { primary, secondary }
    }
}

impl<A: Write, B: Write> Write for TeeWriter<A, B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(file) = self.secondary.as_mut() {
            if file.write_all(buf).is_err() {
                self.secondary = None;
            }
        }
        self.primary.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(file) = self.secondary.as_mut() {
            if file.flush().is_err() {
                self.secondary = None;
            }
        }
        self.primary.flush()
    }
}

fn open_log_file(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Install the global logger. `RUST_LOG` overrides the default `info` level.
/// Calling it twice is harmless; the second call is ignored.
pub fn init(log_file: Option<&Path>) {
    let (file, open_error) = match log_file.map(open_log_file) {
        Some(Ok(f)) => (Some(f), None),
        Some(Err(e)) => (None, Some(e)),
        None => (None, None),
    };

    let mut builder = Builder::new();
    builder
        .filter_level(LevelFilter::Info)
        .filter_module("reqwest", LevelFilter::Warn)
        .filter_module("hyper", LevelFilter::Warn)
        .filter_module("hyper_util", LevelFilter::Warn)
        .filter_module("grammers_mtsender", LevelFilter::Warn)
        .filter_module("grammers_client", LevelFilter::Warn)
        .parse_env(Env::default())
        .write_style(WriteStyle::Never)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} - {} - {} - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S,%3f"),
                record.target(),
                record.level(),
                record.args()
            )
        })
        .target(Target::Pipe(Box::new(TeeWriter::new(io::stdout(), file))));

    if builder.try_init().is_err() {
        return;
    }
    if let (Some(path), Some(e)) = (log_file, open_error) {
        log::warn!(
            "could not open log file {}: {}; logging to stdout only",
            path.display(),
            e
        );
    }
}
