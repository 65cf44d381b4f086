use std::fmt;
use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;

use tracing::level_filters::LevelFilter;
use tracing::warn;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};

use crate::config::LoggingConfig;
use crate::error::{QubesomeError, QubesomeResult};

struct Elapsed(Instant);

impl FormatTime for Elapsed {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> fmt::Result {
        let d = self.0.elapsed();
        let total_secs = d.as_secs();
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        let millis = d.subsec_millis();
        write!(w, "[{mins:02}:{secs:02}:{millis:03}]")
    }
}

/// Info level on stderr. Used inside profile containers, where there is no
/// config to read.
pub fn init_default() {
    let _ = tracing_subscriber::fmt()
        .with_timer(Elapsed(Instant::now()))
        .with_max_level(LevelFilter::INFO)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Install the global subscriber described by `config`. `log_file` is only
/// opened when `logToFile` is set.
pub fn init(config: &LoggingConfig, log_file: &Path) -> QubesomeResult<()> {
    let file = if config.log_to_file {
        if let Some(dir) = log_file.parent() {
            fs::create_dir_all(dir).map_err(QubesomeError::fs(dir))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .map_err(QubesomeError::fs(log_file))?;
        Some(Mutex::new(file))
    } else {
        None
    };

    let writer = match (config.log_to_stdout, file) {
        (true, Some(file)) => BoxMakeWriter::new(std::io::stdout.and(file)),
        (false, Some(file)) => BoxMakeWriter::new(std::io::stderr.and(file)),
        (true, None) => BoxMakeWriter::new(std::io::stdout),
        (false, None) => BoxMakeWriter::new(std::io::stderr),
    };

    tracing_subscriber::fmt()
        .with_timer(Elapsed(Instant::now()))
        .with_max_level(LevelFilter::from(config.level))
        .with_ansi(!config.log_to_file)
        .with_writer(writer)
        .try_init()
        .map_err(|e| QubesomeError::Logging(e.to_string()))?;

    if config.log_to_syslog {
        warn!("logToSyslog is not supported, ignoring");
    }
    Ok(())
}
