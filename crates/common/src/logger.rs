//! Stderr logger behind the [`log`] facade.
//!
//! Lines look like
//!
//! ```text
//! [   1.234s] DEBUG common::drive - left wheel latched Forward at t=149930
//! ```
//!
//! with the time counted from the first call to [`init`].

use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use log::{LevelFilter, Metadata, Record, SetLoggerError};

struct StderrLogger {
    start: Instant,
}

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_line(
            self.start.elapsed().as_secs_f64(),
            record.level(),
            record.target(),
            &record.args().to_string(),
        );
        // one write per line so threads do not interleave mid-line
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

fn format_line(elapsed_secs: f64, level: log::Level, target: &str, message: &str) -> String {
    format!("[{:8.3}s] {:<5} {} - {}\n", elapsed_secs, level, target, message)
}

static LOGGER: OnceLock<StderrLogger> = OnceLock::new();

/// Install the logger and set the maximum level. Calling it again only
/// changes the level.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    let mut fresh = false;
    let logger = LOGGER.get_or_init(|| {
        fresh = true;
        StderrLogger { start: Instant::now() }
    });
    if fresh {
        log::set_logger(logger)?;
    }
    log::set_max_level(level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_layout() {
        let line = format_line(1.2341, log::Level::Warn, "common::drive", "late tick");
        assert_eq!(line, "[   1.234s] WARN  common::drive - late tick\n");
    }

    #[test]
    fn init_twice_is_fine() {
        init(LevelFilter::Debug).unwrap();
        init(LevelFilter::Info).unwrap();
        assert_eq!(log::max_level(), LevelFilter::Info);
    }
}
