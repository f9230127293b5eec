//! Colored console backend for the `log` facade.
//!
//! The level comes from the `LOG` environment variable:
//! - "ERROR" -> `LevelFilter::Error`
//! - "WARN" -> `LevelFilter::Warn`
//! - "INFO" or unset -> `LevelFilter::Info`
//! - "DEBUG" -> `LevelFilter::Debug`
//! - "TRACE" -> `LevelFilter::Trace`
//! - anything else -> `LevelFilter::Off`

use std::fmt;

use log::{Level, LevelFilter, Log, Metadata, Record};

/// Installs the logger, call once from `main`
pub fn init() -> Result<(), String> {
    static LOGGER: ConsoleLogger = ConsoleLogger;
    log::set_logger(&LOGGER).map_err(|e| e.to_string())?;
    log::set_max_level(level_from(std::env::var("LOG").ok().as_deref()));
    Ok(())
}

fn level_from(var: Option<&str>) -> LevelFilter {
    match var {
        Some("ERROR") => LevelFilter::Error,
        Some("WARN") => LevelFilter::Warn,
        None | Some("INFO") => LevelFilter::Info,
        Some("DEBUG") => LevelFilter::Debug,
        Some("TRACE") => LevelFilter::Trace,
        _ => LevelFilter::Off,
    }
}

struct ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        print_in_color(
            format_args!("[LOCK-AUDIT][{:>5}] {}", record.level(), record.args()),
            level_to_color_code(record.level()),
        );
    }

    fn flush(&self) {}
}

fn print_in_color(args: fmt::Arguments, color_code: u8) {
    println!("\u{1B}[{color_code}m{args}\u{1B}[0m");
}

fn level_to_color_code(level: Level) -> u8 {
    match level {
        Level::Error => 31, // red
        Level::Warn => 93,  // bright yellow
        Level::Info => 34,  // blue
        Level::Debug => 32, // green
        Level::Trace => 90, // bright black
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn level_defaults_to_info() {
        assert_eq!(level_from(None), LevelFilter::Info);
        assert_eq!(level_from(Some("TRACE")), LevelFilter::Trace);
        assert_eq!(level_from(Some("debug")), LevelFilter::Off);
    }
}
