//! Console logger.
//!
//! Diagnostics from the shim go to host stderr through the `log` facade.
//! The guest owns stdout, so nothing here ever writes there.

use std::io::Write;

use log::{Level, LevelFilter, Log, Metadata, Record};
use spin::Once;

use crate::environment::Config;

static CONSOLE: Once<Console> = Once::new();

struct Console {
    level: LevelFilter,
}

impl Log for Console {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_line(record.level(), record.target(), record.args());
        // A failed diagnostic write has nowhere to be reported.
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

fn format_line(level: Level, target: &str, args: &std::fmt::Arguments) -> String {
    format!("[vermilion] {:<5} {}: {}\n", level, target, args)
}

/// Install the console as the global logger. Later calls are no-ops.
pub fn init(config: &Config) {
    let mut installed = false;
    let console = CONSOLE.call_once(|| {
        installed = true;
        Console { level: config.log_level }
    });
    if installed && log::set_logger(console).is_ok() {
        log::set_max_level(console.level);
    }
}
