//! Minimal stderr logger for the command-line binary.

use std::io::{self, Write};

use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

struct StderrLogger;

static LOGGER: StderrLogger = StderrLogger;

/// Install the logger. `verbosity` counts the `-v` flags on the command
/// line: 0 is info, 1 adds debug, anything more adds trace.
pub fn init(verbosity: u8) -> Result<(), SetLoggerError> {
	let filter = match verbosity {
		0 => LevelFilter::Info,
		1 => LevelFilter::Debug,
		_ => LevelFilter::Trace,
	};

	log::set_logger(&LOGGER)?;
	log::set_max_level(filter);
	Ok(())
}

impl Log for StderrLogger {
	fn enabled(&self, metadata: &Metadata<'_>) -> bool {
		metadata.level() <= log::max_level()
	}

	fn log(&self, record: &Record<'_>) {
		if !self.enabled(record.metadata()) {
			return;
		}

		// Info lines are the operator-facing output and stay unadorned.
		if record.level() == Level::Info {
			writeln!(io::stderr(), "{}", record.args()).ok();
		} else {
			writeln!(io::stderr(), "[{}] {}", record.level(), record.args()).ok();
		}
	}

	fn flush(&self) {}
}
