//! `log` backend that writes straight to a serial port.

use core::fmt::Write;

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

use crate::serial::{SerialPort, Writer};

pub struct SerialLogger<P> {
    port: P,
    level: LevelFilter,
}

impl<P> SerialLogger<P> {
    pub const fn new(port: P, level: LevelFilter) -> Self {
        Self { port, level }
    }

    pub fn level(&self) -> LevelFilter {
        self.level
    }
}

impl<P: SerialPort + Send + Sync> Log for SerialLogger<P> {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        // Nowhere to report a failed write to.
        let _ = writeln!(
            Writer(&self.port),
            "[{}] {}: {}",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}

/// Install `logger` as the global logger. Only the first call succeeds.
pub fn init<P: SerialPort + Send + Sync>(
    logger: &'static SerialLogger<P>,
) -> Result<(), SetLoggerError> {
    log::set_logger(logger)?;
    log::set_max_level(logger.level);
    Ok(())
}
