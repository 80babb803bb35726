use crate::qemu_fmt::QemuSink;
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// `log::Log` backend writing `[LEVEL] target: message` lines to the debug console.
///
/// Lives in a `static`; the level can be adjusted after installation.
pub struct QemuLogger {
    max_level: AtomicUsize,
}

impl QemuLogger {
    #[must_use]
    pub const fn new(max_level: LevelFilter) -> Self {
        Self {
            max_level: AtomicUsize::new(max_level as usize),
        }
    }

    /// Current threshold.
    pub fn max_level(&self) -> LevelFilter {
        let raw = self.max_level.load(Ordering::Relaxed);
        LevelFilter::iter()
            .nth(raw)
            .unwrap_or(LevelFilter::Trace)
    }

    /// Changes the threshold of this logger and of the `log` facade.
    pub fn set_max_level(&self, level: LevelFilter) {
        self.max_level.store(level as usize, Ordering::Relaxed);
        log::set_max_level(level);
    }

    /// Installs this logger as the global `log` backend.
    ///
    /// # Errors
    /// Fails if another logger (or this one) was already installed; the
    /// facade's maximum level is left untouched in that case.
    pub fn init(&'static self) -> Result<(), SetLoggerError> {
        log::set_logger(self)?;
        log::set_max_level(self.max_level());
        Ok(())
    }
}

impl Log for QemuLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let _ = write_record(&mut QemuSink, record);
    }

    fn flush(&self) {}
}

/// Formats one record as the logger emits it.
///
/// # Errors
/// Propagates errors of the underlying writer.
pub fn write_record<W: fmt::Write>(w: &mut W, record: &Record) -> fmt::Result {
    writeln!(w, "[{}] {}: {}", record.level(), record.target(), record.args())
}
