//! Kernel log backend.

use kernel_qemu::QemuLogger;
use log::{LevelFilter, SetLoggerError};

static LOGGER: QemuLogger = QemuLogger::new(LevelFilter::Info);

/// Install the QEMU debug-port logger at `level`.
///
/// # Errors
/// If a logger is already installed. The level is applied either way.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    LOGGER.set_max_level(level);
    LOGGER.init()
}

/// Change the level of the installed logger.
pub fn set_level(level: LevelFilter) {
    LOGGER.set_max_level(level);
}

#[must_use]
pub fn level() -> LevelFilter {
    LOGGER.max_level()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_fails_but_level_sticks() {
        let _ = init(LevelFilter::Debug);
        assert!(init(LevelFilter::Warn).is_err());
        assert_eq!(level(), LevelFilter::Warn);
        set_level(LevelFilter::Trace);
        assert_eq!(level(), LevelFilter::Trace);
    }
}
