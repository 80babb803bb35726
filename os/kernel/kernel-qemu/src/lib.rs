//! # QEMU debug console output
//!
//! Routes kernel diagnostics to QEMU's debug console (I/O port `0x402`,
//! captured on the host with `-debugcon stdio`).
//!
//! ```text
//! log::info!(..)          qemu_trace!(..)
//!       │                       │
//!  QemuLogger (log::Log)        │
//!       └──────────┬────────────┘
//!                  ▼
//!         QemuSink (fmt::Write)
//!                  ▼
//!           out 0x402, al
//! ```
//!
//! The port write is only compiled for bare-metal builds (`target_os = "none"`)
//! with the `enabled` feature. Everywhere else the sink discards its input,
//! so host tests can install the logger and emit records freely.
//!
//! ```rust
//! use kernel_qemu::QemuLogger;
//! use log::LevelFilter;
//!
//! static LOGGER: QemuLogger = QemuLogger::new(LevelFilter::Info);
//! let _ = LOGGER.init();
//! log::info!("memory manager ready");
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod logger;

pub use logger::{QemuLogger, write_record};

#[doc(hidden)]
pub mod qemu_fmt {
    use core::fmt::{self, Write};

    /// QEMU's debug console port.
    pub const QEMU_DEBUG_PORT: u16 = 0x402;

    /// Write a single byte to the debug console.
    #[allow(clippy::inline_always)]
    #[inline(always)]
    pub fn dbg_putc(c: u8) {
        #[cfg(all(feature = "enabled", target_os = "none", target_arch = "x86_64"))]
        unsafe {
            outb(QEMU_DEBUG_PORT, c);
        }
        #[cfg(not(all(feature = "enabled", target_os = "none", target_arch = "x86_64")))]
        let _ = c;
    }

    #[cfg(all(feature = "enabled", target_os = "none", target_arch = "x86_64"))]
    #[allow(clippy::inline_always)]
    #[inline(always)]
    unsafe fn outb(port: u16, val: u8) {
        unsafe {
            core::arch::asm!(
            "out dx, al",
            in("dx") port,
            in("al") val,
            options(nomem, preserves_flags)
            );
        }
    }

    /// `fmt::Write` adapter over [`dbg_putc`].
    pub struct QemuSink;

    impl Write for QemuSink {
        #[inline]
        fn write_str(&mut self, s: &str) -> fmt::Result {
            for b in s.bytes() {
                dbg_putc(b);
            }
            Ok(())
        }
    }

    #[doc(hidden)]
    #[inline]
    pub fn qemu_write(args: fmt::Arguments) {
        // Best effort; the sink itself never fails.
        let _ = fmt::write(&mut QemuSink, args);
    }
}

/// Formatted output straight to the debug console, bypassing `log`.
#[macro_export]
macro_rules! qemu_trace {
    ($($arg:tt)*) => {{
        $crate::qemu_fmt::qemu_write(core::format_args!($($arg)*));
    }};
}
