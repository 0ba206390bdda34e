//! Kernel logging subsystem.
//!
//! klog is the backend behind the `log` facade. Kernel code logs with
//! `log::info!` and friends; klog filters by level, prefixes each line with
//! a coloured level tag and hands the finished line to a sink function.
//! On bare metal the sink writes to the serial port; hosted builds use
//! [`stderr_sink`].
#![cfg_attr(not(feature = "std"), no_std)]

use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};

use spin::Mutex;

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => " INFO",
            Level::Warn => " WARN",
            Level::Error => "ERROR",
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            Level::Trace => "\x1b[90m", // Gray
            Level::Debug => "\x1b[36m", // Cyan
            Level::Info => "\x1b[32m",  // Green
            Level::Warn => "\x1b[33m",  // Yellow
            Level::Error => "\x1b[31m", // Red
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Level::Trace,
            1 => Level::Debug,
            2 => Level::Info,
            3 => Level::Warn,
            _ => Level::Error,
        }
    }

    /// The `log` filter that lets exactly this level and above through.
    pub fn to_filter(self) -> log::LevelFilter {
        match self {
            Level::Trace => log::LevelFilter::Trace,
            Level::Debug => log::LevelFilter::Debug,
            Level::Info => log::LevelFilter::Info,
            Level::Warn => log::LevelFilter::Warn,
            Level::Error => log::LevelFilter::Error,
        }
    }
}

impl From<log::Level> for Level {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Trace => Level::Trace,
            log::Level::Debug => Level::Debug,
            log::Level::Info => Level::Info,
            log::Level::Warn => Level::Warn,
            log::Level::Error => Level::Error,
        }
    }
}

/// Receives one complete, newline-terminated log line per call.
pub type Sink = fn(fmt::Arguments<'_>);

static SINK: Mutex<Option<Sink>> = Mutex::new(None);
static MAX_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);
static LOGGER: KernelLogger = KernelLogger;

/// Install klog as the global `log` backend.
///
/// Fails if some logger (klog or another) is already registered; the sink
/// and level are updated either way.
pub fn init(sink: Sink, level: Level) -> Result<(), log::SetLoggerError> {
    set_sink(sink);
    set_level(level);
    log::set_logger(&LOGGER)?;
    log::set_max_level(level.to_filter());
    Ok(())
}

/// Replace the sink that receives formatted lines.
pub fn set_sink(sink: Sink) {
    *SINK.lock() = Some(sink);
}

/// Set the minimum level that reaches the sink.
pub fn set_level(level: Level) {
    MAX_LEVEL.store(level as u8, Ordering::Relaxed);
    log::set_max_level(level.to_filter());
}

/// The minimum level that currently reaches the sink.
pub fn level() -> Level {
    Level::from_u8(MAX_LEVEL.load(Ordering::Relaxed))
}

fn sink() -> Option<Sink> {
    *SINK.lock()
}

/// Log a message with a specific level
pub fn log(level: Level, args: fmt::Arguments) {
    if level < self::level() {
        return;
    }
    // The lock is released before writing; the sink sees the whole line in
    // one call so lines from different cores never interleave.
    if let Some(sink) = sink() {
        sink(format_args!(
            "{}[{}]\x1b[0m {}\n",
            level.color(),
            level.as_str(),
            args
        ));
    }
}

/// Print to the sink without a level prefix
pub fn print(args: fmt::Arguments) {
    if let Some(sink) = sink() {
        sink(args);
    }
}

/// Sink that writes to the host's standard error.
#[cfg(feature = "std")]
pub fn stderr_sink(args: fmt::Arguments<'_>) {
    use std::io::Write;

    let _ = std::io::stderr().lock().write_fmt(args);
}

struct KernelLogger;

impl log::Log for KernelLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        Level::from(metadata.level()) >= level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        self::log(
            Level::from(record.level()),
            format_args!("{}: {}", record.target(), record.args()),
        );
    }

    fn flush(&self) {}
}

/// Log at TRACE level
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {
        $crate::log($crate::Level::Trace, format_args!($($arg)*))
    };
}

/// Log at DEBUG level
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::log($crate::Level::Debug, format_args!($($arg)*))
    };
}

/// Log at INFO level
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::log($crate::Level::Info, format_args!($($arg)*))
    };
}

/// Log at WARN level
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::log($crate::Level::Warn, format_args!($($arg)*))
    };
}

/// Log at ERROR level
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::log($crate::Level::Error, format_args!($($arg)*))
    };
}

/// Print without newline
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::print(format_args!($($arg)*))
    };
}

/// Print with newline
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => {{
        $crate::print(format_args!($($arg)*));
        $crate::print(format_args!("\n"));
    }};
}
