//! Boot Console Logging
//!
//! Implements the `log` facade over the platform console. Each record is
//! formatted into a stack buffer first and then written with a single
//! console call, so lines from different cores never interleave.

use core::fmt::Write;

use log::{Level, Log, Metadata, Record};
use lode_pal::console;

use crate::config::{LOG_LEVEL, LOG_LINE_SIZE};

/// Stack buffer for formatting a log line without allocation.
///
/// Output beyond the buffer size is dropped.
pub struct MessageBuffer {
    data: [u8; LOG_LINE_SIZE],
    len: usize,
}

impl MessageBuffer {
    pub const fn new() -> Self {
        Self {
            data: [0u8; LOG_LINE_SIZE],
            len: 0,
        }
    }

    pub fn as_str(&self) -> &str {
        match core::str::from_utf8(&self.data[..self.len]) {
            Ok(s) => s,
            // Truncation may have split a multi-byte character
            Err(e) => core::str::from_utf8(&self.data[..e.valid_up_to()]).unwrap_or(""),
        }
    }

    pub fn is_full(&self) -> bool {
        self.len == LOG_LINE_SIZE
    }
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for MessageBuffer {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let bytes = s.as_bytes();
        let remaining = LOG_LINE_SIZE - self.len;
        let to_copy = bytes.len().min(remaining);
        self.data[self.len..self.len + to_copy].copy_from_slice(&bytes[..to_copy]);
        self.len += to_copy;
        Ok(())
    }
}

fn level_tag(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => " WARN",
        Level::Info => " INFO",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

/// Format one record as a console line.
pub fn format_record(buf: &mut MessageBuffer, record: &Record<'_>) {
    let _ = write!(buf, "[lode] {} {}: {}", level_tag(record.level()), record.target(), record.args());
    if buf.is_full() {
        buf.len -= 1;
    }
    let _ = buf.write_str("\n");
}

/// Loader logger implementation
struct BootLogger;

impl Log for BootLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= LOG_LEVEL
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            let mut line = MessageBuffer::new();
            format_record(&mut line, record);
            console::puts(line.as_str());
        }
    }

    fn flush(&self) {}
}

/// Global logger instance
static LOGGER: BootLogger = BootLogger;

/// Install the console logger.
///
/// Only the first call has an effect.
pub fn init() {
    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(LOG_LEVEL))
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(level: Level, args: core::fmt::Arguments<'_>) -> MessageBuffer {
        let mut buf = MessageBuffer::new();
        let record = Record::builder().level(level).target("lode_boot::boot").args(args).build();
        format_record(&mut buf, &record);
        buf
    }

    #[test]
    fn test_record_format() {
        let buf = render(Level::Warn, format_args!("core {} late", 3));
        assert_eq!(buf.as_str(), "[lode]  WARN lode_boot::boot: core 3 late\n");
    }

    #[test]
    fn test_long_record_truncated_with_newline() {
        let long = [b'x'; LOG_LINE_SIZE * 2];
        let text = core::str::from_utf8(&long).unwrap();
        let buf = render(Level::Info, format_args!("{text}"));
        assert_eq!(buf.as_str().len(), LOG_LINE_SIZE);
        assert!(buf.as_str().ends_with("x\n"));
    }

    #[test]
    fn test_split_character_dropped() {
        let mut buf = MessageBuffer::new();
        let pad = [b'a'; LOG_LINE_SIZE - 1];
        buf.write_str(core::str::from_utf8(&pad).unwrap()).unwrap();
        buf.write_str("\u{e9}").unwrap();
        assert_eq!(buf.as_str().len(), LOG_LINE_SIZE - 1);
    }
}
