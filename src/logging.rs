use log::{Level, LevelFilter, Metadata, Record};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::SystemTime;

static BOOT_TIME: OnceLock<SystemTime> = OnceLock::new();
static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();
static FILE_SINK: Mutex<Option<BufWriter<File>>> = Mutex::new(None);
static FILE_LOGGING: AtomicBool = AtomicBool::new(false);

const LOG_DIR: &str = "/sdcard/logs";
const LOG_FILE: &str = "catcam.log";
// Small on purpose: this buffer is part of what a transfer gets back.
const FILE_BUFFER: usize = 1024;

#[allow(dead_code)]
mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BRIGHT_RED: &str = "\x1b[91m";
    pub const BRIGHT_YELLOW: &str = "\x1b[93m";
    pub const BRIGHT_GREEN: &str = "\x1b[92m";
    pub const BRIGHT_BLUE: &str = "\x1b[94m";
    pub const GRAY: &str = "\x1b[90m";
}

/// Colored, timestamped serial output plus an optional plain-text copy on the SD card
struct CatCamLogger;

impl log::Log for CatCamLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // Time since boot
        let boot_time = BOOT_TIME.get_or_init(SystemTime::now);
        let elapsed = SystemTime::now()
            .duration_since(*boot_time)
            .unwrap_or_default();
        let seconds = elapsed.as_secs();
        let millis = elapsed.subsec_millis();
        let ts_compact = if seconds < 60 {
            format!("{:>3}.{:03}s", seconds, millis)
        } else if seconds < 3600 {
            format!("{:>2}m{:02}s", seconds / 60, seconds % 60)
        } else {
            format!("{:>2}h{:02}m", seconds / 3600, (seconds % 3600) / 60)
        };

        let (color, level_str, level_char) = match record.level() {
            Level::Error => (colors::BRIGHT_RED, "ERROR", 'E'),
            Level::Warn => (colors::BRIGHT_YELLOW, "WARN ", 'W'),
            Level::Info => (colors::BRIGHT_GREEN, "INFO ", 'I'),
            Level::Debug => (colors::BRIGHT_BLUE, "DEBUG", 'D'),
            Level::Trace => (colors::GRAY, "TRACE", 'T'),
        };
        let module = record
            .module_path()
            .unwrap_or("unknown")
            .split("::")
            .last()
            .unwrap_or("unknown");
        let module_display = if module.len() > 12 { &module[..12] } else { module };

        let message = format!("{}", record.args());

        println!(
            "{}{} [{}] {:>12} | {}{}",
            color, ts_compact, level_char, module_display, message, colors::RESET
        );

        if FILE_LOGGING.load(Ordering::Relaxed) {
            // Never block a log call on the card; drop the line on contention.
            if let Ok(mut sink) = FILE_SINK.try_lock() {
                if let Some(writer) = sink.as_mut() {
                    let _ = writeln!(
                        writer,
                        "{} [{}] {:>12} | {}",
                        ts_compact, level_str, module_display, message
                    );
                    if record.level() <= Level::Warn {
                        let _ = writer.flush();
                    }
                }
            }
        }
    }

    fn flush(&self) {
        if let Ok(mut sink) = FILE_SINK.lock() {
            if let Some(writer) = sink.as_mut() {
                let _ = writer.flush();
            }
        }
    }
}

static LOGGER: CatCamLogger = CatCamLogger;

/// Initialize the logger with colors and timestamps
pub fn init_logger() -> Result<(), log::SetLoggerError> {
    let _ = BOOT_TIME.set(SystemTime::now());
    log::set_logger(&LOGGER)?;
    log::set_max_level(LevelFilter::Info);

    println!("{}┌─────────────────────────────────────────┐{}", colors::BRIGHT_GREEN, colors::RESET);
    println!("{}│        BootBoots CatCam firmware        │{}", colors::BRIGHT_GREEN, colors::RESET);
    println!("{}└─────────────────────────────────────────┘{}", colors::BRIGHT_GREEN, colors::RESET);
    Ok(())
}

/// Start appending to the log file once the SD card is mounted.
pub fn attach_file_sink() -> std::io::Result<()> {
    fs::create_dir_all(LOG_DIR)?;
    let path = LOG_PATH.get_or_init(|| PathBuf::from(LOG_DIR).join(LOG_FILE));
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    if let Ok(mut sink) = FILE_SINK.lock() {
        *sink = Some(BufWriter::with_capacity(FILE_BUFFER, file));
    }
    FILE_LOGGING.store(true, Ordering::Relaxed);
    Ok(())
}

/// Suspend or resume the SD copy. Suspending closes the file and frees its buffer.
pub fn set_file_logging_enabled(enabled: bool) {
    if enabled {
        if FILE_LOGGING.load(Ordering::Relaxed) || LOG_PATH.get().is_none() {
            return;
        }
        match attach_file_sink() {
            Ok(()) => log::info!("File logging resumed"),
            Err(e) => log::warn!("File logging not resumed: {}", e),
        }
    } else {
        FILE_LOGGING.store(false, Ordering::Relaxed);
        if let Ok(mut sink) = FILE_SINK.lock() {
            if let Some(mut writer) = sink.take() {
                let _ = writer.flush();
            }
        }
    }
}

pub fn file_logging_enabled() -> bool {
    FILE_LOGGING.load(Ordering::Relaxed)
}

/// Parse and set log level from a string; returns true if applied
pub fn set_max_level_from_str(level: &str) -> bool {
    let lf = match level.to_ascii_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" | "warning" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => return false,
    };
    log::set_max_level(lf);
    true
}
