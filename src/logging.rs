//! Log output: a console layer on stderr and an optional daily file log.
//!
//! Code in this crate logs through the `log` macros; `tracing-log` forwards
//! those records into the `tracing` subscriber set up here.

use std::{
    fs,
    io::{self, IsTerminal, Write},
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    fmt::{self, time::UtcTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::cli::ColorChoice;

/// Compressed logs older than this many days are deleted.
const MAX_COMPRESSED_LOG_AGE_DAYS: u64 = 7;

/// Keeps the file log's background writer alive. Dropping it flushes.
pub struct LogGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

pub fn init_logging(
    verbosity: u8,
    color: ColorChoice,
    log_root: Option<&Path>,
    file_log_level: Option<LevelFilter>,
    command_name: &str,
) -> LogGuard {
    if let Err(err) = tracing_log::LogTracer::init() {
        eprintln!("Warning: could not forward log records to tracing: {err}");
    }

    let console_filter = match verbosity {
        0 => "info",
        1 => "info,libfieldsync=debug,watchfs=debug",
        2 => "info,libfieldsync=trace,watchfs=trace",
        _ => "trace",
    };

    let console_env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(console_filter));

    let use_ansi = match color {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => io::stderr().is_terminal(),
    };

    let console_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(use_ansi)
        .without_time()
        .with_target(false)
        .with_level(true)
        .with_filter(console_env_filter);

    let mut file_guard = None;

    let file_layer = match (log_root, file_log_level) {
        (Some(root), Some(level)) => {
            let log_dir = root.join(".fieldsync").join("logs");

            match open_file_log(&log_dir, command_name) {
                Ok(appender) => {
                    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                    file_guard = Some(guard);

                    Some(
                        fmt::layer()
                            .with_writer(non_blocking)
                            .with_ansi(false)
                            .with_timer(UtcTime::rfc_3339())
                            .with_target(true)
                            .with_thread_names(true)
                            .with_level(true)
                            .with_filter(EnvFilter::new(level.to_string())),
                    )
                }
                Err(err) => {
                    eprintln!(
                        "Warning: could not open log directory {}: {err}",
                        log_dir.display()
                    );
                    None
                }
            }
        }
        _ => None,
    };

    if let Err(err) = tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
    {
        eprintln!("Warning: logging was already initialized: {err}");
    }

    LogGuard {
        _file_guard: file_guard,
    }
}

fn open_file_log(
    log_dir: &Path,
    command_name: &str,
) -> anyhow::Result<tracing_appender::rolling::RollingFileAppender> {
    fs_err::create_dir_all(log_dir)?;
    compress_old_logs(log_dir, command_name);

    let appender = tracing_appender::rolling::Builder::new()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix(command_name)
        .filename_suffix("log")
        .build(log_dir)?;

    Ok(appender)
}

fn days_since_epoch(time: SystemTime) -> Option<u64> {
    time.duration_since(UNIX_EPOCH)
        .ok()
        .map(|since| since.as_secs() / 86400)
}

fn modified_day(entry: &fs::DirEntry) -> Option<u64> {
    entry
        .metadata()
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(days_since_epoch)
}

/// Gzips this command's logs from previous days and deletes compressed logs
/// that have aged out. Failures leave files where they are.
fn compress_old_logs(log_dir: &Path, command_name: &str) {
    let Some(today) = days_since_epoch(SystemTime::now()) else {
        return;
    };

    let Ok(entries) = fs::read_dir(log_dir) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };

        if file_name.ends_with(".log.gz") {
            let age = modified_day(&entry).map_or(0, |day| today.saturating_sub(day));
            if age > MAX_COMPRESSED_LOG_AGE_DAYS {
                let _ = fs::remove_file(&path);
            }
            continue;
        }

        if !file_name.ends_with(".log") || !file_name.starts_with(command_name) {
            continue;
        }

        if modified_day(&entry).unwrap_or(today) >= today {
            continue;
        }

        let gz_path = path.with_extension("log.gz");
        match gzip_file(&path, &gz_path) {
            Ok(()) => {
                let _ = fs::remove_file(&path);
            }
            Err(_) => {
                let _ = fs::remove_file(&gz_path);
            }
        }
    }
}

fn gzip_file(source: &Path, destination: &Path) -> io::Result<()> {
    let input = fs::read(source)?;
    let output = fs::File::create(destination)?;

    let mut encoder = flate2::write::GzEncoder::new(output, flate2::Compression::default());
    encoder.write_all(&input)?;
    encoder.finish()?;

    Ok(())
}

/// Reads just the `fileLogLevel` entry of a config file, before logging is
/// set up and before the config is properly loaded.
///
/// Returns `None` if the file is missing, unparsable, or has no entry, in
/// which case the caller picks a default. `Some(None)` means the file log is
/// turned off.
pub fn quick_read_file_log_level(config_path: &Path) -> Option<Option<LevelFilter>> {
    let contents = fs::read_to_string(config_path).ok()?;
    let value: serde_json::Value = json5::from_str(&contents).ok()?;
    let level = value.get("fileLogLevel")?.as_str()?;

    Some(parse_file_log_level(level))
}

fn parse_file_log_level(level: &str) -> Option<LevelFilter> {
    match level.to_ascii_lowercase().as_str() {
        "none" | "off" => None,
        "error" => Some(LevelFilter::ERROR),
        "warn" => Some(LevelFilter::WARN),
        "info" => Some(LevelFilter::INFO),
        "debug" => Some(LevelFilter::DEBUG),
        _ => Some(LevelFilter::TRACE),
    }
}
