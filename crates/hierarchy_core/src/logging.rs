//! Process-wide logging bootstrap.
//!
//! # Responsibility
//! - Start one rolling file logger per process for the tree engine.
//! - Capture panics as metadata-only error events.
//!
//! # Invariants
//! - Repeating `init_logging` with the same level and directory is a no-op.
//! - A second call asking for another level or directory is rejected.
//! - Initialization reports failures as `Err` and never panics.
//! - Events carry ids, paths and codes; account names are never logged.

use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::{error, info, LevelFilter};
use once_cell::sync::OnceCell;
use std::panic::PanicHookInfo;
use std::path::{Path, PathBuf};

const LOG_FILE_BASENAME: &str = "hierarchy";
const ROTATE_AT_BYTES: u64 = 10 * 1024 * 1024;
const KEEP_LOG_FILES: usize = 5;
const PANIC_PAYLOAD_LIMIT: usize = 160;

static ACTIVE_LOGGER: OnceCell<ActiveLogger> = OnceCell::new();
static PANIC_HOOK: OnceCell<()> = OnceCell::new();

/// Validated logger request.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LogTarget {
    level: &'static str,
    dir: PathBuf,
}

impl LogTarget {
    fn parse(level: &str, log_dir: &str) -> Result<Self, String> {
        Ok(Self {
            level: canonical_level(level)?,
            dir: absolute_dir(log_dir)?,
        })
    }

    /// Fails when an already running logger was started for another target.
    fn ensure_same_as(&self, active: &LogTarget) -> Result<(), String> {
        if active.dir != self.dir {
            return Err(format!(
                "logging already initialized at `{}`; refusing to switch to `{}`",
                active.dir.display(),
                self.dir.display()
            ));
        }
        if active.level != self.level {
            return Err(format!(
                "logging already initialized with level `{}`; refusing to switch to `{}`",
                active.level, self.level
            ));
        }
        Ok(())
    }

    fn start(&self) -> Result<LoggerHandle, String> {
        std::fs::create_dir_all(&self.dir).map_err(|err| {
            format!(
                "failed to create log directory `{}`: {err}",
                self.dir.display()
            )
        })?;

        Logger::try_with_str(self.level)
            .map_err(|err| format!("invalid log level `{}`: {err}", self.level))?
            .log_to_file(
                FileSpec::default()
                    .directory(self.dir.as_path())
                    .basename(LOG_FILE_BASENAME),
            )
            .rotate(
                Criterion::Size(ROTATE_AT_BYTES),
                Naming::Numbers,
                Cleanup::KeepLogFiles(KEEP_LOG_FILES),
            )
            .write_mode(WriteMode::BufferAndFlush)
            .append()
            .format_for_files(flexi_logger::detailed_format)
            .start()
            .map_err(|err| format!("failed to start logger: {err}"))
    }
}

struct ActiveLogger {
    target: LogTarget,
    _handle: LoggerHandle,
}

/// Starts file logging at `level` under the absolute directory `log_dir`.
///
/// # Errors
/// - `level` is not one of `trace|debug|info|warn|error`.
/// - `log_dir` is blank, relative, or cannot be created.
/// - A logger is already running for a different level or directory.
/// - The flexi_logger backend fails to start.
pub fn init_logging(level: &str, log_dir: &str) -> Result<(), String> {
    let requested = LogTarget::parse(level, log_dir)?;
    if let Some(active) = ACTIVE_LOGGER.get() {
        return requested.ensure_same_as(&active.target);
    }

    let active = ACTIVE_LOGGER.get_or_try_init(|| -> Result<ActiveLogger, String> {
        let handle = requested.start()?;
        install_panic_hook();

        info!(
            "event=logging_init module=logging status=ok level={} log_dir={} version={}",
            requested.level,
            requested.dir.display(),
            env!("CARGO_PKG_VERSION")
        );
        Ok(ActiveLogger {
            target: requested.clone(),
            _handle: handle,
        })
    })?;

    // Another thread may have won the race with a different target.
    requested.ensure_same_as(&active.target)
}

/// Level and directory of the running logger, if any.
pub fn logging_status() -> Option<(&'static str, PathBuf)> {
    ACTIVE_LOGGER
        .get()
        .map(|active| (active.target.level, active.target.dir.clone()))
}

/// `debug` for debug builds, `info` for release builds.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

fn canonical_level(level: &str) -> Result<&'static str, String> {
    let requested = level.trim().to_ascii_lowercase();
    let requested = if requested == "warning" {
        "warn"
    } else {
        requested.as_str()
    };
    match requested.parse::<LevelFilter>() {
        Ok(LevelFilter::Trace) => Ok("trace"),
        Ok(LevelFilter::Debug) => Ok("debug"),
        Ok(LevelFilter::Info) => Ok("info"),
        Ok(LevelFilter::Warn) => Ok("warn"),
        Ok(LevelFilter::Error) => Ok("error"),
        _ => Err(format!(
            "unsupported log level `{requested}`; expected trace|debug|info|warn|error"
        )),
    }
}

fn absolute_dir(log_dir: &str) -> Result<PathBuf, String> {
    let trimmed = log_dir.trim();
    if trimmed.is_empty() {
        return Err("log_dir cannot be empty".to_string());
    }
    let path = Path::new(trimmed);
    if !path.is_absolute() {
        return Err(format!("log_dir must be an absolute path, got `{trimmed}`"));
    }
    Ok(path.to_path_buf())
}

fn install_panic_hook() {
    if PANIC_HOOK.set(()).is_err() {
        return;
    }

    let previous_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        error!(
            "event=panic_captured module=logging status=error location={} payload={}",
            location,
            panic_payload(panic_info)
        );
        previous_hook(panic_info);
    }));
}

/// Single-line, length-capped rendering of a panic payload.
fn panic_payload(info: &PanicHookInfo<'_>) -> String {
    let payload = info
        .payload()
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| info.payload().downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    single_line(&payload, PANIC_PAYLOAD_LIMIT)
}

fn single_line(value: &str, max_chars: usize) -> String {
    let flattened = value.replace(['\n', '\r'], " ");
    let mut capped = flattened.chars().take(max_chars).collect::<String>();
    if flattened.chars().count() > max_chars {
        capped.push_str("...");
    }
    capped
}
