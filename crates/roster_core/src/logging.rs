//! Process-wide logging bootstrap.
//!
//! # Responsibility
//! - Start the `flexi_logger` backend exactly once per process.
//! - Route records to rotating files or stderr, per [`LoggingConfig`].
//!
//! # Invariants
//! - Same config twice is a no-op; a different level or target is rejected.
//! - Initialization never panics.
//! - Core emits `event=<name> module=<area> status=<state>` records only;
//!   member/team field values are never logged.

use crate::config::LoggingConfig;
use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::info;
use once_cell::sync::OnceCell;
use std::path::PathBuf;

const LOG_FILE_BASENAME: &str = "roster";
const MAX_LOG_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
const MAX_LOG_FILES: usize = 5;

static ACTIVE_LOGGER: OnceCell<ActiveLogger> = OnceCell::new();

/// Where records go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Stderr,
    Directory(PathBuf),
}

struct ActiveLogger {
    level: &'static str,
    target: LogTarget,
    _handle: LoggerHandle,
}

/// Initializes logging from `config`.
///
/// # Errors
/// - Unsupported level, or a relative/empty directory.
/// - Directory creation or backend start failure.
/// - Logging already active with another level or target.
pub fn init_logging(config: &LoggingConfig) -> Result<(), String> {
    let level = normalize_level(&config.level)?;
    let target = resolve_target(config.dir.as_ref())?;

    if let Some(active) = ACTIVE_LOGGER.get() {
        return ensure_matches(active, level, &target);
    }

    let active = ACTIVE_LOGGER.get_or_try_init(|| start_logger(level, target.clone()))?;
    ensure_matches(active, level, &target)
}

/// Returns `(level, target)` of the active logger, if any.
pub fn logging_status() -> Option<(&'static str, LogTarget)> {
    ACTIVE_LOGGER
        .get()
        .map(|active| (active.level, active.target.clone()))
}

/// `debug` for debug builds, `info` otherwise.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

fn start_logger(level: &'static str, target: LogTarget) -> Result<ActiveLogger, String> {
    let logger = Logger::try_with_str(level)
        .map_err(|err| format!("invalid log level `{level}`: {err}"))?;

    let handle = match &target {
        LogTarget::Stderr => logger
            .log_to_stderr()
            .format_for_stderr(flexi_logger::detailed_format)
            .start(),
        LogTarget::Directory(dir) => {
            std::fs::create_dir_all(dir).map_err(|err| {
                format!("failed to create log directory `{}`: {err}", dir.display())
            })?;
            logger
                .log_to_file(
                    FileSpec::default()
                        .directory(dir.as_path())
                        .basename(LOG_FILE_BASENAME),
                )
                .rotate(
                    Criterion::Size(MAX_LOG_FILE_SIZE_BYTES),
                    Naming::Numbers,
                    Cleanup::KeepLogFiles(MAX_LOG_FILES),
                )
                .write_mode(WriteMode::BufferAndFlush)
                .append()
                .format_for_files(flexi_logger::detailed_format)
                .start()
        }
    }
    .map_err(|err| format!("failed to start logger: {err}"))?;

    info!(
        "event=logging_init module=core status=ok level={level} target={} version={}",
        describe_target(&target),
        env!("CARGO_PKG_VERSION")
    );

    Ok(ActiveLogger {
        level,
        target,
        _handle: handle,
    })
}

fn ensure_matches(
    active: &ActiveLogger,
    level: &'static str,
    target: &LogTarget,
) -> Result<(), String> {
    if &active.target != target {
        return Err(format!(
            "logging already active on {}; refusing to switch to {}",
            describe_target(&active.target),
            describe_target(target)
        ));
    }
    if active.level != level {
        return Err(format!(
            "logging already active at level `{}`; refusing to switch to `{level}`",
            active.level
        ));
    }
    Ok(())
}

fn normalize_level(level: &str) -> Result<&'static str, String> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" => Ok("error"),
        other => Err(format!(
            "unsupported log level `{other}`; expected trace|debug|info|warn|error"
        )),
    }
}

fn resolve_target(dir: Option<&PathBuf>) -> Result<LogTarget, String> {
    let Some(dir) = dir else {
        return Ok(LogTarget::Stderr);
    };
    if dir.as_os_str().is_empty() {
        return Err("log dir cannot be empty".to_string());
    }
    if !dir.is_absolute() {
        return Err(format!(
            "log dir must be an absolute path, got `{}`",
            dir.display()
        ));
    }
    Ok(LogTarget::Directory(dir.clone()))
}

fn describe_target(target: &LogTarget) -> String {
    match target {
        LogTarget::Stderr => "stderr".to_string(),
        LogTarget::Directory(dir) => format!("dir:{}", dir.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::{init_logging, logging_status, normalize_level, resolve_target, LogTarget};
    use crate::config::LoggingConfig;
    use std::path::PathBuf;

    #[test]
    fn normalize_level_accepts_aliases_and_case() {
        assert_eq!(normalize_level(" WARNING ").unwrap(), "warn");
        assert_eq!(normalize_level("Trace").unwrap(), "trace");
        assert!(normalize_level("verbose").is_err());
    }

    #[test]
    fn resolve_target_defaults_to_stderr_and_rejects_relative_dirs() {
        assert_eq!(resolve_target(None).unwrap(), LogTarget::Stderr);

        let relative = PathBuf::from("logs/dev");
        let err = resolve_target(Some(&relative)).expect_err("relative dir must fail");
        assert!(err.contains("absolute"));
    }

    #[test]
    fn init_logging_is_idempotent_and_rejects_conflicts() {
        let dir = std::env::temp_dir().join(format!("roster-logging-{}", std::process::id()));
        let config = LoggingConfig {
            level: "info".to_string(),
            dir: Some(dir.clone()),
        };

        init_logging(&config).expect("first init should succeed");
        init_logging(&config).expect("same config should be idempotent");

        let louder = LoggingConfig {
            level: "debug".to_string(),
            ..config.clone()
        };
        let err = init_logging(&louder).expect_err("level change must fail");
        assert!(err.contains("refusing to switch"));

        let to_stderr = LoggingConfig {
            dir: None,
            ..config.clone()
        };
        let err = init_logging(&to_stderr).expect_err("target change must fail");
        assert!(err.contains("refusing to switch"));

        let (level, target) = logging_status().expect("logging should be active");
        assert_eq!(level, "info");
        assert_eq!(target, LogTarget::Directory(dir));
    }
}
