//! Process-wide logging
//!
//! One `tracing` subscriber per process: an `EnvFilter` (honours `RUST_LOG`),
//! a colored stderr layer, and an optional append-only telemetry file named
//! `terminal-telemetry_<YYYY-MM-DD_HH-MM>.log` in the configured directory.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use tracing::warn;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Logger settings
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is not set (e.g. `info`, `termtel_bridge=debug`)
    pub level: String,
    /// Directory for the telemetry log file; `None` logs to stderr only
    pub directory: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: crate::config::storage::log_dir().ok(),
        }
    }
}

static LOG_FILE_PATH: OnceLock<Option<PathBuf>> = OnceLock::new();

/// Build the telemetry file name for a given local time.
pub fn log_file_name(now: chrono::DateTime<chrono::Local>) -> String {
    format!("terminal-telemetry_{}.log", now.format("%Y-%m-%d_%H-%M"))
}

/// Shared append-only file handle usable as a `fmt` writer.
#[derive(Clone)]
struct AppendFile(Arc<parking_lot::Mutex<File>>);

struct AppendFileGuard<'a>(parking_lot::MutexGuard<'a, File>);

impl Write for AppendFileGuard<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

impl<'a> MakeWriter<'a> for AppendFile {
    type Writer = AppendFileGuard<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        AppendFileGuard(self.0.lock())
    }
}

fn open_log_file(dir: &Path) -> std::io::Result<(File, PathBuf)> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(log_file_name(chrono::Local::now()));
    let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
    writeln!(file, "Log started at {}", chrono::Local::now().to_rfc3339())?;
    Ok((file, path))
}

/// Open the telemetry file, or report why stderr has to do on its own.
fn telemetry_sink(directory: Option<&Path>) -> (Option<(File, PathBuf)>, Option<std::io::Error>) {
    match directory.map(open_log_file) {
        Some(Ok(sink)) => (Some(sink), None),
        Some(Err(e)) => (None, Some(e)),
        None => (None, None),
    }
}

/// Initialize logging.
///
/// Safe to call more than once: later calls return the file chosen by the
/// first one. Returns the telemetry file path when a file sink is active.
pub fn init_logging(config: &LogConfig) -> Option<PathBuf> {
    LOG_FILE_PATH
        .get_or_init(|| {
            let filter = EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

            let (file, open_error) = telemetry_sink(config.directory.as_deref());

            let path = file.as_ref().map(|(_, p)| p.clone());
            let file_layer = file.map(|(file, _)| {
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(AppendFile(Arc::new(parking_lot::Mutex::new(file))))
            });

            let installed = tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .with(file_layer)
                .try_init()
                .is_ok();

            if let Some(e) = open_error {
                warn!("Telemetry log file unavailable, logging to stderr only: {}", e);
            }

            // Another subscriber won the race (tests, embedding hosts)
            if !installed {
                return None;
            }
            path
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_log_file_name_format() {
        let at = chrono::Local
            .with_ymd_and_hms(2024, 3, 7, 9, 5, 0)
            .single()
            .unwrap();
        assert_eq!(log_file_name(at), "terminal-telemetry_2024-03-07_09-05.log");
    }

    #[test]
    fn test_open_log_file_appends_header() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("logs");

        let (_file, path) = open_log_file(&dir).unwrap();
        assert!(path.starts_with(&dir));

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("Log started at "));
    }

    #[test]
    fn test_unusable_log_dir_falls_back_to_stderr() {
        let temp = tempfile::tempdir().unwrap();
        let blocker = temp.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();

        let (file, error) = telemetry_sink(Some(&blocker.join("logs")));
        assert!(file.is_none());
        assert!(error.is_some());

        let (file, error) = telemetry_sink(None);
        assert!(file.is_none());
        assert!(error.is_none());
    }

    #[test]
    fn test_init_logging_twice_keeps_first_file() {
        let temp = tempfile::tempdir().unwrap();
        let first_dir = temp.path().join("first");
        let second_dir = temp.path().join("second");

        let first = init_logging(&LogConfig {
            level: "debug".to_string(),
            directory: Some(first_dir.clone()),
        });
        let second = init_logging(&LogConfig {
            level: "info".to_string(),
            directory: Some(second_dir.clone()),
        });

        let path = first.expect("telemetry file");
        assert!(path.starts_with(&first_dir));
        assert_eq!(second, Some(path.clone()));
        assert!(!second_dir.exists());

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("Log started at "));
    }
}
