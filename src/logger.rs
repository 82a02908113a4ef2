//! Run log for one participant sitting.
//!
//! Every launch starts `drawtask/drawtask.log` in the platform data directory
//! afresh, so the file only describes the sitting in progress. Lines carry a
//! UTC clock time, a level and, once known, the session context (participant
//! and node in the networked variant, worker and condition in the standalone
//! task):
//!
//! ```text
//! [14:02:11] [INFO] [p-1 node 4] Drawings for node 4 submitted
//! ```
//!
//! Log from anywhere with `log_info!` / `log_warn!` / `log_err!`. Until
//! [`init`] has opened the file (unit tests, headless commands) they do nothing.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
    Panic,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Panic => "PANIC",
        }
    }
}

struct RunLog {
    file: File,
    path: PathBuf,
    context: Option<String>,
}

static RUN_LOG: OnceLock<Mutex<RunLog>> = OnceLock::new();

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logger::write($crate::logger::Level::Info, &format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logger::write($crate::logger::Level::Warn, &format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_err {
    ($($arg:tt)*) => {
        $crate::logger::write($crate::logger::Level::Error, &format!($($arg)*));
    };
}

/// Open the run log in the data directory. `mode` names the front end in
/// the header line.
pub fn init(mode: &str) {
    init_at(&data_dir().join("drawtask").join("drawtask.log"), mode);
}

/// Open (and truncate) the run log at `path`, then mirror panics into it.
/// Only the first call in a process takes effect.
pub fn init_at(path: &Path, mode: &str) {
    if RUN_LOG.get().is_some() {
        return;
    }
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let file = match OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
    {
        Ok(f) => f,
        Err(e) => {
            eprintln!("[logger] cannot open {}: {}", path.display(), e);
            return;
        }
    };
    let log = RunLog {
        file,
        path: path.to_path_buf(),
        context: None,
    };
    if RUN_LOG.set(Mutex::new(log)).is_err() {
        return;
    }

    append(&format!("=== drawtask {} (unix {}) ===", mode, unix_secs()));

    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        write(Level::Panic, &info.to_string());
        prev(info);
    }));
}

/// Path of the open run log, if any.
pub fn log_path() -> Option<PathBuf> {
    let log = RUN_LOG.get()?.lock().ok()?;
    Some(log.path.clone())
}

/// Tag subsequent lines with `context`; `None` clears the tag.
pub fn set_context(context: Option<String>) {
    if let Some(mutex) = RUN_LOG.get()
        && let Ok(mut log) = mutex.lock()
    {
        log.context = context;
    }
}

pub fn write(level: Level, msg: &str) {
    if let Some(mutex) = RUN_LOG.get()
        && let Ok(mut log) = mutex.lock()
    {
        let line = format_line(&clock(unix_secs()), level, log.context.as_deref(), msg);
        // a participant must never see a logging failure
        let _ = writeln!(log.file, "{}", line);
    }
}

fn append(line: &str) {
    if let Some(mutex) = RUN_LOG.get()
        && let Ok(mut log) = mutex.lock()
    {
        let _ = writeln!(log.file, "{}", line);
    }
}

fn format_line(clock: &str, level: Level, context: Option<&str>, msg: &str) -> String {
    match context {
        Some(ctx) => format!("[{}] [{}] [{}] {}", clock, level.as_str(), ctx, msg),
        None => format!("[{}] [{}] {}", clock, level.as_str(), msg),
    }
}

/// Platform data directory, without the app folder. Also holds `settings.cfg`.
pub fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata);
        }
    }
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join("Library").join("Application Support");
        }
    }
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    match std::env::var("HOME") {
        Ok(home) => PathBuf::from(home).join(".local").join("share"),
        Err(_) => PathBuf::from("."),
    }
}

/// Seconds since the unix epoch, 0 if the clock is before it.
pub fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// `HH:MM:SS` of `secs` within its UTC day.
fn clock(secs: u64) -> String {
    let day = secs % 86_400;
    format!("{:02}:{:02}:{:02}", day / 3600, (day % 3600) / 60, day % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_carry_level_and_context() {
        assert_eq!(
            format_line("01:02:03", Level::Warn, None, "slow"),
            "[01:02:03] [WARN] slow"
        );
        assert_eq!(
            format_line("01:02:03", Level::Info, Some("p-1 node 4"), "submitted"),
            "[01:02:03] [INFO] [p-1 node 4] submitted"
        );
    }

    #[test]
    fn clock_wraps_at_midnight() {
        assert_eq!(clock(0), "00:00:00");
        assert_eq!(clock(3_661), "01:01:01");
        assert_eq!(clock(86_400 + 59), "00:00:59");
    }

    #[test]
    fn run_log_records_macros_with_context() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run").join("drawtask.log");
        init_at(&path, "test");
        assert_eq!(log_path(), Some(path.clone()));
        set_context(Some("W7".into()));
        crate::log_err!("decode failed for {}", "b.png");
        set_context(None);
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("=== drawtask test"));
        assert!(text.contains("[ERROR] [W7] decode failed for b.png"));
    }
}
