use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Mutex, OnceLock};
use chrono::Local;

static LOGGER: OnceLock<Mutex<Logger>> = OnceLock::new();

struct Logger {
    file: File,
    echo: bool,
    verbose: bool,
    prefixes: HashMap<String, u8>, // prefix -> color index
}

// Color indices, mapped to ANSI codes for the stderr echo
pub const COLOR_GRAY: u8 = 1;
pub const COLOR_BLUE: u8 = 2;
pub const COLOR_YELLOW: u8 = 3;

/// Initialize the global logger. Clears the log file.
pub fn init(log_dir: &Path, echo: bool, verbose: bool) -> io::Result<()> {
    fs::create_dir_all(log_dir)?;
    let log_path = log_dir.join("agent.log");
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&log_path)?;

    LOGGER
        .set(Mutex::new(Logger { file, echo, verbose, prefixes: HashMap::new() }))
        .ok();
    Ok(())
}

/// Register a prefix with a color. Prefixed log calls pick it up.
pub fn register_prefix(prefix: &str, color: u8) {
    if let Some(logger) = LOGGER.get() {
        if let Ok(mut l) = logger.lock() {
            l.prefixes.insert(prefix.to_string(), color);
        }
    }
}

fn ansi(color: u8) -> &'static str {
    match color {
        COLOR_GRAY => "\x1b[90m",
        COLOR_BLUE => "\x1b[34m",
        COLOR_YELLOW => "\x1b[33m",
        _ => "",
    }
}

fn write_log(level: &str, prefix: &str, msg: &str) {
    let Some(logger) = LOGGER.get() else { return };
    let Ok(mut l) = logger.lock() else { return };
    if level == "DEBUG" && !l.verbose {
        return;
    }

    let ts = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();

    // File always gets plain text
    let file_line = if prefix.is_empty() {
        format!("[{}] [{}] {}", ts, level, msg)
    } else {
        format!("[{}] [{}] [{}] {}", ts, level, prefix, msg)
    };
    writeln!(l.file, "{}", file_line).ok();

    if l.echo {
        let color = l.prefixes.get(prefix).copied().unwrap_or(0);
        let line = if prefix.is_empty() || color == 0 {
            file_line
        } else {
            format!("[{}] [{}] {}[{}]\x1b[0m {}", ts, level, ansi(color), prefix, msg)
        };
        eprintln!("{}", line);
    }
}

pub fn debug(msg: &str) {
    write_log("DEBUG", "", msg);
}

pub fn info(msg: &str) {
    write_log("INFO", "", msg);
}

pub fn warn(msg: &str) {
    write_log("WARN", "", msg);
}

pub fn error(msg: &str) {
    write_log("ERROR", "", msg);
}

/// Log with a registered prefix.
pub fn debug_p(prefix: &str, msg: &str) {
    write_log("DEBUG", prefix, msg);
}

pub fn info_p(prefix: &str, msg: &str) {
    write_log("INFO", prefix, msg);
}

pub fn warn_p(prefix: &str, msg: &str) {
    write_log("WARN", prefix, msg);
}

pub fn error_p(prefix: &str, msg: &str) {
    write_log("ERROR", prefix, msg);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_prefixed_lines_and_drops_debug_when_quiet() {
        let dir = tempfile::tempdir().unwrap();
        init(dir.path(), false, false).unwrap();
        register_prefix("probe", COLOR_BLUE);

        info_p("probe", "logger-probe-info");
        debug("logger-probe-debug");

        let text = fs::read_to_string(dir.path().join("agent.log")).unwrap();
        assert!(text.contains("[INFO] [probe] logger-probe-info"), "{}", text);
        assert!(!text.contains("logger-probe-debug"));
    }
}
