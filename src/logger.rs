// logger.rs - Leveled console output
// Format: [LEVEL]   <timestamp> │ message

use chrono::Local;
use colored::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
    Success,
    Progress,
}

impl Level {
    fn tag(self) -> ColoredString {
        match self {
            Level::Info => "[INFO]    ".cyan(),
            Level::Warn => "[WARN]    ".yellow(),
            Level::Error => "[ERROR]   ".red(),
            Level::Success => "[SUCCESS] ".green(),
            Level::Progress => "[PROGRESS]".blue(),
        }
    }
}

/// Render one log line without printing it
pub fn format_line(level: Level, message: &str) -> String {
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
    format!("{} {} │ {}", level.tag(), timestamp, message)
}

pub fn emit(level: Level, message: &str) {
    match level {
        Level::Error => eprintln!("{}", format_line(level, message)),
        _ => println!("{}", format_line(level, message)),
    }
}

pub fn info(message: impl AsRef<str>) {
    emit(Level::Info, message.as_ref());
}

pub fn warn(message: impl AsRef<str>) {
    emit(Level::Warn, message.as_ref());
}

pub fn error(message: impl AsRef<str>) {
    emit(Level::Error, message.as_ref());
}

pub fn success(message: impl AsRef<str>) {
    emit(Level::Success, message.as_ref());
}

pub fn progress(message: impl AsRef<str>) {
    emit(Level::Progress, message.as_ref());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_line_contains_tag_and_message() {
        colored::control::set_override(false);
        let line = format_line(Level::Warn, "no endpoints");
        assert!(line.starts_with("[WARN]"));
        assert!(line.ends_with("│ no endpoints"));
    }
}
