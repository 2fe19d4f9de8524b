// progress.rs - Progress reporting seam
// The engine only calls advance / set_label / message; rendering belongs to the sink.

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::logger::{self, Level};

const LABEL_WIDTH: usize = 40;

pub trait ProgressSink: Send + Sync {
    fn advance(&self, n: u64);
    fn set_label(&self, label: &str);
    fn message(&self, level: Level, text: &str);
    /// Only meaningful for sinks that render a bounded bar
    fn set_total(&self, _total: u64) {}
}

/// Shorten a label to `max` characters, marking the cut with "..."
pub fn clip(label: &str, max: usize) -> String {
    if label.chars().count() <= max {
        return label.to_string();
    }
    let kept: String = label.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept)
}

/// indicatif bar; log lines are printed above it
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new(total: u64, title: &str) -> Self {
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{prefix:<16.bold} {percent:>3}%|{bar:40.cyan/blue}| {pos}/{len} [{elapsed_precise}<{eta}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("\u{2588}\u{2592}\u{2591}"),
        );
        bar.set_prefix(title.to_string());
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressSink for BarProgress {
    fn advance(&self, n: u64) {
        self.bar.inc(n);
    }

    fn set_label(&self, label: &str) {
        self.bar.set_message(clip(label, LABEL_WIDTH));
    }

    fn message(&self, level: Level, text: &str) {
        self.bar.suspend(|| logger::emit(level, text));
    }

    fn set_total(&self, total: u64) {
        self.bar.set_length(total);
    }
}

/// Counts progress without drawing anything; messages still reach the console
#[derive(Default)]
pub struct CountingProgress {
    advanced: AtomicU64,
    label: Mutex<String>,
    messages: Mutex<Vec<(Level, String)>>,
    quiet: bool,
}

impl CountingProgress {
    pub fn quiet() -> Self {
        Self {
            quiet: true,
            ..Self::default()
        }
    }

    pub fn advanced(&self) -> u64 {
        self.advanced.load(Ordering::SeqCst)
    }

    pub fn label(&self) -> String {
        self.label.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn messages(&self) -> Vec<(Level, String)> {
        self.messages.lock().map(|m| m.clone()).unwrap_or_default()
    }
}

impl ProgressSink for CountingProgress {
    fn advance(&self, n: u64) {
        self.advanced.fetch_add(n, Ordering::SeqCst);
    }

    fn set_label(&self, label: &str) {
        if let Ok(mut current) = self.label.lock() {
            *current = label.to_string();
        }
    }

    fn message(&self, level: Level, text: &str) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push((level, text.to_string()));
        }
        if !self.quiet {
            logger::emit(level, text);
        }
    }
}
