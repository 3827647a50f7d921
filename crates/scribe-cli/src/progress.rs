//! Progress indicators and status output for the terminal
//!
//! Everything here is cosmetic; a quiet [`StatusLine`] prints nothing.

use std::io::{stdout, IsTerminal, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

// ANSI escape codes
const CLEAR_LINE: &str = "\x1b[2K\r";
const HIDE_CURSOR: &str = "\x1b[?25l";
const SHOW_CURSOR: &str = "\x1b[?25h";
const CYAN: &str = "\x1b[96m";
const GREEN: &str = "\x1b[92m";
const YELLOW: &str = "\x1b[93m";
const RED: &str = "\x1b[91m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

/// Spinner animation frames
const SPINNER_FRAMES: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// Alternative ASCII spinner for terminals that don't support Unicode
const ASCII_SPINNER: &[&str] = &["|", "/", "-", "\\"];

const METER_WIDTH: usize = 30;

/// A terminal spinner shown while waiting on the model
pub struct Spinner {
    message: String,
    is_running: Arc<AtomicBool>,
    handle: Option<tokio::task::JoinHandle<()>>,
    use_unicode: bool,
}

impl Spinner {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            is_running: Arc::new(AtomicBool::new(false)),
            handle: None,
            use_unicode: supports_unicode(),
        }
    }

    /// Start the spinner animation
    pub fn start(&mut self) {
        if self.is_running.load(Ordering::SeqCst) {
            return;
        }

        self.is_running.store(true, Ordering::SeqCst);

        let is_running = self.is_running.clone();
        let message = self.message.clone();
        let use_unicode = self.use_unicode;

        self.handle = Some(tokio::spawn(async move {
            let frames = if use_unicode {
                SPINNER_FRAMES
            } else {
                ASCII_SPINNER
            };

            let mut idx = 0;
            let mut tick = interval(Duration::from_millis(80));

            print!("{}", HIDE_CURSOR);
            let _ = stdout().flush();

            while is_running.load(Ordering::SeqCst) {
                print!("{}{}{} {}{}", CLEAR_LINE, CYAN, frames[idx], message, RESET);
                let _ = stdout().flush();
                idx = (idx + 1) % frames.len();
                tick.tick().await;
            }

            print!("{}{}", CLEAR_LINE, SHOW_CURSOR);
            let _ = stdout().flush();
        }));
    }

    /// Stop the spinner silently
    pub async fn stop(&mut self) {
        self.is_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        self.is_running.store(false, Ordering::SeqCst);
        if self.handle.is_some() {
            print!("{}", SHOW_CURSOR);
            let _ = stdout().flush();
        }
    }
}

/// Bar showing context usage against the hard limit
#[derive(Debug, Clone, Copy)]
pub struct UsageMeter {
    used: usize,
    limit: usize,
    threshold: usize,
    width: usize,
    use_unicode: bool,
}

impl UsageMeter {
    pub fn new(used: usize, limit: usize, threshold: usize) -> Self {
        Self {
            used,
            limit,
            threshold,
            width: METER_WIDTH,
            use_unicode: supports_unicode(),
        }
    }

    #[cfg(test)]
    pub fn with_width(mut self, width: usize) -> Self {
        self.width = width;
        self
    }

    pub fn with_unicode(mut self, use_unicode: bool) -> Self {
        self.use_unicode = use_unicode;
        self
    }

    pub fn percent(&self) -> f64 {
        if self.limit == 0 {
            100.0
        } else {
            self.used as f64 / self.limit as f64 * 100.0
        }
    }

    /// Plain-text rendering (no colors)
    pub fn render(&self) -> String {
        let filled = if self.limit > 0 {
            (self.width * self.used.min(self.limit)) / self.limit
        } else {
            self.width
        };
        let empty = self.width - filled;

        let (fill_char, empty_char) = if self.use_unicode {
            ("█", "░")
        } else {
            ("#", "-")
        };

        format!(
            "[{}{}] {}/{} tokens ({:.1}%)",
            fill_char.repeat(filled),
            empty_char.repeat(empty),
            self.used,
            self.limit,
            self.percent()
        )
    }

    fn color(&self) -> &'static str {
        if self.used >= self.threshold {
            RED
        } else if self.used * 10 >= self.threshold * 8 {
            YELLOW
        } else {
            GREEN
        }
    }
}

/// Operator-facing output of the agent loop
#[derive(Debug, Clone, Copy)]
pub struct StatusLine {
    use_unicode: bool,
    quiet: bool,
    interactive: bool,
}

impl StatusLine {
    pub fn new() -> Self {
        Self {
            use_unicode: supports_unicode(),
            quiet: false,
            interactive: stdout().is_terminal(),
        }
    }

    /// A status line that prints nothing
    pub fn quiet() -> Self {
        Self {
            use_unicode: false,
            quiet: true,
            interactive: false,
        }
    }

    #[cfg(test)]
    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    /// Spinner for a model call, only on an interactive terminal
    pub fn spinner(&self, message: impl Into<String>) -> Option<Spinner> {
        if self.quiet || !self.interactive {
            return None;
        }
        let mut spinner = Spinner::new(message);
        spinner.start();
        Some(spinner)
    }

    /// Banner printed at the start of each iteration
    pub fn iteration(&self, iteration: usize, max: usize) {
        if self.quiet {
            return;
        }
        println!();
        println!("{}{}── Iteration {}/{} ──{}", BOLD, CYAN, iteration, max, RESET);
    }

    pub fn usage(&self, meter: &UsageMeter) {
        if self.quiet {
            return;
        }
        let meter = meter.with_unicode(self.use_unicode);
        println!("{}{}{}", meter.color(), meter.render(), RESET);
    }

    /// Show a status message
    pub fn status(&self, message: impl Into<String>) {
        if self.quiet {
            return;
        }
        let arrow = if self.use_unicode { "→" } else { ">" };
        println!("{}{} {}{}", DIM, arrow, message.into(), RESET);
    }

    /// Show an info message
    pub fn info(&self, message: impl Into<String>) {
        if self.quiet {
            return;
        }
        let info = if self.use_unicode { "ℹ" } else { "i" };
        println!("{}{} {}{}", CYAN, info, message.into(), RESET);
    }

    /// Show a success message
    pub fn success(&self, message: impl Into<String>) {
        if self.quiet {
            return;
        }
        let check = if self.use_unicode { "✓" } else { "+" };
        println!("{}{} {}{}", GREEN, check, message.into(), RESET);
    }

    /// Show a warning message
    pub fn warning(&self, message: impl Into<String>) {
        if self.quiet {
            return;
        }
        let warn = if self.use_unicode { "⚠" } else { "!" };
        println!("{}{} {}{}", YELLOW, warn, message.into(), RESET);
    }

    /// Show an error message
    pub fn error(&self, message: impl Into<String>) {
        if self.quiet {
            return;
        }
        let x = if self.use_unicode { "✗" } else { "x" };
        println!("{}{} {}{}", RED, x, message.into(), RESET);
    }

    /// Model text, indented under the banner
    pub fn model_text(&self, text: &str) {
        if self.quiet || text.trim().is_empty() {
            return;
        }
        for line in text.trim().lines() {
            println!("  {}", line);
        }
    }

    /// One executed tool call
    pub fn tool(&self, name: &str, ok: bool, output: &str) {
        if self.quiet {
            return;
        }
        let (color, label) = if ok { (GREEN, "OK") } else { (YELLOW, "Failed") };
        println!("{}[Tool: {}]{} {}{}{} {}", CYAN, name, RESET, color, label, RESET, preview(output));
    }
}

impl Default for StatusLine {
    fn default() -> Self {
        Self::new()
    }
}

fn preview(text: &str) -> String {
    let line = text.lines().next().unwrap_or("");
    match line.char_indices().nth(120) {
        Some((idx, _)) => format!("{}...", &line[..idx]),
        None => line.to_string(),
    }
}

/// Check if the terminal likely supports Unicode
fn supports_unicode() -> bool {
    if let Ok(term) = std::env::var("TERM") {
        if term.contains("xterm") || term.contains("256color") || term.contains("kitty") {
            return true;
        }
    }

    for var in &["LC_ALL", "LC_CTYPE", "LANG"] {
        if let Ok(val) = std::env::var(var) {
            if val.to_lowercase().contains("utf") {
                return true;
            }
        }
    }

    false
}
