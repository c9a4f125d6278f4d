//! Progress reporting for TTY and non-TTY environments.
//!
//! TTY mode: one indicatif bar per source being decoded, plus stage lines.
//! Non-TTY mode: hidden bars, log output only.

use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Per-source bar: compressed bytes read out of the file length
fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{prefix:<24.dim} {bar:30.green/dim} {binary_bytes:>7}/{binary_total_bytes:7} {eta:>4} {wide_msg:.dim}")
        .expect("invalid template")
        .progress_chars("--")
}

/// Pending style: streams without a known length
fn pending_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{prefix:<24.dim} {binary_bytes:>7} {wide_msg:.dim}")
        .expect("invalid template")
}

/// Switch a source bar to a bytes bar once the total length is known.
pub fn upgrade_to_bar(pb: &ProgressBar, total: u64) {
    pb.set_length(total);
    pb.set_style(bar_style());
}

/// Central progress context managing multi-progress bars.
pub struct ProgressContext {
    multi: MultiProgress,
    is_tty: bool,
}

impl ProgressContext {
    /// Create new context, detecting TTY automatically.
    pub fn new() -> Self {
        Self::with_tty(std::io::stderr().is_terminal())
    }

    /// Context with bars always hidden (tests, piped output)
    pub fn hidden() -> Self {
        Self::with_tty(false)
    }

    fn with_tty(is_tty: bool) -> Self {
        Self {
            multi: MultiProgress::new(),
            is_tty,
        }
    }

    /// Create a per-source progress bar.
    ///
    /// TTY: visible bar in pending style. Non-TTY: hidden (no-op).
    pub fn source_bar(&self, name: &str) -> ProgressBar {
        if !self.is_tty {
            return ProgressBar::hidden();
        }

        let pb = self.multi.add(ProgressBar::new(0));
        pb.set_style(pending_style());
        // Keep the tail of long paths; the file name is the useful part
        let display = match name.char_indices().rev().nth(23) {
            Some((idx, _)) => &name[idx..],
            None => name,
        };
        pb.set_prefix(display.to_string());
        pb
    }

    /// Create a stage status line with a spinner.
    ///
    /// Update with `pb.set_message(...)`; call `pb.finish()` to stop the spinner.
    pub fn stage_line(&self, name: &str) -> ProgressBar {
        if !self.is_tty {
            return ProgressBar::hidden();
        }
        let pb = self.multi.add(ProgressBar::new(0));
        pb.set_style(
            ProgressStyle::with_template("{spinner:.green} {prefix:<10.cyan.bold} {wide_msg}")
                .expect("invalid template"),
        );
        pb.set_prefix(name.to_string());
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }

    /// Print a line above managed progress bars (avoids interference).
    pub fn println(&self, msg: impl AsRef<str>) {
        if self.is_tty {
            let _ = self.multi.println(msg);
        } else {
            eprintln!("{}", msg.as_ref());
        }
    }

    /// Whether running in TTY mode.
    pub fn is_tty(&self) -> bool {
        self.is_tty
    }

    /// Get reference to `MultiProgress` for log bridge.
    pub fn multi(&self) -> &MultiProgress {
        &self.multi
    }
}

impl Default for ProgressContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe wrapper for `ProgressContext`.
pub type SharedProgress = Arc<ProgressContext>;

/// Format number with thousand separators.
pub fn fmt_num(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}
