//! Per-source statistics and the final pipeline summary

use std::time::Duration;

use comfy_table::{Attribute, Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use refdex_core::fmt_num;

use crate::error::PipelineError;
use crate::source::Format;

/// Statistics for one decoded source
#[derive(Debug, Clone)]
pub struct SourceStats {
    pub label: String,
    pub format: Format,
    /// Records decoded and queued for indexing
    pub records: usize,
    /// Raw bytes read
    pub bytes: u64,
    /// Stopped early by cancellation
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl SourceStats {
    /// Log source completion (non-TTY mode only).
    pub fn log(&self) {
        let rate = rate(self.records as u64, self.elapsed);
        if self.cancelled {
            log::warn!(
                "{}: cancelled after {} records [{:.1}s]",
                self.label,
                fmt_num(self.records),
                self.elapsed.as_secs_f64()
            );
        } else {
            log::info!(
                "{}: {} records ({}, {:.1} MiB) [{:.1}s, {:.0}/s]",
                self.label,
                fmt_num(self.records),
                self.format,
                self.bytes as f64 / (1024.0 * 1024.0),
                self.elapsed.as_secs_f64(),
                rate
            );
        }
    }
}

/// Outcome of one pipeline run
#[derive(Debug, Default)]
pub struct PipelineResult {
    pub sources_total: usize,
    /// Sources decoded to the end
    pub sources_processed: usize,
    /// Sources that failed to open, classify or decode
    pub sources_failed: usize,
    /// Sources never started or stopped early by cancellation
    pub sources_cancelled: usize,
    pub records_decoded: u64,
    pub records_indexed: u64,
    /// Documents rejected by the engine
    pub records_failed: u64,
    pub elapsed: Duration,
    /// Shutdown was requested by a signal
    pub interrupted: bool,
    pub error: Option<PipelineError>,
}

impl PipelineResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && !self.interrupted
    }

    pub fn docs_per_sec(&self) -> f64 {
        rate(self.records_indexed, self.elapsed)
    }

    /// Format summary table as a string.
    pub fn format_table(&self) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                Cell::new("Indexing")
                    .fg(Color::Cyan)
                    .add_attribute(Attribute::Bold),
                Cell::new("Value").fg(Color::Cyan),
            ]);

        table.add_row(vec![
            Cell::new("Sources"),
            Cell::new(format!(
                "{}/{} ({} failed, {} cancelled)",
                self.sources_processed,
                self.sources_total,
                self.sources_failed,
                self.sources_cancelled
            )),
        ]);
        table.add_row(vec![
            Cell::new("Records decoded"),
            Cell::new(fmt_num(self.records_decoded as usize)),
        ]);
        table.add_row(vec![
            Cell::new("Records indexed").fg(Color::Green),
            Cell::new(fmt_num(self.records_indexed as usize)).fg(Color::Green),
        ]);
        let failed = Cell::new(fmt_num(self.records_failed as usize));
        table.add_row(vec![
            Cell::new("Records rejected"),
            if self.records_failed > 0 {
                failed.fg(Color::Red)
            } else {
                failed
            },
        ]);
        table.add_row(vec![
            Cell::new("Elapsed"),
            Cell::new(format!(
                "{:.1}s ({:.0} docs/sec)",
                self.elapsed.as_secs_f64(),
                self.docs_per_sec()
            )),
        ]);
        if let Some(err) = &self.error {
            table.add_row(vec![
                Cell::new("Error").fg(Color::Red),
                Cell::new(err.headline.to_string()).fg(Color::Red),
            ]);
            if !err.secondary.is_empty() {
                table.add_row(vec![
                    Cell::new("Also"),
                    Cell::new(
                        err.secondary
                            .iter()
                            .map(ToString::to_string)
                            .collect::<Vec<_>>()
                            .join("\n"),
                    ),
                ]);
            }
        }

        format!("\n{table}")
    }

    /// Print the summary table (TTY mode).
    pub fn print(&self) {
        eprintln!("{}", self.format_table());
    }

    /// Log minimal summary (non-TTY mode).
    pub fn log(&self) {
        log::info!(
            "Indexed {} of {} decoded records ({} rejected) from {}/{} sources in {:.1}s ({:.0} docs/sec)",
            fmt_num(self.records_indexed as usize),
            fmt_num(self.records_decoded as usize),
            fmt_num(self.records_failed as usize),
            self.sources_processed,
            self.sources_total,
            self.elapsed.as_secs_f64(),
            self.docs_per_sec()
        );
        if let Some(err) = &self.error {
            log::error!("{}", err.headline);
            for e in &err.secondary {
                log::error!("  also: {e}");
            }
        }
    }
}

fn rate(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IngestError;

    #[test]
    fn rate_zero_elapsed() {
        assert_eq!(rate(100, Duration::ZERO), 0.0);
    }

    #[test]
    fn rate_normal() {
        assert!((rate(500, Duration::from_secs(2)) - 250.0).abs() < 0.001);
    }

    #[test]
    fn success_requires_no_error() {
        let mut result = PipelineResult::default();
        assert!(result.is_success());
        result.error = PipelineError::from_errors(vec![IngestError::config("x")]);
        assert!(!result.is_success());
    }

    #[test]
    fn interrupted_is_not_success() {
        let result = PipelineResult {
            interrupted: true,
            ..Default::default()
        };
        assert!(!result.is_success());
    }

    #[test]
    fn table_contains_counts() {
        let result = PipelineResult {
            sources_total: 3,
            sources_processed: 3,
            records_decoded: 1_234_567,
            records_indexed: 1_234_560,
            records_failed: 7,
            elapsed: Duration::from_secs(10),
            ..Default::default()
        };
        let table = result.format_table();
        assert!(table.contains("3/3"));
        assert!(table.contains("1,234,567"));
        assert!(table.contains("1,234,560"));
        assert!(table.contains("123456 docs/sec"));
        assert!(!table.contains("Error"));
    }

    #[test]
    fn table_shows_errors() {
        let result = PipelineResult {
            error: PipelineError::from_errors(vec![
                IngestError::config("first"),
                IngestError::config("second"),
            ]),
            ..Default::default()
        };
        let table = result.format_table();
        assert!(table.contains("config: first"));
        assert!(table.contains("config: second"));
    }
}
