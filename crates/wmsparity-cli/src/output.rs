//! Output formatting and progress reporting

use console::{style, Style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use wmsparity::{ResultRecord, NOT_APPLICABLE};

/// Progress reporter for a harness run
#[derive(Debug)]
pub struct ProgressReporter {
    term: Term,
    progress_bar: Option<ProgressBar>,
    /// Whether to use colors
    pub use_color: bool,
    /// Quiet mode
    pub quiet: bool,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(true, false)
    }
}

impl ProgressReporter {
    /// Create a new progress reporter
    #[must_use]
    pub fn new(use_color: bool, quiet: bool) -> Self {
        Self {
            term: Term::stderr(),
            progress_bar: None,
            use_color,
            quiet,
        }
    }

    /// Start a progress bar over `total` test cases
    pub fn start_progress(&mut self, total: u64, message: &str) {
        if self.quiet || !self.term.is_term() {
            return;
        }

        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        pb.set_message(message.to_string());
        self.progress_bar = Some(pb);
    }

    /// Increment progress
    pub fn increment(&self, delta: u64) {
        if let Some(ref pb) = self.progress_bar {
            pb.inc(delta);
        }
    }

    /// Finish progress bar
    pub fn finish(&self) {
        if let Some(ref pb) = self.progress_bar {
            pb.finish_and_clear();
        }
    }

    fn line(&self, text: &str) {
        match &self.progress_bar {
            Some(pb) => pb.println(text),
            None => {
                let _ = self.term.write_line(text);
            }
        }
    }

    fn prefixed(&self, symbol: &str, word: &str, color: Style, message: &str) -> String {
        let prefix = if self.use_color {
            color.apply_to(symbol).bold().to_string()
        } else {
            word.to_string()
        };
        format!("{prefix} {message}")
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        if self.quiet {
            return;
        }
        self.line(&self.prefixed("✓", "PASS", Style::new().green(), message));
    }

    /// Print a failure message
    pub fn failure(&self, message: &str) {
        // failures are printed even in quiet mode
        self.line(&self.prefixed("✗", "FAIL", Style::new().red(), message));
    }

    /// Print an info message
    pub fn info(&self, message: &str) {
        if self.quiet {
            return;
        }
        self.line(&self.prefixed("ℹ", "INFO", Style::new().blue(), message));
    }

    /// Print one test case outcome and advance the bar
    pub fn record(&self, record: &ResultRecord) {
        if record.passed() {
            self.success(&format!("{} {}", record.name, scores(record)));
        } else {
            let reason = match (record.failure, &record.message) {
                (Some(kind), Some(message)) => format!("{kind}: {message}"),
                (Some(kind), None) => kind.to_string(),
                (None, _) => String::new(),
            };
            self.failure(&format!("{} {} {reason}", record.name, scores(record)));
        }
        self.increment(1);
    }

    /// Print the run summary
    pub fn summary(&self, passed: usize, failed: usize, duration: Duration) {
        if self.quiet && failed == 0 {
            return;
        }

        let _ = self.term.write_line("");

        let total = passed + failed;
        let duration_secs = duration.as_secs_f64();

        if self.use_color {
            let passed_style = Style::new().green().bold();
            let failed_style = Style::new().red().bold();

            let status = if failed > 0 {
                failed_style.apply_to("FAILED")
            } else {
                passed_style.apply_to("PASSED")
            };

            let _ = self.term.write_line(&format!(
                "{} {} cases in {:.2}s ({} passed, {} failed)",
                status,
                total,
                duration_secs,
                passed_style.apply_to(passed),
                if failed > 0 {
                    failed_style.apply_to(failed).to_string()
                } else {
                    failed.to_string()
                },
            ));
        } else {
            let status = if failed > 0 { "FAILED" } else { "PASSED" };
            let _ = self.term.write_line(&format!(
                "{status} {total} cases in {duration_secs:.2}s ({passed} passed, {failed} failed)"
            ));
        }
    }

    /// Print where the report went
    pub fn report_path(&self, path: &std::path::Path) {
        if self.quiet {
            return;
        }
        let shown = path.display().to_string();
        let shown = if self.use_color {
            style(shown).underlined().to_string()
        } else {
            shown
        };
        let _ = self.term.write_line(&format!("Report: {shown}"));
    }
}

/// `ssim=… mse=… match=…` with `n/a` when not compared
#[must_use]
pub fn scores(record: &ResultRecord) -> String {
    record.score.map_or_else(
        || format!("ssim={NOT_APPLICABLE} mse={NOT_APPLICABLE} match={NOT_APPLICABLE}"),
        |s| format!("ssim={:.4} mse={:.2} match={:.4}", s.ssim, s.mse, s.template_match),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use wmsparity::{ComparisonScore, FailureKind, Thresholds};

    #[test]
    fn test_scores_not_applicable() {
        let record = ResultRecord::new("test_a", Thresholds::default())
            .with_failure(FailureKind::Transport, "refused");
        assert_eq!(scores(&record), "ssim=n/a mse=n/a match=n/a");
    }

    #[test]
    fn test_scores_formatted() {
        let record = ResultRecord::new("test_a", Thresholds::default()).with_score(ComparisonScore {
            ssim: 0.98765,
            mse: 12.345,
            template_match: 1.0,
        });
        assert_eq!(scores(&record), "ssim=0.9877 mse=12.35 match=1.0000");
    }

    #[test]
    fn test_quiet_reporter_accepts_output() {
        let mut reporter = ProgressReporter::new(false, true);
        reporter.start_progress(2, "cases");
        reporter.record(&ResultRecord::new("test_a", Thresholds::default()));
        reporter.summary(0, 1, Duration::from_millis(10));
        reporter.finish();
    }
}
