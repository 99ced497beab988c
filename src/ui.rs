//! Stderr progress for a `detect` session, fed one `TickOutcome` at a time.

use clap::ValueEnum;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use yolo_stream::{RunReport, TickOutcome};

/// When to draw the live progress bar.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ProgressMode {
    /// Draw on a terminal unless JSON lines share it.
    #[default]
    Auto,
    Plain,
    Pretty,
}

#[derive(Default)]
struct FrameTally {
    processed: u64,
    skipped: u64,
    failed: u64,
    detections: u64,
}

pub struct SessionProgress {
    bar: Option<ProgressBar>,
    tally: FrameTally,
}

impl SessionProgress {
    /// `max_frames` bounds the bar; without it a spinner counts frames read.
    pub fn new(
        mode: ProgressMode,
        stderr_is_tty: bool,
        json_on_terminal: bool,
        max_frames: Option<u64>,
    ) -> Self {
        let draw = stderr_is_tty
            && match mode {
                ProgressMode::Pretty => true,
                ProgressMode::Auto => !json_on_terminal,
                ProgressMode::Plain => false,
            };
        let bar = draw.then(|| {
            let (bar, template) = match max_frames {
                Some(total) => (ProgressBar::new(total), "{bar:30} {pos}/{len} frames {msg}"),
                None => (ProgressBar::new_spinner(), "{spinner} {pos} frames {msg}"),
            };
            bar.set_draw_target(ProgressDrawTarget::stderr());
            bar.set_style(
                ProgressStyle::with_template(template)
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            bar
        });
        Self {
            bar,
            tally: FrameTally::default(),
        }
    }

    /// Count a tick that read a frame. Session-ending outcomes are left to `finish`.
    pub fn observe(&mut self, outcome: &TickOutcome) {
        match outcome {
            TickOutcome::Processed(rendered) => {
                self.tally.processed += 1;
                self.tally.detections += rendered.summary.total_count as u64;
            }
            TickOutcome::Skipped { .. } => self.tally.skipped += 1,
            TickOutcome::InferenceFailed { .. } => self.tally.failed += 1,
            TickOutcome::Idle | TickOutcome::Stopped | TickOutcome::Finished { .. } => return,
        }
        if let Some(bar) = &self.bar {
            bar.inc(1);
            bar.set_message(self.status());
        }
    }

    pub fn finish(self, report: &RunReport) {
        let line = format!("{} ({:?})", self.status(), report.end_reason);
        match &self.bar {
            Some(bar) => bar.finish_with_message(line),
            None => eprintln!("==> {} ticks: {}", report.ticks, line),
        }
    }

    fn status(&self) -> String {
        let t = &self.tally;
        format!(
            "{} processed, {} skipped, {} failed, {} detections",
            t.processed, t.skipped, t.failed, t.detections
        )
    }
}

impl Drop for SessionProgress {
    fn drop(&mut self) {
        if let Some(bar) = &self.bar {
            if !bar.is_finished() {
                bar.abandon();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_mode_counts_without_drawing() {
        let mut progress = SessionProgress::new(ProgressMode::Plain, true, false, Some(3));
        assert!(progress.bar.is_none());

        progress.observe(&TickOutcome::Skipped { sequence: 1 });
        progress.observe(&TickOutcome::Skipped { sequence: 2 });
        progress.observe(&TickOutcome::Finished { frames_read: 2 });
        assert_eq!(progress.tally.skipped, 2);
        assert_eq!(
            progress.status(),
            "0 processed, 2 skipped, 0 failed, 0 detections"
        );
    }

    #[test]
    fn auto_mode_stays_quiet_when_json_shares_the_terminal() {
        let progress = SessionProgress::new(ProgressMode::Auto, true, true, None);
        assert!(progress.bar.is_none());
        let progress = SessionProgress::new(ProgressMode::Pretty, false, false, None);
        assert!(progress.bar.is_none());
    }
}
