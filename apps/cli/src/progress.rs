//! Terminal progress for `docforest run`.

use std::sync::Mutex;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use docforest_core::{ItemOutcome, ItemReport, ProgressReporter, Stage};
use docforest_relations::{ExportStatus, RelationOutcome};

/// One indicatif bar per stage; failures are printed above the bar.
pub(crate) struct CliProgress {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliProgress {
    pub(crate) fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    /// Remove whatever bar is still on screen.
    pub(crate) fn clear(&self) {
        if let Some(bar) = self.slot().take() {
            bar.finish_and_clear();
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<ProgressBar>> {
        self.bar.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Some(bar) = self.slot().as_ref() {
            f(bar);
        }
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.cyan} {prefix:>10} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

impl ProgressReporter for CliProgress {
    fn stage_started(&self, stage: Stage, total: usize) {
        let bar = ProgressBar::new(total as u64);
        bar.set_style(bar_style());
        bar.set_prefix(stage.name());
        bar.enable_steady_tick(Duration::from_millis(80));

        if let Some(previous) = self.slot().replace(bar) {
            previous.finish_and_clear();
        }
    }

    fn item_done(&self, _stage: Stage, report: &ItemReport) {
        self.with_bar(|bar| {
            if let ItemOutcome::Failed { reason } = &report.outcome {
                bar.println(format!("  failed {}: {reason}", report.item));
            }
            bar.set_message(report.item.clone());
            bar.inc(1);
        });
    }

    fn relation_done(&self, outcome: &RelationOutcome) {
        self.with_bar(|bar| {
            let state = match outcome.status {
                ExportStatus::Written { rows } => format!("{rows} rows"),
                ExportStatus::Skipped => "skipped".to_string(),
            };
            bar.set_message(format!("{} ({state})", outcome.relation.file_name()));
            bar.inc(1);
        });
    }

    fn stage_finished(&self, _stage: Stage) {
        self.with_bar(ProgressBar::finish_and_clear);
    }
}
