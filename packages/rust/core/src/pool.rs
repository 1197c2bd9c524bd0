//! Fixed-size worker pool over a shared pending set.
//!
//! Each worker pops one item at a time until the set is empty. Handlers run in
//! their own task, so an error or a panic is confined to its item and shows up
//! as [`ItemOutcome::Failed`].

use std::collections::VecDeque;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, mpsc};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};

use docforest_shared::{DocForestError, Result};

/// What a handler did with its item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    Written,
    /// Output already existed; nothing was done.
    Skipped,
}

/// How the pool reacts to a failed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Record the failure and keep going.
    Isolate,
    /// Stop taking new items; in-flight items finish, then the run fails.
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Completed,
    Skipped,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemReport {
    pub item: String,
    pub outcome: ItemOutcome,
}

/// Outcome of one pool run.
#[derive(Debug, Clone)]
pub struct PhaseReport {
    pub phase: String,
    pub items: Vec<ItemReport>,
    pub elapsed: Duration,
}

impl PhaseReport {
    pub fn completed(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Completed))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Skipped))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Failed { .. }))
    }

    /// `(item, reason)` for every failed item.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.items.iter().filter_map(|r| match &r.outcome {
            ItemOutcome::Failed { reason } => Some((r.item.as_str(), reason.as_str())),
            _ => None,
        })
    }

    pub fn outcome_of(&self, item: &str) -> Option<&ItemOutcome> {
        self.items.iter().find(|r| r.item == item).map(|r| &r.outcome)
    }

    fn count(&self, pred: impl Fn(&ItemOutcome) -> bool) -> usize {
        self.items.iter().filter(|r| pred(&r.outcome)).count()
    }
}

/// A pool of `workers` concurrent consumers.
#[derive(Debug, Clone, Copy)]
pub struct WorkPool {
    workers: usize,
    policy: FailurePolicy,
}

impl WorkPool {
    pub fn new(workers: usize, policy: FailurePolicy) -> Self {
        Self {
            workers: workers.max(1),
            policy,
        }
    }

    /// Drain `items` through `handler`, calling `on_item` as each item finishes.
    ///
    /// Returns once every worker has exited. Under [`FailurePolicy::Abort`] the
    /// first failure is returned as [`DocForestError::Phase`].
    pub async fn run<T, F, Fut>(
        &self,
        phase: &str,
        items: Vec<T>,
        handler: F,
        on_item: &mut (dyn FnMut(&ItemReport) + Send),
    ) -> Result<PhaseReport>
    where
        T: Display + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Handled>> + Send + 'static,
    {
        let started = Instant::now();
        let total = items.len();
        let pending = Arc::new(Mutex::new(VecDeque::from(items)));
        let handler = Arc::new(handler);
        let abort = Arc::new(AtomicBool::new(false));
        let (tx, mut rx) = mpsc::unbounded_channel::<ItemReport>();

        info!(phase, total, workers = self.workers, "phase started");

        let mut workers = JoinSet::new();
        for worker in 0..self.workers.min(total.max(1)) {
            let pending = pending.clone();
            let handler = handler.clone();
            let abort = abort.clone();
            let tx = tx.clone();
            let policy = self.policy;
            let phase = phase.to_string();

            workers.spawn(async move {
                loop {
                    if abort.load(Ordering::Acquire) {
                        break;
                    }
                    let Some(item) = pending.lock().await.pop_front() else {
                        break;
                    };

                    let label = item.to_string();
                    let handler = handler.clone();
                    let outcome = match tokio::spawn(async move { handler(item).await }).await {
                        Ok(Ok(Handled::Written)) => ItemOutcome::Completed,
                        Ok(Ok(Handled::Skipped)) => ItemOutcome::Skipped,
                        Ok(Err(e)) => ItemOutcome::Failed {
                            reason: e.to_string(),
                        },
                        Err(e) => ItemOutcome::Failed {
                            reason: panic_reason(e),
                        },
                    };

                    if let ItemOutcome::Failed { reason } = &outcome {
                        warn!(%phase, item = %label, %reason, "item failed");
                        if policy == FailurePolicy::Abort {
                            abort.store(true, Ordering::Release);
                        }
                    } else {
                        debug!(%phase, worker, item = %label, ?outcome, "item done");
                    }

                    if tx
                        .send(ItemReport {
                            item: label,
                            outcome,
                        })
                        .is_err()
                    {
                        break;
                    }
                }
            });
        }
        drop(tx);

        let mut reports = Vec::with_capacity(total);
        while let Some(report) = rx.recv().await {
            on_item(&report);
            reports.push(report);
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!(phase, error = %e, "worker exited abnormally");
            }
        }

        let report = PhaseReport {
            phase: phase.to_string(),
            items: reports,
            elapsed: started.elapsed(),
        };
        info!(
            phase,
            completed = report.completed(),
            skipped = report.skipped(),
            failed = report.failed(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "phase finished"
        );

        if self.policy == FailurePolicy::Abort {
            if let Some((item, reason)) = report.failures().next() {
                return Err(DocForestError::Phase {
                    phase: phase.to_string(),
                    item: item.to_string(),
                    reason: reason.to_string(),
                });
            }
        }
        Ok(report)
    }
}

fn panic_reason(e: JoinError) -> String {
    if !e.is_panic() {
        return format!("task cancelled: {e}");
    }
    let payload = e.into_panic();
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panicked: {msg}")
    } else {
        "panicked".to_string()
    }
}
