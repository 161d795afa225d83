// src/funnel/mod.rs
//! Funnel Executor.
//!
//! A fixed pool of workers, each pulling one record at a time from a shared
//! queue and driving it Pre-Filter -> Screening -> Deep Classification.
//! Records are never batched into a single model call. Before pulling a new
//! record a worker checks the run context; once the run is cancelled or a
//! cost ceiling is hit, remaining records are reported as deferred and keep
//! `processed=false`.

pub mod context;
pub mod retry;
pub mod state;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::classify::{DeepClassifier, Screener, TieredModels};
use crate::config::{FunnelConfig, Settings};
use crate::error::FunnelError;
use crate::insight::{ClassifiedInsight, ScreeningResult};
use crate::prefilter::{PreFilter, PreFilterVerdict};
use crate::record::{RawRecord, RecordSource};
use crate::store::{FailureMarker, InsightStore};

pub use context::{RunContext, RunCounts};
pub use retry::{call_with_retry, RetryFailure, RetryPolicy};
pub use state::{
    ClassifyStep, DeferReason, InvalidTransition, Outcome, RecordState, ScreenStep, Stage,
    StageEvent,
};

/// Attempts for the atomic insight + processed write.
const PERSIST_ATTEMPTS: u32 = 3;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        metrics::describe_counter!(
            "funnel_records_total",
            "Records that reached a terminal state, by outcome."
        );
        metrics::describe_counter!(
            "funnel_model_calls_total",
            "Model invocations (retries included), by stage."
        );
        metrics::describe_counter!(
            "funnel_retries_total",
            "Model call retries, by stage and error kind."
        );
        metrics::describe_histogram!(
            "funnel_record_duration_ms",
            "Wall time per record from pre-filter to terminal state."
        );
        metrics::describe_counter!("funnel_runs_total", "Completed funnel runs.");
        metrics::describe_gauge!(
            "funnel_last_run_ts",
            "Unix timestamp of the last finished run."
        );
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// Cost ceiling stopped dispatch; deferred records are resumable.
    PartialCostCeiling,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordOutcome {
    pub record_id: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedRecord {
    pub record_id: String,
    pub stage: Stage,
    pub reason: String,
}

/// What a run did. Every fetched record appears in `outcomes` exactly once.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub counts: RunCounts,
    pub failed: Vec<FailedRecord>,
    pub outcomes: Vec<RecordOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn outcome_of(&self, record_id: &str) -> Option<&Outcome> {
        self.outcomes
            .iter()
            .find(|o| o.record_id == record_id)
            .map(|o| &o.outcome)
    }
}

pub struct Funnel {
    cfg: Arc<FunnelConfig>,
    retry: RetryPolicy,
    screener: Arc<Screener>,
    deep: Arc<DeepClassifier>,
    source: Arc<dyn RecordSource>,
    store: Arc<dyn InsightStore>,
}

impl Funnel {
    /// Validates configuration up front; a bad config never starts a run.
    pub fn new(
        cfg: FunnelConfig,
        retry: RetryPolicy,
        screener: Screener,
        deep: DeepClassifier,
        source: Arc<dyn RecordSource>,
        store: Arc<dyn InsightStore>,
    ) -> Result<Self, FunnelError> {
        cfg.validate()?;
        retry.validate()?;
        Ok(Self {
            cfg: Arc::new(cfg),
            retry,
            screener: Arc::new(screener),
            deep: Arc::new(deep),
            source,
            store,
        })
    }

    /// Wire stages to the tiers named in `[models]`.
    pub fn from_settings(
        settings: &Settings,
        models: &TieredModels,
        source: Arc<dyn RecordSource>,
        store: Arc<dyn InsightStore>,
    ) -> Result<Self, FunnelError> {
        let screener = Screener::new(
            models.get(settings.models.screening_tier),
            settings.funnel.screen_window_chars,
        );
        let deep = DeepClassifier::new(
            models.get(settings.models.deep_tier),
            settings.funnel.deep_window_chars,
        );
        Self::new(
            settings.funnel.clone(),
            settings.retry.clone(),
            screener,
            deep,
            source,
            store,
        )
    }

    pub fn config(&self) -> &FunnelConfig {
        &self.cfg
    }

    /// Fresh context carrying this funnel's cost ceilings.
    pub fn new_context(&self) -> Arc<RunContext> {
        Arc::new(RunContext::new(&self.cfg))
    }

    /// Process one batch of unprocessed records.
    pub async fn run(&self, ctx: Arc<RunContext>) -> Result<RunReport, FunnelError> {
        ensure_metrics_described();
        let started_at = Utc::now();

        let records = self.source.fetch_unprocessed(self.cfg.batch_limit).await?;
        let mut known = self.store.known_records().await?;
        let screened = Arc::new(std::mem::take(&mut known.screened));
        let prefilter = Arc::new(PreFilter::new(&self.cfg, known)?);

        info!(
            target: "funnel",
            records = records.len(),
            concurrency = self.cfg.concurrency,
            skip_screening = self.cfg.skip_screening,
            source = self.source.name(),
            "run started"
        );

        let workers = self.cfg.concurrency.min(records.len());
        let queue = Arc::new(Mutex::new(records.into_iter().collect::<VecDeque<_>>()));
        let outcomes = Arc::new(Mutex::new(Vec::new()));

        let mut set = JoinSet::new();
        for worker_id in 0..workers {
            let worker = Worker {
                cfg: Arc::clone(&self.cfg),
                retry: self.retry.clone(),
                prefilter: Arc::clone(&prefilter),
                screened: Arc::clone(&screened),
                screener: Arc::clone(&self.screener),
                deep: Arc::clone(&self.deep),
                source: Arc::clone(&self.source),
                store: Arc::clone(&self.store),
                ctx: Arc::clone(&ctx),
            };
            let queue = Arc::clone(&queue);
            let outcomes = Arc::clone(&outcomes);
            set.spawn(async move { worker.drain(worker_id, &queue, &outcomes).await });
        }
        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                error!(target: "funnel", error = %e, "worker task aborted");
            }
        }

        // Whatever is still queued was never dispatched.
        let leftover: Vec<RawRecord> = queue.lock().drain(..).collect();
        if !leftover.is_empty() {
            let reason = if ctx.ceiling_reached() {
                DeferReason::CostCeiling
            } else {
                DeferReason::Cancelled
            };
            let mut out = outcomes.lock();
            for r in leftover {
                let outcome = Outcome::Deferred { reason };
                ctx.record_outcome(&outcome);
                counter!("funnel_records_total", "outcome" => outcome.label()).increment(1);
                out.push(RecordOutcome {
                    record_id: r.id,
                    outcome,
                });
            }
        }

        let mut outcomes = std::mem::take(&mut *outcomes.lock());
        outcomes.sort_by(|a, b| a.record_id.cmp(&b.record_id));

        let failed = outcomes
            .iter()
            .filter_map(|o| match &o.outcome {
                Outcome::Failed { stage, reason } => Some(FailedRecord {
                    record_id: o.record_id.clone(),
                    stage: *stage,
                    reason: reason.clone(),
                }),
                _ => None,
            })
            .collect();

        let deferred_for = |r: DeferReason| {
            outcomes
                .iter()
                .any(|o| o.outcome == Outcome::Deferred { reason: r })
        };
        let status = if deferred_for(DeferReason::CostCeiling) {
            RunStatus::PartialCostCeiling
        } else if deferred_for(DeferReason::Cancelled) {
            RunStatus::Cancelled
        } else {
            RunStatus::Completed
        };

        let finished_at = Utc::now();
        let counts = ctx.snapshot();
        counter!("funnel_runs_total").increment(1);
        gauge!("funnel_last_run_ts").set(finished_at.timestamp() as f64);
        info!(
            target: "funnel",
            status = ?status,
            classified = counts.classified,
            rejected_by_filter = counts.rejected_by_filter,
            rejected_by_screen = counts.rejected_by_screen,
            failed = counts.failed,
            deferred = counts.deferred,
            screen_calls = counts.screen_calls,
            deep_calls = counts.deep_calls,
            "run finished"
        );

        Ok(RunReport {
            status,
            counts,
            failed,
            outcomes,
            started_at,
            finished_at,
        })
    }

    /// Operator action: clear failure markers so the next run re-attempts
    /// these records from the pre-filter on.
    pub async fn reprocess_failed(&self, record_ids: &[String]) -> Result<usize, FunnelError> {
        let cleared = self.store.reprocess_failed(record_ids).await?;
        info!(target: "funnel", requested = record_ids.len(), cleared, "failed records reset");
        Ok(cleared)
    }

    /// Reset every recorded failure.
    pub async fn reprocess_all_failed(&self) -> Result<usize, FunnelError> {
        let ids: Vec<String> = self
            .store
            .failures()
            .await?
            .into_iter()
            .map(|m| m.record_id)
            .collect();
        self.reprocess_failed(&ids).await
    }
}

/// Everything one per-record pipeline needs. Cloned per worker task.
struct Worker {
    cfg: Arc<FunnelConfig>,
    retry: RetryPolicy,
    prefilter: Arc<PreFilter>,
    /// Passed screening results carried over from earlier runs.
    screened: Arc<HashMap<String, ScreeningResult>>,
    screener: Arc<Screener>,
    deep: Arc<DeepClassifier>,
    source: Arc<dyn RecordSource>,
    store: Arc<dyn InsightStore>,
    ctx: Arc<RunContext>,
}

impl Worker {
    async fn drain(
        &self,
        worker_id: usize,
        queue: &Mutex<VecDeque<RawRecord>>,
        outcomes: &Mutex<Vec<RecordOutcome>>,
    ) {
        loop {
            if !self.ctx.should_dispatch() {
                debug!(target: "funnel", worker_id, "dispatch stopped");
                break;
            }
            let next = queue.lock().pop_front();
            let Some(record) = next else { break };

            let started = Instant::now();
            let outcome = match self.process(&record).await {
                Ok(o) => o,
                Err(e) => {
                    error!(target: "funnel", record_id = %record.id, error = %e, "state machine violation");
                    Outcome::Failed {
                        stage: Stage::Executor,
                        reason: e.to_string(),
                    }
                }
            };
            histogram!("funnel_record_duration_ms").record(started.elapsed().as_secs_f64() * 1000.0);
            counter!("funnel_records_total", "outcome" => outcome.label()).increment(1);
            self.ctx.record_outcome(&outcome);
            debug!(target: "funnel", worker_id, record_id = %record.id, outcome = outcome.label());

            outcomes.lock().push(RecordOutcome {
                record_id: record.id.clone(),
                outcome,
            });
        }
    }

    /// Drive one record to a terminal state.
    async fn process(&self, record: &RawRecord) -> Result<Outcome, InvalidTransition> {
        let verdict = self.prefilter.claim(record);
        let admitted = verdict.is_admit();
        let state = RecordState::Fetched.advance(StageEvent::PreFilter(verdict))?;

        if !admitted {
            self.mark_processed(record).await;
            return finish(state);
        }

        let screen = if self.cfg.skip_screening {
            ScreenStep::Skipped
        } else if let Some(prior) = self.screened.get(&record.id) {
            debug!(target: "screening", record_id = %record.id, "screening result carried over");
            if prior.passes(self.cfg.screening_threshold) {
                ScreenStep::Pass(prior.clone())
            } else {
                ScreenStep::Reject(prior.clone())
            }
        } else {
            let res = call_with_retry(&self.retry, &self.ctx, Stage::Screening, &record.id, || {
                self.screener.screen(record)
            })
            .await;
            match res {
                Ok(r) if r.passes(self.cfg.screening_threshold) => ScreenStep::Pass(r),
                Ok(r) => ScreenStep::Reject(r),
                Err(RetryFailure::BudgetExhausted { .. }) => {
                    return defer(state, DeferReason::CostCeiling);
                }
                Err(RetryFailure::Exhausted { error, attempts }) => {
                    warn!(target: "screening", record_id = %record.id, attempts, kind = error.kind(), "screening failed");
                    ScreenStep::Error(error.to_string())
                }
            }
        };

        let passed = match &screen {
            ScreenStep::Pass(r) => Some(r.clone()),
            _ => None,
        };
        let hint = passed.as_ref().map(|r| r.content_type);
        let confidence = passed.as_ref().map(|r| r.confidence);
        let rejected = matches!(screen, ScreenStep::Reject(_));
        let errored = matches!(screen, ScreenStep::Error(_));
        let state = state.advance(StageEvent::Screen(screen))?;

        if rejected {
            self.mark_processed(record).await;
            return finish(state);
        }
        if errored {
            // Left unprocessed; the next run screens it again.
            return finish(state);
        }

        let res = call_with_retry(&self.retry, &self.ctx, Stage::Deep, &record.id, || {
            self.deep.classify(record, hint)
        })
        .await;

        let step = match res {
            Ok(mut insight) => {
                insight.screening_confidence = confidence;
                self.persist(insight).await
            }
            Err(RetryFailure::BudgetExhausted { .. }) => {
                // The next run goes straight to deep classification.
                if let Some(r) = passed {
                    if let Err(e) = self.store.record_screening(r).await {
                        warn!(target: "store", record_id = %record.id, error = %e, "screening result not kept");
                    }
                }
                return defer(state, DeferReason::CostCeiling);
            }
            Err(RetryFailure::Exhausted { error, attempts }) => {
                warn!(target: "deep", record_id = %record.id, attempts, kind = error.kind(), "deep classification failed");
                let reason = error.to_string();
                let marker = FailureMarker {
                    record_id: record.id.clone(),
                    stage: Stage::Deep,
                    reason: reason.clone(),
                    failed_at: Utc::now(),
                };
                if let Err(e) = self.store.record_failure(marker).await {
                    error!(target: "store", record_id = %record.id, error = %e, "failure marker not written");
                }
                ClassifyStep::Error {
                    stage: Stage::Deep,
                    reason,
                }
            }
        };

        finish(state.advance(StageEvent::Classify(step))?)
    }

    /// Atomic insight write + processed flip, retried as a unit.
    async fn persist(&self, insight: ClassifiedInsight) -> ClassifyStep {
        let mut last_err = String::new();
        for attempt in 1..=PERSIST_ATTEMPTS {
            match self.store.commit_classified(insight.clone()).await {
                Ok(()) => return ClassifyStep::Ok,
                Err(e) => {
                    warn!(target: "store", record_id = %insight.record_id, attempt, error = %e, "commit failed");
                    last_err = e.to_string();
                }
            }
        }
        ClassifyStep::Error {
            stage: Stage::Persist,
            reason: last_err,
        }
    }

    async fn mark_processed(&self, record: &RawRecord) {
        if let Err(e) = self.source.mark_processed(&record.id).await {
            warn!(target: "store", record_id = %record.id, error = %e, "mark_processed failed");
        }
    }
}

fn finish(state: RecordState) -> Result<Outcome, InvalidTransition> {
    terminal(state.advance(StageEvent::Finish)?)
}

fn defer(state: RecordState, reason: DeferReason) -> Result<Outcome, InvalidTransition> {
    terminal(state.advance(StageEvent::Defer(reason))?)
}

fn terminal(state: RecordState) -> Result<Outcome, InvalidTransition> {
    match state {
        RecordState::Terminal(o) => Ok(o),
        other => Err(InvalidTransition {
            from: other.label(),
            event: "finish",
        }),
    }
}
