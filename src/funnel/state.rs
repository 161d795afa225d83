// src/funnel/state.rs
//! Per-record state machine:
//!
//! ```text
//! Fetched -> PreFiltered{admit|reject} -> Screened{pass|skipped|reject|error}
//!         -> Classified{ok|error} -> Terminal{outcome}
//! ```
//!
//! Every state can be cut short by `Defer` until a terminal state is reached.
//! `Terminal` is a sink: any event applied to it is an `InvalidTransition`.

use serde::Serialize;
use thiserror::Error;

use crate::insight::ScreeningResult;
use crate::prefilter::{PreFilterVerdict, RejectReason};

/// Where in the pipeline something happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Screening,
    Deep,
    Persist,
    Executor,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Screening => "screening",
            Stage::Deep => "deep",
            Stage::Persist => "persist",
            Stage::Executor => "executor",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferReason {
    CostCeiling,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScreenStep {
    Pass(ScreeningResult),
    /// skip-screening is configured
    Skipped,
    Reject(ScreeningResult),
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClassifyStep {
    Ok,
    Error { stage: Stage, reason: String },
}

/// Terminal outcome reported for every record in a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Classified,
    RejectedByFilter { reason: RejectReason },
    RejectedByScreen { relevant: bool, confidence: f64 },
    Failed { stage: Stage, reason: String },
    Deferred { reason: DeferReason },
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Classified => "classified",
            Outcome::RejectedByFilter { .. } => "rejected_by_filter",
            Outcome::RejectedByScreen { .. } => "rejected_by_screen",
            Outcome::Failed { .. } => "failed",
            Outcome::Deferred { .. } => "deferred",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordState {
    Fetched,
    PreFiltered(PreFilterVerdict),
    Screened(ScreenStep),
    Classified(ClassifyStep),
    Terminal(Outcome),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageEvent {
    PreFilter(PreFilterVerdict),
    Screen(ScreenStep),
    Classify(ClassifyStep),
    Defer(DeferReason),
    Finish,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event} in state {from}")]
pub struct InvalidTransition {
    pub from: &'static str,
    pub event: &'static str,
}

impl RecordState {
    pub fn label(&self) -> &'static str {
        match self {
            RecordState::Fetched => "fetched",
            RecordState::PreFiltered(_) => "pre_filtered",
            RecordState::Screened(_) => "screened",
            RecordState::Classified(_) => "classified",
            RecordState::Terminal(_) => "terminal",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RecordState::Terminal(_))
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        match self {
            RecordState::Terminal(o) => Some(o),
            _ => None,
        }
    }

    /// Apply one event. Consumes the state; on error the caller decides what
    /// the record's outcome becomes.
    pub fn advance(self, event: StageEvent) -> Result<RecordState, InvalidTransition> {
        use RecordState as S;
        use StageEvent as E;

        let from = self.label();
        let ev = event.label();
        let invalid = || InvalidTransition { from, event: ev };

        match (self, event) {
            (S::Terminal(_), _) => Err(invalid()),
            (_, E::Defer(reason)) => Ok(S::Terminal(Outcome::Deferred { reason })),

            (S::Fetched, E::PreFilter(v)) => Ok(S::PreFiltered(v)),

            (S::PreFiltered(PreFilterVerdict::Reject { reason }), E::Finish) => {
                Ok(S::Terminal(Outcome::RejectedByFilter { reason }))
            }
            (S::PreFiltered(PreFilterVerdict::Admit), E::Screen(step)) => Ok(S::Screened(step)),

            (S::Screened(ScreenStep::Pass(_) | ScreenStep::Skipped), E::Classify(step)) => {
                Ok(S::Classified(step))
            }
            (S::Screened(ScreenStep::Reject(r)), E::Finish) => {
                Ok(S::Terminal(Outcome::RejectedByScreen {
                    relevant: r.relevant,
                    confidence: r.confidence,
                }))
            }
            (S::Screened(ScreenStep::Error(reason)), E::Finish) => {
                Ok(S::Terminal(Outcome::Failed {
                    stage: Stage::Screening,
                    reason,
                }))
            }

            (S::Classified(ClassifyStep::Ok), E::Finish) => Ok(S::Terminal(Outcome::Classified)),
            (S::Classified(ClassifyStep::Error { stage, reason }), E::Finish) => {
                Ok(S::Terminal(Outcome::Failed { stage, reason }))
            }

            _ => Err(invalid()),
        }
    }
}

impl StageEvent {
    pub fn label(&self) -> &'static str {
        match self {
            StageEvent::PreFilter(_) => "pre_filter",
            StageEvent::Screen(_) => "screen",
            StageEvent::Classify(_) => "classify",
            StageEvent::Defer(_) => "defer",
            StageEvent::Finish => "finish",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insight::ContentType;

    fn screened(relevant: bool, confidence: f64) -> ScreeningResult {
        ScreeningResult {
            record_id: "r".into(),
            relevant,
            content_type: ContentType::Complaint,
            confidence,
        }
    }

    fn run(events: Vec<StageEvent>) -> Result<RecordState, InvalidTransition> {
        events
            .into_iter()
            .try_fold(RecordState::Fetched, |s, e| s.advance(e))
    }

    #[test]
    fn happy_path_reaches_classified() {
        let s = run(vec![
            StageEvent::PreFilter(PreFilterVerdict::Admit),
            StageEvent::Screen(ScreenStep::Pass(screened(true, 0.9))),
            StageEvent::Classify(ClassifyStep::Ok),
            StageEvent::Finish,
        ])
        .unwrap();
        assert_eq!(s.outcome(), Some(&Outcome::Classified));
    }

    #[test]
    fn screen_rejection_and_error_are_terminal() {
        let s = run(vec![
            StageEvent::PreFilter(PreFilterVerdict::Admit),
            StageEvent::Screen(ScreenStep::Reject(screened(true, 0.4))),
            StageEvent::Finish,
        ])
        .unwrap();
        assert_eq!(s.outcome().map(Outcome::label), Some("rejected_by_screen"));

        let s = run(vec![
            StageEvent::PreFilter(PreFilterVerdict::Admit),
            StageEvent::Screen(ScreenStep::Error("timeout".into())),
            StageEvent::Finish,
        ])
        .unwrap();
        assert!(matches!(
            s.outcome(),
            Some(Outcome::Failed {
                stage: Stage::Screening,
                ..
            })
        ));
    }

    #[test]
    fn terminal_is_a_sink() {
        let s = run(vec![StageEvent::Defer(DeferReason::Cancelled)]).unwrap();
        assert!(s.is_terminal());
        for e in [
            StageEvent::Finish,
            StageEvent::Defer(DeferReason::CostCeiling),
            StageEvent::PreFilter(PreFilterVerdict::Admit),
        ] {
            assert!(s.clone().advance(e).is_err());
        }
    }

    #[test]
    fn stages_cannot_be_skipped() {
        // Screening a rejected record.
        let err = run(vec![
            StageEvent::PreFilter(PreFilterVerdict::Reject {
                reason: RejectReason::NoKeyword,
            }),
            StageEvent::Screen(ScreenStep::Skipped),
        ])
        .unwrap_err();
        assert_eq!(err.from, "pre_filtered");

        // Classifying before screening.
        assert!(run(vec![
            StageEvent::PreFilter(PreFilterVerdict::Admit),
            StageEvent::Classify(ClassifyStep::Ok),
        ])
        .is_err());

        // Classifying after a screen rejection.
        assert!(run(vec![
            StageEvent::PreFilter(PreFilterVerdict::Admit),
            StageEvent::Screen(ScreenStep::Reject(screened(false, 0.9))),
            StageEvent::Classify(ClassifyStep::Ok),
        ])
        .is_err());
    }
}
