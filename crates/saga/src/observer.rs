//! Progress observers.
//!
//! The coordinator and the deployment poller report every transition through a
//! `ProgressObserver`. Observers are notified after the run has been updated, never
//! while its lock is held.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use shopforge_core::RunId;

use crate::result::StepStatus;
use crate::run::OverallStatus;
use crate::step::{Phase, StepId};

/// A step changed status (or message, while running).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTransition {
    pub run_id: RunId,
    pub step_id: StepId,
    pub phase: Phase,
    pub status: StepStatus,
    pub message: Option<String>,
    pub attempt: u32,
    pub at: DateTime<Utc>,
}

/// Event delivered to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressEvent {
    Step(StepTransition),
    /// The run reached a terminal status.
    RunFinished {
        run_id: RunId,
        status: OverallStatus,
        failed_step: Option<StepId>,
        at: DateTime<Utc>,
    },
}

impl ProgressEvent {
    pub fn run_id(&self) -> RunId {
        match self {
            ProgressEvent::Step(t) => t.run_id,
            ProgressEvent::RunFinished { run_id, .. } => *run_id,
        }
    }
}

/// Consumer of progress events (UI, log, SSE stream, ...).
pub trait ProgressObserver: Send + Sync + 'static {
    fn emit(&self, event: &ProgressEvent);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn emit(&self, _event: &ProgressEvent) {}
}

/// Logs every transition with `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ProgressObserver for TracingObserver {
    fn emit(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Step(t) if t.status == StepStatus::Error => warn!(
                run_id = %t.run_id,
                step = %t.step_id,
                phase = t.phase.as_str(),
                attempt = t.attempt,
                message = t.message.as_deref().unwrap_or(""),
                "step failed"
            ),
            ProgressEvent::Step(t) => info!(
                run_id = %t.run_id,
                step = %t.step_id,
                phase = t.phase.as_str(),
                status = t.status.as_str(),
                attempt = t.attempt,
                message = t.message.as_deref().unwrap_or(""),
                "step transition"
            ),
            ProgressEvent::RunFinished {
                run_id,
                status,
                failed_step,
                ..
            } => info!(
                run_id = %run_id,
                status = status.as_str(),
                failed_step = failed_step.map(|s| s.as_str()).unwrap_or(""),
                "provisioning run finished"
            ),
        }
    }
}

/// In-memory observer for tests/dev: keeps every event.
#[derive(Debug, Default)]
pub struct InMemoryObserver {
    inner: Mutex<Vec<ProgressEvent>>,
}

impl InMemoryObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<ProgressEvent> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// `(step, status)` pairs in delivery order.
    pub fn step_statuses(&self) -> Vec<(StepId, StepStatus)> {
        self.all()
            .into_iter()
            .filter_map(|e| match e {
                ProgressEvent::Step(t) => Some((t.step_id, t.status)),
                ProgressEvent::RunFinished { .. } => None,
            })
            .collect()
    }

    pub fn finished(&self) -> Option<OverallStatus> {
        self.all().into_iter().find_map(|e| match e {
            ProgressEvent::RunFinished { status, .. } => Some(status),
            ProgressEvent::Step(_) => None,
        })
    }
}

impl ProgressObserver for InMemoryObserver {
    fn emit(&self, event: &ProgressEvent) {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.clone());
    }
}

/// Forwards every event to each inner observer, in order.
#[derive(Default)]
pub struct FanoutObserver {
    observers: Vec<std::sync::Arc<dyn ProgressObserver>>,
}

impl FanoutObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: std::sync::Arc<dyn ProgressObserver>) -> Self {
        self.observers.push(observer);
        self
    }
}

impl ProgressObserver for FanoutObserver {
    fn emit(&self, event: &ProgressEvent) {
        for observer in &self.observers {
            observer.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn transition(status: StepStatus) -> ProgressEvent {
        ProgressEvent::Step(StepTransition {
            run_id: RunId::new(),
            step_id: StepId::CreateMerchant,
            phase: Phase::Setup,
            status,
            message: None,
            attempt: 1,
            at: Utc::now(),
        })
    }

    #[test]
    fn fanout_delivers_to_every_observer() {
        let a = Arc::new(InMemoryObserver::new());
        let b = Arc::new(InMemoryObserver::new());
        let fanout = FanoutObserver::new()
            .with(a.clone())
            .with(b.clone())
            .with(Arc::new(TracingObserver));

        fanout.emit(&transition(StepStatus::Running));
        fanout.emit(&transition(StepStatus::Completed));

        assert_eq!(a.all().len(), 2);
        assert_eq!(
            b.step_statuses(),
            vec![
                (StepId::CreateMerchant, StepStatus::Running),
                (StepId::CreateMerchant, StepStatus::Completed)
            ]
        );
        assert_eq!(a.finished(), None);
    }

    #[test]
    fn events_serialize_with_a_kind_tag() {
        let json = serde_json::to_value(transition(StepStatus::Running)).unwrap();
        assert_eq!(json["kind"], "step");
        assert_eq!(json["step_id"], "create-merchant");
        assert_eq!(json["status"], "running");
    }
}
