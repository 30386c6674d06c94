//! Service wiring: coordinator, progress fan-out and the run registry.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use shopforge_core::RunId;
use shopforge_infra::{
    BroadcastObserver, PollerConfig, ProvisioningClients, ProvisioningConfig, RunHandle,
    SagaCoordinator, StepPolicy,
};
use shopforge_saga::{FanoutObserver, ProgressEvent, ProvisioningInput, TracingObserver};

use crate::app::dto::RunView;
use crate::app::errors::ApiError;
use crate::app::runs::RunRegistry;

#[derive(Debug)]
pub struct AppServices {
    coordinator: SagaCoordinator,
    events: BroadcastObserver,
    runs: RunRegistry,
}

impl AppServices {
    /// Wire a coordinator over `clients`. Progress goes to the log and to the
    /// SSE broadcast.
    pub fn new(clients: ProvisioningClients, poller: PollerConfig, default_policy: StepPolicy) -> Self {
        let events = BroadcastObserver::default();
        let observer = FanoutObserver::new()
            .with(Arc::new(TracingObserver))
            .with(Arc::new(events.clone()));

        let coordinator = SagaCoordinator::builder(clients)
            .observer(Arc::new(observer))
            .poller(poller)
            .default_policy(default_policy)
            .build();

        Self {
            coordinator,
            events,
            runs: RunRegistry::new(),
        }
    }

    pub fn runs(&self) -> &RunRegistry {
        &self.runs
    }

    /// Validate, start and register a run. Returns once the deployment was
    /// accepted or the run already finished.
    pub async fn provision(&self, input: ProvisioningInput) -> Result<RunHandle, ApiError> {
        let handle = self.coordinator.submit(input)?;
        self.runs.insert(handle.clone());
        handle.accepted().await;
        Ok(handle)
    }

    pub fn run(&self, run_id: RunId) -> Result<RunHandle, ApiError> {
        self.runs
            .get(run_id)
            .ok_or_else(|| ApiError::NotFound(run_id.to_string()))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }
}

/// Build services from configuration (used by `main.rs`).
pub fn build_services(config: &ProvisioningConfig) -> anyhow::Result<Arc<AppServices>> {
    let clients = ProvisioningClients::from_config(config)?;
    info!(
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        step_timeout_s = config.step_timeout.as_secs(),
        "provisioning services ready"
    );
    Ok(Arc::new(AppServices::new(
        clients,
        config.poller_config(),
        config.default_step_policy(),
    )))
}

/// SSE stream of one run: a `snapshot` event with the current state, then each
/// `step` / `run_finished` event of that run as it happens. The stream ends
/// after the run's `run_finished` event, which for an already finished run
/// comes right after the snapshot.
pub async fn run_sse_stream(
    services: Arc<AppServices>,
    handle: RunHandle,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let run_id = handle.run_id();
    // Subscribe before taking the snapshot so no transition falls in between.
    let rx = services.subscribe();
    let run = handle.snapshot().await;

    let mut initial = vec![Ok(SseEvent::default()
        .event("snapshot")
        .data(to_json(&RunView::from(&run))))];

    let (tx, live) = mpsc::channel(64);
    match run.finished_event() {
        Some(event) => initial.push(Ok(sse_event(&event))),
        None => {
            tokio::spawn(forward_run_events(run_id, rx, tx));
        }
    }

    let stream = tokio_stream::iter(initial).chain(ReceiverStream::new(live));
    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

/// Forward the events of `run_id` until its `run_finished` event or until the
/// client goes away. Dropping `tx` ends the SSE stream.
async fn forward_run_events(
    run_id: RunId,
    mut rx: broadcast::Receiver<ProgressEvent>,
    tx: mpsc::Sender<Result<SseEvent, Infallible>>,
) {
    loop {
        let event = tokio::select! {
            _ = tx.closed() => return,
            msg = rx.recv() => match msg {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(run_id = %run_id, skipped, "event stream lagged; transitions dropped");
                    continue;
                }
                Err(RecvError::Closed) => return,
            },
        };
        if event.run_id() != run_id {
            continue;
        }
        let last = matches!(event, ProgressEvent::RunFinished { .. });
        if tx.send(Ok(sse_event(&event))).await.is_err() || last {
            return;
        }
    }
}

fn sse_event(event: &ProgressEvent) -> SseEvent {
    let name = match event {
        ProgressEvent::Step(_) => "step",
        ProgressEvent::RunFinished { .. } => "run_finished",
    };
    SseEvent::default().event(name).data(to_json(event))
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
}
