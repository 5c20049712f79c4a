//! Command dispatch
//!
//! Turns one inbound frame into either a rejected request (a single error
//! response, nothing spawned) or a running command task.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

use super::multiplexer::EventSender;
use crate::error::ProbeError;
use crate::metrics;
use crate::probe::{OutputSink, ProbeExecutor, ProbeKind, ProbeRequest};
use crate::protocol::{CommandRequest, CommandResponse};

/// Result of dispatching one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Launched,
    Rejected,
}

pub struct Dispatcher {
    session_id: Uuid,
    executor: Arc<ProbeExecutor>,
    slots: Arc<Semaphore>,
    limit: usize,
    events: EventSender,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Dispatcher {
    pub fn new(
        session_id: Uuid,
        executor: Arc<ProbeExecutor>,
        limit: usize,
        events: EventSender,
        cancel: CancellationToken,
        tracker: TaskTracker,
    ) -> Self {
        let limit = limit.max(1);
        Self {
            session_id,
            executor,
            slots: Arc::new(Semaphore::new(limit)),
            limit,
            events,
            cancel,
            tracker,
        }
    }

    /// Decode, validate and launch one request
    pub async fn dispatch(&self, payload: &[u8]) -> Dispatch {
        let request = match CommandRequest::decode(payload) {
            Ok(request) => request,
            Err(err) => return self.reject(None, "unknown", err).await,
        };

        let Some(kind) = ProbeKind::from_wire(&request.kind) else {
            let err = ProbeError::Protocol(format!("unknown command type '{}'", request.kind));
            return self.reject(request.id, "unknown", err).await;
        };

        let probe = match ProbeRequest::validate(kind, &request.parameters) {
            Ok(probe) => probe,
            Err(err) => return self.reject(request.id, kind.as_str(), err.into()).await,
        };

        let permit = match self.slots.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                let err = ProbeError::Busy { limit: self.limit };
                return self.reject(request.id, kind.as_str(), err).await;
            }
        };

        self.launch(probe, request.id, permit);
        Dispatch::Launched
    }

    /// Commands currently holding a slot
    pub fn running(&self) -> usize {
        self.limit - self.slots.available_permits()
    }

    async fn reject(&self, id: Option<String>, kind: &str, err: ProbeError) -> Dispatch {
        debug!(session_id = %self.session_id, kind, error = %err, "Request rejected");
        metrics::record_command(kind, err.label());
        self.events.respond(CommandResponse::error(id, &err)).await;
        Dispatch::Rejected
    }

    fn launch(&self, probe: ProbeRequest, id: Option<String>, permit: OwnedSemaphorePermit) {
        let executor = self.executor.clone();
        let events = self.events.clone();
        let cancel = self.cancel.clone();
        let kind = probe.kind();
        let span = info_span!(
            "command",
            session_id = %self.session_id,
            kind = kind.as_str(),
            id = id.as_deref().unwrap_or("-"),
        );

        self.tracker.spawn(
            async move {
                let _permit = permit;
                let output = CommandOutput {
                    id: id.clone(),
                    events: events.clone(),
                };

                let timer = metrics::COMMAND_DURATION_SECONDS
                    .with_label_values(&[kind.as_str()])
                    .start_timer();
                let result = executor.execute(&probe, &output, &cancel).await;
                timer.observe_duration();

                match result {
                    Ok(outcome) => {
                        debug!(bytes = outcome.bytes_streamed, "Command finished");
                        metrics::record_command(kind.as_str(), "ok");
                        events.respond(CommandResponse::done(id, kind)).await;
                    }
                    Err(ProbeError::Cancelled) => {
                        debug!("Command cancelled");
                        metrics::record_command(kind.as_str(), "cancelled");
                    }
                    Err(err) => {
                        debug!(error = %err, "Command failed");
                        metrics::record_command(kind.as_str(), err.label());
                        events.respond(CommandResponse::error(id, &err)).await;
                    }
                }
            }
            .instrument(span),
        );
    }
}

/// Routes probe output to the outbound queue, tagged with the command id
struct CommandOutput {
    id: Option<String>,
    events: EventSender,
}

#[async_trait]
impl OutputSink for CommandOutput {
    async fn emit(&self, chunk: String) -> bool {
        self.events
            .respond(CommandResponse::output(self.id.clone(), chunk))
            .await
    }
}
