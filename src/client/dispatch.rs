use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::counter;
use relaycache_types::{InboundMessage, OutboundMessage, QueryConfig, RequestConfig, RequestId};
use tokio::sync::mpsc::{Sender, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, trace};

use super::error::ClientError;
use super::tasks::{RemoteError, Reply, TaskRegistry};
use crate::config::Settings;
use crate::engine::EngineHandle;

const METRIC_DISPATCH_DUPLICATE: &str = "relaycache_dispatch_duplicate_total";

/// What happened to a dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The request went to the engine.
    Sent,
    /// `run` was false; nothing was sent.
    Suppressed,
    /// A task for the same id is still pending; nothing was sent.
    Duplicate,
}

/// Caller side of the actor boundary.
///
/// Owns the pending-task registry and a reply pump that resolves tasks as
/// the engine's messages arrive.
#[derive(Clone)]
pub struct CacheClient {
    inbound: Sender<InboundMessage>,
    release: UnboundedSender<RequestId>,
    tasks: Arc<TaskRegistry>,
    reply_timeout: Duration,
}

impl CacheClient {
    /// Wrap a spawned engine. Must be called inside a tokio runtime.
    pub fn new(handle: EngineHandle, settings: &Settings) -> Self {
        let EngineHandle {
            inbound,
            release,
            outbound,
        } = handle;
        let tasks = Arc::new(TaskRegistry::new(settings.tasks.max_age));
        tokio::spawn(pump_replies(outbound, Arc::clone(&tasks)));
        Self {
            inbound,
            release,
            tasks,
            reply_timeout: settings.client.reply_timeout,
        }
    }

    pub fn tasks(&self) -> &Arc<TaskRegistry> {
        &self.tasks
    }

    pub fn reply_timeout(&self) -> Duration {
        self.reply_timeout
    }

    /// Register `callback` for `id` and send the request, unless `run` is
    /// false or a task for `id` is already pending.
    pub async fn add_to_queue<F>(
        &self,
        id: RequestId,
        callback: F,
        query: QueryConfig,
        request: RequestConfig,
    ) -> Result<Dispatch, ClientError>
    where
        F: FnOnce(Reply) + Send + Sync + 'static,
    {
        if !query.run {
            trace!(id = %id, "Dispatch suppressed");
            return Ok(Dispatch::Suppressed);
        }
        if !self.tasks.register(id.clone(), callback) {
            counter!(METRIC_DISPATCH_DUPLICATE).increment(1);
            debug!(id = %id, "Request already pending; dispatch dropped");
            return Ok(Dispatch::Duplicate);
        }

        let message = InboundMessage {
            id: id.clone(),
            query,
            request,
        };
        if self.inbound.send(message).await.is_err() {
            self.tasks.cancel(&id);
            return Err(ClientError::EngineClosed);
        }
        Ok(Dispatch::Sent)
    }

    /// Stop listening on `id`: drop its pending task, if any, and let the
    /// engine destroy the coordinator left behind for it.
    pub fn release(&self, id: &RequestId) {
        self.tasks.cancel(id);
        if self.release.send(id.clone()).is_err() {
            trace!(id = %id, "Engine gone; nothing to release");
        }
    }
}

async fn pump_replies(mut outbound: UnboundedReceiver<OutboundMessage>, tasks: Arc<TaskRegistry>) {
    while let Some(message) = outbound.recv().await {
        let (id, reply) = match message {
            OutboundMessage::Data { id, data, .. } => (id, Ok(data)),
            OutboundMessage::Error {
                id, error, kind, ..
            } => (
                id,
                Err(RemoteError {
                    message: error,
                    kind,
                }),
            ),
        };
        if !tasks.resolve(&id, reply) {
            trace!(id = %id, "No pending task for reply");
        }
        tasks.maybe_sweep(Instant::now());
    }
    info!(pending = tasks.len(), "Engine outbound channel closed");
}
