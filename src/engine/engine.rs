use std::num::NonZeroUsize;

use relaycache_types::{InboundMessage, OutboundMessage, RequestId};
use tokio::sync::mpsc::{self, Receiver, Sender, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use super::coordinator::{Coordinator, EngineContext, Outcome};

/// The engine side of the actor boundary.
///
/// Admission happens in the mailbox loop, one message at a time; each admitted
/// coordinator then runs as its own task so a slow fetch never holds up the
/// mailbox.
pub struct Engine {
    ctx: EngineContext,
    outbound: UnboundedSender<OutboundMessage>,
}

/// Caller-side ends of a spawned engine's channels.
#[derive(Debug)]
pub struct EngineHandle {
    pub inbound: Sender<InboundMessage>,
    /// Ids whose caller has gone away. Unbounded so it can be fed from `Drop`.
    pub release: UnboundedSender<RequestId>,
    pub outbound: UnboundedReceiver<OutboundMessage>,
}

impl Engine {
    pub fn new(ctx: EngineContext, outbound: UnboundedSender<OutboundMessage>) -> Self {
        Self { ctx, outbound }
    }

    /// Start the mailbox loop on the current tokio runtime.
    pub fn spawn(ctx: EngineContext, capacity: NonZeroUsize) -> EngineHandle {
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity.get());
        let (release_tx, release_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let engine = Self::new(ctx, outbound_tx);
        tokio::spawn(engine.run(inbound_rx, release_rx));
        EngineHandle {
            inbound: inbound_tx,
            release: release_tx,
            outbound: outbound_rx,
        }
    }

    /// Admit `message` and start its coordinator. Returns `None` when the
    /// request id is still in flight and the message was dropped.
    pub fn handle(&self, message: InboundMessage) -> Option<JoinHandle<Outcome>> {
        let InboundMessage { id, query, request } = message;
        trace!(id = %id, cache_name = %query.cache_name, "Inbound request");
        let coordinator = Coordinator::admit(&self.ctx, id, &query, self.outbound.clone())?;
        Some(tokio::spawn(coordinator.run(query, request)))
    }

    /// Destroy the coordinator for `id` once it is no longer working.
    pub fn release(&self, id: &RequestId) {
        if !self.ctx.coordinators.release(id) {
            trace!(id = %id, "No resting coordinator to release now");
        }
    }

    async fn run(
        self,
        mut inbound: Receiver<InboundMessage>,
        mut release: UnboundedReceiver<RequestId>,
    ) {
        info!("Engine started");
        loop {
            // Inbound first: a release never overtakes a request sent before it.
            tokio::select! {
                biased;
                message = inbound.recv() => match message {
                    Some(message) => {
                        self.handle(message);
                    }
                    None => break,
                },
                Some(id) = release.recv() => {
                    debug!(id = %id, "Release requested");
                    self.release(&id);
                }
            }
        }
        info!(
            coordinators = self.ctx.coordinators.len(),
            subjects = self.ctx.store.len(),
            "Engine mailbox closed"
        );
    }
}
