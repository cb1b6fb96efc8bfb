//! Per-request lifecycle: subscribe, reset, then fetch, commit inline data,
//! replay, or rest.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use relaycache_types::{CacheName, OutboundMessage, QueryConfig, RequestConfig, RequestId};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, instrument, warn};

use super::equality::deep_equal_opt;
use super::keys::CacheKey;
use super::merge::merge;
use super::registry::{Admission, CoordinatorRegistry, Phase, Ticket};
use super::subject::{KeyedStore, Subject};
use crate::infra::http::{FetchError, PreparedRequest, Transport};

const METRIC_FETCH_TOTAL: &str = "relaycache_fetch_total";
const METRIC_FETCH_ERROR_TOTAL: &str = "relaycache_fetch_error_total";
const METRIC_FETCH_MS: &str = "relaycache_fetch_ms";
const METRIC_ADMISSION_REJECTED: &str = "relaycache_admission_rejected_total";

/// Shared engine state handed to every coordinator.
#[derive(Clone)]
pub struct EngineContext {
    pub store: Arc<KeyedStore>,
    pub coordinators: Arc<CoordinatorRegistry>,
    pub transport: Arc<dyn Transport>,
}

impl EngineContext {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            store: Arc::new(KeyedStore::new()),
            coordinators: Arc::new(CoordinatorRegistry::new()),
            transport,
        }
    }
}

/// Forwards subject values across the boundary, tagged with one request id.
#[derive(Clone)]
pub struct Relay {
    id: RequestId,
    cache_name: CacheName,
    outbound: UnboundedSender<OutboundMessage>,
}

impl Relay {
    pub fn new(
        id: RequestId,
        cache_name: CacheName,
        outbound: UnboundedSender<OutboundMessage>,
    ) -> Self {
        Self {
            id,
            cache_name,
            outbound,
        }
    }

    /// Send a copy of `value`. Cleared values are not forwarded.
    pub fn forward(&self, value: Option<&Value>) {
        let Some(value) = value else {
            return;
        };
        self.send(OutboundMessage::Data {
            id: self.id.clone(),
            cache_name: self.cache_name.clone(),
            data: value.clone(),
        });
    }

    pub fn fail(&self, error: &FetchError) {
        self.send(OutboundMessage::Error {
            id: self.id.clone(),
            cache_name: self.cache_name.clone(),
            error: error.to_string(),
            kind: error.kind(),
        });
    }

    fn send(&self, message: OutboundMessage) {
        if self.outbound.send(message).is_err() {
            debug!(id = %self.id, "Outbound channel closed; message dropped");
        }
    }
}

/// What a coordinator did with its request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Fetched data differed from the cache and was committed.
    Fetched,
    /// Fetched data matched the cache; nothing was published.
    Unchanged,
    /// The fetch failed and an error was reported.
    Failed,
    /// Inline data was committed.
    Committed,
    /// The cached value was replayed to this request only.
    Replayed,
    /// Nothing to do.
    Idle,
}

impl Outcome {
    /// Whether the coordinator stays registered after finishing.
    fn rests(self) -> bool {
        matches!(self, Self::Committed | Self::Replayed | Self::Idle)
    }
}

pub struct Coordinator {
    ticket: Ticket,
    subject: Arc<Subject>,
    relay: Relay,
    ctx: EngineContext,
}

impl Coordinator {
    /// Register a coordinator for `id` and subscribe its relay to the subject
    /// named by `query`. Returns `None` if a coordinator with the same id is
    /// still in flight.
    pub fn admit(
        ctx: &EngineContext,
        id: RequestId,
        query: &QueryConfig,
        outbound: UnboundedSender<OutboundMessage>,
    ) -> Option<Self> {
        let key = CacheKey::from(&query.cache_name);
        let ticket = match ctx.coordinators.admit(&id, &key) {
            Admission::Admitted(ticket) => ticket,
            Admission::Rejected { phase } => {
                counter!(METRIC_ADMISSION_REJECTED).increment(1);
                debug!(id = %id, phase = %phase, "Request id already in flight; dropped");
                return None;
            }
        };

        let subject = ctx.store.get_or_create(&key);
        let relay = Relay::new(id, query.cache_name.clone(), outbound);
        let sink = relay.clone();
        ctx.coordinators
            .attach(&ticket, subject.subscribe(move |value| sink.forward(value)));

        Some(Self {
            ticket,
            subject,
            relay,
            ctx: ctx.clone(),
        })
    }

    /// Drive the request to completion.
    #[instrument(
        name = "coordinator",
        skip_all,
        fields(id = %self.ticket.id(), key = %self.subject.key())
    )]
    pub async fn run(self, query: QueryConfig, request: RequestConfig) -> Outcome {
        if let Some(target) = query.reset.as_ref() {
            self.reset(&CacheKey::from(target.cache_name()), target.placeholder())
                .await;
        }

        let frozen = self.subject.resolves_once() && self.subject.has_value();
        if query.run_once {
            self.subject.mark_resolve_once();
        }

        let method = match request.normalized_method() {
            Some(_) if frozen => {
                debug!("Subject already resolved once; skipping fetch");
                None
            }
            method => method,
        };

        let result = match method {
            Some(method) => self.fetch(&method, &request, query.merge_existing).await,
            None => Ok(match query.data {
                Some(data) => self.commit_inline(data, query.merge_existing).await,
                None if self.subject.has_value() => self.replay().await,
                None => Outcome::Idle,
            }),
        };

        match result {
            Ok(outcome) if outcome.rests() && self.ctx.coordinators.rest(&self.ticket) => {
                outcome
            }
            Ok(outcome) => {
                self.destroy();
                outcome
            }
            Err(err) => {
                // Deregister before reporting so the caller may retry at once.
                let relay = self.relay.clone();
                self.destroy();
                relay.fail(&err);
                Outcome::Failed
            }
        }
    }

    async fn reset(&self, key: &CacheKey, placeholder: Option<&Value>) {
        let subject = self.ctx.store.get_or_create(key);
        if subject.reset(placeholder.cloned()).await {
            debug!(target_key = %key, "Subject reset");
        }
    }

    async fn fetch(
        &self,
        method: &str,
        request: &RequestConfig,
        merge_existing: bool,
    ) -> Result<Outcome, FetchError> {
        self.ctx.coordinators.set_phase(&self.ticket, Phase::Fetching);
        counter!(METRIC_FETCH_TOTAL).increment(1);
        let started = Instant::now();

        let result = match PreparedRequest::build(method, request) {
            Ok(prepared) => self.ctx.transport.send(prepared).await,
            Err(err) => Err(err),
        };
        histogram!(METRIC_FETCH_MS).record(started.elapsed().as_secs_f64() * 1000.0);

        let response = result.inspect_err(|err| {
            counter!(METRIC_FETCH_ERROR_TOTAL).increment(1);
            warn!(error = %err, url = ?request.url, "Fetch failed");
        })?;

        self.ctx
            .coordinators
            .set_phase(&self.ticket, Phase::Committing);
        let guard = self.subject.lock_writes().await;
        let current = self.subject.value();
        if deep_equal_opt(Some(&response), current.as_ref()) {
            debug!("Fetched data unchanged; nothing to publish");
            return Ok(Outcome::Unchanged);
        }

        let merged = merge(current, Some(response), merge_existing);
        self.subject.commit_locked(&guard, merged);
        info!("Fetched data committed");
        Ok(Outcome::Fetched)
    }

    async fn commit_inline(&self, data: Value, merge_existing: bool) -> Outcome {
        self.ctx
            .coordinators
            .set_phase(&self.ticket, Phase::Committing);
        let guard = self.subject.lock_writes().await;
        let merged = merge(self.subject.value(), Some(data), merge_existing);
        if !self.subject.commit_locked(&guard, merged) {
            self.relay.forward(self.subject.value().as_ref());
        }
        Outcome::Committed
    }

    async fn replay(&self) -> Outcome {
        let _guard = self.subject.lock_writes().await;
        self.relay.forward(self.subject.value().as_ref());
        Outcome::Replayed
    }

    fn destroy(self) {
        let Self { ticket, ctx, .. } = self;
        ctx.coordinators.destroy(ticket);
    }
}
