use std::sync::{Arc, Mutex};

use relaycache_types::{QueryConfig, RequestConfig, RequestId};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

use super::dispatch::{CacheClient, Dispatch};
use super::error::ClientError;
use super::tasks::Reply;
use crate::engine::lock::lock_or_recover;

const SOURCE: &str = "client::call_site";

/// One place in the caller that issues a request, possibly many times.
///
/// The request id is minted once, so repeated triggers from the same site
/// collapse onto one pending task. Dropping the site releases the id, so the
/// engine tears down whatever it still keeps for it.
pub struct CallSite {
    client: CacheClient,
    id: RequestId,
    query: QueryConfig,
    request: RequestConfig,
    latest: Arc<Mutex<Option<Reply>>>,
}

impl CallSite {
    pub fn new(client: CacheClient, query: QueryConfig, request: RequestConfig) -> Self {
        let id = RequestId::new(&query.cache_name, Uuid::new_v4());
        Self {
            client,
            id,
            query,
            request,
            latest: Arc::new(Mutex::new(None)),
        }
    }

    /// Create the call site and, if `runAuto` is set, trigger it right away.
    pub async fn open(
        client: CacheClient,
        query: QueryConfig,
        request: RequestConfig,
    ) -> Result<Self, ClientError> {
        let site = Self::new(client, query, request);
        if site.query.run_auto {
            site.trigger().await?;
        }
        Ok(site)
    }

    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Dispatch without waiting. The reply lands in [`CallSite::latest`].
    pub async fn trigger(&self) -> Result<Dispatch, ClientError> {
        let slot = Arc::clone(&self.latest);
        self.client
            .add_to_queue(
                self.id.clone(),
                move |reply| *lock_or_recover(&slot, SOURCE, "store_reply") = Some(reply),
                self.query.clone(),
                self.request.clone(),
            )
            .await
    }

    /// Most recent reply delivered to a [`CallSite::trigger`] dispatch.
    pub fn latest(&self) -> Option<Reply> {
        lock_or_recover(&self.latest, SOURCE, "latest").clone()
    }

    /// Dispatch and wait for the reply.
    ///
    /// If no reply arrives within the client's reply timeout the pending task
    /// is cancelled, so the next call dispatches afresh.
    ///
    /// A refetch whose response equals the cached value publishes nothing, so
    /// the engine sends no reply and this returns [`ClientError::Timeout`]
    /// after the full timeout. Callers that refetch stable data should use
    /// [`CallSite::trigger`] and read [`CallSite::latest`] instead.
    pub async fn request(&self) -> Result<Value, ClientError> {
        let (tx, rx) = oneshot::channel();
        let dispatch = self
            .client
            .add_to_queue(
                self.id.clone(),
                move |reply| {
                    let _ = tx.send(reply);
                },
                self.query.clone(),
                self.request.clone(),
            )
            .await?;

        match dispatch {
            Dispatch::Sent => {}
            Dispatch::Suppressed => return Err(ClientError::Suppressed),
            Dispatch::Duplicate => return Err(ClientError::Duplicate),
        }

        match tokio::time::timeout(self.client.reply_timeout(), rx).await {
            Ok(Ok(reply)) => Ok(reply?),
            Ok(Err(_)) => Err(ClientError::Abandoned),
            Err(_) => {
                debug!(id = %self.id, "No reply before timeout; cancelling pending task");
                self.client.tasks().cancel(&self.id);
                Err(ClientError::Timeout)
            }
        }
    }
}

impl Drop for CallSite {
    fn drop(&mut self) {
        self.client.release(&self.id);
    }
}
