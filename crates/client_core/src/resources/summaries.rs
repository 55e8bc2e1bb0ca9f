use std::sync::Arc;

use chrono::Utc;
use shared::protocol::WeeklySummary;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{info, warn};

use super::{fallback, AsyncResource, FetchOutcome, ResourceState};
use crate::{error::GatewayError, gateway::DEFAULT_SUMMARY_LIMIT, LifelogApi};

/// Weekly summaries, most recent first.
pub struct WeeklySummaryResource {
    api: Arc<dyn LifelogApi>,
    resource: AsyncResource<Vec<WeeklySummary>>,
    /// Number of `generate` calls in flight.
    generating: watch::Sender<usize>,
    limit: u32,
}

impl WeeklySummaryResource {
    pub fn new(api: Arc<dyn LifelogApi>) -> Self {
        Self::with_limit(api, DEFAULT_SUMMARY_LIMIT)
    }

    pub fn with_limit(api: Arc<dyn LifelogApi>, limit: u32) -> Self {
        let (generating, _) = watch::channel(0);
        Self {
            api,
            resource: AsyncResource::new("weekly_summaries", Vec::new(), true),
            generating,
            limit,
        }
    }

    pub async fn fetch(&self) -> FetchOutcome {
        let generation = self.resource.begin();
        self.complete(generation).await
    }

    /// Starts the initial fetch on the runtime. A trigger issued after this
    /// returns supersedes it.
    pub fn spawn_fetch(self: &Arc<Self>) -> JoinHandle<FetchOutcome> {
        let generation = self.resource.begin();
        let summaries = Arc::clone(self);
        tokio::spawn(async move { summaries.complete(generation).await })
    }

    async fn complete(&self, generation: u64) -> FetchOutcome {
        self.resource
            .complete(generation, self.api.get_weekly_summaries(self.limit), || {
                fallback::weekly_summaries(Utc::now())
            })
            .await
    }

    pub async fn refetch(&self) -> FetchOutcome {
        self.fetch().await
    }

    /// Asks the service for a new summary and prepends it. Unlike fetches,
    /// a failure here is recorded in `error` and returned.
    pub async fn generate(&self) -> Result<WeeklySummary, GatewayError> {
        self.generating.send_modify(|pending| *pending += 1);
        let _guard = GeneratingGuard(&self.generating);

        match self.api.generate_weekly_summary().await {
            Ok(summary) => {
                info!(summary_id = %summary.id, "summaries: generated weekly summary");
                let prepended = summary.clone();
                self.resource.modify(move |state| {
                    state.data.insert(0, prepended);
                    state.error = None;
                });
                Ok(summary)
            }
            Err(err) => {
                warn!("summaries: failed to generate weekly summary: {err}");
                let message = err.to_string();
                self.resource
                    .modify(move |state| state.error = Some(message));
                Err(err)
            }
        }
    }

    pub fn is_generating(&self) -> bool {
        *self.generating.borrow() > 0
    }

    /// Watches the number of `generate` calls in flight.
    pub fn subscribe_generating(&self) -> watch::Receiver<usize> {
        self.generating.subscribe()
    }

    pub fn state(&self) -> ResourceState<Vec<WeeklySummary>> {
        self.resource.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<ResourceState<Vec<WeeklySummary>>> {
        self.resource.subscribe()
    }
}

struct GeneratingGuard<'a>(&'a watch::Sender<usize>);

impl Drop for GeneratingGuard<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|pending| *pending = pending.saturating_sub(1));
    }
}
