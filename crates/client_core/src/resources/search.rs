use std::sync::Arc;

use chrono::Utc;
use shared::protocol::TimelineEntry;
use tokio::sync::watch;
use tracing::debug;

use super::{fallback, AsyncResource, FetchOutcome, ResourceState};
use crate::LifelogApi;

/// Search results. Idle until a query is submitted.
pub struct SearchResource {
    api: Arc<dyn LifelogApi>,
    resource: AsyncResource<Vec<TimelineEntry>>,
}

impl SearchResource {
    pub fn new(api: Arc<dyn LifelogApi>) -> Self {
        Self {
            api,
            resource: AsyncResource::new("search", Vec::new(), false),
        }
    }

    /// A blank query clears results without contacting the service.
    pub async fn search(&self, query: &str) -> FetchOutcome {
        if query.trim().is_empty() {
            debug!("search: blank query, clearing results");
            self.resource.reset(Vec::new());
            return FetchOutcome::Cleared;
        }

        self.resource
            .run(self.api.search_entries(query), || {
                fallback::search_results(query, Utc::now())
            })
            .await
    }

    pub fn clear(&self) {
        self.resource.reset(Vec::new());
    }

    pub fn state(&self) -> ResourceState<Vec<TimelineEntry>> {
        self.resource.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<ResourceState<Vec<TimelineEntry>>> {
        self.resource.subscribe()
    }
}
