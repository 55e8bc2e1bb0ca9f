use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use shared::protocol::TimelineEntry;
use tokio::{sync::watch, task::JoinHandle};

use super::{fallback, AsyncResource, FetchOutcome, ResourceState};
use crate::{
    gateway::{TimelineFilters, TimelineQuery, DEFAULT_TIMELINE_LIMIT},
    LifelogApi,
};

/// Timeline entries, first page only. Starts in the loading state until the
/// initial [`TimelineResource::spawn_load`] or a later trigger resolves.
pub struct TimelineResource {
    api: Arc<dyn LifelogApi>,
    resource: AsyncResource<Vec<TimelineEntry>>,
    last_filters: Mutex<TimelineFilters>,
    page_size: u32,
}

impl TimelineResource {
    pub fn new(api: Arc<dyn LifelogApi>) -> Self {
        Self::with_page_size(api, DEFAULT_TIMELINE_LIMIT)
    }

    pub fn with_page_size(api: Arc<dyn LifelogApi>, page_size: u32) -> Self {
        Self {
            api,
            resource: AsyncResource::new("timeline", Vec::new(), true),
            last_filters: Mutex::new(TimelineFilters::default()),
            page_size,
        }
    }

    pub async fn load(&self) -> FetchOutcome {
        self.fetch(TimelineFilters::default()).await
    }

    /// Starts the unfiltered initial load on the runtime. Any trigger issued
    /// after this returns supersedes it.
    pub fn spawn_load(self: &Arc<Self>) -> JoinHandle<FetchOutcome> {
        let filters = TimelineFilters::default();
        let generation = self.begin(&filters);
        let timeline = Arc::clone(self);
        tokio::spawn(async move { timeline.complete(generation, filters).await })
    }

    pub async fn fetch(&self, filters: TimelineFilters) -> FetchOutcome {
        let generation = self.begin(&filters);
        self.complete(generation, filters).await
    }

    /// Repeats the most recent fetch with the same filters.
    pub async fn refetch(&self) -> FetchOutcome {
        let filters = self.filters_guard().clone();
        self.fetch(filters).await
    }

    fn filters_guard(&self) -> MutexGuard<'_, TimelineFilters> {
        self.last_filters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self, filters: &TimelineFilters) -> u64 {
        *self.filters_guard() = filters.clone();
        self.resource.begin()
    }

    async fn complete(&self, generation: u64, filters: TimelineFilters) -> FetchOutcome {
        let query = TimelineQuery {
            skip: 0,
            limit: self.page_size,
            filters,
        };
        self.resource
            .complete(generation, self.api.get_timeline_entries(&query), || {
                fallback::timeline_entries(Utc::now())
            })
            .await
    }

    pub fn state(&self) -> ResourceState<Vec<TimelineEntry>> {
        self.resource.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<ResourceState<Vec<TimelineEntry>>> {
        self.resource.subscribe()
    }
}
