//! Loading/error/data containers over gateway calls.
//!
//! Every container publishes [`ResourceState`] snapshots on a watch channel.
//! A failed fetch is replaced by the container's fallback dataset and marked
//! with [`DataSource::Fallback`]; `error` stays empty so the view never
//! blocks on connectivity. Each trigger takes a new generation and only the
//! newest generation may write its result.

use std::{
    future::Future,
    sync::atomic::{AtomicU64, Ordering},
};

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::GatewayError;

pub mod fallback;
mod search;
mod summaries;
mod timeline;

pub use search::SearchResource;
pub use summaries::WeeklySummaryResource;
pub use timeline::TimelineResource;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSource {
    Remote,
    Fallback { reason: String },
}

impl DataSource {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ResourceState<T> {
    pub data: T,
    pub loading: bool,
    pub error: Option<String>,
    pub source: DataSource,
    /// Generation whose result produced `data`; 0 before any result.
    pub generation: u64,
}

/// How a single trigger ended.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Fresh,
    Fallback(GatewayError),
    /// A newer trigger started before this one resolved; its result was dropped.
    Superseded,
    /// Cleared locally without a gateway call.
    Cleared,
}

pub struct AsyncResource<T> {
    name: &'static str,
    state: watch::Sender<ResourceState<T>>,
    generation: AtomicU64,
}

impl<T: Clone + Send + Sync + 'static> AsyncResource<T> {
    pub fn new(name: &'static str, initial: T, loading: bool) -> Self {
        let (state, _) = watch::channel(ResourceState {
            data: initial,
            loading,
            error: None,
            source: DataSource::Remote,
            generation: 0,
        });
        Self {
            name,
            state,
            generation: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> ResourceState<T> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ResourceState<T>> {
        self.state.subscribe()
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    pub(crate) fn modify(&self, f: impl FnOnce(&mut ResourceState<T>)) {
        self.state.send_modify(f);
    }

    /// Replaces the data locally and invalidates any in-flight trigger.
    pub(crate) fn reset(&self, data: T) {
        let generation = self.next_generation();
        self.state.send_modify(|state| {
            state.data = data;
            state.loading = false;
            state.error = None;
            state.source = DataSource::Remote;
            state.generation = generation;
        });
    }

    /// Runs one trigger: `fetch` on success, `fallback` on failure.
    pub async fn run<Fut, F>(&self, fetch: Fut, fallback: F) -> FetchOutcome
    where
        Fut: Future<Output = Result<T, GatewayError>>,
        F: FnOnce() -> T,
    {
        let generation = self.begin();
        self.complete(generation, fetch, fallback).await
    }

    /// Takes a generation and enters the loading state without awaiting
    /// anything, so a trigger issued afterwards always supersedes it.
    pub(crate) fn begin(&self) -> u64 {
        let generation = self.next_generation();
        self.state.send_modify(|state| {
            state.loading = true;
            state.error = None;
        });
        generation
    }

    pub(crate) async fn complete<Fut, F>(
        &self,
        generation: u64,
        fetch: Fut,
        fallback: F,
    ) -> FetchOutcome
    where
        Fut: Future<Output = Result<T, GatewayError>>,
        F: FnOnce() -> T,
    {
        let _guard = LoadingGuard {
            resource: self,
            generation,
        };

        let result = fetch.await;
        if !self.is_current(generation) {
            debug!(
                resource = self.name,
                generation, "resource: discarding superseded response"
            );
            return FetchOutcome::Superseded;
        }

        match result {
            Ok(data) => {
                self.state.send_modify(|state| {
                    state.data = data;
                    state.loading = false;
                    state.error = None;
                    state.source = DataSource::Remote;
                    state.generation = generation;
                });
                FetchOutcome::Fresh
            }
            Err(err) => {
                warn!(
                    resource = self.name,
                    "resource: backend unavailable, using fallback data: {err}"
                );
                let data = fallback();
                let reason = err.to_string();
                self.state.send_modify(|state| {
                    state.data = data;
                    state.loading = false;
                    state.error = None;
                    state.source = DataSource::Fallback { reason };
                    state.generation = generation;
                });
                FetchOutcome::Fallback(err)
            }
        }
    }
}

/// Clears `loading` if the trigger is abandoned while still current.
struct LoadingGuard<'a, T> {
    resource: &'a AsyncResource<T>,
    generation: u64,
}

impl<T> Drop for LoadingGuard<'_, T> {
    fn drop(&mut self) {
        if self.resource.generation.load(Ordering::SeqCst) != self.generation {
            return;
        }
        self.resource.state.send_if_modified(|state| {
            if state.loading {
                state.loading = false;
                true
            } else {
                false
            }
        });
    }
}

#[cfg(test)]
#[path = "../tests/resources_tests.rs"]
mod tests;
