use std::{sync::Arc, time::Duration};

use super::*;
use crate::{
    gateway::TimelineFilters,
    test_support::{entry, server_error, summary, FakeApi},
};
use shared::domain::EntryType;
use tokio::time::{sleep, timeout};

fn ids<T, F: Fn(&T) -> &str>(items: &[T], id: F) -> Vec<String> {
    items.iter().map(|item| id(item).to_string()).collect()
}

#[tokio::test]
async fn timeline_starts_loading_and_falls_back_when_offline() {
    let api = Arc::new(FakeApi::default());
    let timeline = TimelineResource::new(api.clone());
    assert!(timeline.state().loading);

    let outcome = timeline.load().await;
    assert!(matches!(outcome, FetchOutcome::Fallback(_)));

    let state = timeline.state();
    assert!(!state.loading);
    assert!(state.error.is_none());
    assert!(state.source.is_fallback());
    assert_eq!(
        ids(&state.data, |e| e.id.as_str()),
        ["1", "2", "3", "4"]
    );
}

#[tokio::test]
async fn timeline_refetch_repeats_last_filters() {
    let api = Arc::new(FakeApi::default());
    api.timeline
        .push(Ok(vec![entry("10", "Sketch", EntryType::Image)]));
    api.timeline
        .push(Ok(vec![entry("11", "Sketch v2", EntryType::Image)]));
    let timeline = TimelineResource::with_page_size(api.clone(), 50);

    let filters = TimelineFilters {
        entry_type: Some(EntryType::Image),
        ..TimelineFilters::default()
    };
    assert!(matches!(timeline.fetch(filters.clone()).await, FetchOutcome::Fresh));
    assert!(matches!(timeline.refetch().await, FetchOutcome::Fresh));

    let queries = api.timeline_queries.lock().expect("queries lock").clone();
    assert_eq!(queries.len(), 2);
    assert!(queries.iter().all(|q| q.filters == filters && q.limit == 50));

    let state = timeline.state();
    assert_eq!(state.source, DataSource::Remote);
    assert_eq!(ids(&state.data, |e| e.id.as_str()), ["11"]);
}

#[tokio::test(start_paused = true)]
async fn only_the_newest_fetch_writes_its_result() {
    let api = Arc::new(FakeApi::default());
    api.timeline.push_after(
        Duration::from_millis(100),
        Ok(vec![entry("old", "Old", EntryType::Text)]),
    );
    api.timeline
        .push(Ok(vec![entry("new", "New", EntryType::Text)]));
    let timeline = TimelineResource::new(api.clone());

    let (first, second) = tokio::join!(timeline.load(), async {
        sleep(Duration::from_millis(10)).await;
        timeline.load().await
    });

    assert!(matches!(first, FetchOutcome::Superseded));
    assert!(matches!(second, FetchOutcome::Fresh));
    let state = timeline.state();
    assert!(!state.loading);
    assert_eq!(ids(&state.data, |e| e.id.as_str()), ["new"]);
    assert_eq!(state.generation, 2);
}

#[tokio::test(start_paused = true)]
async fn abandoned_fetch_clears_loading() {
    let api = Arc::new(FakeApi::default());
    api.timeline.push_after(Duration::from_secs(5), Ok(Vec::new()));
    let timeline = TimelineResource::new(api.clone());

    let result = timeout(Duration::from_millis(10), timeline.load()).await;
    assert!(result.is_err());
    assert!(!timeline.state().loading);
}

#[tokio::test]
async fn search_starts_idle_and_falls_back_to_matching_exemplars() {
    let api = Arc::new(FakeApi::default());
    api.search.push(Err(server_error()));
    let search = SearchResource::new(api.clone());
    assert!(!search.state().loading);

    search.search("design").await;
    let state = search.state();
    assert!(!state.loading);
    assert!(state.error.is_none());
    assert!(state.source.is_fallback());
    assert_eq!(state.data.len(), 1);
    assert_eq!(state.data[0].title, "Meeting with design team");
}

#[tokio::test]
async fn search_fallback_only_offers_the_search_exemplar() {
    let api = Arc::new(FakeApi::default());
    let search = SearchResource::new(api.clone());

    search.search("shopping").await;
    let state = search.state();
    assert!(state.source.is_fallback());
    assert!(state.data.is_empty());

    search.search("the").await;
    assert_eq!(ids(&search.state().data, |e| e.id.as_str()), ["1"]);
}

#[tokio::test]
async fn blank_search_clears_without_calling_the_service() {
    let api = Arc::new(FakeApi::default());
    api.search
        .push(Ok(vec![entry("5", "Design review", EntryType::Text)]));
    let search = SearchResource::new(api.clone());

    search.search("review").await;
    assert_eq!(search.state().data.len(), 1);

    let outcome = search.search("   ").await;
    assert!(matches!(outcome, FetchOutcome::Cleared));
    assert!(search.state().data.is_empty());
    assert_eq!(api.search.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn clearing_search_discards_in_flight_results() {
    let api = Arc::new(FakeApi::default());
    api.search.push_after(
        Duration::from_millis(100),
        Ok(vec![entry("5", "Design review", EntryType::Text)]),
    );
    let search = SearchResource::new(api.clone());

    let (pending, cleared) = tokio::join!(search.search("design"), async {
        sleep(Duration::from_millis(10)).await;
        search.search("").await
    });

    assert!(matches!(pending, FetchOutcome::Superseded));
    assert!(matches!(cleared, FetchOutcome::Cleared));
    let state = search.state();
    assert!(state.data.is_empty());
    assert!(!state.loading);
}

#[tokio::test]
async fn summaries_fall_back_to_one_exemplar() {
    let api = Arc::new(FakeApi::default());
    let summaries = WeeklySummaryResource::new(api.clone());

    summaries.fetch().await;
    let state = summaries.state();
    assert!(state.source.is_fallback());
    assert_eq!(state.data.len(), 1);
    assert_eq!(state.data[0].total_entries, 12);
}

#[tokio::test]
async fn generate_prepends_the_new_summary() {
    let api = Arc::new(FakeApi::default());
    api.summaries.push(Ok(vec![summary("1", "older week")]));
    api.generate.push(Ok(summary("2", "this week")));
    let summaries = WeeklySummaryResource::new(api.clone());

    summaries.fetch().await;
    let generated = summaries.generate().await.expect("generate");
    assert_eq!(generated.id.as_str(), "2");

    let state = summaries.state();
    assert_eq!(ids(&state.data, |s| s.id.as_str()), ["2", "1"]);
    assert!(state.error.is_none());
    assert!(!summaries.is_generating());
}

#[tokio::test]
async fn failed_generate_records_error_and_keeps_data() {
    let api = Arc::new(FakeApi::default());
    api.summaries.push(Ok(vec![summary("1", "older week")]));
    api.generate.push(Err(server_error()));
    let summaries = WeeklySummaryResource::new(api.clone());

    summaries.fetch().await;
    let err = summaries.generate().await.expect_err("generate fails");
    assert_eq!(err.status(), Some(500));

    let state = summaries.state();
    assert_eq!(
        state.error.as_deref(),
        Some("API Error: 500 Internal Server Error")
    );
    assert_eq!(ids(&state.data, |s| s.id.as_str()), ["1"]);
    assert!(!summaries.is_generating());
}

#[tokio::test(start_paused = true)]
async fn overlapping_generates_keep_the_flag_until_the_last_finishes() {
    let api = Arc::new(FakeApi::default());
    api.generate
        .push_after(Duration::from_millis(10), Ok(summary("2", "quick")));
    api.generate
        .push_after(Duration::from_millis(100), Ok(summary("3", "slow")));
    let summaries = WeeklySummaryResource::new(api.clone());

    let (first, second, midway) = tokio::join!(summaries.generate(), summaries.generate(), async {
        sleep(Duration::from_millis(50)).await;
        summaries.is_generating()
    });

    assert!(first.is_ok() && second.is_ok());
    assert!(midway);
    assert!(!summaries.is_generating());
    assert_eq!(*summaries.subscribe_generating().borrow(), 0);
    assert_eq!(ids(&summaries.state().data, |s| s.id.as_str()), ["3", "2"]);
}

#[tokio::test(start_paused = true)]
async fn spawned_timeline_load_loses_to_a_later_fetch() {
    let api = Arc::new(FakeApi::default());
    api.timeline
        .push(Ok(vec![entry("10", "Sketch", EntryType::Image)]));
    api.timeline.push_after(
        Duration::from_millis(10),
        Ok(vec![entry("1", "Unfiltered", EntryType::Text)]),
    );
    let timeline = Arc::new(TimelineResource::new(api.clone()));

    let initial = timeline.spawn_load();
    let filters = TimelineFilters {
        entry_type: Some(EntryType::Image),
        ..TimelineFilters::default()
    };
    assert!(matches!(timeline.fetch(filters.clone()).await, FetchOutcome::Fresh));
    let initial = initial.await.expect("initial load task");

    assert!(matches!(initial, FetchOutcome::Superseded));
    assert_eq!(api.timeline.calls(), 2);
    let state = timeline.state();
    assert!(!state.loading);
    assert_eq!(ids(&state.data, |e| e.id.as_str()), ["10"]);

    api.timeline.push(Ok(Vec::new()));
    timeline.refetch().await;
    let queries = api.timeline_queries.lock().expect("queries lock").clone();
    assert_eq!(queries.last().map(|q| &q.filters), Some(&filters));
}

#[tokio::test]
async fn subscribers_see_loading_then_data() {
    let api = Arc::new(FakeApi::default());
    api.timeline
        .push(Ok(vec![entry("1", "Standup", EntryType::Text)]));
    let timeline = TimelineResource::new(api.clone());
    let mut updates = timeline.subscribe();
    updates.borrow_and_update();

    timeline.load().await;
    assert!(updates.has_changed().expect("sender alive"));
    let state = updates.borrow_and_update().clone();
    assert!(!state.loading);
    assert_eq!(state.data.len(), 1);
}
