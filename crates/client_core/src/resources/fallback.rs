//! Fixed exemplar data shown when the service cannot be reached.

use chrono::{DateTime, Duration, Utc};
use shared::{
    domain::{EntryId, EntryType},
    protocol::{TimelineEntry, WeeklySummary},
};

fn exemplar_entry(
    id: &str,
    title: &str,
    content: &str,
    entry_type: EntryType,
    created_at: DateTime<Utc>,
) -> TimelineEntry {
    TimelineEntry {
        id: EntryId::from(id),
        title: title.to_string(),
        content: content.to_string(),
        entry_type,
        created_at,
        processed: true,
        file_path: None,
    }
}

/// The four demo timeline entries, newest first, timestamped relative to `now`.
pub fn timeline_entries(now: DateTime<Utc>) -> Vec<TimelineEntry> {
    vec![
        exemplar_entry(
            "1",
            "Meeting with design team",
            "Discussed the new homepage layout",
            EntryType::Text,
            now,
        ),
        exemplar_entry(
            "2",
            "Grocery shopping",
            "Bought apples, bread, milk, eggs",
            EntryType::Text,
            now - Duration::hours(4),
        ),
        exemplar_entry(
            "3",
            "Sunset by the lake",
            "Took a photo of the sunset",
            EntryType::Image,
            now - Duration::hours(6),
        ),
        exemplar_entry(
            "4",
            "Project plan feedback",
            "Provided comments on project outline",
            EntryType::Text,
            now - Duration::hours(24),
        ),
    ]
}

/// The search exemplar, kept when it matches `query` on title or content,
/// ignoring case.
pub fn search_results(query: &str, now: DateTime<Utc>) -> Vec<TimelineEntry> {
    let exemplar = exemplar_entry(
        "1",
        "Meeting with design team",
        "Discussed the new homepage layout",
        EntryType::Text,
        now,
    );
    if exemplar.matches_query(query) {
        vec![exemplar]
    } else {
        Vec::new()
    }
}

pub fn weekly_summaries(now: DateTime<Utc>) -> Vec<WeeklySummary> {
    vec![WeeklySummary {
        id: EntryId::from("1"),
        week_start: now - Duration::days(7),
        week_end: now,
        summary: "Completed 5 tasks, attended 3 meetings, focused on project plan".to_string(),
        total_entries: 12,
        created_at: now,
    }]
}
