//! Flattening and ordering of downloaded pages.

use crate::Activity;
use crate::pagination::PageStore;
use std::collections::HashSet;

/// Flatten every page and sort by local start time, most recent first.
///
/// The sort is stable: activities sharing a start time keep page order.
pub fn sort_activities(store: PageStore) -> Vec<Activity> {
    let mut all: Vec<Activity> = store.into_pages().flat_map(|(_, acts)| acts).collect();
    all.sort_by(|a, b| b.start_date_local.cmp(&a.start_date_local));
    all
}

/// Drop every repeat of an already seen `id`, keeping the first occurrence.
///
/// Returns the remaining activities and how many were dropped.
pub fn dedup_by_id(activities: Vec<Activity>) -> (Vec<Activity>, usize) {
    let before = activities.len();
    let mut seen = HashSet::with_capacity(before);
    let kept: Vec<Activity> = activities
        .into_iter()
        .filter(|a| seen.insert(a.id))
        .collect();
    let dropped = before - kept.len();
    (kept, dropped)
}
