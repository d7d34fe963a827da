//! Launch-history APIs with native offset/limit pagination over a
//! `flight_number`-ordered collection.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

use super::view::{parse_int, text, ItemView};
use super::{FetchMode, SourceDescriptor};
use crate::storage::CacheEntry;

pub(super) static DESCRIPTOR: SourceDescriptor = SourceDescriptor {
    fetch_mode: FetchMode::PaginatedRange,
    index_field: "flight_number",
    default_batch_size: 10,
    date_of,
    view_of,
};

/// Launch date from `launch_date_unix`; launches without one (unscheduled)
/// are dated today.
fn date_of(item: &Value) -> Option<NaiveDate> {
    let launched = item
        .get("launch_date_unix")
        .and_then(parse_int)
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));
    Some(launched.unwrap_or_else(Utc::now).date_naive())
}

fn view_of(entry: &CacheEntry) -> ItemView {
    ItemView {
        index: entry.item_index,
        occurred_on: entry.dated_at,
        display_name: text(&entry.item, "/mission_name"),
        primary_link: text(&entry.item, "/links/article_link"),
        details: text(&entry.item, "/details"),
    }
}
