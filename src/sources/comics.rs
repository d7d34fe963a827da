//! Web-comic archives that expose one JSON document per sequential id
//! (`/{index}/info.0.json`), with the latest document at a fixed path.

use chrono::NaiveDate;
use serde_json::Value;

use super::view::{parse_int, text, ItemView};
use super::{FetchMode, SourceDescriptor};
use crate::storage::CacheEntry;

pub(super) static DESCRIPTOR: SourceDescriptor = SourceDescriptor {
    fetch_mode: FetchMode::TemplatedPerIndex,
    index_field: "num",
    default_batch_size: 20,
    date_of,
    view_of,
};

/// Publication date from the separate `year`/`month`/`day` fields.
fn date_of(item: &Value) -> Option<NaiveDate> {
    let year = parse_int(item.get("year")?)?;
    let month = parse_int(item.get("month")?)?;
    let day = parse_int(item.get("day")?)?;
    NaiveDate::from_ymd_opt(
        i32::try_from(year).ok()?,
        u32::try_from(month).ok()?,
        u32::try_from(day).ok()?,
    )
}

fn view_of(entry: &CacheEntry) -> ItemView {
    ItemView {
        index: entry.item_index,
        occurred_on: entry.dated_at,
        display_name: text(&entry.item, "/title"),
        primary_link: text(&entry.item, "/img"),
        details: text(&entry.item, "/alt"),
    }
}
