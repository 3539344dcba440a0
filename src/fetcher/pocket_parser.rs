//! Parsing of `/v3/get` responses
//!
//! The remote encodes most scalars as strings (`"1"`, `"0"`, unix seconds) and returns the
//! page as an object keyed by item id, or as an empty array when there is nothing to
//! return. Records that cannot be normalised are skipped with a warning; the page still
//! reports how many raw records it carried so offsets stay aligned with the remote.

use chrono::{TimeZone, Utc};
use serde_json::{Map, Value};
use tracing::warn;

use super::{Batch, FetcherError, FetcherResult};
use crate::{Item, ItemStatus, Video};

/// `status` value the remote uses when a query has no results
const STATUS_NO_RESULTS: i64 = 2;

/// Parse a full `/v3/get` response body into a page
pub fn parse_get_response(body: &Value) -> FetcherResult<Batch> {
    let object = body
        .as_object()
        .ok_or_else(|| FetcherError::ParseError("response is not a JSON object".to_string()))?;

    if let Some(error) = object.get("error").and_then(Value::as_str) {
        if !error.is_empty() {
            return Err(FetcherError::ParseError(format!("remote reported error: {error}")));
        }
    }

    let no_results = object
        .get("status")
        .and_then(as_i64)
        .map(|s| s == STATUS_NO_RESULTS)
        .unwrap_or(false);

    let records: Vec<(&String, &Value)> = match object.get("list") {
        Some(Value::Object(map)) => ordered_records(map),
        Some(Value::Array(list)) if list.is_empty() => Vec::new(),
        Some(Value::Null) | None if no_results => Vec::new(),
        Some(other) => {
            return Err(FetcherError::ParseError(format!(
                "unexpected `list` type: {}",
                json_type(other)
            )))
        }
        None => {
            return Err(FetcherError::ParseError(
                "response has no `list` field".to_string(),
            ))
        }
    };

    let received = records.len();
    let items: Vec<Item> = records
        .into_iter()
        .filter_map(|(key, record)| match parse_item(record) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!(item_id = %key, error = %e, "Skipping item that failed to parse");
                None
            }
        })
        .collect();

    Ok(Batch {
        items,
        received,
        end_of_data: no_results || received == 0,
    })
}

/// Order records by the remote `sort_id`, then by numeric item id
fn ordered_records(map: &Map<String, Value>) -> Vec<(&String, &Value)> {
    let mut records: Vec<(&String, &Value)> = map.iter().collect();
    records.sort_by_key(|(key, record)| {
        let sort_id = record.get("sort_id").and_then(as_i64).unwrap_or(i64::MAX);
        let id = key.parse::<u64>().unwrap_or(u64::MAX);
        (sort_id, id, (*key).clone())
    });
    records
}

/// Normalise one remote record
pub fn parse_item(record: &Value) -> FetcherResult<Item> {
    let object = record
        .as_object()
        .ok_or_else(|| FetcherError::ParseError("item is not a JSON object".to_string()))?;

    let item_id = string_field(object, "item_id");
    if item_id.is_empty() {
        return Err(FetcherError::ParseError("item has no item_id".to_string()));
    }

    Ok(Item {
        item_id,
        resolved_id: string_field(object, "resolved_id"),
        given_url: string_field(object, "given_url"),
        resolved_url: string_field(object, "resolved_url"),
        given_title: string_field(object, "given_title"),
        resolved_title: string_field(object, "resolved_title"),
        excerpt: string_field(object, "excerpt"),
        is_article: flag_field(object, "is_article"),
        is_index: flag_field(object, "is_index"),
        has_video: flag_field(object, "has_video"),
        has_image: flag_field(object, "has_image"),
        word_count: object
            .get("word_count")
            .and_then(as_i64)
            .map(|n| n.max(0) as u64)
            .unwrap_or(0),
        lang: string_field(object, "lang"),
        time_added: timestamp_field(object, "time_added"),
        time_updated: timestamp_field(object, "time_updated"),
        time_read: timestamp_field(object, "time_read"),
        time_favorited: timestamp_field(object, "time_favorited"),
        status: ItemStatus::from_code(&string_field(object, "status")),
        favorite: flag_field(object, "favorite"),
        tags: keys_of(object.get("tags")),
        authors: collect_from(object.get("authors"), |v| {
            v.get("name").and_then(Value::as_str).map(str::to_string)
        }),
        images: collect_from(object.get("images"), |v| {
            v.get("src").and_then(Value::as_str).map(str::to_string)
        }),
        videos: collect_from(object.get("videos"), |v| {
            Some(Video {
                src: v.get("src").and_then(Value::as_str).unwrap_or_default().to_string(),
                kind: v.get("type").map(scalar_to_string).unwrap_or_default(),
            })
        }),
    })
}

/// Accept both `"123"` and `123`
fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

fn string_field(object: &Map<String, Value>, key: &str) -> String {
    object.get(key).map(scalar_to_string).unwrap_or_default()
}

fn flag_field(object: &Map<String, Value>, key: &str) -> bool {
    object.get(key).and_then(as_i64) == Some(1)
}

/// Unix seconds to RFC 3339 UTC; `0`, absent, or unparsable become `None`
fn timestamp_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    let secs = object.get(key).and_then(as_i64)?;
    if secs == 0 {
        return None;
    }
    Utc.timestamp_opt(secs, 0).single().map(|dt| dt.to_rfc3339())
}

/// Keys of an object map; the remote keys tags by tag name
fn keys_of(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Object(map)) => map.keys().cloned().collect(),
        _ => Vec::new(),
    }
}

/// Values of an object map or array, ordered by numeric key where keys exist
fn collect_from<T>(value: Option<&Value>, extract: impl Fn(&Value) -> Option<T>) -> Vec<T> {
    match value {
        Some(Value::Object(map)) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by_key(|(key, _)| key.parse::<u64>().unwrap_or(u64::MAX));
            entries.into_iter().filter_map(|(_, v)| extract(v)).collect()
        }
        Some(Value::Array(list)) => list.iter().filter_map(extract).collect(),
        _ => Vec::new(),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
