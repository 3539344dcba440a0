//! Unit tests for normalising `/v3/get` responses

use pocket_export::fetcher::pocket_parser::{parse_get_response, parse_item};
use pocket_export::fetcher::FetcherError;
use pocket_export::{ItemStatus, Video};
use serde_json::json;

#[test]
fn test_complete_record_is_normalised() {
    let record = json!({
        "item_id": "229279689",
        "resolved_id": "229279689",
        "given_url": "http://www.grantland.com/blog/the-triangle/post/_/id/38347/ryder-cup-preview",
        "given_title": "The Massive Ryder Cup Preview",
        "favorite": "1",
        "status": "1",
        "time_added": "1473724640",
        "time_updated": "1473724665",
        "time_read": "0",
        "time_favorited": "1473724700",
        "resolved_title": "The Massive Ryder Cup Preview",
        "resolved_url": "http://www.grantland.com/blog/the-triangle/post/_/id/38347/ryder-cup-preview",
        "excerpt": "The list of things I love about the Ryder Cup is so long",
        "is_article": "1",
        "is_index": "0",
        "has_video": "1",
        "has_image": "1",
        "word_count": "3197",
        "lang": "en",
        "tags": {
            "sports": {"item_id": "229279689", "tag": "sports"},
            "golf": {"item_id": "229279689", "tag": "golf"}
        },
        "authors": {
            "2": {"author_id": "2", "name": "Second Author"},
            "1": {"author_id": "1", "name": "Bill Barnwell"}
        },
        "images": {
            "1": {"image_id": "1", "src": "http://www.grantland.com/assets/photo.jpg"}
        },
        "videos": {
            "1": {"video_id": "1", "src": "http://www.youtube.com/watch?v=Er34PbFkVGk", "type": "1"}
        }
    });

    let item = parse_item(&record).unwrap();

    assert_eq!(item.item_id, "229279689");
    assert_eq!(item.status, ItemStatus::Archived);
    assert!(item.favorite);
    assert!(item.is_article);
    assert!(!item.is_index);
    assert_eq!(item.word_count, 3197);
    assert_eq!(item.time_added.as_deref(), Some("2016-09-12T23:57:20+00:00"));
    assert_eq!(item.time_read, None);
    assert_eq!(item.tags, vec!["golf".to_string(), "sports".to_string()]);
    assert_eq!(
        item.authors,
        vec!["Bill Barnwell".to_string(), "Second Author".to_string()]
    );
    assert_eq!(item.images, vec!["http://www.grantland.com/assets/photo.jpg".to_string()]);
    assert_eq!(
        item.videos,
        vec![Video {
            src: "http://www.youtube.com/watch?v=Er34PbFkVGk".to_string(),
            kind: "1".to_string(),
        }]
    );
    assert_eq!(item.title(), "The Massive Ryder Cup Preview");
}

#[test]
fn test_sparse_record_gets_defaults() {
    let item = parse_item(&json!({"item_id": 42, "given_title": "Saved link"})).unwrap();

    assert_eq!(item.item_id, "42");
    assert_eq!(item.status, ItemStatus::Unknown);
    assert_eq!(item.word_count, 0);
    assert!(item.tags.is_empty());
    assert!(item.videos.is_empty());
    assert_eq!(item.title(), "Saved link");
}

#[test]
fn test_record_without_id_is_rejected() {
    assert!(matches!(
        parse_item(&json!({"given_url": "https://example.com"})),
        Err(FetcherError::ParseError(_))
    ));
    assert!(parse_item(&json!("not an object")).is_err());
}

#[test]
fn test_unparsable_records_are_skipped_but_counted() {
    let body = json!({
        "status": 1,
        "list": {
            "3": {"item_id": "3", "sort_id": 2},
            "1": {"item_id": "1", "sort_id": 0},
            "2": {"sort_id": 1}
        }
    });

    let batch = parse_get_response(&body).unwrap();

    assert_eq!(batch.received, 3);
    assert_eq!(batch.skipped(), 1);
    let ids: Vec<&str> = batch.items.iter().map(|i| i.item_id.as_str()).collect();
    assert_eq!(ids, vec!["1", "3"]);
    assert!(!batch.end_of_data);
}

#[test]
fn test_remote_error_field_is_parse_error() {
    let body = json!({"status": 0, "error": "Invalid request", "list": []});
    assert!(matches!(
        parse_get_response(&body),
        Err(FetcherError::ParseError(message)) if message.contains("Invalid request")
    ));
}

#[test]
fn test_unexpected_list_shape_is_rejected() {
    assert!(parse_get_response(&json!({"status": 1, "list": "oops"})).is_err());
    assert!(parse_get_response(&json!({"status": 1})).is_err());
    assert!(parse_get_response(&json!([1, 2, 3])).is_err());
}

#[test]
fn test_empty_list_without_status_two_ends_paging() {
    let batch = parse_get_response(&json!({"status": 1, "list": []})).unwrap();
    assert!(batch.end_of_data);
    assert!(batch.items.is_empty());
}
