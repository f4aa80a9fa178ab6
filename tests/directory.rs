//! HTTP provider directory client: envelope decoding, rating filtering, and
//! the retry/backoff path for the idempotent search call.

use httpmock::prelude::*;
use serde_json::json;
use std::time::Duration;

use careloom::directory::{
    DirectoryError, HttpProviderDirectory, ProviderDirectory, ProviderQuery, RetryPolicy,
};

fn query() -> ProviderQuery {
    ProviderQuery {
        specialties: vec!["general consultation".to_string()],
        city: "Pune".to_string(),
        min_rating: 4.0,
    }
}

fn fast_retries() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(5),
    }
}

#[tokio::test]
async fn decodes_the_search_envelope() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/providers/search")
                .query_param("city", "Pune");
            then.status(200).json_body(json!({
                "success": true,
                "result": {
                    "items": [
                        {
                            "id": "p1",
                            "fullName": "Dr. A. Kulkarni",
                            "specialtyPrimary": "general consultation",
                            "averageRating": 4.7,
                            "city": "Pune"
                        },
                        {
                            "id": "p2",
                            "fullName": "Dr. B. Shah",
                            "specialtyPrimary": "general consultation",
                            "averageRating": 3.1,
                            "city": "Pune"
                        }
                    ]
                }
            }));
        })
        .await;

    let directory = HttpProviderDirectory::new(server.base_url())
        .unwrap()
        .with_retry(fast_retries());
    let providers = directory.search(&query()).await.unwrap();

    mock.assert_async().await;
    // The 3.1-rated provider is filtered by min_rating.
    assert_eq!(providers.len(), 1);
    assert_eq!(providers[0].name, "Dr. A. Kulkarni");
    assert_eq!(providers[0].rating, 4.7);
}

#[tokio::test]
async fn unsuccessful_envelope_yields_an_empty_list() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/providers/search");
            then.status(200).json_body(json!({"success": false}));
        })
        .await;

    let directory = HttpProviderDirectory::new(server.base_url())
        .unwrap()
        .with_retry(fast_retries());
    let providers = directory.search(&query()).await.unwrap();
    assert!(providers.is_empty());
}

#[tokio::test]
async fn server_errors_are_retried_then_reported() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/providers/search");
            then.status(503);
        })
        .await;

    let directory = HttpProviderDirectory::new(server.base_url())
        .unwrap()
        .with_retry(fast_retries());
    let err = directory.search(&query()).await.unwrap_err();

    assert!(matches!(err, DirectoryError::Status { status: 503 }));
    // One initial attempt plus two retries.
    assert_eq!(mock.hits_async().await, 3);
}

#[tokio::test]
async fn result_cap_limits_the_presentation_set() {
    let items: Vec<_> = (0..8)
        .map(|i| {
            json!({
                "id": format!("p{i}"),
                "fullName": format!("Dr. {i}"),
                "specialtyPrimary": "general consultation",
                "averageRating": 4.5,
                "city": "Pune"
            })
        })
        .collect();

    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/providers/search");
            then.status(200)
                .json_body(json!({"success": true, "result": {"items": items}}));
        })
        .await;

    let directory = HttpProviderDirectory::new(server.base_url())
        .unwrap()
        .with_retry(fast_retries());
    let providers = directory.search(&query()).await.unwrap();
    assert_eq!(providers.len(), HttpProviderDirectory::RESULT_CAP);
}
