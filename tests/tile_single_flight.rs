//! Integration tests for the tile pipeline's per-key single-flight
//! guarantee.

mod common;

use common::{png_response, scripted_context};
use earthtile::result::ResultCode;
use earthtile::tile::{Profile, TileKey, TilePipeline};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_ten_concurrent_fetches_one_transport_call() {
    let (context, script) = scripted_context();
    script.push(png_response(&[]));
    script.set_delay(Duration::from_millis(50));

    let pipeline = Arc::new(
        TilePipeline::builder("http://tiles.ex/{z}/{x}/{y}.png")
            .profile(Profile::WebMercator)
            .context(context)
            .build(),
    );
    let key = TileKey::new(14, 1000, 2000, Profile::WebMercator);

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.fetch_image(&key, None).await })
        })
        .collect();

    let results = futures::future::join_all(handles).await;

    let mut shared = Vec::new();
    for result in results {
        let result = result.unwrap();
        assert_eq!(result.code(), ResultCode::Ok);
        assert!(result.image().is_some());
        shared.push(result);
    }

    // every caller received the same shared result
    for other in &shared[1..] {
        assert!(Arc::ptr_eq(&shared[0], other));
    }

    assert_eq!(script.calls(), 1, "keygate must allow one wire call per key");

    let stats = pipeline.stats();
    assert_eq!(stats.new_requests, 1);
    assert_eq!(stats.coalesced_requests, 9);
}

#[tokio::test]
async fn test_distinct_keys_fetch_independently() {
    let (context, script) = scripted_context();
    script.push(png_response(&[]));
    script.push(png_response(&[]));

    let pipeline = Arc::new(
        TilePipeline::builder("http://tiles.ex/{z}/{x}/{y}.png")
            .context(context)
            .build(),
    );

    let a = pipeline
        .fetch_image(&TileKey::new(10, 1, 1, Profile::WebMercator), None)
        .await;
    let b = pipeline
        .fetch_image(&TileKey::new(10, 1, 2, Profile::WebMercator), None)
        .await;

    assert_eq!(a.code(), ResultCode::Ok);
    assert_eq!(b.code(), ResultCode::Ok);
    assert_eq!(script.calls(), 2);
}

#[tokio::test]
async fn test_template_drives_request_urls() {
    let (context, script) = scripted_context();
    script.push(png_response(&[]));

    let pipeline = TilePipeline::builder("http://tms.ex/{z}/{x}/{-y}.png")
        .context(context)
        .build();

    let key = TileKey::new(3, 2, 1, Profile::WebMercator);
    assert_eq!(pipeline.request_for(&key).full_url(), "http://tms.ex/3/2/6.png");

    let result = pipeline.fetch_image(&key, None).await;
    assert_eq!(result.code(), ResultCode::Ok);
}

#[tokio::test]
async fn test_aborted_runner_releases_key() {
    let (context, script) = scripted_context();
    script.push(png_response(&[]));
    script.push(png_response(&[]));
    script.set_delay(Duration::from_millis(100));

    let pipeline = Arc::new(
        TilePipeline::builder("http://tiles.ex/{z}/{x}/{y}.png")
            .context(context)
            .build(),
    );
    let key = TileKey::new(7, 3, 3, Profile::WebMercator);

    let runner = tokio::spawn({
        let pipeline = pipeline.clone();
        async move { pipeline.fetch_image(&key, None).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    runner.abort();
    let _ = runner.await;

    // the dead runner's bucket must not strand later callers
    let result = tokio::time::timeout(Duration::from_secs(2), pipeline.fetch_image(&key, None))
        .await
        .expect("fetch must not hang on an abandoned bucket");
    assert_eq!(result.code(), ResultCode::Ok);
}

#[tokio::test]
async fn test_error_results_are_shared_too() {
    let (context, script) = scripted_context();
    // no scripted response: transport answers 404
    script.set_delay(Duration::from_millis(20));

    let pipeline = Arc::new(
        TilePipeline::builder("http://tiles.ex/{z}/{x}/{y}.png")
            .context(context)
            .build(),
    );
    let key = TileKey::new(5, 10, 10, Profile::WebMercator);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.fetch_image(&key, None).await })
        })
        .collect();

    for result in futures::future::join_all(handles).await {
        assert_eq!(result.unwrap().code(), ResultCode::NotFound);
    }
    assert_eq!(script.calls(), 1);
}
