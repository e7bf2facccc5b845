//! Integration tests for the MBTiles-style local tile store and the
//! SQLite cache bin feeding the HTTP client's read-through path.

mod common;

use common::{png_response, scripted_context};
use earthtile::cache::{Cache, CacheContext, CachePolicy};
use earthtile::http::{HttpClient, HttpRequest, RequestEnv};
use earthtile::mbtiles::{MbtilesStore, SqliteCache};
use earthtile::result::ResultCode;
use earthtile::tile::{Profile, TileKey};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn checker_tile() -> image::DynamicImage {
    let mut img = image::RgbaImage::new(8, 8);
    for (x, y, px) in img.enumerate_pixels_mut() {
        *px = if (x + y) % 2 == 0 {
            image::Rgba([255, 255, 255, 255])
        } else {
            image::Rgba([0, 0, 0, 255])
        };
    }
    image::DynamicImage::ImageRgba8(img)
}

#[test]
fn test_store_round_trip_across_reopen() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("archive.mbtiles");

    let store = MbtilesStore::open(&path, Some("png"), false).unwrap();
    let key = TileKey::new(5, 9, 21, Profile::WebMercator);
    store.write_tile(&key, &checker_tile()).unwrap();
    assert_eq!(store.tile_count().unwrap(), 1);
    drop(store);

    // the same XYZ key resolves to the same row after reopening
    let store = MbtilesStore::open(&path, None, true).unwrap();
    assert_eq!(store.format(), "png");
    assert_eq!(store.levels(), (Some(5), Some(5)));
    let image = store.read_image(&key).unwrap().expect("tile present");
    assert_eq!(image.width(), 8);

    // a key differing only in row misses
    let sibling = TileKey::new(5, 9, 22, Profile::WebMercator);
    assert!(store.read_tile(&sibling).unwrap().is_none());
}

#[tokio::test]
async fn test_sqlite_cache_backs_http_reads() {
    let tmp = TempDir::new().unwrap();
    let cache: Arc<SqliteCache> =
        Arc::new(SqliteCache::open(tmp.path().join("cache.db")).unwrap());

    let (context, script) = scripted_context();
    script.push(png_response(&[("cache-control", "max-age=3600")]));

    let env = RequestEnv::new().with_cache(CacheContext::new(
        cache.clone(),
        CachePolicy::default().with_max_age(Duration::from_secs(60)),
    ));

    let mut client = HttpClient::with_context(context);
    let request = HttpRequest::new("http://ex/tiles/5/9/21.png");

    let first = client.read_image(&request, &env, None).await;
    assert_eq!(first.code(), ResultCode::Ok);
    assert!(!first.from_cache());
    assert_eq!(script.calls(), 1);

    // the entry persists in the database and serves the second read
    let second = client.read_image(&request, &env, None).await;
    assert_eq!(second.code(), ResultCode::Ok);
    assert!(second.from_cache());
    assert_eq!(script.calls(), 1);

    let record = cache
        .default_bin()
        .read("http://ex/tiles/5/9/21.png")
        .unwrap()
        .expect("entry stored");
    assert_eq!(record.metadata.get("content-type"), Some("image/png"));
}
