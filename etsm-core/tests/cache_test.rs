//! Content cache behavior: hit discipline, retries, integrity, staging

mod common;

use common::{basic_world, published, FlakyFetcher, MockFetcher};
use etsm_core::cache::{ContentCache, SyncOptions};
use etsm_core::catalog::AssetKind;
use etsm_core::digest;
use etsm_core::Error;

#[tokio::test]
async fn test_second_ensure_performs_zero_fetches() {
    let world = basic_world();
    let cache = ContentCache::new(world.paths.clone());
    let entry = world
        .index
        .resolve(AssetKind::Map, "adlernest", None)
        .unwrap();

    cache.ensure(entry, &world.fetcher).await.unwrap();
    assert_eq!(world.fetcher.calls(), 1);

    let cached = cache.ensure(entry, &world.fetcher).await.unwrap();
    assert_eq!(world.fetcher.calls(), 1);
    assert!(cached.path().is_file());
}

#[tokio::test]
async fn test_integrity_mismatch_keeps_prior_entry() {
    let world = basic_world();
    let cache = ContentCache::new(world.paths.clone());

    let good = world
        .index
        .resolve(AssetKind::Map, "beach", None)
        .unwrap()
        .clone();
    cache.ensure(&good, &world.fetcher).await.unwrap();

    // Catalog now declares different bytes for the same version, but the
    // fetch still returns the old payload
    let mut relisted = good.clone();
    relisted.checksum = digest::checksum(b"some other payload");

    let err = cache.ensure(&relisted, &world.fetcher).await.unwrap_err();
    assert!(matches!(err, Error::Integrity { .. }));

    // Prior verified entry untouched, staging cleaned up
    assert!(cache.is_cached(&good).unwrap());
    let tmp = world.root.path().join("cache/tmp");
    if tmp.is_dir() {
        assert_eq!(std::fs::read_dir(&tmp).unwrap().count(), 0);
    }
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried() {
    let world = basic_world();
    let cache = ContentCache::new(world.paths.clone());

    let payload = b"map payload".to_vec();
    let entry = published(AssetKind::Map, "braundorf", "b4", &payload);
    let fetcher = FlakyFetcher::new(payload, 2);

    let cached = cache.ensure(&entry, &fetcher).await.unwrap();
    assert_eq!(fetcher.calls(), 3);
    assert!(cached.path().is_file());
}

#[tokio::test(start_paused = true)]
async fn test_retry_budget_is_bounded() {
    let world = basic_world();
    let cache = ContentCache::new(world.paths.clone());

    let payload = b"map payload".to_vec();
    let entry = published(AssetKind::Map, "braundorf", "b4", &payload);
    // More transient failures than the retry budget allows
    let fetcher = FlakyFetcher::new(payload, 10);

    let err = cache.ensure(&entry, &fetcher).await.unwrap_err();
    assert!(matches!(err, Error::Fetch { attempts: 4, .. }));
    assert_eq!(fetcher.calls(), 4);
    assert!(!cache.is_cached(&entry).unwrap());
}

#[tokio::test]
async fn test_terminal_failure_not_retried() {
    let world = basic_world();
    let cache = ContentCache::new(world.paths.clone());

    let entry = published(AssetKind::Map, "unpublished", "1", b"whatever");
    let fetcher = MockFetcher::new();

    let err = cache.ensure(&entry, &fetcher).await.unwrap_err();
    assert!(matches!(err, Error::Fetch { attempts: 1, .. }));
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn test_archive_extracted_with_checksum_marker() {
    let world = basic_world();
    let cache = ContentCache::new(world.paths.clone());
    let entry = world
        .index
        .resolve(AssetKind::EngineBuild, "etl", None)
        .unwrap();

    let cached = cache.ensure(entry, &world.fetcher).await.unwrap();

    // The single top-level archive directory is unwrapped
    assert!(cached.path().join("etlded").is_file());
    let marker = std::fs::read_to_string(cached.path().join(".checksum")).unwrap();
    assert_eq!(marker.trim(), entry.checksum);

    let calls_before = world.fetcher.calls();
    cache.ensure(entry, &world.fetcher).await.unwrap();
    assert_eq!(world.fetcher.calls(), calls_before);
}

#[tokio::test]
async fn test_sync_sources_tolerates_per_entry_failures() {
    let world = basic_world();
    let cache = ContentCache::new(world.paths.clone());

    // One entry whose payload was never published
    let mut index = world.index.clone();
    let ghost = published(AssetKind::Pak, "pak9", "1.0.0", b"missing");
    index
        .entries
        .get_mut(&AssetKind::Pak)
        .unwrap()
        .insert("pak9".to_string(), vec![ghost]);

    let report = cache
        .sync_sources(&index, &world.fetcher, SyncOptions::default())
        .await;

    // engine + mod + pak0 + template ensured; maps excluded by default
    assert_eq!(report.ensured, 4);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].0.contains("pak9"));
}

#[tokio::test]
async fn test_sync_with_maps_includes_maps() {
    let world = basic_world();
    let cache = ContentCache::new(world.paths.clone());

    let report = cache
        .sync_sources(
            &world.index,
            &world.fetcher,
            SyncOptions {
                all_versions: false,
                with_maps: true,
            },
        )
        .await;

    assert_eq!(report.ensured, 8);
    assert!(report.failures.is_empty());
}
