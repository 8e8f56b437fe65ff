//! Activation engine scenarios: linking, config rendering, idempotence,
//! startup set, mapvote and locking

mod common;

use std::collections::BTreeMap;
use std::time::Duration;

use pretty_assertions::assert_eq;

use common::{basic_world, TestWorld, TEMPLATE_TEXT};
use etsm_core::cache::ContentCache;
use etsm_core::catalog::AssetKind;
use etsm_core::server::{
    observe, ActivationEngine, ConfigSpec, ServerLock, ServerManifest,
};
use etsm_core::Error;

const LOCK_TIMEOUT: Duration = Duration::from_millis(200);

fn match_manifest() -> ServerManifest {
    let mut manifest = ServerManifest::with_defaults("default");
    manifest.maps = vec!["adlernest".to_string(), "caen_4".to_string()];
    manifest.configs = vec![ConfigSpec {
        name: "test_server".to_string(),
        from: Some("etl_server".to_string()),
        cvars: BTreeMap::from([(
            "sv_hostname".to_string(),
            "testserver etsm".to_string(),
        )]),
        bots: BTreeMap::new(),
    }];
    manifest.startup_configs = vec!["test_server".to_string()];
    manifest
}

async fn reconciled(world: &TestWorld, manifest: &ServerManifest) -> ContentCache {
    let cache = ContentCache::new(world.paths.clone());
    let engine = ActivationEngine::new(&world.index, &cache, &world.fetcher, &world.paths)
        .with_lock_timeout(LOCK_TIMEOUT);
    engine.reconcile(manifest).await.unwrap();
    cache
}

#[cfg(unix)]
#[tokio::test]
async fn test_reconcile_links_engine_mod_paks_and_maps() {
    let world = basic_world();
    let manifest = match_manifest();
    reconciled(&world, &manifest).await;

    let server_dir = world.paths.server_dir("default");
    let engine_target = std::fs::read_link(server_dir.join("engine")).unwrap();
    assert_eq!(
        engine_target,
        world.paths.cache_kind_dir(AssetKind::EngineBuild).join("etl-2.82.0")
    );
    assert!(server_dir.join("engine/etlded").is_file());

    let mod_target = std::fs::read_link(server_dir.join("legacy")).unwrap();
    assert_eq!(
        mod_target,
        world.paths.cache_kind_dir(AssetKind::Mod).join("legacy-2.82.0")
    );

    // Exactly the two requested map links plus the published pak
    let state = observe(&server_dir).unwrap();
    let map_dir = world.paths.cache_kind_dir(AssetKind::Map);
    let map_links: Vec<&String> = state
        .pk3_links
        .iter()
        .filter(|(_, target)| target.starts_with(&map_dir))
        .map(|(name, _)| name)
        .collect();
    assert_eq!(map_links, vec!["adlernest.pk3", "caen_4.pk3"]);
    assert!(state.pk3_links.contains_key("pak0.pk3"));
    assert_eq!(state.pk3_links.len(), 3);
}

#[tokio::test]
async fn test_rendered_config_differs_from_template_in_one_line() {
    let world = basic_world();
    let manifest = match_manifest();
    reconciled(&world, &manifest).await;

    let rendered = std::fs::read_to_string(
        world
            .paths
            .server_dir("default")
            .join("configs/test_server.cfg"),
    )
    .unwrap();

    assert_eq!(
        rendered,
        TEMPLATE_TEXT.replace("ET Legacy Host", "testserver etsm")
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_startup_config_activated_and_recorded() {
    let world = basic_world();
    let manifest = match_manifest();
    reconciled(&world, &manifest).await;

    let server_dir = world.paths.server_dir("default");
    let link_target = std::fs::read_link(server_dir.join("etmain/test_server.cfg")).unwrap();
    assert_eq!(link_target, server_dir.join("configs/test_server.cfg"));

    let state = observe(&server_dir).unwrap();
    let record = state.record.unwrap();
    assert_eq!(record.startup_configs, vec!["test_server.cfg"]);
    assert_eq!(record.port, 27960);
    assert_eq!(record.engine.unwrap().version, "2.82.0");
}

#[cfg(unix)]
#[tokio::test]
async fn test_second_reconcile_is_noop() {
    let world = basic_world();
    let manifest = match_manifest();
    let cache = reconciled(&world, &manifest).await;

    let config_path = world
        .paths
        .server_dir("default")
        .join("configs/test_server.cfg");
    let mtime_before = std::fs::metadata(&config_path).unwrap().modified().unwrap();
    let calls_before = world.fetcher.calls();

    let engine = ActivationEngine::new(&world.index, &cache, &world.fetcher, &world.paths)
        .with_lock_timeout(LOCK_TIMEOUT);
    let report = engine.reconcile(&manifest).await.unwrap();

    assert!(report.is_noop(), "unexpected mutations: {report:?}");
    assert_eq!(world.fetcher.calls(), calls_before);
    assert_eq!(
        std::fs::metadata(&config_path).unwrap().modified().unwrap(),
        mtime_before
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_deactivate_then_reactivate_without_redownload() {
    let world = basic_world();
    let manifest = match_manifest();
    let cache = reconciled(&world, &manifest).await;
    let calls_after_setup = world.fetcher.calls();

    let server_dir = world.paths.server_dir("default");
    let engine = ActivationEngine::new(&world.index, &cache, &world.fetcher, &world.paths)
        .with_lock_timeout(LOCK_TIMEOUT);

    assert!(engine.deactivate_config("default", "test_server").unwrap());
    assert!(!server_dir.join("etmain/test_server.cfg").exists());
    // Owned content stays
    assert!(server_dir.join("configs/test_server.cfg").is_file());
    let state = observe(&server_dir).unwrap();
    assert!(state.record.unwrap().startup_configs.is_empty());

    assert!(engine.activate_config("default", "test_server").unwrap());
    assert!(server_dir.join("etmain/test_server.cfg").is_symlink());
    let state = observe(&server_dir).unwrap();
    assert_eq!(state.record.unwrap().startup_configs, vec!["test_server.cfg"]);

    assert_eq!(world.fetcher.calls(), calls_after_setup);
}

#[cfg(unix)]
#[tokio::test]
async fn test_remove_map_keeps_cache_bytes() {
    let world = basic_world();
    let manifest = match_manifest();
    let cache = reconciled(&world, &manifest).await;
    let calls_after_setup = world.fetcher.calls();

    let engine = ActivationEngine::new(&world.index, &cache, &world.fetcher, &world.paths)
        .with_lock_timeout(LOCK_TIMEOUT);

    assert!(engine.remove_map("default", "adlernest").unwrap());
    let server_dir = world.paths.server_dir("default");
    assert!(!server_dir.join("etmain/adlernest.pk3").exists());

    let cached_path = world
        .paths
        .cache_kind_dir(AssetKind::Map)
        .join("adlernest-1.pk3");
    assert!(cached_path.is_file());

    // Re-linking is a pure cache hit
    assert!(engine.add_map("default", "adlernest").await.unwrap());
    assert_eq!(world.fetcher.calls(), calls_after_setup);
}

#[tokio::test]
async fn test_mapvote_regenerated_byte_identical() {
    let world = basic_world();
    let mut manifest = match_manifest();
    manifest.maps = vec!["beach".to_string(), "alleys".to_string()];
    manifest.build_mapvote = true;

    let cache = reconciled(&world, &manifest).await;
    let config_path = world
        .paths
        .server_dir("default")
        .join("configs/mapvotecycle.cfg");
    let first = std::fs::read_to_string(&config_path).unwrap();
    assert_eq!(
        first,
        "set d0 \"set g_gametype 6 ; map beach ; set nextmap vstr d1\"\n\
         set d1 \"set g_gametype 6 ; map alleys ; set nextmap vstr d0\"\n\
         vstr d0\n"
    );

    let engine = ActivationEngine::new(&world.index, &cache, &world.fetcher, &world.paths)
        .with_lock_timeout(LOCK_TIMEOUT);
    let report = engine.reconcile(&manifest).await.unwrap();
    assert!(report.is_noop());
    assert_eq!(std::fs::read_to_string(&config_path).unwrap(), first);

    // In the startup set exactly once
    let state = observe(&world.paths.server_dir("default")).unwrap();
    let startups = state.record.unwrap().startup_configs;
    assert_eq!(
        startups.iter().filter(|n| *n == "mapvotecycle.cfg").count(),
        1
    );
}

#[tokio::test]
async fn test_locked_server_rejects_second_invocation() {
    let world = basic_world();
    let manifest = match_manifest();
    let cache = reconciled(&world, &manifest).await;

    let _held = ServerLock::acquire(&world.paths, "default", LOCK_TIMEOUT).unwrap();

    let engine = ActivationEngine::new(&world.index, &cache, &world.fetcher, &world.paths)
        .with_lock_timeout(Duration::from_millis(150));
    let err = engine.reconcile(&manifest).await.unwrap_err();
    assert!(matches!(err, Error::Locked { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_unknown_map_fails_before_any_mutation() {
    let world = basic_world();
    let mut manifest = match_manifest();
    manifest.maps.push("no_such_map".to_string());

    let cache = ContentCache::new(world.paths.clone());
    let engine = ActivationEngine::new(&world.index, &cache, &world.fetcher, &world.paths)
        .with_lock_timeout(LOCK_TIMEOUT);
    let err = engine.reconcile(&manifest).await.unwrap_err();
    assert!(matches!(err, Error::NotFound { kind: AssetKind::Map, .. }));

    // Resolution failed before the server directory was even created
    assert!(!world.paths.server_dir("default").exists());
}

#[tokio::test]
async fn test_failed_create_leaves_no_server_behind() {
    let world = basic_world();
    let mut manifest = match_manifest();
    manifest.server_name = "fresh".to_string();
    manifest.maps.push("no_such_map".to_string());

    let cache = ContentCache::new(world.paths.clone());
    let engine = ActivationEngine::new(&world.index, &cache, &world.fetcher, &world.paths)
        .with_lock_timeout(LOCK_TIMEOUT);

    let err = engine.create(&manifest, false).await.unwrap_err();
    assert!(matches!(err, Error::NotFound { kind: AssetKind::Map, .. }));
    assert!(!world.paths.server_dir("fresh").exists());

    // A corrected manifest retries without force
    manifest.maps.pop();
    let report = engine.create(&manifest, false).await.unwrap();
    assert!(!report.is_noop());
    assert!(world.paths.server_dir("fresh").join("etmain").is_dir());
}

#[tokio::test]
async fn test_create_refuses_existing_server_without_force() {
    let world = basic_world();
    let manifest = match_manifest();
    let cache = reconciled(&world, &manifest).await;

    let engine = ActivationEngine::new(&world.index, &cache, &world.fetcher, &world.paths)
        .with_lock_timeout(LOCK_TIMEOUT);
    let err = engine.create(&manifest, false).await.unwrap_err();
    assert!(matches!(err, Error::ServerExists { .. }));

    let report = engine.create(&manifest, true).await.unwrap();
    assert!(report.is_noop());
}

#[tokio::test]
async fn test_launch_args_in_startup_order() {
    let world = basic_world();
    let manifest = match_manifest();
    let cache = reconciled(&world, &manifest).await;

    let engine = ActivationEngine::new(&world.index, &cache, &world.fetcher, &world.paths)
        .with_lock_timeout(LOCK_TIMEOUT);
    let args = engine.launch_args("default").unwrap();

    let server_dir = world.paths.server_dir("default");
    assert_eq!(args[0], server_dir.join("engine/etlded").display().to_string());
    assert!(args.contains(&"+set net_ip 0.0.0.0".to_string()));
    assert!(args.contains(&"+set net_port 27960".to_string()));
    assert!(args.contains(&"+set fs_game legacy".to_string()));
    assert_eq!(args.last().unwrap(), "+exec test_server.cfg");
}

#[cfg(unix)]
#[tokio::test]
async fn test_mod_switch_removes_stale_link() {
    let world = basic_world();
    let manifest = match_manifest();
    let cache = reconciled(&world, &manifest).await;

    // Simulate a leftover link from a previously selected mod
    let server_dir = world.paths.server_dir("default");
    let stale_target = world.paths.cache_kind_dir(AssetKind::Mod).join("etpub-0.9.1");
    std::os::unix::fs::symlink(&stale_target, server_dir.join("etpub")).unwrap();

    let engine = ActivationEngine::new(&world.index, &cache, &world.fetcher, &world.paths)
        .with_lock_timeout(LOCK_TIMEOUT);
    let report = engine.reconcile(&manifest).await.unwrap();

    assert_eq!(report.links_removed, 1);
    assert!(!server_dir.join("etpub").exists());
    assert!(server_dir.join("legacy").is_symlink());
}
