//! Shared test harness: in-memory fetchers and a small published world

use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

use etsm_core::catalog::{AssetKind, CatalogEntry, CatalogIndex};
use etsm_core::digest;
use etsm_core::fetch::{FetchFailure, Fetcher};
use etsm_core::paths::EtsmPaths;

/// In-memory fetcher; unknown URLs fail terminally like a 404
pub struct MockFetcher {
    responses: HashMap<String, Vec<u8>>,
    calls: AtomicUsize,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self {
            responses: HashMap::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn insert(&mut self, url: impl Into<String>, bytes: Vec<u8>) {
        self.responses.insert(url.into(), bytes);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .get(url)
            .cloned()
            .ok_or_else(|| FetchFailure::Terminal {
                url: url.to_string(),
                reason: "HTTP 404 Not Found".to_string(),
            })
    }
}

/// Fails the first N fetches transiently, then serves the payload
pub struct FlakyFetcher {
    payload: Vec<u8>,
    failures_remaining: AtomicUsize,
    calls: AtomicUsize,
}

impl FlakyFetcher {
    pub fn new(payload: Vec<u8>, failures: usize) -> Self {
        Self {
            payload,
            failures_remaining: AtomicUsize::new(failures),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for FlakyFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(FetchFailure::Transient {
                url: url.to_string(),
                reason: "HTTP 503 Service Unavailable".to_string(),
            });
        }
        Ok(self.payload.clone())
    }
}

/// Catalog entry whose checksum matches `bytes`
pub fn published(kind: AssetKind, name: &str, version: &str, bytes: &[u8]) -> CatalogEntry {
    CatalogEntry {
        kind,
        name: name.to_string(),
        version: version.to_string(),
        checksum: digest::checksum(bytes),
        url: format!("http://assets.example.net/{kind}/{name}-{version}"),
    }
}

/// Index built from concrete entries (already newest-first per name)
pub fn index_of(entries: Vec<CatalogEntry>) -> CatalogIndex {
    let mut index = CatalogIndex::empty();
    for entry in entries {
        index
            .entries
            .entry(entry.kind)
            .or_default()
            .entry(entry.name.clone())
            .or_default()
            .push(entry);
    }
    index
}

/// A gzipped tar holding one file under a single top-level directory
pub fn tar_gz(dir_name: &str, file_name: &str, content: &[u8]) -> Vec<u8> {
    let encoder =
        flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);

    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o755);
    header.set_cksum();
    builder
        .append_data(&mut header, format!("{dir_name}/{file_name}"), content)
        .unwrap();

    let encoder = builder.into_inner().unwrap();
    encoder.finish().unwrap()
}

/// A minimal pk3 (zip) with the given bsp entries
pub fn pk3_with_bsps(bsps: &[&str]) -> Vec<u8> {
    let mut buffer = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut buffer);
        let options = zip::write::SimpleFileOptions::default();
        for bsp in bsps {
            writer.start_file(format!("maps/{bsp}.bsp"), options).unwrap();
            writer.write_all(b"IBSP").unwrap();
        }
        writer.finish().unwrap();
    }
    buffer.into_inner()
}

pub const TEMPLATE_TEXT: &str =
    "// etl_server template\nset sv_hostname \"ET Legacy Host\"\nset g_motd \"welcome\"\n";

/// A scratch root plus a published world the tests share: one engine
/// build, one mod, one pak, four maps and one config template
pub struct TestWorld {
    pub root: TempDir,
    pub paths: EtsmPaths,
    pub index: CatalogIndex,
    pub fetcher: MockFetcher,
}

pub fn basic_world() -> TestWorld {
    let root = TempDir::new().unwrap();
    let paths = EtsmPaths::at_root(root.path());

    let engine_bytes = tar_gz("etlegacy-v2.82.0", "etlded", b"\x7fELF engine");
    let mod_bytes = tar_gz("legacy-2.82.0", "legacy_mod.pk3", b"mod payload");
    let pak_bytes = pk3_with_bsps(&["oasis"]);

    let mut entries = vec![
        published(AssetKind::EngineBuild, "etl", "2.82.0", &engine_bytes),
        published(AssetKind::Mod, "legacy", "2.82.0", &mod_bytes),
        published(AssetKind::Pak, "pak0", "1.0.0", &pak_bytes),
        published(
            AssetKind::TemplateConfig,
            "etl_server",
            "1.0.0",
            TEMPLATE_TEXT.as_bytes(),
        ),
    ];

    let mut fetcher = MockFetcher::new();
    fetcher.insert(entries[0].url.clone(), engine_bytes);
    fetcher.insert(entries[1].url.clone(), mod_bytes);
    fetcher.insert(entries[2].url.clone(), pak_bytes);
    fetcher.insert(entries[3].url.clone(), TEMPLATE_TEXT.as_bytes().to_vec());

    for map in ["adlernest", "caen_4", "beach", "alleys"] {
        let bytes = pk3_with_bsps(&[map]);
        let entry = published(AssetKind::Map, map, "1", &bytes);
        fetcher.insert(entry.url.clone(), bytes);
        entries.push(entry);
    }

    TestWorld {
        root,
        paths,
        index: index_of(entries),
        fetcher,
    }
}
