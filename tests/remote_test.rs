mod common;

use std::io::Write;

use tempfile::TempDir;

use common::{SchemaFixture, TestServer, canonical, test_config, write};
use taxonomy_reader::config::Config;
use taxonomy_reader::engine::{TaxonomyReader, UnitStatus};
use taxonomy_reader::error::ErrorCategory;

fn serve_taxonomy(server: &TestServer) {
    server.serve(
        "/taxo/entry.xsd",
        &SchemaFixture::new("urn:entry").import("dep.xsd").build(),
    );
    server.serve(
        "/taxo/dep.xsd",
        &SchemaFixture::new("urn:dep").import("/shared/base.xsd").build(),
    );
    server.serve("/shared/base.xsd", &SchemaFixture::new("urn:base").build());
}

async fn read(config: Config, entry: &str) -> taxonomy_reader::engine::TaxonomyReport {
    TaxonomyReader::new(config).read(entry).await.unwrap()
}

#[tokio::test]
async fn test_remote_documents_are_downloaded_once() {
    let temp_dir = TempDir::new().unwrap();
    let server = TestServer::start();
    serve_taxonomy(&server);

    let report = read(test_config(&temp_dir), &server.url("/taxo/entry.xsd")).await;

    assert!(report.is_clean(), "{:?}", report.errors);
    assert_eq!(report.units.len(), 3);
    assert!(report.unit(&server.url("/shared/base.xsd")).is_some());
    assert_eq!(server.hits("/taxo/entry.xsd"), 1);
    assert_eq!(server.hits("/taxo/dep.xsd"), 1);
    assert_eq!(server.hits("/shared/base.xsd"), 1);
    assert_eq!(report.resolver_stats.remote_downloads, 3);
    assert_eq!(report.resolver_stats.cache_hits, 0);
}

#[tokio::test]
async fn test_second_run_is_served_from_the_cache() {
    let temp_dir = TempDir::new().unwrap();
    let server = TestServer::start();
    serve_taxonomy(&server);
    let entry = server.url("/taxo/entry.xsd");

    let first = read(test_config(&temp_dir), &entry).await;
    assert!(first.is_clean(), "{:?}", first.errors);

    let cached = temp_dir
        .path()
        .join("cache")
        .join(format!("127.0.0.1_{}", server.port()))
        .join("taxo/entry.xsd");
    assert!(cached.is_file(), "missing {}", cached.display());

    let second = read(test_config(&temp_dir), &entry).await;
    assert!(second.is_clean(), "{:?}", second.errors);
    assert_eq!(second.units.len(), 3);
    assert_eq!(second.resolver_stats.cache_hits, 3);
    assert_eq!(second.resolver_stats.remote_downloads, 0);
    assert_eq!(server.total_hits(), 3);
}

#[tokio::test]
async fn test_empty_download_fails_without_caching() {
    let temp_dir = TempDir::new().unwrap();
    let server = TestServer::start();
    server.serve(
        "/taxo/entry.xsd",
        &SchemaFixture::new("urn:entry").import("empty.xsd").build(),
    );
    server.serve_empty("/taxo/empty.xsd");

    let report = read(test_config(&temp_dir), &server.url("/taxo/entry.xsd")).await;

    let empty = server.url("/taxo/empty.xsd");
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].category(), ErrorCategory::Fetch);
    assert_eq!(report.errors[0].document.as_deref(), Some(empty.as_str()));
    assert_eq!(report.unit(&empty).unwrap().status, UnitStatus::Error);

    let cache = temp_dir
        .path()
        .join("cache")
        .join(format!("127.0.0.1_{}", server.port()))
        .join("taxo");
    assert!(cache.join("entry.xsd").is_file());
    assert!(!cache.join("empty.xsd").exists());
}

#[tokio::test]
async fn test_missing_remote_document_is_a_fetch_error() {
    let temp_dir = TempDir::new().unwrap();
    let server = TestServer::start();
    server.serve(
        "/taxo/entry.xsd",
        &SchemaFixture::new("urn:entry").import("gone.xsd").build(),
    );

    let mut config = test_config(&temp_dir);
    config.network.retry_attempts = 2;
    config.network.retry_delay_ms = 10;
    let report = read(config, &server.url("/taxo/entry.xsd")).await;

    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].category(), ErrorCategory::Fetch);
    // 4xx is never retried
    assert_eq!(server.hits("/taxo/gone.xsd"), 1);
    assert_eq!(
        report.unit(&server.url("/taxo/entry.xsd")).unwrap().status,
        UnitStatus::Success
    );
}

#[tokio::test]
async fn test_disabled_cache_always_downloads() {
    let temp_dir = TempDir::new().unwrap();
    let server = TestServer::start();
    serve_taxonomy(&server);
    let entry = server.url("/taxo/entry.xsd");

    let mut config = test_config(&temp_dir);
    config.cache.enabled = false;

    let first = read(config.clone(), &entry).await;
    let second = read(config, &entry).await;

    assert!(first.is_clean() && second.is_clean());
    assert_eq!(second.resolver_stats.remote_downloads, 3);
    assert_eq!(server.hits("/taxo/entry.xsd"), 2);
    assert!(!temp_dir.path().join("cache").exists());
}

#[tokio::test]
async fn test_local_mirror_serves_remote_references() {
    let temp_dir = TempDir::new().unwrap();
    let mirror = temp_dir.path().join("mirror");
    let entry = write(
        &mirror,
        "example.com/entry/entry.xsd",
        &SchemaFixture::new("urn:entry")
            .import("http://www.example.invalid/2003/base.xsd")
            .build(),
    );
    write(
        &mirror,
        "www.example.invalid/2003/base.xsd",
        &SchemaFixture::new("urn:base").import("types.xsd").build(),
    );
    write(
        &mirror,
        "www.example.invalid/2003/types.xsd",
        &SchemaFixture::new("urn:types").build(),
    );

    let report = read(test_config(&temp_dir), entry.to_str().unwrap()).await;

    assert!(report.is_clean(), "{:?}", report.errors);
    assert_eq!(report.units.len(), 3);
    assert!(report.unit("http://www.example.invalid/2003/types.xsd").is_some());
    assert_eq!(report.resolver_stats.mirror_hits, 2);
    assert_eq!(report.resolver_stats.remote_downloads, 0);
    assert_eq!(report.resolver_stats.local_reads, 1);
    assert!(report.unit(&canonical(&entry)).is_some());
}

#[tokio::test]
async fn test_remote_archive_is_downloaded_and_removed() {
    let temp_dir = TempDir::new().unwrap();
    let server = TestServer::start();

    let mut bytes = Vec::new();
    {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(&mut bytes));
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        writer.start_file("pkg/a.xsd", options).unwrap();
        writer
            .write_all(SchemaFixture::new("urn:a").import("b.xsd").build().as_bytes())
            .unwrap();
        writer.start_file("pkg/b.xsd", options).unwrap();
        writer
            .write_all(SchemaFixture::new("urn:b").build().as_bytes())
            .unwrap();
        writer.finish().unwrap();
    }
    server.serve_bytes("/downloads/package.zip", bytes);

    let config = test_config(&temp_dir);
    let temp_archives = config.temp_dir();
    let report = read(config, &server.url("/downloads/package.zip")).await;

    assert!(report.is_clean(), "{:?}", report.errors);
    assert_eq!(report.units.len(), 2);
    assert!(report.units.iter().all(|u| u.path.ends_with("pkg/a.xsd") || u.path.ends_with("pkg/b.xsd")));
    assert_eq!(report.resolver_stats.archive_reads, 2);
    assert_eq!(server.hits("/downloads/package.zip"), 1);

    let leftovers = std::fs::read_dir(&temp_archives)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);
}

/// Accept connections and never answer them
fn start_silent_server() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    std::thread::spawn(move || {
        let mut held = Vec::new();
        for stream in listener.incoming().flatten() {
            held.push(stream);
        }
    });
    port
}

#[tokio::test]
async fn test_hung_download_times_out() {
    let temp_dir = TempDir::new().unwrap();
    let port = start_silent_server();
    let hung = format!("http://127.0.0.1:{}/hang/x.xsd", port);
    let entry = write(
        temp_dir.path(),
        "local/entry.xsd",
        &SchemaFixture::new("urn:entry").import(&hung).import("b.xsd").build(),
    );
    let sibling = write(temp_dir.path(), "local/b.xsd", &SchemaFixture::new("urn:b").build());

    let mut config = test_config(&temp_dir);
    config.network.timeout_seconds = 1;
    let report = tokio::time::timeout(
        std::time::Duration::from_secs(20),
        read(config, entry.to_str().unwrap()),
    )
    .await
    .expect("read did not finish");

    assert_eq!(report.errors.len(), 1, "{:?}", report.errors);
    assert!(matches!(
        report.errors[0].error,
        taxonomy_reader::error::TaxonomyError::Timeout { .. }
    ));
    assert_eq!(report.errors[0].category(), ErrorCategory::Fetch);
    assert_eq!(report.unit(&hung).unwrap().status, UnitStatus::Error);
    assert_eq!(report.unit(&canonical(&sibling)).unwrap().status, UnitStatus::Success);
    assert_eq!(report.unit(&canonical(&entry)).unwrap().status, UnitStatus::Success);
}
