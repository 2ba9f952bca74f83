//! Integration tests for CacheClient against a mocked cache service.

use std::path::Path;

use serde_json::json;
use stowbox::{
    CacheClient, CacheError, MaskRegistry, ReservationId, ServiceConfig, UploadOptions,
};
use stowbox_http::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use wiremock::matchers::{body_json, body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const API: &str = "/_apis/artifactcache";
const TOKEN: &str = "runtime-token";

async fn setup() -> (MockServer, CacheClient, MaskRegistry) {
    let server = MockServer::start().await;
    let masks = MaskRegistry::new();
    let client = CacheClient::builder(ServiceConfig::new(server.uri(), TOKEN))
        .masker(masks.clone())
        .build()
        .unwrap();
    (server, client, masks)
}

fn write_fixture(dir: &Path, len: usize) -> (std::path::PathBuf, Vec<u8>) {
    let contents: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    let file = dir.join("archive.bin");
    std::fs::write(&file, &contents).unwrap();
    (file, contents)
}

fn content_range(request: &Request) -> (u64, u64) {
    let value = request
        .headers
        .get("content-range")
        .unwrap()
        .to_str()
        .unwrap();
    let range = value
        .strip_prefix("bytes ")
        .and_then(|rest| rest.strip_suffix("/*"))
        .unwrap();
    let (start, end) = range.split_once('-').unwrap();
    (start.parse().unwrap(), end.parse().unwrap())
}

#[tokio::test]
async fn test_lookup_miss_returns_none() {
    let (server, client, _) = setup().await;

    Mock::given(method("GET"))
        .and(path(format!("{API}/cache")))
        .and(query_param("keys", "linux-deps-abc,linux-deps-"))
        .and(query_param("version", "v1"))
        .and(header("authorization", "Bearer runtime-token"))
        .and(header("accept", "application/json;api-version=6.0-preview.1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(2)
        .mount(&server)
        .await;

    let keys = ["linux-deps-abc", "linux-deps-"];
    assert!(client.get_cache_entry(&keys, "v1").await.unwrap().is_none());
    assert!(!client.has_cache(&keys, "v1").await.unwrap());
}

#[tokio::test]
async fn test_lookup_query_escapes_spaces_as_percent_twenty() {
    let (server, client, _) = setup().await;

    Mock::given(method("GET"))
        .and(path(format!("{API}/cache")))
        .and(query_param("keys", "npm cache,npm (old)"))
        .and(query_param("version", "v 2"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let found = client
        .get_cache_entry(&["npm cache", "npm (old)"], "v 2")
        .await
        .unwrap();
    assert!(found.is_none());

    let requests = server.received_requests().await.unwrap();
    assert_eq!(
        requests[0].url.query(),
        Some("keys=npm%20cache%2Cnpm%20(old)&version=v%202")
    );
}

#[tokio::test]
async fn test_lookup_hit_masks_archive_location() {
    let (server, client, masks) = setup().await;
    let location = format!("{}/blob/archive?sig=abc", server.uri());

    Mock::given(method("GET"))
        .and(path(format!("{API}/cache")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "cacheKey": "linux-deps-abc",
            "scope": "refs/heads/main",
            "creationTime": "2024-03-01T12:00:00Z",
            "archiveLocation": location,
            "cacheVersion": "v1"
        })))
        .mount(&server)
        .await;

    let entry = client
        .get_cache_entry(&["linux-deps-abc"], "v1")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(entry.cache_key, "linux-deps-abc");
    assert_eq!(entry.archive_location.as_str(), location);
    assert!(masks.contains(&location));
    assert!(client.has_cache(&["linux-deps-abc"], "v1").await.unwrap());
}

#[tokio::test]
async fn test_lookup_without_archive_location_is_not_found() {
    let (server, client, masks) = setup().await;

    Mock::given(method("GET"))
        .and(path(format!("{API}/cache")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "cacheKey": "k",
            "archiveLocation": ""
        })))
        .mount(&server)
        .await;

    let error = client.get_cache_entry(&["k"], "v1").await.unwrap_err();
    assert!(matches!(error, CacheError::CacheNotFound));
    assert!(masks.secrets().is_empty());
}

#[tokio::test]
async fn test_lookup_server_error_carries_status_and_body() {
    let (server, client, _) = setup().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    match client.get_cache_entry(&["k"], "v1").await.unwrap_err() {
        CacheError::Service { status, body } => {
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(body, "boom");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_invalid_keys_never_reach_the_service() {
    let (server, client, _) = setup().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    assert!(matches!(
        client.get_cache_entry(&["a,b"], "v1").await,
        Err(CacheError::InvalidKey { .. })
    ));
    let long_key = "k".repeat(513);
    assert!(matches!(
        client.reserve_cache(&long_key, "v1").await,
        Err(CacheError::InvalidKey { .. })
    ));
}

#[tokio::test]
async fn test_reserve_returns_cache_id() {
    let (server, client, _) = setup().await;

    Mock::given(method("POST"))
        .and(path(format!("{API}/caches")))
        .and(header("authorization", "Bearer runtime-token"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({"key": "linux-deps", "version": "v1"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"cacheId": 42})))
        .expect(1)
        .mount(&server)
        .await;

    let reservation = client.reserve_cache("linux-deps", "v1").await.unwrap();
    assert_eq!(reservation, Some(ReservationId::new(42)));
}

#[tokio::test]
async fn test_reserve_without_cache_id_is_none() {
    let (server, client, _) = setup().await;

    Mock::given(method("POST"))
        .and(path(format!("{API}/caches")))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({})))
        .mount(&server)
        .await;

    assert_eq!(client.reserve_cache("k", "v1").await.unwrap(), None);
}

#[tokio::test]
async fn test_concurrent_reservations_yield_one_id() {
    let (server, client, _) = setup().await;

    Mock::given(method("POST"))
        .and(path(format!("{API}/caches")))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"cacheId": 7})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{API}/caches")))
        .respond_with(ResponseTemplate::new(409).set_body_string("already reserved"))
        .mount(&server)
        .await;

    let (first, second) = tokio::join!(
        client.reserve_cache("k", "v1"),
        client.reserve_cache("k", "v1")
    );
    let results = [first.unwrap(), second.unwrap()];

    assert_eq!(results.iter().filter(|id| id.is_some()).count(), 1);
    assert!(results.contains(&Some(ReservationId::new(7))));
    assert!(results.contains(&None));
}

#[tokio::test]
async fn test_reserve_server_error_is_service_error() {
    let (server, client, _) = setup().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .mount(&server)
        .await;

    assert!(matches!(
        client.reserve_cache("k", "v1").await,
        Err(CacheError::Service { status, .. }) if status == StatusCode::BAD_REQUEST
    ));
}

#[tokio::test]
async fn test_save_text_uploads_single_chunk_and_commits() {
    let (server, client, _) = setup().await;

    Mock::given(method("PATCH"))
        .and(path(format!("{API}/caches/42")))
        .and(header("authorization", "Bearer runtime-token"))
        .and(header("content-type", "application/octet-stream"))
        .and(header("content-range", "bytes 0-4/*"))
        .and(body_string("hello"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{API}/caches/42")))
        .and(body_json(json!({"size": 5})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    client
        .save_text(ReservationId::new(42), "hello")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_upload_chunk_reads_from_factory() {
    let (server, client, _) = setup().await;

    Mock::given(method("PATCH"))
        .and(path(format!("{API}/caches/3")))
        .and(header("content-range", "bytes 10-14/*"))
        .and(body_string("world"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    client
        .upload_chunk(
            ReservationId::new(3),
            || async { Ok::<_, std::io::Error>(std::io::Cursor::new(b"world, and more".to_vec())) },
            stowbox::ByteRange::new(10, 15),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_upload_chunk_error_includes_body() {
    let (server, client, _) = setup().await;

    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(413).set_body_string("chunk too large"))
        .mount(&server)
        .await;

    let error = client
        .upload_text(ReservationId::new(1), "payload")
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        CacheError::Service { ref body, .. } if body == "chunk too large"
    ));
}

#[tokio::test]
async fn test_upload_file_tiles_whole_file() {
    let (server, client, _) = setup().await;
    let dir = tempfile::tempdir().unwrap();
    let (file, contents) = write_fixture(dir.path(), 50);

    Mock::given(method("PATCH"))
        .and(path(format!("{API}/caches/9")))
        .respond_with(ResponseTemplate::new(204))
        .expect(7)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{API}/caches/9")))
        .and(body_json(json!({"size": 50})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let options = UploadOptions {
        concurrency: 2,
        max_chunk_size: 8,
    };
    let size = client
        .save_file(ReservationId::new(9), &file, &options)
        .await
        .unwrap();
    assert_eq!(size, 50);

    let mut chunks: Vec<(u64, u64, Vec<u8>)> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|request| request.method.as_str() == "PATCH")
        .map(|request| {
            let (start, end) = content_range(request);
            (start, end, request.body.clone())
        })
        .collect();
    chunks.sort();

    let mut offset = 0;
    let mut reassembled = Vec::new();
    for (start, end, body) in chunks {
        assert_eq!(start, offset);
        assert!(end - start < 8);
        assert_eq!(body.len() as u64, end - start + 1);
        reassembled.extend(body);
        offset = end + 1;
    }
    assert_eq!(offset, 50);
    assert_eq!(reassembled, contents);
}

#[tokio::test]
async fn test_empty_file_commits_zero_without_chunks() {
    let (server, client, _) = setup().await;
    let dir = tempfile::tempdir().unwrap();
    let (file, _) = write_fixture(dir.path(), 0);

    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{API}/caches/5")))
        .and(body_json(json!({"size": 0})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let size = client
        .save_file(ReservationId::new(5), &file, &UploadOptions::default())
        .await
        .unwrap();
    assert_eq!(size, 0);
}

#[tokio::test]
async fn test_failed_chunk_stops_new_chunks_and_skips_commit() {
    let (server, client, _) = setup().await;
    let dir = tempfile::tempdir().unwrap();
    let (file, _) = write_fixture(dir.path(), 40);

    Mock::given(method("PATCH"))
        .and(header("content-range", "bytes 16-23/*"))
        .respond_with(ResponseTemplate::new(500).set_body_string("disk full"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(204))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;

    let options = UploadOptions {
        concurrency: 1,
        max_chunk_size: 8,
    };
    let error = client
        .save_file(ReservationId::new(1), &file, &options)
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        CacheError::Service { status, ref body } if status == StatusCode::INTERNAL_SERVER_ERROR && body == "disk full"
    ));
}

#[tokio::test]
async fn test_failed_chunk_waits_for_in_flight_chunks() {
    let (server, client, _) = setup().await;
    let dir = tempfile::tempdir().unwrap();
    let (file, _) = write_fixture(dir.path(), 32);

    Mock::given(method("PATCH"))
        .and(header("content-range", "bytes 0-7/*"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .respond_with(
            ResponseTemplate::new(204).set_delay(std::time::Duration::from_millis(200)),
        )
        .mount(&server)
        .await;

    let options = UploadOptions {
        concurrency: 4,
        max_chunk_size: 8,
    };
    let started = std::time::Instant::now();
    let error = client
        .upload_file(ReservationId::new(1), &file, &options)
        .await
        .unwrap_err();
    assert!(matches!(error, CacheError::Service { .. }));
    assert!(started.elapsed() >= std::time::Duration::from_millis(200));

    let patches = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|request| request.method.as_str() == "PATCH")
        .count();
    assert_eq!(patches, 4);
}

#[tokio::test]
async fn test_download_streams_to_nested_destination() {
    let (server, client, _) = setup().await;
    let archive: Vec<u8> = (0..100_000u32).map(|i| (i % 253) as u8).collect();

    Mock::given(method("GET"))
        .and(path("/blob/archive"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(archive.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("restore/nested/archive.tzst");
    let url = stowbox_http::Url::parse(&format!("{}/blob/archive?sig=x", server.uri())).unwrap();

    let size = client.download_file(&url, &destination).await.unwrap();

    assert_eq!(size, archive.len() as u64);
    assert_eq!(std::fs::read(&destination).unwrap(), archive);

    let requests = server.received_requests().await.unwrap();
    assert!(requests[0].headers.get("authorization").is_none());
}

#[tokio::test]
async fn test_download_error_status_creates_no_file() {
    let (server, client, _) = setup().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403).set_body_string("signature expired"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("archive.tzst");
    let url = stowbox_http::Url::parse(&format!("{}/blob/archive", server.uri())).unwrap();

    let error = client.download_file(&url, &destination).await.unwrap_err();

    assert!(matches!(error, CacheError::Service { status, .. } if status == StatusCode::FORBIDDEN));
    assert!(!destination.exists());
}

/// Serves one response that announces `announced` bytes but sends only
/// `sent` of them before closing the connection.
async fn truncating_server(announced: usize, sent: usize) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|window| window == b"\r\n\r\n") {
            let read = socket.read(&mut buf).await.unwrap();
            if read == 0 {
                return;
            }
            request.extend_from_slice(&buf[..read]);
        }

        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {announced}\r\nConnection: close\r\n\r\n"
        );
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(&vec![7u8; sent]).await.unwrap();
        socket.shutdown().await.unwrap();
    });

    format!("http://{address}/blob/archive")
}

#[tokio::test]
async fn test_truncated_download_is_incomplete() {
    let (_server, client, _) = setup().await;
    let url = stowbox_http::Url::parse(&truncating_server(100, 50).await).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("archive.tzst");

    let error = client.download_file(&url, &destination).await.unwrap_err();

    assert!(
        matches!(
            error,
            CacheError::IncompleteDownload {
                expected: 100,
                actual: 50
            }
        ),
        "unexpected error: {error:?}"
    );
    assert!(!destination.exists());
}

#[tokio::test]
async fn test_save_skips_upload_on_conflict() {
    let (server, client, _) = setup().await;
    let dir = tempfile::tempdir().unwrap();
    let (file, _) = write_fixture(dir.path(), 10);

    Mock::given(method("POST"))
        .and(path(format!("{API}/caches")))
        .respond_with(ResponseTemplate::new(409))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;

    let saved = client
        .save("k", "v1", &file, &UploadOptions::default())
        .await
        .unwrap();
    assert!(saved.is_none());
}

#[tokio::test]
async fn test_restore_miss_leaves_destination_untouched() {
    let (server, client, _) = setup().await;

    Mock::given(method("GET"))
        .and(path(format!("{API}/cache")))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("archive.tzst");

    let restored = client.restore(&["k"], "v1", &destination).await.unwrap();
    assert!(restored.is_none());
    assert!(!destination.exists());
}
