//! Transfer pool behavior against a local canned HTTP responder: bounded
//! concurrency, one terminal status per queued item, and failure statuses
//! for error responses.

use catalog_harvester::transfer::{TransferEngine, TransferItem};
use catalog_harvester::DownloadStatus;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const BODY: &[u8] = b"granule-bytes";

/// Minimal HTTP/1.1 responder. Requests whose path contains "missing" get a
/// 404; everything else gets a fixed body after a short delay, so the
/// in-flight counter actually observes overlap.
async fn canned_server(in_flight: Arc<AtomicUsize>, peak: Arc<AtomicUsize>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let mut request = Vec::new();
                loop {
                    let Ok(n) = socket.read(&mut buf).await else {
                        return;
                    };
                    if n == 0 {
                        return;
                    }
                    request.extend_from_slice(&buf[..n]);
                    if request.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }

                let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(current, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);

                let request_line = String::from_utf8_lossy(&request);
                let response = if request_line.contains("missing") {
                    "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                        .to_string()
                } else {
                    format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        BODY.len(),
                        String::from_utf8_lossy(BODY)
                    )
                };
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    format!("http://{addr}")
}

fn items(base: &str, dir: &std::path::Path, names: &[&str]) -> Vec<TransferItem> {
    names
        .iter()
        .map(|name| TransferItem {
            granule_id: name.to_string(),
            collection_id: "C1".to_string(),
            url: format!("{base}/{name}"),
            local_path: dir.join(format!("{name}.hdf")),
        })
        .collect()
}

#[tokio::test]
async fn pool_never_exceeds_its_concurrency_bound() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let base = canned_server(in_flight, peak.clone()).await;
    let dir = tempfile::TempDir::new().unwrap();

    let engine = TransferEngine::new(2).unwrap();
    let queue = items(&base, dir.path(), &["g1", "g2", "g3", "g4", "g5", "g6"]);
    let statuses = engine.run(queue, HashMap::new()).await;

    assert_eq!(statuses.len(), 6);
    for status in statuses.values() {
        assert_eq!(*status, DownloadStatus::Success);
    }
    assert!(peak.load(Ordering::SeqCst) <= 2);

    for name in ["g1", "g2", "g3", "g4", "g5", "g6"] {
        let contents = std::fs::read(dir.path().join(format!("{name}.hdf"))).unwrap();
        assert_eq!(contents, BODY);
    }
}

#[tokio::test]
async fn every_queued_item_gets_exactly_one_terminal_status() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let base = canned_server(in_flight, peak).await;
    let dir = tempfile::TempDir::new().unwrap();

    let engine = TransferEngine::new(4).unwrap();
    let queue = items(&base, dir.path(), &["g1", "missing-g2", "g3"]);
    let statuses = engine.run(queue, HashMap::new()).await;

    assert_eq!(statuses.len(), 3);
    assert_eq!(statuses["g1"], DownloadStatus::Success);
    assert_eq!(statuses["missing-g2"], DownloadStatus::Failed);
    assert_eq!(statuses["g3"], DownloadStatus::Success);
}

#[tokio::test]
async fn planned_statuses_pass_through_the_run() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let base = canned_server(in_flight, peak).await;
    let dir = tempfile::TempDir::new().unwrap();

    let engine = TransferEngine::new(2).unwrap();
    let queue = items(&base, dir.path(), &["g1"]);
    let planned = HashMap::from([("g0".to_string(), DownloadStatus::DirectoryFailed)]);
    let statuses = engine.run(queue, planned).await;

    assert_eq!(statuses.len(), 2);
    assert_eq!(statuses["g0"], DownloadStatus::DirectoryFailed);
    assert_eq!(statuses["g1"], DownloadStatus::Success);
}

#[tokio::test]
async fn unreachable_host_yields_failed_status() {
    let dir = tempfile::TempDir::new().unwrap();
    let engine = TransferEngine::new(2).unwrap();
    // A port nothing listens on.
    let queue = vec![TransferItem {
        granule_id: "g1".to_string(),
        collection_id: "C1".to_string(),
        url: "http://127.0.0.1:1/g1".to_string(),
        local_path: dir.path().join("g1.hdf"),
    }];
    let statuses = engine.run(queue, HashMap::new()).await;
    assert_eq!(statuses["g1"], DownloadStatus::Failed);
}
