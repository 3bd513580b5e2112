mod common;

use common::{MANIFEST_PATH, list_dir, serve_manifest};
use seed_core::Metainfo;
use seed_engine::{Phase, Session, SessionConfig};
use seeder::digest::digest;
use seeder::{EngineClient, Fetcher, RefreshOutcome, SyncController};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use wiremock::MockServer;

fn torrent(name: &str, fill: u8) -> Vec<u8> {
    seed_core::create_single_file("", name, 16 * 1024, &vec![fill; 50_000])
}

fn job_dir(downloads: &Path, raw: &[u8]) -> std::path::PathBuf {
    let metainfo = Metainfo::from_bytes(raw).unwrap();
    downloads.join(metainfo.info_hash.to_hex())
}

#[tokio::test]
async fn swaps_real_jobs_when_manifest_changes() {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();
    let data = dir.path().join("data");
    let downloads = dir.path().join("downloads");
    let first = torrent("build-1.img", 1);
    let second = torrent("build-2.img", 2);

    let session = Session::open(SessionConfig {
        download_dir: downloads.clone(),
        listen_port: 0,
        announce: false,
        ..SessionConfig::default()
    })
    .await
    .unwrap();
    let engine = Arc::new(EngineClient::new(session, Duration::from_secs(5)));
    let controller = SyncController::new(
        format!("{}{}", server.uri(), MANIFEST_PATH),
        &data,
        Fetcher::new(Duration::from_secs(5)).unwrap(),
        engine.clone(),
    );

    serve_manifest(&server, &first).await;
    controller.initialize().await.unwrap();
    controller.bootstrap().await.unwrap();
    let first_job = controller.state().await.active_job.unwrap();
    assert!(job_dir(&downloads, &first).is_dir());
    tokio::time::timeout(Duration::from_secs(5), async {
        while engine.session().stats(&first_job).await.unwrap().phase != Phase::Downloading {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job never started downloading");
    assert_eq!(
        controller.report_status().await.unwrap(),
        "Status: Downloading\tPeers: (In 0 | Out 0 | Total 0)\tETA: unknown"
    );

    assert_eq!(controller.refresh().await.unwrap(), RefreshOutcome::Unchanged);

    serve_manifest(&server, &second).await;
    let outcome = controller.refresh().await.unwrap();
    let state = controller.state().await;
    let second_job = state.active_job.clone().unwrap();
    assert!(matches!(outcome, RefreshOutcome::Swapped { .. }));
    assert_ne!(first_job, second_job);
    assert_eq!(list_dir(&data), vec![digest(&second)]);

    let jobs = engine.session().jobs().await;
    assert_eq!(jobs, vec![second_job]);
    assert!(!job_dir(&downloads, &first).exists());
    assert!(job_dir(&downloads, &second).is_dir());

    controller.shutdown().await;
    assert_eq!(
        controller.report_status().await.unwrap(),
        "Stopped (new torrent will start soon)"
    );
}
