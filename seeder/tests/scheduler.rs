mod common;

use common::{FakeEngine, controller, list_dir, serve_manifest};
use seeder::Scheduler;
use seeder::digest::digest;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;
use wiremock::MockServer;

#[tokio::test]
async fn scheduler_picks_up_new_manifest_and_stops_on_cancel() {
    let server = MockServer::start().await;
    serve_manifest(&server, b"first manifest").await;
    let dir = tempdir().unwrap();
    let engine = FakeEngine::new();
    let controller = Arc::new(controller(&server, dir.path(), engine.clone()));
    controller.bootstrap().await.unwrap();

    let shutdown = CancellationToken::new();
    let scheduler = Scheduler::new(
        controller.clone(),
        Duration::from_millis(50),
        Duration::from_millis(20),
    );
    let run = tokio::spawn(scheduler.run(shutdown.clone()));

    serve_manifest(&server, b"second manifest").await;
    let wanted = digest(b"second manifest");
    let swapped = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if controller.state().await.current_digest.as_deref() == Some(wanted.as_str()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(swapped.is_ok(), "scheduler never swapped to the new manifest");

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("scheduler did not stop")
        .unwrap();

    assert_eq!(list_dir(dir.path()), vec![wanted]);
    assert!(engine.stats_queries() > 0);
    assert_eq!(engine.registered_count(), 1);
}
