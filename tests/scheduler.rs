mod common;

use common::{RemoteOp, job, setup, setup_with, test_settings};
use fieldsync::application::ports::{ConnectivityObserver, OperationQueue};
use fieldsync::application::services::SyncScheduler;
use fieldsync::domain::entities::SyncStatus;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[tokio::test]
async fn regained_connectivity_triggers_a_cycle() {
    let ctx = setup_with(test_settings(), false).await;
    ctx.records.create(job("Queued offline"), None).await.unwrap();

    let mut scheduler = SyncScheduler::start(
        ctx.orchestrator.clone(),
        Arc::clone(&ctx.connectivity) as Arc<dyn ConnectivityObserver>,
        Duration::from_secs(3600),
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(ctx.remote.calls().is_empty());

    let mut rx = ctx.orchestrator.watch();
    ctx.connectivity.set_online(true);
    tokio::time::timeout(
        Duration::from_secs(5),
        rx.wait_for(|state| state.last_sync_time.is_some() && !state.is_syncing()),
    )
    .await
    .expect("sync after reconnect")
    .expect("state channel open");

    scheduler.stop().await;
    assert!(!scheduler.is_running());
    assert_eq!(ctx.queue.count(&ctx.tenant).await.unwrap(), 0);
}

#[tokio::test]
async fn interval_keeps_syncing_until_stopped() {
    let ctx = setup().await;
    let successes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&successes);
    let _subscription = ctx.orchestrator.subscribe(move |state| {
        if state.status == SyncStatus::Success {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    let mut scheduler = SyncScheduler::start(
        ctx.orchestrator.clone(),
        Arc::clone(&ctx.connectivity) as Arc<dyn ConnectivityObserver>,
        Duration::from_millis(40),
    );
    tokio::time::timeout(Duration::from_secs(5), async {
        while successes.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("two periodic cycles");

    scheduler.stop().await;
    let lists = ctx.remote.calls_of(RemoteOp::List).len();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(ctx.remote.calls_of(RemoteOp::List).len(), lists);
}
