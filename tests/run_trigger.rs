mod common;

use qkb_harvester::application::{HarvestError, RunLock, RunOrchestrator, TriggerOutcome, trigger};
use qkb_harvester::domain::run_state::RunOutcome;
use qkb_harvester::infrastructure::browser::replay::{result_card, result_page};
use qkb_harvester::infrastructure::browser::{BrowserError, ReplayBrowser};
use uuid::Uuid;

#[tokio::test]
async fn trigger_is_refused_while_the_lock_is_held() {
    let config = common::config(&["software"], &["SHPK"], 1);
    let store = common::store().await;
    let lock_path = store.dir.path().join("harvest.lock");
    let held = RunLock::acquire(&lock_path, Uuid::new_v4()).unwrap().unwrap();

    let orchestrator = RunOrchestrator::new(config.clone(), store.repository.clone()).unwrap();
    let browser_config = config.clone();
    let outcome = trigger(orchestrator, &lock_path, move || async move {
        Ok::<_, BrowserError>(ReplayBrowser::for_config(&browser_config))
    })
    .unwrap();

    assert!(matches!(outcome, TriggerOutcome::AlreadyRunning));
    assert!(lock_path.exists());
    drop(held);
}

#[tokio::test]
async fn started_run_releases_the_lock_when_done() {
    let config = common::config(&["software"], &["SHPK"], 1);
    let store = common::store().await;
    let lock_path = store.dir.path().join("locks/harvest.lock");
    let browser_config = config.clone();
    let listing = vec![result_page(
        &[result_card("L12345678A", "Alpha Soft", "Tiranë", "SHPK", "")],
        &[],
    )];

    let orchestrator = RunOrchestrator::new(config.clone(), store.repository.clone()).unwrap();
    let outcome = trigger(orchestrator, &lock_path, move || async move {
        Ok::<_, BrowserError>(ReplayBrowser::for_config(&browser_config).with_results("software", listing))
    })
    .unwrap();
    let TriggerOutcome::Started(handle) = outcome else {
        panic!("expected the run to start");
    };
    assert!(lock_path.exists());

    let summary = handle.wait().await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.created, 1);
    assert!(!lock_path.exists());
    assert_eq!(store.committed_rows().await, 1);
}

#[tokio::test]
async fn browser_that_cannot_start_is_reported_and_unlocks() {
    let config = common::config(&["software"], &["SHPK"], 1);
    let store = common::store().await;
    let lock_path = store.dir.path().join("harvest.lock");

    let orchestrator = RunOrchestrator::new(config, store.repository.clone()).unwrap();
    let outcome = trigger(orchestrator, &lock_path, || async {
        Err::<ReplayBrowser, _>(BrowserError::SessionLost {
            message: "no chrome".into(),
        })
    })
    .unwrap();
    let TriggerOutcome::Started(handle) = outcome else {
        panic!("expected the run to start");
    };

    assert!(matches!(handle.wait().await, Err(HarvestError::Browser(_))));
    assert!(!lock_path.exists());
}

#[tokio::test]
async fn cancelled_handle_ends_interrupted() {
    let config = common::config(&["software"], &["SHPK"], 1);
    let store = common::store().await;
    let lock_path = store.dir.path().join("harvest.lock");
    let browser_config = config.clone();

    let orchestrator = RunOrchestrator::new(config, store.repository.clone()).unwrap();
    // Cancelled before the task starts, so not a single search is run
    orchestrator.cancellation_token().cancel();
    let outcome = trigger(orchestrator, &lock_path, move || async move {
        Ok::<_, BrowserError>(ReplayBrowser::for_config(&browser_config))
    })
    .unwrap();
    let TriggerOutcome::Started(handle) = outcome else {
        panic!("expected the run to start");
    };
    let run_id = handle.run_id();

    let summary = handle.wait().await.unwrap();

    assert!(!run_id.is_nil());
    assert!(matches!(summary.outcome, RunOutcome::Interrupted { .. }));
    assert_eq!(summary.searches_completed, 0);
}
