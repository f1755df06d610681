//! End-to-end orchestration tests over the mock webdriver client.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use cruzar::{
    BrowserKind, Capability, CruzarError, DriverFault, FailureKind, FnSpecModule, MockClient,
    MockEndFailure, NullReporter, PageInitMode, RunnerConfig, SpecReporter, TestRunner,
    INIT_FAILURE_REASON,
};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Reporter capturing skipped specs for assertions
#[derive(Default)]
struct RecordingReporter {
    skipped: Mutex<Vec<(String, String)>>,
}

impl SpecReporter for RecordingReporter {
    fn spec_skipped(&self, full_name: &str, reason: &str) {
        self.skipped
            .lock()
            .unwrap()
            .push((full_name.to_string(), reason.to_string()));
    }
}

fn workspace_with_spec(name: &str) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("specs")).unwrap();
    std::fs::write(dir.path().join("specs").join(name), "// spec").unwrap();
    dir
}

fn base_config(root: &Path, capabilities: &[Capability]) -> RunnerConfig {
    let mut config = RunnerConfig::new(root).with_spec_glob("specs/*.rs");
    for capability in capabilities {
        config = config.with_capability(capability.clone());
    }
    config
}

fn runner(config: RunnerConfig, client: &MockClient) -> TestRunner {
    TestRunner::new(config, Arc::new(client.clone()))
        .unwrap()
        .with_reporter(Arc::new(NullReporter))
}

/// A session-creation failure on one capability must not prevent the
/// next capability's suite from running to completion.
#[tokio::test]
async fn capability_startup_failure_is_isolated() {
    let dir = workspace_with_spec("isolation_spec.rs");
    let client = MockClient::new();
    client.fail_create_for("chrome");

    let executed = Arc::new(AtomicUsize::new(0));
    let executed_in_module = Arc::clone(&executed);

    let config = base_config(
        dir.path(),
        &[
            Capability::new(BrowserKind::Chrome),
            Capability::new(BrowserKind::Firefox),
        ],
    );
    let reporter = Arc::new(RecordingReporter::default());
    let runner = runner(config, &client)
        .with_reporter(Arc::clone(&reporter) as Arc<dyn SpecReporter>)
        .with_module(Arc::new(FnSpecModule::new(
        "specs/isolation_spec.rs",
        move |env| {
            let counter = Arc::clone(&executed_in_module);
            env.it("first", {
                let counter = Arc::clone(&counter);
                move |_h| {
                    let counter = Arc::clone(&counter);
                    Box::pin(async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                }
            });
            env.it("second", {
                let counter = Arc::clone(&counter);
                move |_h| {
                    let counter = Arc::clone(&counter);
                    Box::pin(async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                }
            });
        },
    )));

    let err = runner.run().await.unwrap_err();
    let CruzarError::FailedExpectations { failures } = err else {
        panic!("expected failed expectations, got a different outcome");
    };

    // Only the chrome init failure is recorded; both firefox specs ran
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].unit, "[chrome]");
    assert_eq!(failures[0].kind, FailureKind::Hook);
    assert_eq!(executed.load(Ordering::SeqCst), 2);

    // chrome attempted once, only firefox got a full lifecycle
    assert_eq!(client.calls_matching("create:chrome"), 1);
    assert_eq!(client.calls_matching("create:firefox"), 1);
    assert_eq!(client.sessions_created(), 1);
    assert_eq!(client.calls_matching("end"), 1);
    assert!(!runner.file_server().is_running().await);

    // chrome's specs were skipped with the fixed diagnostic reason
    let skipped = reporter.skipped.lock().unwrap();
    assert_eq!(skipped.len(), 2);
    assert!(skipped
        .iter()
        .all(|(name, reason)| name.starts_with("[chrome]") && reason == INIT_FAILURE_REASON));
}

/// The second of two concurrent run calls fails immediately and does
/// not start a second file server or touch any capability.
#[tokio::test]
async fn concurrent_run_is_rejected() {
    let dir = workspace_with_spec("concurrent_spec.rs");
    let client = MockClient::new();
    let config = base_config(dir.path(), &[Capability::new(BrowserKind::Chrome)]);
    let runner = runner(config, &client).with_module(Arc::new(FnSpecModule::new(
        "specs/concurrent_spec.rs",
        |env| {
            env.it("passes", |_h| Box::pin(async { Ok(()) }));
        },
    )));

    let (first, second) = tokio::join!(runner.run(), runner.run());
    let outcomes = [first, second];
    let rejected = outcomes
        .iter()
        .filter(|o| matches!(o, Err(CruzarError::AlreadyRunning)))
        .count();
    let completed = outcomes.iter().filter(|o| o.is_ok()).count();

    assert_eq!(rejected, 1);
    assert_eq!(completed, 1);
    // Exactly one run touched the capability
    assert_eq!(client.sessions_created(), 1);
    assert!(!runner.file_server().is_running().await);
}

/// Teardown still runs when initialization failed after the session
/// was created, so no session leaks.
#[tokio::test]
async fn teardown_runs_once_after_failed_initialization() {
    let dir = workspace_with_spec("teardown_spec.rs");
    let client = MockClient::new();
    client.fail_navigate();

    let config = base_config(dir.path(), &[Capability::new(BrowserKind::Chrome)]);
    let runner = runner(config, &client).with_module(Arc::new(FnSpecModule::new(
        "specs/teardown_spec.rs",
        |env| {
            env.it("never runs", |_h| Box::pin(async { Ok(()) }));
        },
    )));

    let err = runner.run().await.unwrap_err();
    assert!(matches!(err, CruzarError::FailedExpectations { .. }));

    assert_eq!(client.sessions_created(), 1);
    assert_eq!(client.calls_matching("end"), 1);
}

/// A shutdown error matching a known benign fault signature leaves the
/// run outcome untouched.
#[tokio::test]
async fn benign_shutdown_fault_is_suppressed() {
    let dir = workspace_with_spec("benign_spec.rs");
    let client = MockClient::new();
    client.fail_end_with(MockEndFailure {
        message: "An unknown server-side error occurred".to_string(),
        fault: Some(DriverFault::new(
            "UnknownError",
            "Can't obtain updateLastError method for class com.sun.jna.Native",
        )),
    });

    let config = base_config(
        dir.path(),
        &[Capability::new(BrowserKind::InternetExplorer)],
    );
    let runner = runner(config, &client).with_module(Arc::new(FnSpecModule::new(
        "specs/benign_spec.rs",
        |env| {
            env.it("passes", |_h| Box::pin(async { Ok(()) }));
        },
    )));

    let summary = runner.run().await.unwrap();
    assert_eq!(summary.passed, 1);
    assert!(summary.all_passed());
}

/// Any other shutdown error surfaces as a failure of the capability
/// suite.
#[tokio::test]
async fn other_shutdown_faults_surface() {
    let dir = workspace_with_spec("shutdown_spec.rs");
    let client = MockClient::new();
    client.fail_end_with(MockEndFailure {
        message: "socket hang up".to_string(),
        fault: None,
    });

    let config = base_config(dir.path(), &[Capability::new(BrowserKind::Chrome)]);
    let runner = runner(config, &client).with_module(Arc::new(FnSpecModule::new(
        "specs/shutdown_spec.rs",
        |env| {
            env.it("passes", |_h| Box::pin(async { Ok(()) }));
        },
    )));

    let err = runner.run().await.unwrap_err();
    let CruzarError::FailedExpectations { failures } = err else {
        panic!("expected failed expectations");
    };
    assert_eq!(failures.len(), 1);
    assert!(failures[0].message.contains("socket hang up"));
}

/// End-to-end: PerSuite mode, two capabilities, one passing and one
/// failing spec. Two full session lifecycles, one failure per
/// capability, file server stopped at the end.
#[tokio::test]
async fn end_to_end_two_capabilities() {
    let dir = workspace_with_spec("e2e_spec.rs");
    let client = MockClient::new();

    let config = base_config(
        dir.path(),
        &[
            Capability::new(BrowserKind::Chrome),
            Capability::new(BrowserKind::Firefox),
        ],
    )
    .with_page_init_mode(PageInitMode::PerSuite);

    let runner = runner(config, &client).with_module(Arc::new(FnSpecModule::new(
        "specs/e2e_spec.rs",
        |env| {
            env.describe("calculator page", |suite| {
                suite.it("adds numbers", |_h| Box::pin(async { Ok(()) }));
                suite.it("subtracts numbers", |_h| {
                    Box::pin(async {
                        Err(CruzarError::assertion("expected 1, got 2"))
                    })
                });
            });
        },
    )));

    let err = runner.run().await.unwrap_err();
    let CruzarError::FailedExpectations { failures } = err else {
        panic!("expected failed expectations");
    };

    // Exactly the one failing expectation per capability
    assert_eq!(failures.len(), 2);
    assert!(failures
        .iter()
        .all(|f| f.unit.ends_with("calculator page subtracts numbers")));
    assert!(failures.iter().any(|f| f.unit.starts_with("[chrome]")));
    assert!(failures.iter().any(|f| f.unit.starts_with("[firefox]")));
    assert!(failures.iter().all(|f| f.kind == FailureKind::Spec));

    // Two full lifecycles: create, navigate to the blank page, end
    assert_eq!(client.sessions_created(), 2);
    assert_eq!(client.calls_matching("create:"), 2);
    assert_eq!(client.calls_matching("navigate:"), 2);
    assert_eq!(client.calls_matching("end"), 2);

    assert!(!runner.file_server().is_running().await);
}

/// Manual mode: spec bodies drive page initialization themselves
/// through the run handle.
#[tokio::test]
async fn manual_mode_initializes_on_demand() {
    let dir = workspace_with_spec("manual_spec.rs");
    let client = MockClient::new();

    let config = base_config(dir.path(), &[Capability::new(BrowserKind::Chrome)])
        .with_page_init_mode(PageInitMode::Manual);

    let runner = runner(config, &client).with_module(Arc::new(FnSpecModule::new(
        "specs/manual_spec.rs",
        |env| {
            env.it("initializes explicitly", |handle| {
                Box::pin(async move {
                    handle.init_test_page(None).await?;
                    handle.session()?;
                    Ok(())
                })
            });
        },
    )));

    let summary = runner.run().await.unwrap();
    assert_eq!(summary.passed, 1);
    assert_eq!(client.sessions_created(), 1);
    assert_eq!(client.calls_matching("navigate:"), 1);
    assert_eq!(client.calls_matching("end"), 1);
}
