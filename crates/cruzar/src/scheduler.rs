//! Test-unit scheduling.
//!
//! For each capability the scheduler registers lifecycle hooks with the
//! spec-execution engine so session init/teardown brackets the
//! configured granularity, and isolates capability-scoped failures: a
//! failed page initialization pends the affected units with a fixed
//! reason and re-raises, so the engine records the cause while sibling
//! capabilities run untouched.

use crate::capability::Capability;
use crate::config::{PageInitMode, RunnerConfig};
use crate::console_log;
use crate::context::RunContext;
use crate::engine::{Engine, SpecEnv};
use crate::session::SessionManager;
use std::sync::Arc;

/// Reason attached to units skipped after a failed page initialization
pub const INIT_FAILURE_REASON: &str =
    "Disabled due to an error during the webdriver client initialization";

/// Registers per-capability lifecycle hooks
pub struct Scheduler {
    config: Arc<RunnerConfig>,
    context: Arc<RunContext>,
    sessions: Arc<SessionManager>,
    engine: Arc<Engine>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("mode", &self.config.test_page_init_mode)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Create a scheduler
    #[must_use]
    pub fn new(
        config: Arc<RunnerConfig>,
        context: Arc<RunContext>,
        sessions: Arc<SessionManager>,
        engine: Arc<Engine>,
    ) -> Self {
        Self {
            config,
            context,
            sessions,
            engine,
        }
    }

    /// Wire one capability's lifecycle into the suite `env` points at,
    /// then let `add_spec_units` populate the tree underneath it.
    ///
    /// Registered in order: a before-all activating the capability, the
    /// init hook for the configured [`PageInitMode`], the final
    /// suite-scoped teardown, and an after-each flushing captured
    /// client console logs while a session is open.
    pub fn register_for_capability(
        &self,
        env: &mut SpecEnv<'_>,
        capability: &Capability,
        add_spec_units: impl FnOnce(&mut SpecEnv<'_>),
    ) {
        self.engine
            .set_registration_browser(Some(capability.browser));

        {
            let context = Arc::clone(&self.context);
            let capability = capability.clone();
            env.before_all(move |_handle| {
                let context = Arc::clone(&context);
                let capability = capability.clone();
                Box::pin(async move {
                    context.set_active_capability(capability);
                    context.clear_browser_info();
                    Ok(())
                })
            });
        }

        match self.config.test_page_init_mode {
            PageInitMode::PerSuite => self.register_suite_init(env, capability),
            PageInitMode::PerSpec => self.register_spec_init(env, capability),
            PageInitMode::Manual => {}
        }

        {
            let sessions = Arc::clone(&self.sessions);
            env.after_all(move |_handle| {
                let sessions = Arc::clone(&sessions);
                Box::pin(async move { sessions.teardown(true).await })
            });
        }

        {
            let context = Arc::clone(&self.context);
            env.after_each(move |_handle| {
                let context = Arc::clone(&context);
                Box::pin(async move {
                    if let Some(session) = context.session() {
                        console_log::flush(&*session).await?;
                    }
                    Ok(())
                })
            });
        }

        add_spec_units(env);
        self.engine.set_registration_browser(None);
    }

    /// Suite-scoped init: a failure pends every unit under the current
    /// suite, then re-raises so the engine records the cause
    fn register_suite_init(&self, env: &mut SpecEnv<'_>, capability: &Capability) {
        let sessions = Arc::clone(&self.sessions);
        let engine = Arc::clone(&self.engine);
        let capability = capability.clone();
        env.before_all(move |_handle| {
            let sessions = Arc::clone(&sessions);
            let engine = Arc::clone(&engine);
            let capability = capability.clone();
            Box::pin(async move {
                match sessions.init_test_page(&capability, None).await {
                    Ok(()) => Ok(()),
                    Err(err) => {
                        if let Some(suite) = engine.current_suite() {
                            for unit in engine.all_children(suite) {
                                engine.pend_unit(unit, INIT_FAILURE_REASON);
                            }
                        }
                        Err(err)
                    }
                }
            })
        });
    }

    /// Spec-scoped init: a failure pends only the current spec
    fn register_spec_init(&self, env: &mut SpecEnv<'_>, capability: &Capability) {
        let sessions = Arc::clone(&self.sessions);
        let engine = Arc::clone(&self.engine);
        let capability = capability.clone();
        env.before_each(move |_handle| {
            let sessions = Arc::clone(&sessions);
            let engine = Arc::clone(&engine);
            let capability = capability.clone();
            Box::pin(async move {
                match sessions.init_test_page(&capability, None).await {
                    Ok(()) => Ok(()),
                    Err(err) => {
                        if let Some(spec) = engine.current_spec() {
                            engine.pend_unit(spec, INIT_FAILURE_REASON);
                        }
                        Err(err)
                    }
                }
            })
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::capability::BrowserKind;
    use crate::client::MockClient;
    use crate::context::RunHandle;
    use crate::reporter::NullReporter;
    use crate::server::FileServer;
    use std::sync::Mutex;

    struct Fixture {
        client: MockClient,
        config: Arc<RunnerConfig>,
        context: Arc<RunContext>,
        sessions: Arc<SessionManager>,
        engine: Arc<Engine>,
        server: Arc<FileServer>,
        scheduler: Scheduler,
    }

    fn fixture(mode: PageInitMode) -> Fixture {
        let client = MockClient::new();
        let config = Arc::new(RunnerConfig::default().with_page_init_mode(mode));
        let context = Arc::new(RunContext::new());
        let server = Arc::new(FileServer::new());
        let sessions = Arc::new(SessionManager::new(
            Arc::new(client.clone()),
            Arc::clone(&config),
            Arc::clone(&context),
            Arc::clone(&server),
        ));
        let engine = Arc::new(Engine::new());
        engine.set_reporter(Arc::new(NullReporter));
        let scheduler = Scheduler::new(
            Arc::clone(&config),
            Arc::clone(&context),
            Arc::clone(&sessions),
            Arc::clone(&engine),
        );
        Fixture {
            client,
            config,
            context,
            sessions,
            engine,
            server,
            scheduler,
        }
    }

    fn handle(fixture: &Fixture) -> RunHandle {
        RunHandle {
            config: Arc::clone(&fixture.config),
            context: Arc::clone(&fixture.context),
            sessions: Arc::clone(&fixture.sessions),
            engine: Arc::clone(&fixture.engine),
            server: Arc::clone(&fixture.server),
        }
    }

    #[tokio::test]
    async fn test_manual_mode_activates_capability_without_session() {
        let fixture = fixture(PageInitMode::Manual);
        let seen = Arc::new(Mutex::new(None));

        let capability = Capability::new(BrowserKind::Firefox).with_name("ff-nightly");
        {
            let mut env = fixture.engine.root_env();
            let scheduler = &fixture.scheduler;
            let seen_in_body = Arc::clone(&seen);
            env.describe("[ff-nightly]", |suite| {
                scheduler.register_for_capability(suite, &capability, |inner| {
                    inner.it("observes the capability", move |handle| {
                        let seen = Arc::clone(&seen_in_body);
                        Box::pin(async move {
                            *seen.lock().unwrap() = handle
                                .context()
                                .active_capability()
                                .map(|c| c.default_name().to_string());
                            Ok(())
                        })
                    });
                });
            });
        }

        let summary = fixture.engine.execute(handle(&fixture)).await.unwrap();
        assert_eq!(summary.passed, 1);
        assert_eq!(seen.lock().unwrap().as_deref(), Some("ff-nightly"));
        // Manual mode never created a session
        assert_eq!(fixture.client.sessions_created(), 0);
    }

    #[tokio::test]
    async fn test_suite_init_failure_pends_children_and_still_tears_down() {
        let fixture = fixture(PageInitMode::PerSuite);
        fixture
            .server
            .start(std::path::PathBuf::from("."), None)
            .await
            .unwrap();
        // Session creation succeeds, the blank-page navigation fails
        fixture.client.fail_navigate();

        let capability = Capability::new(BrowserKind::Chrome);
        let body_ran = Arc::new(Mutex::new(false));
        {
            let mut env = fixture.engine.root_env();
            let scheduler = &fixture.scheduler;
            let body_flag = Arc::clone(&body_ran);
            env.describe("[chrome]", |suite| {
                scheduler.register_for_capability(suite, &capability, |inner| {
                    inner.it("first", {
                        let flag = Arc::clone(&body_flag);
                        move |_h| {
                            let flag = Arc::clone(&flag);
                            Box::pin(async move {
                                *flag.lock().unwrap() = true;
                                Ok(())
                            })
                        }
                    });
                    inner.it("second", |_h| Box::pin(async { Ok(()) }));
                });
            });
        }

        let summary = fixture.engine.execute(handle(&fixture)).await.unwrap();
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.passed, 0);
        assert!(!*body_ran.lock().unwrap());
        // The cause is recorded against the capability suite
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].unit, "[chrome]");
        // The open session was torn down exactly once despite the
        // failed initialization
        assert_eq!(fixture.client.calls_matching("end"), 1);
        assert!(fixture.context.session().is_none());
        fixture.server.stop().await;
    }

    #[tokio::test]
    async fn test_spec_init_failure_pends_only_that_spec() {
        let fixture = fixture(PageInitMode::PerSpec);
        fixture
            .server
            .start(std::path::PathBuf::from("."), None)
            .await
            .unwrap();
        fixture.client.fail_navigate();

        let capability = Capability::new(BrowserKind::Chrome);
        {
            let mut env = fixture.engine.root_env();
            let scheduler = &fixture.scheduler;
            env.describe("[chrome]", |suite| {
                scheduler.register_for_capability(suite, &capability, |inner| {
                    inner.it("first", |_h| Box::pin(async { Ok(()) }));
                    inner.it("second", |_h| Box::pin(async { Ok(()) }));
                });
            });
        }

        let summary = fixture.engine.execute(handle(&fixture)).await.unwrap();
        // Each spec is pended individually at its own init attempt
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.failures.len(), 2);
        assert!(summary
            .failures
            .iter()
            .all(|f| f.unit.starts_with("[chrome]")));
        fixture.server.stop().await;
    }
}
