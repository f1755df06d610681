//! Run-scoped shared state.
//!
//! [`RunContext`] holds one run's mutable state as a single run-scoped
//! value instead of process-wide globals: the run phase, the active
//! capability, the open session (written only by the session lifecycle
//! manager) and the last browser-info snapshot. At most one capability is active at a
//! time by construction; accessors assert rather than lock around that
//! invariant.
//!
//! [`RunHandle`] is the cloneable view handed to every hook and spec
//! body, so test code reaches the session and context explicitly
//! instead of through globals.

use crate::capability::Capability;
use crate::client::WebdriverSession;
use crate::config::RunnerConfig;
use crate::engine::Engine;
use crate::result::{CruzarError, CruzarResult};
use crate::server::FileServer;
use crate::session::{BrowserInfo, SessionManager};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Run coordinator phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    /// No run in progress
    Idle,
    /// Support services are starting; failure here aborts the run
    /// before any capability is touched
    Starting,
    /// The suite tree is executing
    Running,
    /// Support services are being released; entered unconditionally
    /// after `Running`
    Stopping,
}

impl RunPhase {
    /// Whether `next` is a legal successor of this phase
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Starting)
                | (Self::Starting, Self::Running)
                | (Self::Starting, Self::Stopping)
                | (Self::Running, Self::Stopping)
                | (Self::Stopping, Self::Idle)
        )
    }
}

#[derive(Default)]
struct ContextInner {
    phase: Option<RunPhase>,
    active_capability: Option<Capability>,
    session: Option<Arc<dyn WebdriverSession>>,
    browser_info: Option<BrowserInfo>,
}

/// Shared state for one run
pub struct RunContext {
    inner: Mutex<ContextInner>,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    /// Create an idle context
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ContextInner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ContextInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Current run phase
    #[must_use]
    pub fn phase(&self) -> RunPhase {
        self.lock().phase.unwrap_or(RunPhase::Idle)
    }

    /// Transition to the next phase; illegal transitions are an
    /// invalid-state error (the invariant check the design calls for)
    pub fn set_phase(&self, next: RunPhase) -> CruzarResult<()> {
        let mut inner = self.lock();
        let current = inner.phase.unwrap_or(RunPhase::Idle);
        if !current.can_transition_to(next) {
            return Err(CruzarError::invalid_state(format!(
                "illegal run phase transition {current:?} -> {next:?}"
            )));
        }
        inner.phase = Some(next);
        Ok(())
    }

    /// Force the context back to idle, dropping all run state. Used on
    /// the unconditional cleanup path.
    pub fn reset(&self) {
        let mut inner = self.lock();
        *inner = ContextInner::default();
    }

    /// The capability whose hooks are currently executing
    #[must_use]
    pub fn active_capability(&self) -> Option<Capability> {
        self.lock().active_capability.clone()
    }

    /// Mark a capability active
    pub fn set_active_capability(&self, capability: Capability) {
        self.lock().active_capability = Some(capability);
    }

    /// The open session, if any
    #[must_use]
    pub fn session(&self) -> Option<Arc<dyn WebdriverSession>> {
        self.lock().session.clone()
    }

    /// Store the open session; written only by the session manager
    pub(crate) fn set_session(&self, session: Arc<dyn WebdriverSession>) {
        self.lock().session = Some(session);
    }

    /// Clear the session reference; happens in every teardown path
    pub(crate) fn clear_session(&self) {
        self.lock().session = None;
    }

    /// Last reported browser-info snapshot
    #[must_use]
    pub fn browser_info(&self) -> Option<BrowserInfo> {
        self.lock().browser_info.clone()
    }

    /// Store a new browser-info snapshot
    pub(crate) fn set_browser_info(&self, info: BrowserInfo) {
        self.lock().browser_info = Some(info);
    }

    /// Drop the snapshot so the next capability logs a fresh banner
    pub(crate) fn clear_browser_info(&self) {
        self.lock().browser_info = None;
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("RunContext")
            .field("phase", &inner.phase)
            .field(
                "active_capability",
                &inner.active_capability.as_ref().map(Capability::default_name),
            )
            .field("session_open", &inner.session.is_some())
            .finish()
    }
}

/// Cloneable view of the run passed to every hook and spec body
#[derive(Clone)]
pub struct RunHandle {
    pub(crate) config: Arc<RunnerConfig>,
    pub(crate) context: Arc<RunContext>,
    pub(crate) sessions: Arc<SessionManager>,
    pub(crate) engine: Arc<Engine>,
    pub(crate) server: Arc<FileServer>,
}

impl RunHandle {
    /// The resolved runner configuration
    #[must_use]
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// The local file server serving the run's root directory
    #[must_use]
    pub fn file_server(&self) -> &FileServer {
        &self.server
    }

    /// The run context
    #[must_use]
    pub fn context(&self) -> &RunContext {
        &self.context
    }

    /// The open session for the active capability
    pub fn session(&self) -> CruzarResult<Arc<dyn WebdriverSession>> {
        self.context
            .session()
            .ok_or_else(|| CruzarError::invalid_state("no webdriver session is open"))
    }

    /// Initialize the test page explicitly (the `Manual` page-init
    /// mode); `url` falls back to the configured default page
    pub async fn init_test_page(&self, url: Option<&str>) -> CruzarResult<()> {
        let capability = self.context.active_capability().ok_or_else(|| {
            CruzarError::invalid_state("no capability is active for page initialization")
        })?;
        self.sessions.init_test_page(&capability, url).await
    }

    /// Filesystem-safe path of the currently executing spec
    #[must_use]
    pub fn current_spec_path(&self) -> Option<String> {
        self.engine.current_spec_path()
    }
}

impl fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunHandle")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::capability::BrowserKind;

    #[test]
    fn test_phase_transitions() {
        assert!(RunPhase::Idle.can_transition_to(RunPhase::Starting));
        assert!(RunPhase::Starting.can_transition_to(RunPhase::Running));
        assert!(RunPhase::Starting.can_transition_to(RunPhase::Stopping));
        assert!(RunPhase::Running.can_transition_to(RunPhase::Stopping));
        assert!(RunPhase::Stopping.can_transition_to(RunPhase::Idle));

        assert!(!RunPhase::Idle.can_transition_to(RunPhase::Running));
        assert!(!RunPhase::Running.can_transition_to(RunPhase::Starting));
        assert!(!RunPhase::Stopping.can_transition_to(RunPhase::Running));
    }

    #[test]
    fn test_context_rejects_illegal_transition() {
        let context = RunContext::new();
        assert_eq!(context.phase(), RunPhase::Idle);
        context.set_phase(RunPhase::Starting).unwrap();
        let err = context.set_phase(RunPhase::Idle).unwrap_err();
        assert!(matches!(err, CruzarError::InvalidState { .. }));
    }

    #[test]
    fn test_reset_returns_to_idle() {
        let context = RunContext::new();
        context.set_phase(RunPhase::Starting).unwrap();
        context.set_active_capability(Capability::new(BrowserKind::Chrome));
        context.reset();
        assert_eq!(context.phase(), RunPhase::Idle);
        assert!(context.active_capability().is_none());
        assert!(context.session().is_none());
    }
}
