//! Abstract webdriver client seam.
//!
//! Cruzar does not implement the automation protocol itself. The
//! orchestration core depends only on these traits; backends plug in a
//! concrete client, and tests use [`MockClient`].

use crate::capability::DesiredCapabilities;
use crate::config::ViewportSize;
use crate::result::{CruzarError, CruzarResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Polling interval for [`wait_until`]
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

/// Structured fault payload reported by a driver alongside an error.
/// Carried on [`CruzarError::SessionEnd`] so shutdown faults can be
/// matched by field instead of by message substring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverFault {
    /// Driver-reported fault type
    pub kind: String,
    /// Driver-reported status message
    pub status_message: String,
}

impl DriverFault {
    /// Create a driver fault
    #[must_use]
    pub fn new(kind: impl Into<String>, status_message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            status_message: status_message.into(),
        }
    }
}

/// Creates webdriver sessions from capability descriptors
#[async_trait]
pub trait WebdriverClient: Send + Sync {
    /// Open a session for the desired capabilities
    async fn create_session(
        &self,
        desired: &DesiredCapabilities,
    ) -> CruzarResult<Box<dyn WebdriverSession>>;
}

/// A live connection to one remote browser instance
#[async_trait]
pub trait WebdriverSession: Send + Sync + std::fmt::Debug {
    /// Session identifier
    fn id(&self) -> Uuid;

    /// Navigate to a URL
    async fn navigate(&self, url: &str) -> CruzarResult<()>;

    /// Execute a script in the page and return its structured result
    async fn execute(&self, script: &str, args: &[Value]) -> CruzarResult<Value>;

    /// Apply a viewport size
    async fn set_viewport(&self, viewport: ViewportSize) -> CruzarResult<()>;

    /// Apply command/script timeouts
    async fn set_timeouts(&self, timeout: Duration) -> CruzarResult<()>;

    /// End the session, closing the browser window
    async fn end(&self) -> CruzarResult<()>;
}

/// Poll a predicate script until it evaluates truthy, bounded by
/// `timeout`. Abandoning the wait only stops the polling; any stuck
/// remote state is closed defensively on the next session (re)init.
pub async fn wait_until(
    session: &dyn WebdriverSession,
    predicate: &str,
    timeout: Duration,
) -> CruzarResult<()> {
    let started = Instant::now();
    loop {
        let value = session.execute(predicate, &[]).await?;
        if is_truthy(&value) {
            return Ok(());
        }
        if started.elapsed() >= timeout {
            return Err(CruzarError::Timeout {
                ms: timeout.as_millis() as u64,
            });
        }
        tokio::time::sleep(Duration::from_millis(DEFAULT_POLL_INTERVAL_MS)).await;
    }
}

/// JavaScript-style truthiness over a structured script result
#[must_use]
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// ============================================================================
// Mock client for unit testing
// ============================================================================

/// Scripted session-end failure for [`MockClient`]
#[derive(Debug, Clone)]
pub struct MockEndFailure {
    /// Error message
    pub message: String,
    /// Structured fault payload
    pub fault: Option<DriverFault>,
}

#[derive(Debug, Default)]
struct MockState {
    history: Vec<String>,
    sessions_created: usize,
    fail_create_for: HashSet<String>,
    fail_navigate: bool,
    end_failure: Option<MockEndFailure>,
    script_results: Vec<(String, VecDeque<Value>)>,
}

impl MockState {
    fn script_result(&mut self, script: &str) -> Value {
        for (needle, results) in &mut self.script_results {
            if script.contains(needle.as_str()) {
                return if results.len() > 1 {
                    results.pop_front().unwrap_or(Value::Null)
                } else {
                    results.front().cloned().unwrap_or(Value::Null)
                };
            }
        }
        Value::Null
    }
}

/// Mock webdriver client recording every call for verification
#[derive(Debug, Clone, Default)]
pub struct MockClient {
    state: Arc<Mutex<MockState>>,
}

impl MockClient {
    /// Create a new mock client
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse session creation for a browser wire name
    pub fn fail_create_for(&self, browser_name: &str) {
        self.lock().fail_create_for.insert(browser_name.to_string());
    }

    /// Make every navigation fail
    pub fn fail_navigate(&self) {
        self.lock().fail_navigate = true;
    }

    /// Make session end fail with the given failure
    pub fn fail_end_with(&self, failure: MockEndFailure) {
        self.lock().end_failure = Some(failure);
    }

    /// Stub the result of scripts containing `needle`. Multiple stubbed
    /// values are returned in order; the last one repeats.
    pub fn stub_script(&self, needle: &str, results: impl IntoIterator<Item = Value>) {
        self.lock()
            .script_results
            .push((needle.to_string(), results.into_iter().collect()));
    }

    /// Full call history
    #[must_use]
    pub fn history(&self) -> Vec<String> {
        self.lock().history.clone()
    }

    /// Count history entries starting with `prefix`
    #[must_use]
    pub fn calls_matching(&self, prefix: &str) -> usize {
        self.lock()
            .history
            .iter()
            .filter(|entry| entry.starts_with(prefix))
            .count()
    }

    /// Number of sessions successfully created
    #[must_use]
    pub fn sessions_created(&self) -> usize {
        self.lock().sessions_created
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl WebdriverClient for MockClient {
    async fn create_session(
        &self,
        desired: &DesiredCapabilities,
    ) -> CruzarResult<Box<dyn WebdriverSession>> {
        let mut state = self.lock();
        state.history.push(format!("create:{}", desired.browser_name));
        if state.fail_create_for.contains(&desired.browser_name) {
            return Err(CruzarError::SessionStart {
                message: format!("mock refused to start {}", desired.browser_name),
            });
        }
        state.sessions_created += 1;
        drop(state);
        Ok(Box::new(MockSession {
            id: Uuid::new_v4(),
            state: Arc::clone(&self.state),
        }))
    }
}

/// Session handle produced by [`MockClient`]
#[derive(Debug)]
pub struct MockSession {
    id: Uuid,
    state: Arc<Mutex<MockState>>,
}

impl MockSession {
    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl WebdriverSession for MockSession {
    fn id(&self) -> Uuid {
        self.id
    }

    async fn navigate(&self, url: &str) -> CruzarResult<()> {
        let mut state = self.lock();
        state.history.push(format!("navigate:{url}"));
        if state.fail_navigate {
            return Err(CruzarError::Navigation {
                url: url.to_string(),
                message: "mock navigation failure".to_string(),
            });
        }
        Ok(())
    }

    async fn execute(&self, script: &str, _args: &[Value]) -> CruzarResult<Value> {
        let mut state = self.lock();
        state.history.push("execute".to_string());
        Ok(state.script_result(script))
    }

    async fn set_viewport(&self, viewport: ViewportSize) -> CruzarResult<()> {
        self.lock()
            .history
            .push(format!("viewport:{}x{}", viewport.width, viewport.height));
        Ok(())
    }

    async fn set_timeouts(&self, timeout: Duration) -> CruzarResult<()> {
        self.lock()
            .history
            .push(format!("timeouts:{}", timeout.as_millis()));
        Ok(())
    }

    async fn end(&self) -> CruzarResult<()> {
        let mut state = self.lock();
        state.history.push("end".to_string());
        if let Some(failure) = &state.end_failure {
            return Err(CruzarError::SessionEnd {
                message: failure.message.clone(),
                fault: failure.fault.clone(),
            });
        }
        Ok(())
    }
}
