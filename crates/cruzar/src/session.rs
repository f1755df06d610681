//! Webdriver session lifecycle.
//!
//! [`SessionManager`] owns creation, reuse and teardown of the one
//! session per active capability, the benign-shutdown suppression
//! policy, page initialization, and the best-effort browser-info
//! diagnostics. The open-session reference lives in [`RunContext`] and
//! is written only here.

use crate::capability::Capability;
use crate::client::{wait_until, WebdriverClient, WebdriverSession};
use crate::config::{files_by_glob, RunnerConfig};
use crate::console_log;
use crate::context::RunContext;
use crate::result::{CruzarError, CruzarResult};
use crate::server::FileServer;
use axum::http::Uri;
use console::style;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Queries `screen` metrics as a JSON string (some drivers cannot
/// serialize the host object directly)
const SCREEN_METRICS_SCRIPT: &str = "return JSON.stringify({ \
     width: screen.width, height: screen.height, \
     availWidth: screen.availWidth, availHeight: screen.availHeight });";

const WINDOW_METRICS_SCRIPT: &str = "return { \
     innerWidth: window.innerWidth, innerHeight: window.innerHeight, \
     outerWidth: window.outerWidth, outerHeight: window.outerHeight };";

/// Appends script/link elements for the given urls to the page head
const ADD_FILE_LINKS_SCRIPT: &str = r#"
var files = arguments[0];
var head = document.getElementsByTagName("head")[0] || document.body || document;
files.forEach(function(src) {
    var ext = /[^.]+$/.exec(src)[0];
    if (ext === "js") {
        var script = document.createElement("script");
        script.src = src;
        script.type = "text/javascript";
        head.appendChild(script);
    } else if (ext === "css") {
        var link = document.createElement("link");
        link.href = src;
        link.type = "text/css";
        link.rel = "stylesheet";
        head.appendChild(link);
    }
});
"#;

/// Screen metrics reported by the page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenMetrics {
    /// Screen width
    pub width: u32,
    /// Screen height
    pub height: u32,
    /// Available width
    pub avail_width: u32,
    /// Available height
    pub avail_height: u32,
}

/// Window metrics reported by the page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowMetrics {
    /// Inner (viewport) width
    pub inner_width: u32,
    /// Inner (viewport) height
    pub inner_height: u32,
    /// Outer (window) width
    pub outer_width: u32,
    /// Outer (window) height
    pub outer_height: u32,
}

/// Diagnostic snapshot of the live page's screen/window metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserInfo {
    /// Screen metrics
    pub screen: ScreenMetrics,
    /// Window metrics
    pub window: WindowMetrics,
}

impl BrowserInfo {
    /// Formatted banner logged whenever the snapshot changes
    #[must_use]
    pub fn banner(&self) -> String {
        format!(
            "\n======================================================\n\
             Screen size: {}x{}. Available size: {}x{}.\n\
             Inner size: {}x{}. Outer size: {}x{}.\n\
             ======================================================",
            self.screen.width,
            self.screen.height,
            self.screen.avail_width,
            self.screen.avail_height,
            self.window.inner_width,
            self.window.inner_height,
            self.window.outer_width,
            self.window.outer_height,
        )
    }
}

/// One entry of the benign-shutdown allow-list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BenignFaultMatcher {
    /// Matches a structured driver fault by exact kind and status
    /// message
    Structured {
        /// Expected fault kind
        kind: &'static str,
        /// Expected status message
        status_message: &'static str,
    },
    /// Matches the error message exactly
    Message(&'static str),
}

impl BenignFaultMatcher {
    /// Whether a session-end error matches this entry
    #[must_use]
    pub fn matches(&self, error: &CruzarError) -> bool {
        let CruzarError::SessionEnd { message, fault } = error else {
            return false;
        };
        match self {
            Self::Structured {
                kind,
                status_message,
            } => fault
                .as_ref()
                .is_some_and(|f| f.kind == *kind && f.status_message == *status_message),
            Self::Message(expected) => message == expected,
        }
    }
}

/// The two driver-shutdown faults known to be noise: both are raised by
/// the IE driver on CI hosts while the session closes fine. Matched on
/// structured fields, not substrings, so nothing else gets suppressed.
pub const BENIGN_SHUTDOWN_FAULTS: [BenignFaultMatcher; 2] = [
    BenignFaultMatcher::Structured {
        kind: "UnknownError",
        status_message: "Can't obtain updateLastError method for class com.sun.jna.Native",
    },
    BenignFaultMatcher::Message("Could not initialize class org.openqa.selenium.os.Kernel32"),
];

/// Whether a session-end error is on the benign allow-list
#[must_use]
pub fn is_benign_shutdown_fault(error: &CruzarError) -> bool {
    BENIGN_SHUTDOWN_FAULTS
        .iter()
        .any(|matcher| matcher.matches(error))
}

/// Owns the session lifecycle for the active capability
pub struct SessionManager {
    client: Arc<dyn WebdriverClient>,
    config: Arc<RunnerConfig>,
    context: Arc<RunContext>,
    server: Arc<FileServer>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create a session manager
    #[must_use]
    pub fn new(
        client: Arc<dyn WebdriverClient>,
        config: Arc<RunnerConfig>,
        context: Arc<RunContext>,
        server: Arc<FileServer>,
    ) -> Self {
        Self {
            client,
            config,
            context,
            server,
        }
    }

    /// Return the open session, creating one when none is open.
    /// Viewport and timeouts are applied exactly once per creation; a
    /// repeated call returns the same session unchanged.
    pub async fn ensure_session(
        &self,
        capability: &Capability,
    ) -> CruzarResult<Arc<dyn WebdriverSession>> {
        if let Some(open) = self.context.session() {
            return Ok(open);
        }

        let desired = capability.desired()?;
        let session: Arc<dyn WebdriverSession> =
            Arc::from(self.client.create_session(&desired).await?);
        // Reference the session before applying settings so a failure
        // below still gets the session torn down at scope end
        self.context.set_session(Arc::clone(&session));

        if let Some(viewport) = self.config.viewport {
            if viewport.width > 0 && viewport.height > 0 {
                session.set_viewport(viewport).await?;
            }
        }
        session.set_timeouts(self.config.timeout()).await?;

        tracing::debug!(
            capability = capability.default_name(),
            session = %session.id(),
            "webdriver session created"
        );
        Ok(session)
    }

    /// Close any open session for browser kinds known to leave a
    /// corrupted session behind after navigation. No-op otherwise and
    /// when no session is open.
    pub async fn reinit_if_unstable(&self, capability: &Capability) -> CruzarResult<()> {
        if capability.browser.unstable_after_navigation() {
            self.teardown(false).await
        } else {
            Ok(())
        }
    }

    /// Gracefully end the open session. Errors matching the benign
    /// allow-list are swallowed; anything else is logged and re-raised.
    /// The session reference is cleared in every path.
    pub async fn teardown(&self, flush_console_logs: bool) -> CruzarResult<()> {
        let Some(session) = self.context.session() else {
            return Ok(());
        };

        if flush_console_logs {
            let _ = console_log::flush(&*session).await;
        }

        let result = session.end().await;
        self.context.clear_session();

        match result {
            Ok(()) => {
                tracing::debug!(session = %session.id(), "webdriver session ended");
                Ok(())
            }
            Err(err) if is_benign_shutdown_fault(&err) => Ok(()),
            Err(err) => {
                tracing::error!(error = %err, "failed to end webdriver session");
                Err(err)
            }
        }
    }

    /// Full page initialization for the active capability: defensive
    /// reinit, session creation, navigation, console capture, fixture
    /// injection, exec scripts and the configured readiness wait.
    pub async fn init_test_page(
        &self,
        capability: &Capability,
        url: Option<&str>,
    ) -> CruzarResult<()> {
        self.reinit_if_unstable(capability).await?;
        let session = self.ensure_session(capability).await?;

        let target = self.resolve_page_url(url).await?;
        session.navigate(&target).await?;
        console_log::install_reader(&*session).await?;
        self.report_browser_info(&*session).await;
        self.inject_file_links(&*session).await?;
        self.exec_configured_files(&*session).await?;

        if let Some(predicate) = &self.config.wait_until {
            wait_until(&*session, predicate, self.config.timeout()).await?;
        }
        Ok(())
    }

    /// Resolve the navigation target: explicit url, configured default,
    /// or the built-in blank page. Local files are served through the
    /// file server; anything with a host passes through unchanged.
    pub(crate) async fn resolve_page_url(&self, url: Option<&str>) -> CruzarResult<String> {
        let requested = url
            .map(str::to_string)
            .or_else(|| self.config.default_test_page_url.clone());

        match requested {
            Some(target) if is_remote_url(&target) => Ok(target),
            Some(target) => {
                let path = PathBuf::from(&target);
                let path = if path.is_absolute() {
                    path
                } else {
                    self.config.root_dir.join(path)
                };
                if path.exists() {
                    self.server.url_for(&path).await.ok_or_else(|| {
                        CruzarError::invalid_state("file server is not running")
                    })
                } else {
                    Ok(target)
                }
            }
            None => self
                .server
                .blank_page_url()
                .await
                .ok_or_else(|| CruzarError::invalid_state("file server is not running")),
        }
    }

    /// Query screen/window metrics and log a banner when they changed
    /// since the last snapshot. Best-effort; never fails the run.
    async fn report_browser_info(&self, session: &dyn WebdriverSession) {
        let Ok(screen_value) = session.execute(SCREEN_METRICS_SCRIPT, &[]).await else {
            return;
        };
        let Ok(window_value) = session.execute(WINDOW_METRICS_SCRIPT, &[]).await else {
            return;
        };

        let screen: Option<ScreenMetrics> = screen_value
            .as_str()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .or_else(|| serde_json::from_value(screen_value.clone()).ok());
        let window: Option<WindowMetrics> = serde_json::from_value(window_value).ok();
        let (Some(screen), Some(window)) = (screen, window) else {
            return;
        };

        let info = BrowserInfo { screen, window };
        if self.context.browser_info() == Some(info) {
            return;
        }
        println!("{}", style(info.banner()).dim());
        self.context.set_browser_info(info);
    }

    /// Link configured fixture files (js/css) into the page
    async fn inject_file_links(&self, session: &dyn WebdriverSession) -> CruzarResult<()> {
        if self.config.files.is_empty() {
            return Ok(());
        }

        let mut links = Vec::new();
        for pattern in &self.config.files {
            if is_remote_url(pattern) {
                links.push(pattern.clone());
                continue;
            }
            for file in files_by_glob(std::slice::from_ref(pattern), &self.config.root_dir)? {
                if let Some(url) = self.server.url_for(&file).await {
                    links.push(url);
                }
            }
        }

        if links.is_empty() {
            return Ok(());
        }
        let args = vec![serde_json::to_value(&links)?];
        session.execute(ADD_FILE_LINKS_SCRIPT, &args).await?;
        Ok(())
    }

    /// Evaluate configured exec files in the page, in glob order
    async fn exec_configured_files(&self, session: &dyn WebdriverSession) -> CruzarResult<()> {
        if self.config.exec_files.is_empty() {
            return Ok(());
        }
        for file in files_by_glob(&self.config.exec_files, &self.config.root_dir)? {
            let source = tokio::fs::read_to_string(&file).await?;
            session.execute(&source, &[]).await?;
        }
        Ok(())
    }
}

/// Whether a string parses as a URL with a scheme and host
fn is_remote_url(candidate: &str) -> bool {
    candidate
        .parse::<Uri>()
        .map(|uri| uri.scheme().is_some() && uri.host().is_some())
        .unwrap_or(false)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::capability::BrowserKind;
    use crate::client::{DriverFault, MockClient, MockEndFailure};

    fn manager(client: &MockClient) -> SessionManager {
        SessionManager::new(
            Arc::new(client.clone()),
            Arc::new(RunnerConfig::default()),
            Arc::new(RunContext::new()),
            Arc::new(FileServer::new()),
        )
    }

    fn benign_structured() -> CruzarError {
        CruzarError::SessionEnd {
            message: "An unknown server-side error occurred".to_string(),
            fault: Some(DriverFault::new(
                "UnknownError",
                "Can't obtain updateLastError method for class com.sun.jna.Native",
            )),
        }
    }

    #[test]
    fn test_benign_fault_allow_list() {
        assert!(is_benign_shutdown_fault(&benign_structured()));
        assert!(is_benign_shutdown_fault(&CruzarError::SessionEnd {
            message: "Could not initialize class org.openqa.selenium.os.Kernel32".to_string(),
            fault: None,
        }));
    }

    #[test]
    fn test_near_miss_faults_are_not_suppressed() {
        // Same kind, different status message
        assert!(!is_benign_shutdown_fault(&CruzarError::SessionEnd {
            message: "unknown".to_string(),
            fault: Some(DriverFault::new("UnknownError", "chrome not reachable")),
        }));
        // Message containment is not enough
        assert!(!is_benign_shutdown_fault(&CruzarError::SessionEnd {
            message: "prefix Could not initialize class org.openqa.selenium.os.Kernel32"
                .to_string(),
            fault: None,
        }));
        // Other error variants never match
        assert!(!is_benign_shutdown_fault(&CruzarError::Timeout { ms: 1 }));
    }

    #[tokio::test]
    async fn test_ensure_session_is_idempotent() {
        let client = MockClient::new();
        let manager = manager(&client);
        let capability = Capability::new(BrowserKind::Chrome);

        let first = manager.ensure_session(&capability).await.unwrap();
        let second = manager.ensure_session(&capability).await.unwrap();
        assert_eq!(first.id(), second.id());

        // One creation, one viewport application, one timeout application
        assert_eq!(client.calls_matching("create:"), 1);
        assert_eq!(client.calls_matching("viewport:"), 1);
        assert_eq!(client.calls_matching("timeouts:"), 1);
    }

    #[tokio::test]
    async fn test_reinit_if_unstable_is_a_noop_without_session() {
        let client = MockClient::new();
        let manager = manager(&client);
        manager
            .reinit_if_unstable(&Capability::new(BrowserKind::InternetExplorer))
            .await
            .unwrap();
        assert!(client.history().is_empty());
    }

    #[tokio::test]
    async fn test_reinit_if_unstable_closes_only_unstable_kinds() {
        let client = MockClient::new();
        let manager = manager(&client);

        let ie = Capability::new(BrowserKind::InternetExplorer);
        manager.ensure_session(&ie).await.unwrap();
        manager.reinit_if_unstable(&ie).await.unwrap();
        assert_eq!(client.calls_matching("end"), 1);

        let chrome = Capability::new(BrowserKind::Chrome);
        manager.ensure_session(&chrome).await.unwrap();
        manager.reinit_if_unstable(&chrome).await.unwrap();
        assert_eq!(client.calls_matching("end"), 1);
    }

    #[tokio::test]
    async fn test_teardown_swallows_benign_faults() {
        let client = MockClient::new();
        client.fail_end_with(MockEndFailure {
            message: "An unknown server-side error occurred".to_string(),
            fault: Some(DriverFault::new(
                "UnknownError",
                "Can't obtain updateLastError method for class com.sun.jna.Native",
            )),
        });
        let manager = manager(&client);
        manager
            .ensure_session(&Capability::new(BrowserKind::InternetExplorer))
            .await
            .unwrap();

        manager.teardown(false).await.unwrap();
        assert_eq!(client.calls_matching("end"), 1);
    }

    #[tokio::test]
    async fn test_teardown_surfaces_other_faults_but_clears_session() {
        let client = MockClient::new();
        client.fail_end_with(MockEndFailure {
            message: "socket hang up".to_string(),
            fault: None,
        });
        let manager = manager(&client);
        manager
            .ensure_session(&Capability::new(BrowserKind::Chrome))
            .await
            .unwrap();

        let err = manager.teardown(false).await.unwrap_err();
        assert!(matches!(err, CruzarError::SessionEnd { .. }));

        // Reference cleared despite the failure; a second teardown is a
        // no-op instead of a second end() call
        manager.teardown(false).await.unwrap();
        assert_eq!(client.calls_matching("end"), 1);
    }

    #[tokio::test]
    async fn test_resolve_page_url_passes_remote_urls_through() {
        let client = MockClient::new();
        let manager = manager(&client);
        let url = manager
            .resolve_page_url(Some("http://example.com/index.html"))
            .await
            .unwrap();
        assert_eq!(url, "http://example.com/index.html");
    }

    #[tokio::test]
    async fn test_resolve_page_url_requires_server_for_blank_page() {
        let client = MockClient::new();
        let manager = manager(&client);
        let err = manager.resolve_page_url(None).await.unwrap_err();
        assert!(matches!(err, CruzarError::InvalidState { .. }));
    }

    #[test]
    fn test_is_remote_url() {
        assert!(is_remote_url("http://localhost:4444/page"));
        assert!(is_remote_url("https://example.com"));
        assert!(!is_remote_url("pages/index.html"));
        assert!(!is_remote_url("/tmp/index.html"));
    }

    #[test]
    fn test_browser_info_banner() {
        let info = BrowserInfo {
            screen: ScreenMetrics {
                width: 1920,
                height: 1080,
                avail_width: 1920,
                avail_height: 1040,
            },
            window: WindowMetrics {
                inner_width: 1900,
                inner_height: 990,
                outer_width: 1920,
                outer_height: 1040,
            },
        };
        let banner = info.banner();
        assert!(banner.contains("Screen size: 1920x1080"));
        assert!(banner.contains("Available size: 1920x1040"));
        assert!(banner.contains("Inner size: 1900x990"));
    }
}
