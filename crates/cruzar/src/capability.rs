//! Target browser capabilities.
//!
//! A [`Capability`] is the static description of one target
//! browser/environment. It is immutable once loaded from configuration;
//! exactly one webdriver session is derived from it at a time, and
//! sessions are never shared across capabilities.

use crate::result::{CruzarError, CruzarResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Supported browser kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BrowserKind {
    /// Google Chrome
    #[serde(rename = "chrome")]
    Chrome,
    /// Chromium (requires an explicit binary path)
    #[serde(rename = "chromium")]
    Chromium,
    /// Mozilla Firefox
    #[serde(rename = "firefox")]
    Firefox,
    /// Internet Explorer
    #[serde(rename = "internet explorer")]
    InternetExplorer,
    /// Microsoft Edge
    #[serde(rename = "edge")]
    Edge,
}

impl BrowserKind {
    /// The capability name understood by webdriver backends
    #[must_use]
    pub const fn wire_name(&self) -> &'static str {
        match self {
            Self::Chrome => "chrome",
            Self::Chromium => "chromium",
            Self::Firefox => "firefox",
            Self::InternetExplorer => "internet explorer",
            Self::Edge => "edge",
        }
    }

    /// Whether the driver is known to leave a corrupted session behind
    /// after navigation. Sessions for these kinds are closed and
    /// recreated before the next page initialization.
    #[must_use]
    pub const fn unstable_after_navigation(&self) -> bool {
        matches!(self, Self::InternetExplorer)
    }

    /// Whether this kind needs an explicit browser binary path
    #[must_use]
    pub const fn requires_binary(&self) -> bool {
        matches!(self, Self::Chromium)
    }
}

impl fmt::Display for BrowserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.wire_name())
    }
}

/// One target browser/environment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    /// Optional display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Browser kind
    #[serde(rename = "browserName")]
    pub browser: BrowserKind,
    /// Browser binary path (required for Chromium)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<PathBuf>,
    /// Browser-specific options passed through to the backend
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Capability {
    /// Create a capability for a browser kind
    #[must_use]
    pub fn new(browser: BrowserKind) -> Self {
        Self {
            name: None,
            browser,
            binary: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Set the display name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the browser binary path
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = Some(binary.into());
        self
    }

    /// Display name: the explicit name, or the browser wire name
    #[must_use]
    pub fn default_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.browser.wire_name())
    }

    /// Resolve the desired capabilities actually sent to the backend.
    ///
    /// Chromium requires an existing binary path and is reported to the
    /// backend as Chrome; a missing or nonexistent binary fails fast
    /// with a configuration error before any session is attempted.
    pub fn desired(&self) -> CruzarResult<DesiredCapabilities> {
        let mut browser = self.browser;
        if self.browser.requires_binary() {
            match &self.binary {
                Some(path) if path.exists() => {}
                _ => {
                    return Err(CruzarError::config("Missing chromium binary path"));
                }
            }
            browser = BrowserKind::Chrome;
        }

        Ok(DesiredCapabilities {
            browser_name: browser.wire_name().to_string(),
            binary: self.binary.clone(),
            extra: self.extra.clone(),
        })
    }
}

/// Capability payload handed to the automation backend. Display-name
/// metadata is stripped; only wire-relevant fields remain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredCapabilities {
    /// Browser name as the backend expects it
    #[serde(rename = "browserName")]
    pub browser_name: String,
    /// Browser binary path, when one was configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<PathBuf>,
    /// Browser-specific options passed through unchanged
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
