//! Runner configuration.
//!
//! The declarative description of a run: target capabilities, spec
//! globs, page-initialization policy, timeouts and viewport, plus the
//! thin screenshot-directory surface used only for baseline clearing.
//!
//! Configurations can be loaded from JSON files and deep-merged with an
//! extension configuration: objects and scalars are overridden by the
//! extension, arrays are concatenated.

use crate::capability::Capability;
use crate::result::{CruzarError, CruzarResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default hook/spec timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// When a session/page is (re)initialized relative to the spec tree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageInitMode {
    /// Once per capability suite, in a suite-scoped before-all hook
    #[default]
    #[serde(rename = "beforeAll")]
    PerSuite,
    /// Before every spec, in a spec-scoped before-each hook
    #[serde(rename = "beforeEach")]
    PerSpec,
    /// Never implicitly; spec bodies initialize the page themselves
    #[serde(rename = "manually")]
    Manual,
}

/// Browser viewport size applied once per session creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewportSize {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Default for ViewportSize {
    fn default() -> Self {
        Self {
            width: 1900,
            height: 990,
        }
    }
}

/// Remote webdriver backend endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebdriverEndpoint {
    /// Backend host
    pub host: String,
    /// Backend port
    pub port: u16,
}

impl Default for WebdriverEndpoint {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 4444,
        }
    }
}

/// Screenshot directory configuration. The orchestration core only
/// touches these directories when baseline clearing is requested;
/// visual diffing itself lives outside this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScreenshotConfig {
    /// Baseline screenshot directory
    pub screenshot_root: PathBuf,
    /// Failed-comparison output directory
    pub failed_comparisons_root: PathBuf,
}

impl Default for ScreenshotConfig {
    fn default() -> Self {
        Self {
            screenshot_root: PathBuf::from("./screenshots/"),
            failed_comparisons_root: PathBuf::from("./screenshots/"),
        }
    }
}

/// Resolved runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunnerConfig {
    /// Directory spec globs and relative paths are resolved against
    pub root_dir: PathBuf,
    /// Spec file globs, relative to `root_dir`
    pub specs: Vec<String>,
    /// Target capabilities; each drives one session lifecycle at a time
    pub capabilities: Vec<Capability>,
    /// Page-initialization policy
    pub test_page_init_mode: PageInitMode,
    /// Timeout applied to hooks, waits and session commands
    pub default_timeout_ms: u64,
    /// Viewport applied once per session creation; `None` skips it
    pub viewport: Option<ViewportSize>,
    /// Remote webdriver backend
    pub webdriver: WebdriverEndpoint,
    /// Page to open when a spec does not name one; falls back to the
    /// built-in blank page served by the local file server
    pub default_test_page_url: Option<String>,
    /// Fixture file globs (js/css) linked into every initialized page
    pub files: Vec<String>,
    /// Script file globs evaluated in every initialized page
    pub exec_files: Vec<String>,
    /// Optional predicate script polled until truthy after page init
    pub wait_until: Option<String>,
    /// Screenshot directories, present only when visual tooling is wired
    pub screenshots: Option<ScreenshotConfig>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            specs: Vec::new(),
            capabilities: Vec::new(),
            test_page_init_mode: PageInitMode::default(),
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            viewport: Some(ViewportSize::default()),
            webdriver: WebdriverEndpoint::default(),
            default_test_page_url: None,
            files: Vec::new(),
            exec_files: Vec::new(),
            wait_until: None,
            screenshots: None,
        }
    }
}

impl RunnerConfig {
    /// Create a configuration rooted at a directory
    #[must_use]
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Self::default()
        }
    }

    /// Add a capability
    #[must_use]
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// Set the page-initialization policy
    #[must_use]
    pub fn with_page_init_mode(mut self, mode: PageInitMode) -> Self {
        self.test_page_init_mode = mode;
        self
    }

    /// Add a spec glob
    #[must_use]
    pub fn with_spec_glob(mut self, pattern: impl Into<String>) -> Self {
        self.specs.push(pattern.into());
        self
    }

    /// Set the default timeout in milliseconds
    #[must_use]
    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.default_timeout_ms = ms;
        self
    }

    /// The default timeout as a [`Duration`]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Load a configuration from a JSON file. `rootDir` defaults to the
    /// config file's own directory when absent.
    pub fn from_file(path: impl AsRef<Path>) -> CruzarResult<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(CruzarError::config(
                "Please specify a valid location of configuration file",
            ));
        }
        if !path.exists() {
            return Err(CruzarError::config(
                "The config file does not exist on this path",
            ));
        }

        let raw = std::fs::read_to_string(path)?;
        let mut value: Value = serde_json::from_str(&raw).map_err(|e| {
            CruzarError::config(format!("The config file has an invalid format {e}"))
        })?;

        if let Value::Object(map) = &mut value {
            if !map.contains_key("rootDir") {
                let parent = path.parent().unwrap_or_else(|| Path::new("."));
                map.insert(
                    "rootDir".to_string(),
                    Value::String(parent.display().to_string()),
                );
            }
        }

        let config: Self = serde_json::from_value(value).map_err(|e| {
            CruzarError::config(format!("The config file has an invalid format {e}"))
        })?;
        Ok(config.normalized())
    }

    /// Deep-merge an extension configuration over this one. Objects and
    /// scalars from the extension win; arrays are concatenated.
    #[must_use]
    pub fn merge(self, extension: Self) -> Self {
        let mut base = serde_json::to_value(&self).unwrap_or(Value::Null);
        let ext = serde_json::to_value(&extension).unwrap_or(Value::Null);
        merge_values(&mut base, ext);
        serde_json::from_value(base).unwrap_or(self)
    }

    /// Make screenshot roots absolute relative to `root_dir`
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if let Some(shots) = &mut self.screenshots {
            if shots.screenshot_root.is_relative() {
                shots.screenshot_root = self.root_dir.join(&shots.screenshot_root);
            }
            if shots.failed_comparisons_root.is_relative() {
                shots.failed_comparisons_root = self.root_dir.join(&shots.failed_comparisons_root);
            }
        }
        self
    }

    /// Validate the configuration; the root directory must be accessible
    pub fn validate(&self) -> CruzarResult<()> {
        if std::fs::metadata(&self.root_dir).is_err() {
            return Err(CruzarError::config("config.rootDir is not accessible"));
        }
        Ok(())
    }
}

/// Resolve glob patterns against a root directory. Relative patterns
/// are anchored at `root_dir`; absolute patterns are used as-is.
pub fn files_by_glob(patterns: &[String], root_dir: &Path) -> CruzarResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for pattern in patterns {
        let anchored = if Path::new(pattern).is_absolute() {
            pattern.clone()
        } else {
            root_dir.join(pattern).display().to_string()
        };
        let entries = glob::glob(&anchored)
            .map_err(|e| CruzarError::config(format!("invalid glob pattern {pattern}: {e}")))?;
        for entry in entries {
            let path = entry
                .map_err(|e| CruzarError::config(format!("glob error under {pattern}: {e}")))?;
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Deep-merge `ext` into `base`: objects recurse, arrays concatenate,
/// everything else is replaced by `ext`.
pub(crate) fn merge_values(base: &mut Value, ext: Value) {
    match (base, ext) {
        (Value::Object(base_map), Value::Object(ext_map)) => {
            for (key, ext_value) in ext_map {
                match base_map.get_mut(&key) {
                    Some(base_value) => merge_values(base_value, ext_value),
                    None => {
                        base_map.insert(key, ext_value);
                    }
                }
            }
        }
        (Value::Array(base_items), Value::Array(ext_items)) => {
            base_items.extend(ext_items);
        }
        (base_slot, ext_value) => {
            *base_slot = ext_value;
        }
    }
}
