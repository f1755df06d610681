//! Client console capture.
//!
//! Installs an interceptor over the page's `console.log`/`warn`/`error`
//! that buffers entries in the page, and relays the drained buffer to
//! the terminal with a `[CLIENT-CONSOLE-*]` prefix.

use crate::client::WebdriverSession;
use crate::result::CruzarResult;
use console::style;
use serde::{Deserialize, Serialize};

/// Key under which the interceptor buffers entries in the page
pub const CONSOLE_BUFFER_KEY: &str = "__cruzarConsoleLog";

/// Installs the console interceptor. Returns `false` when it was
/// already installed on this page.
pub(crate) const INSTALL_READER_SCRIPT: &str = r#"
var key = "__cruzarConsoleLog";
if (window.console[key]) { return false; }
window.console[key] = [];
["log", "warn", "error"].forEach(function(type) {
    var original = window.console[type];
    window.console[type] = function(text) {
        window.console[key].push({ type: type, message: text && text.toString() });
        return original.apply(window.console, arguments);
    };
});
return true;
"#;

/// Returns the buffered entries and clears the buffer; `null` when the
/// interceptor was never installed.
pub(crate) const DRAIN_SCRIPT: &str = r#"
var key = "__cruzarConsoleLog";
if (window.console[key] === undefined) { return null; }
var logs = window.console[key];
window.console[key] = [];
return logs;
"#;

/// Console level of a captured entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    /// `console.log`
    Log,
    /// `console.warn`
    Warn,
    /// `console.error`
    Error,
}

impl ConsoleLevel {
    /// Relay prefix for terminal output
    #[must_use]
    pub const fn prefix(&self) -> &'static str {
        match self {
            Self::Log => "[CLIENT-CONSOLE-LOG]",
            Self::Warn => "[CLIENT-CONSOLE-WARN]",
            Self::Error => "[CLIENT-CONSOLE-ERROR]",
        }
    }
}

/// One captured console entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleEntry {
    /// Console level
    #[serde(rename = "type")]
    pub level: ConsoleLevel,
    /// Message text
    #[serde(default)]
    pub message: Option<String>,
}

/// Install the console interceptor on the current page
pub async fn install_reader(session: &dyn WebdriverSession) -> CruzarResult<bool> {
    let result = session.execute(INSTALL_READER_SCRIPT, &[]).await?;
    Ok(result.as_bool().unwrap_or(false))
}

/// Drain captured entries from the current page
pub async fn drain(session: &dyn WebdriverSession) -> CruzarResult<Vec<ConsoleEntry>> {
    let value = session.execute(DRAIN_SCRIPT, &[]).await?;
    if value.is_null() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// Drain captured entries and relay them to the terminal
pub async fn flush(session: &dyn WebdriverSession) -> CruzarResult<()> {
    for entry in drain(session).await? {
        println!("{}", format_entry(&entry));
    }
    Ok(())
}

/// Format one entry for terminal output
#[must_use]
pub fn format_entry(entry: &ConsoleEntry) -> String {
    let timestamp = chrono::Local::now().format("%H:%M:%S");
    let message = entry.message.as_deref().unwrap_or("");
    let line = format!("[{timestamp}] {} {message}", entry.level.prefix());
    match entry.level {
        ConsoleLevel::Log => style(line).white().to_string(),
        ConsoleLevel::Warn => style(line).yellow().to_string(),
        ConsoleLevel::Error => style(line).red().to_string(),
    }
}
