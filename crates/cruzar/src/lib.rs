//! Cruzar: cross-browser UI test orchestration.
//!
//! Given a declarative configuration (target capabilities, spec files,
//! page-initialization policy), Cruzar drives one remote webdriver
//! session per capability, initializes test pages with fixtures, runs a
//! behavioral spec suite against them, relays visual/console
//! diagnostics, and aggregates pass/fail results — while tolerating
//! flaky driver startup and shutdown.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      CRUZAR Architecture                         │
//! ├──────────────────────────────────────────────────────────────────┤
//! │   ┌────────────┐    ┌────────────┐    ┌─────────────────┐        │
//! │   │ TestRunner │───►│ Scheduler  │───►│ SessionManager  │        │
//! │   │ (run/stop) │    │ (hooks per │    │ (one session    │        │
//! │   │            │    │ capability)│    │ per capability) │        │
//! │   └─────┬──────┘    └─────┬──────┘    └────────┬────────┘        │
//! │         │                 │                    │                 │
//! │         ▼                 ▼                    ▼                 │
//! │   ┌────────────┐    ┌────────────┐    ┌─────────────────┐        │
//! │   │ FileServer │    │   Engine   │    │ WebdriverClient │        │
//! │   │ (test page │    │ (suite tree│    │ (trait seam to  │        │
//! │   │  serving)  │    │  walker)   │    │  the backend)   │        │
//! │   └────────────┘    └────────────┘    └─────────────────┘        │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The automation protocol itself, the assertion library and screenshot
//! pixel comparison are deliberately out of scope: they live behind the
//! [`client::WebdriverClient`] seam and thin configuration surfaces.

#![warn(missing_docs)]

pub mod capability;
pub mod client;
pub mod config;
pub mod console_log;
pub mod context;
pub mod engine;
pub mod reporter;
pub mod result;
pub mod runner;
pub mod scheduler;
pub mod server;
pub mod session;

pub use capability::{BrowserKind, Capability, DesiredCapabilities};
pub use client::{
    wait_until, DriverFault, MockClient, MockEndFailure, WebdriverClient, WebdriverSession,
};
pub use config::{PageInitMode, RunnerConfig, ScreenshotConfig, ViewportSize, WebdriverEndpoint};
pub use console_log::{ConsoleEntry, ConsoleLevel};
pub use context::{RunContext, RunHandle, RunPhase};
pub use engine::{
    Engine, FailureKind, FailureRecord, HookKind, RunSummary, SpecEnv, UnitKind,
};
pub use reporter::{ConsoleReporter, NullReporter, SpecReporter};
pub use result::{CruzarError, CruzarResult};
pub use runner::{FnSpecModule, RunnerOptions, SpecModule, TestRunner};
pub use scheduler::{Scheduler, INIT_FAILURE_REASON};
pub use server::FileServer;
pub use session::{
    is_benign_shutdown_fault, BenignFaultMatcher, BrowserInfo, ScreenMetrics, SessionManager,
    WindowMetrics, BENIGN_SHUTDOWN_FAULTS,
};
