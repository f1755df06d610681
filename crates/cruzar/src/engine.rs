//! Spec-execution engine.
//!
//! The orchestration core only needs a small surface from a
//! spec-execution engine: hook registration scoped to suite or spec
//! granularity, marking units skipped with a reason, an active-unit
//! query, and root execution returning the aggregated failures. This
//! module provides that surface as an explicit adapter — registration
//! through [`SpecEnv`], execution through [`Engine::execute`] — instead
//! of patching a third-party framework's internals.
//!
//! Execution is a sequential depth-first walk. The active suite/spec
//! reference is updated synchronously before any hook or body is
//! awaited and every future is driven to completion before the walk
//! advances, so the unit a late asynchronous failure belongs to is
//! deterministic. A failure that cannot be routed to an active unit is
//! a fatal, unrecoverable run error.

use crate::capability::BrowserKind;
use crate::context::RunHandle;
use crate::reporter::{ConsoleReporter, SpecReporter};
use crate::result::{CruzarError, CruzarResult};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::{Duration, Instant};

/// Identifier of a unit in the suite tree
pub type UnitId = usize;

/// Future returned by hooks and spec bodies
pub type HookFuture = BoxFuture<'static, CruzarResult<()>>;

/// Type-erased hook or spec body
pub type HookFn = Arc<dyn Fn(RunHandle) -> HookFuture + Send + Sync>;

/// Reason used when a unit under a suite with a failed before-all hook
/// was not explicitly pended
pub const SKIPPED_AFTER_SUITE_FAILURE: &str = "Skipped because of a failure in a beforeAll hook";

/// Reason used by [`SpecEnv::it_for_browsers`]
pub const DISABLED_FOR_BROWSER: &str = "Disabled for the current browser.";

const ROOT: UnitId = 0;

/// Suite or leaf spec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    /// Grouping node; owns hooks and children
    Suite,
    /// Leaf test; owns a body
    Spec,
}

/// Hook registration scopes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    /// Once before a suite's children
    BeforeAll,
    /// Before every spec under the suite
    BeforeEach,
    /// After every spec under the suite
    AfterEach,
    /// Once after a suite's children, unconditionally
    AfterAll,
}

/// Where a failure originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// A spec body failed; a real failure to propagate
    Spec,
    /// A lifecycle hook failed; routed to the unit active at the time
    Hook,
}

/// One recorded failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Full description path of the owning unit
    pub unit: String,
    /// Failure message
    pub message: String,
    /// Debug-formatted detail, when available
    pub detail: Option<String>,
    /// Failure classification
    pub kind: FailureKind,
}

impl FailureRecord {
    /// Create a spec-body failure record
    #[must_use]
    pub fn spec(unit: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            message: message.into(),
            detail: None,
            kind: FailureKind::Spec,
        }
    }

    /// Create a hook failure record
    #[must_use]
    pub fn hook(unit: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            message: message.into(),
            detail: None,
            kind: FailureKind::Hook,
        }
    }

    /// Attach detail text
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Aggregated outcome of one execution
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Number of specs in the tree
    pub total: usize,
    /// Specs that passed
    pub passed: usize,
    /// Specs that failed
    pub failed: usize,
    /// Specs skipped with a reason
    pub skipped: usize,
    /// All recorded failures, spec and hook alike
    pub failures: Vec<FailureRecord>,
    /// Wall-clock duration of the execution
    pub duration: Duration,
}

impl RunSummary {
    /// Whether no failures were recorded
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failures.is_empty()
    }
}

struct Unit {
    kind: UnitKind,
    description: String,
    parent: Option<UnitId>,
    children: Vec<UnitId>,
    body: Option<HookFn>,
    before_all: Vec<HookFn>,
    before_each: Vec<HookFn>,
    after_each: Vec<HookFn>,
    after_all: Vec<HookFn>,
    pending: Option<String>,
}

impl Unit {
    fn new(kind: UnitKind, description: String, parent: Option<UnitId>) -> Self {
        Self {
            kind,
            description,
            parent,
            children: Vec::new(),
            body: None,
            before_all: Vec::new(),
            before_each: Vec::new(),
            after_each: Vec::new(),
            after_all: Vec::new(),
            pending: None,
        }
    }
}

struct EngineState {
    units: Vec<Unit>,
    active_suite: Option<UnitId>,
    active_spec: Option<UnitId>,
    registration_browser: Option<BrowserKind>,
}

/// Suite tree owner and executor
pub struct Engine {
    state: Mutex<EngineState>,
    reporter: Mutex<Arc<dyn SpecReporter>>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Engine")
            .field("units", &state.units.len())
            .field("active_suite", &state.active_suite)
            .field("active_spec", &state.active_spec)
            .finish()
    }
}

impl Engine {
    /// Create an engine with an empty tree and the default console
    /// reporter
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EngineState {
                units: vec![Unit::new(UnitKind::Suite, String::new(), None)],
                active_suite: None,
                active_spec: None,
                registration_browser: None,
            }),
            reporter: Mutex::new(Arc::new(ConsoleReporter::new())),
        }
    }

    /// Replace the reporter
    pub fn set_reporter(&self, reporter: Arc<dyn SpecReporter>) {
        *self
            .reporter
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = reporter;
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn reporter(&self) -> Arc<dyn SpecReporter> {
        Arc::clone(
            &self
                .reporter
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        )
    }

    /// Drop the whole tree, keeping only an empty top suite. Called at
    /// the start of every run so sequential runs do not accumulate
    /// units.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.units.clear();
        state
            .units
            .push(Unit::new(UnitKind::Suite, String::new(), None));
        state.active_suite = None;
        state.active_spec = None;
        state.registration_browser = None;
    }

    /// Registration handle rooted at the top suite
    #[must_use]
    pub fn root_env(&self) -> SpecEnv<'_> {
        SpecEnv {
            engine: self,
            current: ROOT,
        }
    }

    /// The browser whose units are currently being registered
    #[must_use]
    pub fn registration_browser(&self) -> Option<BrowserKind> {
        self.lock().registration_browser
    }

    /// Set the browser for subsequent registrations
    pub fn set_registration_browser(&self, browser: Option<BrowserKind>) {
        self.lock().registration_browser = browser;
    }

    fn add_unit(&self, parent: UnitId, kind: UnitKind, description: &str) -> UnitId {
        let mut state = self.lock();
        let id = state.units.len();
        state
            .units
            .push(Unit::new(kind, description.to_string(), Some(parent)));
        state.units[parent].children.push(id);
        id
    }

    fn add_hook(&self, suite: UnitId, kind: HookKind, hook: HookFn) {
        let mut state = self.lock();
        let unit = &mut state.units[suite];
        match kind {
            HookKind::BeforeAll => unit.before_all.push(hook),
            HookKind::BeforeEach => unit.before_each.push(hook),
            HookKind::AfterEach => unit.after_each.push(hook),
            HookKind::AfterAll => unit.after_all.push(hook),
        }
    }

    /// Mark a unit skipped with a reason. Pending suites skip their
    /// whole subtree; pending specs keep their first reason.
    pub fn pend_unit(&self, unit: UnitId, reason: &str) {
        let mut state = self.lock();
        if let Some(u) = state.units.get_mut(unit) {
            if u.pending.is_none() {
                u.pending = Some(reason.to_string());
            }
        }
    }

    /// All descendants of a suite, depth-first
    #[must_use]
    pub fn all_children(&self, suite: UnitId) -> Vec<UnitId> {
        let state = self.lock();
        let mut result = state
            .units
            .get(suite)
            .map(|u| u.children.clone())
            .unwrap_or_default();
        let mut index = 0;
        while index < result.len() {
            let unit = result[index];
            result.extend(state.units[unit].children.iter().copied());
            index += 1;
        }
        result
    }

    /// The suite whose hooks/children are currently executing
    #[must_use]
    pub fn current_suite(&self) -> Option<UnitId> {
        self.lock().active_suite.filter(|&id| id != ROOT)
    }

    /// The spec currently executing, if any
    #[must_use]
    pub fn current_spec(&self) -> Option<UnitId> {
        self.lock().active_spec
    }

    /// Kind of a unit
    #[must_use]
    pub fn unit_kind(&self, unit: UnitId) -> Option<UnitKind> {
        self.lock().units.get(unit).map(|u| u.kind)
    }

    /// Space-joined full description of a unit, excluding the top suite
    #[must_use]
    pub fn full_name(&self, unit: UnitId) -> String {
        let state = self.lock();
        let mut segments = Vec::new();
        let mut cursor = Some(unit);
        while let Some(id) = cursor {
            if id == ROOT {
                break;
            }
            let u = &state.units[id];
            segments.push(u.description.clone());
            cursor = u.parent;
        }
        segments.reverse();
        segments.join(" ")
    }

    /// Descriptions from the outermost suite down to the currently
    /// executing spec; `None` when no spec is executing
    #[must_use]
    pub fn active_description_chain(&self) -> Option<Vec<String>> {
        let state = self.lock();
        let spec = state.active_spec?;
        let mut segments = Vec::new();
        let mut cursor = Some(spec);
        while let Some(id) = cursor {
            if id == ROOT {
                break;
            }
            let u = &state.units[id];
            segments.push(u.description.clone());
            cursor = u.parent;
        }
        segments.reverse();
        Some(segments)
    }

    /// Filesystem-safe slash-joined path of the currently executing
    /// spec: each segment is stripped to letters, digits, spaces and
    /// hyphens (case-insensitive)
    #[must_use]
    pub fn current_spec_path(&self) -> Option<String> {
        self.active_description_chain().map(|segments| {
            segments
                .iter()
                .map(|s| sanitize_spec_segment(s))
                .collect::<Vec<_>>()
                .join("/")
        })
    }

    /// Execute the tree depth-first and aggregate the outcome
    pub async fn execute(&self, handle: RunHandle) -> CruzarResult<RunSummary> {
        let started = Instant::now();
        let reporter = self.reporter();
        let roots = { self.lock().units[ROOT].children.clone() };
        let mut summary = RunSummary::default();

        {
            self.lock().active_suite = Some(ROOT);
        }
        for unit in roots {
            match self.unit_kind(unit) {
                Some(UnitKind::Suite) => {
                    self.run_suite(unit, &handle, &reporter, &mut summary, &[], &[])
                        .await?;
                }
                Some(UnitKind::Spec) => {
                    self.run_spec(unit, &handle, &reporter, &mut summary, &[], &[])
                        .await?;
                }
                None => {}
            }
        }
        {
            let mut state = self.lock();
            state.active_suite = None;
            state.active_spec = None;
        }

        summary.duration = started.elapsed();
        reporter.run_done(&summary);
        Ok(summary)
    }

    fn run_suite<'a>(
        &'a self,
        id: UnitId,
        handle: &'a RunHandle,
        reporter: &'a Arc<dyn SpecReporter>,
        summary: &'a mut RunSummary,
        inherited_before: &'a [HookFn],
        inherited_after: &'a [HookFn],
    ) -> BoxFuture<'a, CruzarResult<()>> {
        Box::pin(async move {
            let (pending, children, before_all, after_all, before_each, after_each) = {
                let state = self.lock();
                let unit = &state.units[id];
                (
                    unit.pending.clone(),
                    unit.children.clone(),
                    unit.before_all.clone(),
                    unit.after_all.clone(),
                    unit.before_each.clone(),
                    unit.after_each.clone(),
                )
            };

            if let Some(reason) = pending {
                self.skip_subtree(id, &reason, reporter, summary);
                return Ok(());
            }

            let previous = {
                let mut state = self.lock();
                let previous = state.active_suite;
                state.active_suite = Some(id);
                previous
            };

            let mut suite_failed = false;
            for hook in &before_all {
                if self.run_hook(hook, handle, summary).await? {
                    suite_failed = true;
                    break;
                }
            }

            // beforeEach runs parent-first, afterEach child-first
            let merged_before: Vec<HookFn> = inherited_before
                .iter()
                .chain(before_each.iter())
                .cloned()
                .collect();
            let merged_after: Vec<HookFn> = after_each
                .iter()
                .chain(inherited_after.iter())
                .cloned()
                .collect();

            for child in children {
                if suite_failed {
                    self.skip_subtree(child, SKIPPED_AFTER_SUITE_FAILURE, reporter, summary);
                    continue;
                }
                match self.unit_kind(child) {
                    Some(UnitKind::Suite) => {
                        self.run_suite(child, handle, reporter, summary, &merged_before, &merged_after)
                            .await?;
                    }
                    Some(UnitKind::Spec) => {
                        self.run_spec(child, handle, reporter, summary, &merged_before, &merged_after)
                            .await?;
                    }
                    None => {}
                }
            }

            // afterAll runs even when a beforeAll hook failed, so
            // teardown happens exactly once per scope
            for hook in &after_all {
                let _ = self.run_hook(hook, handle, summary).await?;
            }

            {
                self.lock().active_suite = previous;
            }
            Ok(())
        })
    }

    async fn run_spec(
        &self,
        id: UnitId,
        handle: &RunHandle,
        reporter: &Arc<dyn SpecReporter>,
        summary: &mut RunSummary,
        before_each: &[HookFn],
        after_each: &[HookFn],
    ) -> CruzarResult<()> {
        let (pending, body) = {
            let state = self.lock();
            let unit = &state.units[id];
            (unit.pending.clone(), unit.body.clone())
        };
        let full_name = self.full_name(id);

        summary.total += 1;
        if let Some(reason) = pending {
            summary.skipped += 1;
            reporter.spec_skipped(&full_name, &reason);
            return Ok(());
        }

        {
            self.lock().active_spec = Some(id);
        }
        reporter.spec_started(&full_name);
        let spec_started = Instant::now();

        let mut failed = false;
        for hook in before_each {
            if self.run_hook(hook, handle, summary).await? {
                failed = true;
                break;
            }
        }

        if !failed {
            if let Some(body) = body {
                if let Err(err) = body(handle.clone()).await {
                    let record = FailureRecord::spec(&full_name, err.to_string())
                        .with_detail(format!("{err:?}"));
                    reporter.spec_failed(&full_name, &record);
                    summary.failures.push(record);
                    failed = true;
                }
            }
        }

        // afterEach always runs, even after a failed beforeEach or body
        for hook in after_each {
            if self.run_hook(hook, handle, summary).await? {
                failed = true;
            }
        }

        // A spec pended mid-run (e.g. by a failed init hook) reports as
        // skipped; the cause is already recorded against the spec
        let pended_now = { self.lock().units[id].pending.clone() };
        if let Some(reason) = pended_now {
            summary.skipped += 1;
            reporter.spec_skipped(&full_name, &reason);
        } else if failed {
            summary.failed += 1;
        } else {
            summary.passed += 1;
            reporter.spec_passed(&full_name, spec_started.elapsed());
        }

        {
            self.lock().active_spec = None;
        }
        Ok(())
    }

    /// Run a hook and route a failure to the active unit. Returns
    /// whether the hook failed; a failure with no active unit is fatal.
    async fn run_hook(
        &self,
        hook: &HookFn,
        handle: &RunHandle,
        summary: &mut RunSummary,
    ) -> CruzarResult<bool> {
        match hook(handle.clone()).await {
            Ok(()) => Ok(false),
            Err(err) => {
                let unit = {
                    let state = self.lock();
                    state
                        .active_spec
                        .or(state.active_suite.filter(|&id| id != ROOT))
                };
                match unit {
                    Some(unit) => {
                        let record = FailureRecord::hook(self.full_name(unit), err.to_string())
                            .with_detail(format!("{err:?}"));
                        tracing::error!(unit = %record.unit, error = %err, "lifecycle hook failed");
                        summary.failures.push(record);
                        Ok(true)
                    }
                    None => Err(CruzarError::fatal(format!(
                        "hook failure could not be routed to an active unit: {err}"
                    ))),
                }
            }
        }
    }

    /// Count a unit's subtree (or the unit itself, for specs) as
    /// skipped. Units pended individually keep their own reason.
    fn skip_subtree(
        &self,
        unit: UnitId,
        default_reason: &str,
        reporter: &Arc<dyn SpecReporter>,
        summary: &mut RunSummary,
    ) {
        let mut stack = vec![unit];
        while let Some(id) = stack.pop() {
            let (kind, pending, children) = {
                let state = self.lock();
                let u = &state.units[id];
                (u.kind, u.pending.clone(), u.children.clone())
            };
            match kind {
                UnitKind::Suite => stack.extend(children),
                UnitKind::Spec => {
                    summary.total += 1;
                    summary.skipped += 1;
                    let reason = pending.unwrap_or_else(|| default_reason.to_string());
                    reporter.spec_skipped(&self.full_name(id), &reason);
                }
            }
        }
    }
}

/// Registration handle scoped to one suite
pub struct SpecEnv<'e> {
    engine: &'e Engine,
    current: UnitId,
}

impl std::fmt::Debug for SpecEnv<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpecEnv")
            .field("current", &self.current)
            .finish()
    }
}

impl SpecEnv<'_> {
    /// The engine this environment registers into
    #[must_use]
    pub fn engine(&self) -> &Engine {
        self.engine
    }

    /// The suite units are currently registered under
    #[must_use]
    pub fn current_suite(&self) -> UnitId {
        self.current
    }

    /// Register a nested suite and populate it through `f`
    pub fn describe(&mut self, description: &str, f: impl FnOnce(&mut SpecEnv<'_>)) -> UnitId {
        let id = self
            .engine
            .add_unit(self.current, UnitKind::Suite, description);
        let mut child = SpecEnv {
            engine: self.engine,
            current: id,
        };
        f(&mut child);
        id
    }

    /// Register a spec
    pub fn it<F>(&mut self, description: &str, body: F) -> UnitId
    where
        F: Fn(RunHandle) -> HookFuture + Send + Sync + 'static,
    {
        let id = self
            .engine
            .add_unit(self.current, UnitKind::Spec, description);
        self.engine.lock().units[id].body = Some(Arc::new(body));
        id
    }

    /// Register a spec that only runs for the listed browsers; for any
    /// other capability it is pended at registration time. An empty
    /// list behaves like [`SpecEnv::it`].
    pub fn it_for_browsers<F>(
        &mut self,
        description: &str,
        browsers: &[BrowserKind],
        body: F,
    ) -> UnitId
    where
        F: Fn(RunHandle) -> HookFuture + Send + Sync + 'static,
    {
        let id = self.it(description, body);
        if !browsers.is_empty() {
            let focused = self
                .engine
                .registration_browser()
                .is_some_and(|current| browsers.contains(&current));
            if !focused {
                self.engine.pend_unit(id, DISABLED_FOR_BROWSER);
            }
        }
        id
    }

    /// Register a suite-scoped before-all hook
    pub fn before_all<F>(&mut self, hook: F)
    where
        F: Fn(RunHandle) -> HookFuture + Send + Sync + 'static,
    {
        self.engine
            .add_hook(self.current, HookKind::BeforeAll, Arc::new(hook));
    }

    /// Register a spec-scoped before-each hook
    pub fn before_each<F>(&mut self, hook: F)
    where
        F: Fn(RunHandle) -> HookFuture + Send + Sync + 'static,
    {
        self.engine
            .add_hook(self.current, HookKind::BeforeEach, Arc::new(hook));
    }

    /// Register a spec-scoped after-each hook
    pub fn after_each<F>(&mut self, hook: F)
    where
        F: Fn(RunHandle) -> HookFuture + Send + Sync + 'static,
    {
        self.engine
            .add_hook(self.current, HookKind::AfterEach, Arc::new(hook));
    }

    /// Register a suite-scoped after-all hook
    pub fn after_all<F>(&mut self, hook: F)
    where
        F: Fn(RunHandle) -> HookFuture + Send + Sync + 'static,
    {
        self.engine
            .add_hook(self.current, HookKind::AfterAll, Arc::new(hook));
    }
}

/// Strip a description segment to `[a-z0-9 -]` (case-insensitive).
/// Slashes are reserved for joining segments and are stripped too.
#[must_use]
pub fn sanitize_spec_segment(segment: &str) -> String {
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| regex::Regex::new(r"(?i)[^a-z0-9 -]").expect("spec-path pattern is valid"));
    pattern.replace_all(segment, "").into_owned()
}
