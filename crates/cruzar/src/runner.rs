//! Run coordination.
//!
//! [`TestRunner`] is the sole externally invoked entry point: it starts
//! the local file server, discovers spec files, registers every
//! capability through the scheduler, executes the aggregated suite tree
//! and guarantees the file server is stopped regardless of outcome.
//! Exactly one of three terminal outcomes is produced: a clean summary,
//! a [`CruzarError::FailedExpectations`] carrying the failure records,
//! or a fatal error logged with full detail.

use crate::client::WebdriverClient;
use crate::config::{files_by_glob, RunnerConfig};
use crate::context::{RunContext, RunHandle, RunPhase};
use crate::engine::{Engine, RunSummary, SpecEnv};
use crate::reporter::SpecReporter;
use crate::result::{CruzarError, CruzarResult};
use crate::scheduler::Scheduler;
use crate::server::FileServer;
use crate::session::SessionManager;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Command-line options for embedding binaries
#[derive(Debug, Clone, Parser)]
#[command(name = "cruzar", about = "Cross-browser UI test orchestration")]
pub struct RunnerOptions {
    /// Path to the configuration file
    pub config_path: PathBuf,

    /// Extension configuration merged over the base configuration
    #[arg(long = "config-ex")]
    pub config_ex_path: Option<PathBuf>,

    /// Clear baseline screenshot directories before running
    #[arg(long)]
    pub update_baseline_images: bool,
}

impl RunnerOptions {
    /// Load and merge the configured files
    pub fn load_config(&self) -> CruzarResult<RunnerConfig> {
        let config = RunnerConfig::from_file(&self.config_path)?;
        match &self.config_ex_path {
            Some(extension) => Ok(config.merge(RunnerConfig::from_file(extension)?)),
            None => Ok(config),
        }
    }
}

/// One loadable spec module. Rust cannot load spec code from files at
/// runtime the way a scripting runner does, so modules register
/// programmatically and carry the source path the spec globs select
/// them by.
pub trait SpecModule: Send + Sync {
    /// Source file this module belongs to, relative to the root dir
    fn source_path(&self) -> &Path;

    /// Populate the suite tree under the active capability
    fn register(&self, env: &mut SpecEnv<'_>);
}

/// [`SpecModule`] built from a path and a registration function
pub struct FnSpecModule {
    path: PathBuf,
    register: Box<dyn Fn(&mut SpecEnv<'_>) + Send + Sync>,
}

impl FnSpecModule {
    /// Create a module from its source path and registration function
    pub fn new(
        path: impl Into<PathBuf>,
        register: impl Fn(&mut SpecEnv<'_>) + Send + Sync + 'static,
    ) -> Self {
        Self {
            path: path.into(),
            register: Box::new(register),
        }
    }
}

impl std::fmt::Debug for FnSpecModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnSpecModule")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SpecModule for FnSpecModule {
    fn source_path(&self) -> &Path {
        &self.path
    }

    fn register(&self, env: &mut SpecEnv<'_>) {
        (self.register)(env);
    }
}

/// Top-level run coordinator
pub struct TestRunner {
    config: Arc<RunnerConfig>,
    context: Arc<RunContext>,
    server: Arc<FileServer>,
    engine: Arc<Engine>,
    sessions: Arc<SessionManager>,
    scheduler: Scheduler,
    modules: Vec<Arc<dyn SpecModule>>,
    update_baseline_images: bool,
    running: AtomicBool,
}

impl std::fmt::Debug for TestRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestRunner")
            .field("context", &self.context)
            .field("modules", &self.modules.len())
            .finish_non_exhaustive()
    }
}

impl TestRunner {
    /// Create a runner over a validated configuration and an
    /// automation client
    pub fn new(config: RunnerConfig, client: Arc<dyn WebdriverClient>) -> CruzarResult<Self> {
        let config = config.normalized();
        config.validate()?;
        let config = Arc::new(config);
        let context = Arc::new(RunContext::new());
        let server = Arc::new(FileServer::new());
        let engine = Arc::new(Engine::new());
        let sessions = Arc::new(SessionManager::new(
            client,
            Arc::clone(&config),
            Arc::clone(&context),
            Arc::clone(&server),
        ));
        let scheduler = Scheduler::new(
            Arc::clone(&config),
            Arc::clone(&context),
            Arc::clone(&sessions),
            Arc::clone(&engine),
        );

        Ok(Self {
            config,
            context,
            server,
            engine,
            sessions,
            scheduler,
            modules: Vec::new(),
            update_baseline_images: false,
            running: AtomicBool::new(false),
        })
    }

    /// Register a spec module
    #[must_use]
    pub fn with_module(mut self, module: Arc<dyn SpecModule>) -> Self {
        self.modules.push(module);
        self
    }

    /// Replace the reporter
    #[must_use]
    pub fn with_reporter(self, reporter: Arc<dyn SpecReporter>) -> Self {
        self.engine.set_reporter(reporter);
        self
    }

    /// Request baseline-image clearing before the run
    #[must_use]
    pub fn with_update_baseline_images(mut self, update: bool) -> Self {
        self.update_baseline_images = update;
        self
    }

    /// The resolved configuration
    #[must_use]
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// The run context
    #[must_use]
    pub fn context(&self) -> &RunContext {
        &self.context
    }

    /// The local file server
    #[must_use]
    pub fn file_server(&self) -> &FileServer {
        &self.server
    }

    /// Filesystem-safe path of the currently executing spec; `None`
    /// when no spec is executing
    #[must_use]
    pub fn current_spec_path(&self) -> Option<String> {
        self.engine.current_spec_path()
    }

    /// Execute the configured run. A second concurrent call fails
    /// immediately without starting a second file server or touching
    /// any capability.
    pub async fn run(&self) -> CruzarResult<RunSummary> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(CruzarError::AlreadyRunning);
        }

        let outcome = self.run_guarded().await;
        self.context.reset();
        self.running.store(false, Ordering::SeqCst);

        match outcome {
            Ok(summary) if summary.all_passed() => Ok(summary),
            // Reporter-domain outcome: the reporter already printed the
            // failures, so they are raised unchanged and never re-logged
            Ok(summary) => Err(CruzarError::FailedExpectations {
                failures: summary.failures,
            }),
            Err(err @ CruzarError::FailedExpectations { .. }) => Err(err),
            Err(err) => {
                tracing::error!(error = %err, detail = ?err, "test run failed");
                Err(CruzarError::fatal(err.to_string()))
            }
        }
    }

    async fn run_guarded(&self) -> CruzarResult<RunSummary> {
        self.context.set_phase(RunPhase::Starting)?;
        // A file-server startup failure aborts the whole run before any
        // capability is touched
        self.server
            .start(self.config.root_dir.clone(), None)
            .await?;

        let result = self.run_capabilities().await;

        // Stopping is entered unconditionally: the server is released
        // whatever happened above
        let _ = self.context.set_phase(RunPhase::Stopping);
        self.server.stop().await;
        let _ = self.context.set_phase(RunPhase::Idle);
        result
    }

    async fn run_capabilities(&self) -> CruzarResult<RunSummary> {
        self.clear_baseline_images()?;

        let files = files_by_glob(&self.config.specs, &self.config.root_dir)?;
        tracing::debug!(files = files.len(), "discovered spec files");

        self.engine.reset();
        {
            let mut env = self.engine.root_env();
            for capability in &self.config.capabilities {
                let suite_name = format!("[{}]", capability.default_name());
                env.describe(&suite_name, |suite_env| {
                    self.scheduler
                        .register_for_capability(suite_env, capability, |inner| {
                            for module in &self.modules {
                                if module_matches(module.as_ref(), &files, &self.config.root_dir) {
                                    module.register(inner);
                                }
                            }
                        });
                });
            }
        }

        self.context.set_phase(RunPhase::Running)?;
        let handle = RunHandle {
            config: Arc::clone(&self.config),
            context: Arc::clone(&self.context),
            sessions: Arc::clone(&self.sessions),
            engine: Arc::clone(&self.engine),
            server: Arc::clone(&self.server),
        };
        self.engine.execute(handle).await
    }

    /// Remove baseline screenshot directories, only when explicitly
    /// requested and a screenshot configuration exists
    fn clear_baseline_images(&self) -> CruzarResult<()> {
        if !self.update_baseline_images {
            return Ok(());
        }
        let Some(shots) = &self.config.screenshots else {
            return Ok(());
        };
        for dir in [&shots.screenshot_root, &shots.failed_comparisons_root] {
            match std::fs::remove_dir_all(dir) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// Whether a module's source path is among the glob-discovered files
fn module_matches(module: &dyn SpecModule, files: &[PathBuf], root_dir: &Path) -> bool {
    let path = module.source_path();
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root_dir.join(path)
    };
    files.iter().any(|file| file == &absolute)
}
