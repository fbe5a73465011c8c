//! Test doubles and fixtures for batch runner and watchdog tests.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::core::types::{Item, ItemOutcome, LedgerState, StatusCounts};
use crate::exit_codes;
use crate::host::seed_from_source;
use crate::io::config::{BatchConfig, write_config};
use crate::io::init::BatchPaths;
use crate::io::launcher::{HostExit, LaunchRequest, Launcher};
use crate::io::ledger_store::read_ledger;
use crate::io::processor::ItemProcessor;
use crate::runner::{BatchRunner, RunnerSettings};
use crate::watchdog::WatchdogSettings;

/// Fresh ledger state with all `ids` pending.
pub fn ledger_state(ids: &[&str], max_crashes: u32) -> LedgerState {
    LedgerState::new(
        "2026-01-01T00:00:00Z".to_string(),
        max_crashes,
        ids.iter().map(|id| Item::pending(*id)).collect(),
        0,
    )
}

/// Scripted behavior for one processor call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedStep {
    Succeed,
    Fail(String),
    /// Return `Err`, as a processor that could not even start would.
    Error(String),
    /// Never return: unwinds out of the runner like a dying host.
    Crash,
    RemoveSentinelThenSucceed(PathBuf),
    RemoveSentinelThenCrash(PathBuf),
}

/// Processor double. Per-item rules win over the queue; an empty queue
/// succeeds.
#[derive(Default)]
pub struct ScriptedProcessor {
    queue: RefCell<VecDeque<ScriptedStep>>,
    rules: BTreeMap<String, ScriptedStep>,
    observe_ledger: Option<PathBuf>,
    calls: RefCell<Vec<String>>,
    observed: RefCell<Vec<StatusCounts>>,
}

impl ScriptedProcessor {
    pub fn new(steps: Vec<ScriptedStep>) -> Self {
        Self {
            queue: RefCell::new(steps.into()),
            ..Self::default()
        }
    }

    /// Apply `step` every time `id` is processed.
    pub fn always(mut self, id: &str, step: ScriptedStep) -> Self {
        self.rules.insert(id.to_string(), step);
        self
    }

    /// Snapshot the on-disk ledger counts at every call.
    pub fn observing(mut self, ledger_path: &Path) -> Self {
        self.observe_ledger = Some(ledger_path.to_path_buf());
        self
    }

    /// Item ids in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn observed(&self) -> Vec<StatusCounts> {
        self.observed.borrow().clone()
    }

    fn next_step(&self, id: &str) -> ScriptedStep {
        if let Some(step) = self.rules.get(id) {
            return step.clone();
        }
        self.queue
            .borrow_mut()
            .pop_front()
            .unwrap_or(ScriptedStep::Succeed)
    }
}

impl ItemProcessor for ScriptedProcessor {
    fn process(&self, item: &Item) -> Result<ItemOutcome> {
        self.calls.borrow_mut().push(item.id.clone());
        if let Some(path) = &self.observe_ledger {
            let state = read_ledger(path)?.ok_or_else(|| anyhow!("ledger missing"))?;
            self.observed.borrow_mut().push(state.counts());
        }
        match self.next_step(&item.id) {
            ScriptedStep::Succeed => Ok(ItemOutcome::Success),
            ScriptedStep::Fail(msg) => Ok(ItemOutcome::Failure(msg)),
            ScriptedStep::Error(msg) => Err(anyhow!(msg)),
            ScriptedStep::Crash => panic!("host crashed while processing {}", item.id),
            ScriptedStep::RemoveSentinelThenSucceed(path) => {
                fs::remove_file(&path).context("remove sentinel")?;
                Ok(ItemOutcome::Success)
            }
            ScriptedStep::RemoveSentinelThenCrash(path) => {
                fs::remove_file(&path).context("remove sentinel")?;
                panic!("host crashed while processing {}", item.id)
            }
        }
    }
}

type LaunchFn = Box<dyn FnMut(&LaunchRequest) -> Result<HostExit>>;

/// Launcher double that plays back one closure per launch.
#[derive(Default)]
pub struct ScriptedLauncher {
    steps: RefCell<VecDeque<LaunchFn>>,
    launches: Cell<u32>,
}

impl ScriptedLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then<F>(self, step: F) -> Self
    where
        F: FnMut(&LaunchRequest) -> Result<HostExit> + 'static,
    {
        self.steps.borrow_mut().push_back(Box::new(step));
        self
    }

    pub fn launches(&self) -> u32 {
        self.launches.get()
    }
}

impl Launcher for ScriptedLauncher {
    fn launch(&self, request: &LaunchRequest) -> Result<HostExit> {
        self.launches.set(self.launches.get() + 1);
        let mut step = self
            .steps
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted launcher exhausted"))?;
        step(request)
    }
}

/// Launcher that runs the batch runner in-process.
///
/// A panic out of the processor is reported as a signal-terminated host;
/// runner errors map to their CLI exit code.
pub struct InProcessHost<'a> {
    fixture: &'a BatchFixture,
    processor: &'a ScriptedProcessor,
    launches: Cell<u32>,
}

impl<'a> InProcessHost<'a> {
    pub fn new(fixture: &'a BatchFixture, processor: &'a ScriptedProcessor) -> Self {
        Self {
            fixture,
            processor,
            launches: Cell::new(0),
        }
    }

    pub fn launches(&self) -> u32 {
        self.launches.get()
    }
}

impl Launcher for InProcessHost<'_> {
    fn launch(&self, _request: &LaunchRequest) -> Result<HostExit> {
        self.launches.set(self.launches.get() + 1);
        let paths = self.fixture.paths();
        let cfg = &self.fixture.config;
        let settings = self.fixture.runner_settings();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            BatchRunner::new(settings, self.processor)
                .run(|| seed_from_source(cfg, &paths, |_| Ok(false)))
        }));
        Ok(match result {
            Ok(Ok(_)) => HostExit::clean(),
            Ok(Err(err)) => HostExit {
                code: Some(exit_codes::for_error(&err)),
                timed_out: false,
            },
            Err(_) => HostExit::crashed(),
        })
    }
}

/// Scratch batch directory with a source folder and a config.
pub struct BatchFixture {
    temp: TempDir,
    pub config: BatchConfig,
}

impl BatchFixture {
    /// Create a fixture whose source folder holds empty files named `items`.
    ///
    /// The processor command is `true`, no relaunch delay.
    pub fn new(items: &[&str]) -> Result<Self> {
        let temp = tempfile::tempdir().context("tempdir")?;
        let mut config = BatchConfig::default();
        config.host.relaunch_delay_ms = 0;
        config.processor.command = vec!["true".to_string()];
        let fixture = Self { temp, config };
        let source = fixture.paths().source_dir;
        fs::create_dir_all(&source).context("create source dir")?;
        for item in items {
            fs::write(source.join(item), b"").with_context(|| format!("write {item}"))?;
        }
        Ok(fixture)
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn config_path(&self) -> PathBuf {
        self.root().join("batchkeeper.toml")
    }

    pub fn paths(&self) -> BatchPaths {
        BatchPaths::resolve(&self.config_path(), &self.config)
    }

    pub fn write_config(&self) -> Result<()> {
        write_config(&self.config_path(), &self.config)
    }

    pub fn runner_settings(&self) -> RunnerSettings {
        RunnerSettings::from_config(&self.config, &self.paths())
    }

    pub fn watchdog_settings(&self) -> WatchdogSettings {
        WatchdogSettings::from_config(&self.config, &self.paths())
    }

    pub fn launch_request(&self) -> LaunchRequest {
        LaunchRequest {
            program: PathBuf::from("in-process"),
            args: Vec::new(),
            workdir: self.root().to_path_buf(),
            timeout: None,
        }
    }

    pub fn read_ledger(&self) -> Result<LedgerState> {
        read_ledger(&self.paths().ledger_path)?.ok_or_else(|| anyhow!("ledger missing"))
    }
}
