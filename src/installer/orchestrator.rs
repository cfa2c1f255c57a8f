use std::fs;
use std::mem;
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::installer::fetcher::{Fetcher, ScratchRegistry, Transport};
use crate::installer::gate::should_install;
use crate::installer::manifest::ManifestStore;
use crate::installer::process::ProcessRunner;
use crate::installer::stages::{
    AuxiliaryStage, InterpreterStage, RendererStage, RuntimeDownload, RuntimeStage, Stage,
    StageContext, StageResult, StageStatus,
};
use crate::model::layout::InstallLayout;
use crate::model::sources::Sources;
use crate::model::toolchain::{BundleId, DesiredConfiguration, Slot, SlotValue};

/// Receives coarse `(percent, label)` checkpoints from a run.
pub trait ProgressReporter: Send {
    fn report(&self, percent: u8, label: &str);
}

impl<F> ProgressReporter for F
where
    F: Fn(u8, &str) + Send,
{
    fn report(&self, percent: u8, label: &str) {
        self(percent, label)
    }
}

#[derive(Debug, Default)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _percent: u8, _label: &str) {}
}

/// Linear run states. Every phase is entered on every run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    InstallInterpreter,
    DownloadRuntime,
    SetupRuntime,
    InstallAuxiliaries,
    InstallRenderer,
    Cleanup,
    Done,
}

impl Phase {
    pub const SEQUENCE: [Phase; 8] = [
        Phase::Init,
        Phase::InstallInterpreter,
        Phase::DownloadRuntime,
        Phase::SetupRuntime,
        Phase::InstallAuxiliaries,
        Phase::InstallRenderer,
        Phase::Cleanup,
        Phase::Done,
    ];

    /// Progress checkpoint reported when the phase starts.
    pub fn percent(self) -> Option<u8> {
        match self {
            Phase::Init => None,
            Phase::InstallInterpreter => Some(0),
            Phase::DownloadRuntime => Some(20),
            Phase::SetupRuntime => Some(40),
            Phase::InstallAuxiliaries => Some(60),
            Phase::InstallRenderer => Some(80),
            Phase::Cleanup => Some(90),
            Phase::Done => Some(100),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Phase::Init => "Preparing",
            Phase::InstallInterpreter => "Getting Python",
            Phase::DownloadRuntime => "Getting Rez",
            Phase::SetupRuntime => "Installing Rez",
            Phase::InstallAuxiliaries => "Getting Additional Dependencies",
            Phase::InstallRenderer => "Getting Graphviz",
            Phase::Cleanup => "Cleanup",
            Phase::Done => "Done",
        }
    }
}

/// Requested vs recorded value of one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotState {
    pub slot: Slot,
    pub requested: SlotValue,
    pub recorded: Option<SlotValue>,
    pub needs_install: bool,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub bundle: BundleId,
    pub results: Vec<StageResult>,
    pub scratch_released: usize,
}

impl RunReport {
    pub fn success(&self) -> bool {
        self.results.iter().all(StageResult::success)
    }

    pub fn result(&self, slot: Slot) -> Option<&StageResult> {
        self.results.iter().find(|result| result.slot == slot)
    }

    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|result| !result.success()).count()
    }

    pub fn summary(&self) -> String {
        let count = |wanted: fn(&StageStatus) -> bool| {
            self.results
                .iter()
                .filter(|result| wanted(&result.status))
                .count()
        };
        format!(
            "bundle {}: {} installed, {} up to date, {} failed",
            self.bundle,
            count(|status| matches!(status, StageStatus::Installed)),
            count(|status| matches!(status, StageStatus::Skipped)),
            self.failed_count()
        )
    }

    /// One line per failed slot or unsaved manifest write.
    pub fn problem_notifications(&self) -> Vec<String> {
        self.results
            .iter()
            .filter_map(|result| match result.error() {
                Some(err) => Some(format!("{}: {err}", result.slot)),
                None => result
                    .persist_error
                    .as_ref()
                    .map(|err| format!("{}: installed, manifest not saved: {err}", result.slot)),
            })
            .collect()
    }
}

/// Drives the four stages for one desired configuration.
pub struct Orchestrator {
    desired: DesiredConfiguration,
    layout: InstallLayout,
    sources: Sources,
    store: ManifestStore,
    fetcher: Fetcher,
    runner: Box<dyn ProcessRunner>,
    progress: Box<dyn ProgressReporter>,
    phase: Phase,
}

impl Orchestrator {
    pub fn new(
        desired: DesiredConfiguration,
        root: impl Into<PathBuf>,
        sources: Sources,
        transport: Box<dyn Transport>,
        runner: Box<dyn ProcessRunner>,
    ) -> Self {
        let bundle = desired.bundle_id();
        let layout = InstallLayout::new(root, bundle.clone());
        let store = ManifestStore::open(layout.manifest_path(), bundle);
        info!(
            bundle = %layout.bundle(),
            root = %layout.root().display(),
            recorded = store.current().is_some(),
            "installer ready"
        );

        Self {
            desired,
            layout,
            sources,
            store,
            fetcher: Fetcher::new(transport, ScratchRegistry::default()),
            runner,
            progress: Box::new(NoProgress),
            phase: Phase::Init,
        }
    }

    pub fn with_progress(mut self, progress: impl ProgressReporter + 'static) -> Self {
        self.progress = Box::new(progress);
        self
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.fetcher.set_scratch_base(dir.into());
        self
    }

    pub fn layout(&self) -> &InstallLayout {
        &self.layout
    }

    /// Directory holding the runtime's commands, for the caller's `PATH`.
    pub fn launch_path(&self) -> PathBuf {
        self.layout.launch_path()
    }

    pub fn slot_states(&self) -> Vec<SlotState> {
        let current = self.store.current();
        Slot::ALL
            .into_iter()
            .map(|slot| {
                let requested = self.desired.requested(slot);
                SlotState {
                    slot,
                    recorded: current.and_then(|record| record.get(slot)),
                    needs_install: should_install(slot, &requested, current),
                    requested,
                }
            })
            .collect()
    }

    /// True when no slot needs work. Reads only the cached manifest record.
    pub fn check_if_installed(&self) -> bool {
        let current = self.store.current();
        Slot::ALL
            .into_iter()
            .all(|slot| !should_install(slot, &self.desired.requested(slot), current))
    }

    /// Walks every phase once. Stage failures are recorded in the report and
    /// never stop the walk; scratch space is always released.
    pub fn run(&mut self) -> RunReport {
        info!(bundle = %self.layout.bundle(), "install run started");
        let mut results = Vec::with_capacity(Slot::ALL.len());
        let mut runtime_download = RuntimeDownload::Skipped;
        let mut scratch_released = 0;

        for phase in Phase::SEQUENCE {
            self.phase = phase;
            if let Some(percent) = phase.percent() {
                debug!(percent, label = phase.label(), "progress");
                self.progress.report(percent, phase.label());
            }

            match phase {
                Phase::Init => self.prepare_tree(),
                Phase::InstallInterpreter => results.push(self.run_stage(&InterpreterStage)),
                Phase::DownloadRuntime => {
                    runtime_download = RuntimeStage.download(&mut self.context());
                }
                Phase::SetupRuntime => {
                    let download = mem::replace(&mut runtime_download, RuntimeDownload::Skipped);
                    results.push(RuntimeStage.setup(&mut self.context(), download));
                }
                Phase::InstallAuxiliaries => results.push(self.run_stage(&AuxiliaryStage)),
                Phase::InstallRenderer => results.push(self.run_stage(&RendererStage)),
                Phase::Cleanup => {
                    debug!(pending = self.fetcher.scratch_len(), "releasing scratch space");
                    scratch_released = self.fetcher.release_scratch();
                }
                Phase::Done => {}
            }
        }

        let report = RunReport {
            bundle: self.layout.bundle().clone(),
            results,
            scratch_released,
        };
        if report.success() {
            info!(summary = %report.summary(), "install run finished");
        } else {
            warn!(summary = %report.summary(), "install run finished with failures");
        }
        report
    }

    fn run_stage(&mut self, stage: &dyn Stage) -> StageResult {
        debug!(slot = %stage.slot(), phase = ?self.phase, "stage started");
        stage.install(&mut self.context())
    }

    fn context(&mut self) -> StageContext<'_> {
        StageContext {
            desired: &self.desired,
            layout: &self.layout,
            sources: &self.sources,
            store: &mut self.store,
            fetcher: &mut self.fetcher,
            runner: self.runner.as_ref(),
        }
    }

    fn prepare_tree(&self) {
        for dir in [self.layout.interpreter_root(), self.layout.runtime_root()] {
            if let Err(err) = fs::create_dir_all(&dir) {
                warn!(path = %dir.display(), error = %err, "could not create install directory");
            }
        }
    }
}
