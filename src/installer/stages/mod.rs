//! One installer per component slot.
//!
//! Every stage follows the same contract: ask the version gate first and do
//! no I/O when the slot is already current; otherwise fetch, run the external
//! tool, and on success persist only its own manifest field. Errors never
//! escape a stage, they come back inside [`StageResult`].

mod auxiliary;
mod interpreter;
mod renderer;
mod runtime;

use std::fs;
use std::path::Path;

use tracing::{error, info, warn};

pub use auxiliary::AuxiliaryStage;
pub use interpreter::InterpreterStage;
pub use renderer::RendererStage;
pub use runtime::{RuntimeDownload, RuntimeStage};

use crate::installer::error::{InstallError, Result};
use crate::installer::fetcher::Fetcher;
use crate::installer::gate::should_install;
use crate::installer::manifest::ManifestStore;
use crate::installer::process::ProcessRunner;
use crate::model::layout::InstallLayout;
use crate::model::sources::Sources;
use crate::model::toolchain::{DesiredConfiguration, Slot, SlotValue};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageStatus {
    /// Already current; nothing was fetched or run.
    Skipped,
    Installed,
    Failed(InstallError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageResult {
    pub slot: Slot,
    pub status: StageStatus,
    /// Value now in place for the slot, if known.
    pub installed: Option<SlotValue>,
    /// Set when the slot succeeded but the manifest could not be saved.
    pub persist_error: Option<InstallError>,
}

impl StageResult {
    pub fn success(&self) -> bool {
        !matches!(self.status, StageStatus::Failed(_))
    }

    pub fn error(&self) -> Option<&InstallError> {
        match &self.status {
            StageStatus::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// Everything a stage may touch during one run.
pub struct StageContext<'a> {
    pub desired: &'a DesiredConfiguration,
    pub layout: &'a InstallLayout,
    pub sources: &'a Sources,
    pub store: &'a mut ManifestStore,
    pub fetcher: &'a mut Fetcher,
    pub runner: &'a dyn ProcessRunner,
}

impl StageContext<'_> {
    pub fn needs(&self, slot: Slot) -> bool {
        should_install(slot, &self.desired.requested(slot), self.store.current())
    }

    fn skipped(&self, slot: Slot) -> StageResult {
        info!(%slot, "already installed, skipping");
        StageResult {
            slot,
            status: StageStatus::Skipped,
            installed: self.store.current().and_then(|record| record.get(slot)),
            persist_error: None,
        }
    }

    /// Marks the slot as satisfied by what is already on disk and records it.
    fn backfilled(&mut self, slot: Slot) -> StageResult {
        let mut result = self.commit(slot);
        result.status = StageStatus::Skipped;
        result
    }

    /// Persists the requested value of `slot` after a successful install.
    fn commit(&mut self, slot: Slot) -> StageResult {
        let value = self.desired.requested(slot);
        let persist_error = match self.store.write(slot, value.clone()) {
            Ok(()) => None,
            Err(err) => {
                warn!(%slot, error = %err, "installed but manifest not saved; next run may reinstall");
                Some(err)
            }
        };
        info!(%slot, %value, "installed");
        StageResult {
            slot,
            status: StageStatus::Installed,
            installed: Some(value),
            persist_error,
        }
    }

    fn failed(&self, slot: Slot, err: InstallError) -> StageResult {
        error!(%slot, kind = err.kind(), error = %err, "stage failed");
        StageResult {
            slot,
            status: StageStatus::Failed(err),
            installed: None,
            persist_error: None,
        }
    }

    fn finish(&mut self, slot: Slot, outcome: Result<()>) -> StageResult {
        match outcome {
            Ok(()) => self.commit(slot),
            Err(err) => self.failed(slot, err),
        }
    }
}

/// A single-step installer for one slot.
pub trait Stage {
    fn slot(&self) -> Slot;
    fn install(&self, ctx: &mut StageContext<'_>) -> StageResult;
}

fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|err| InstallError::io(path, err))
}
