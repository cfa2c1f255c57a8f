use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use super::{Stage, StageContext, StageResult, ensure_dir};
use crate::installer::error::{InstallError, Result};
use crate::installer::process::{Invocation, is_available};
use crate::model::toolchain::Slot;

const INSTALL_SCRIPT: &str = "install.py";

/// Outcome of the runtime's download phase, handed to the setup phase.
#[derive(Debug)]
pub enum RuntimeDownload {
    Skipped,
    Archive(PathBuf),
    Failed(InstallError),
}

/// Rez, installed from its source archive by its own `install.py` running
/// under the private interpreter.
#[derive(Debug, Default)]
pub struct RuntimeStage;

impl RuntimeStage {
    pub fn download(&self, ctx: &mut StageContext<'_>) -> RuntimeDownload {
        if !ctx.needs(Slot::Runtime) {
            return RuntimeDownload::Skipped;
        }
        if let Err(err) = private_interpreter(ctx) {
            return RuntimeDownload::Failed(err);
        }

        let url = ctx.sources.runtime_archive(&ctx.desired.runtime_version);
        match ctx.fetcher.fetch(&url) {
            Ok(archive) => RuntimeDownload::Archive(archive),
            Err(err) => RuntimeDownload::Failed(err),
        }
    }

    pub fn setup(&self, ctx: &mut StageContext<'_>, download: RuntimeDownload) -> StageResult {
        match download {
            RuntimeDownload::Skipped => ctx.skipped(Slot::Runtime),
            RuntimeDownload::Failed(err) => ctx.failed(Slot::Runtime, err),
            RuntimeDownload::Archive(archive) => {
                let outcome = run_install_script(ctx, &archive);
                ctx.finish(Slot::Runtime, outcome)
            }
        }
    }
}

impl Stage for RuntimeStage {
    fn slot(&self) -> Slot {
        Slot::Runtime
    }

    fn install(&self, ctx: &mut StageContext<'_>) -> StageResult {
        let download = self.download(ctx);
        self.setup(ctx, download)
    }
}

fn run_install_script(ctx: &mut StageContext<'_>, archive: &Path) -> Result<()> {
    let version = ctx.desired.runtime_version.clone();
    let python = private_interpreter(ctx)?;

    let extracted = ctx.fetcher.extract_archive(archive)?;
    let script = find_install_script(&extracted, &version)
        .ok_or_else(|| InstallError::archive(archive, format!("no {INSTALL_SCRIPT} found")))?;

    let target = ctx.layout.runtime_root();
    ensure_dir(&target)?;

    info!(%version, target = %target.display(), "running runtime installer");
    let invocation = Invocation::new(python)
        .arg(script.as_os_str())
        .arg("-v")
        .arg(target.as_os_str());
    ctx.runner.run(&invocation)?;

    let launch = ctx.layout.launch_path();
    if !launch.is_dir() {
        return Err(InstallError::Process {
            program: INSTALL_SCRIPT.to_string(),
            reason: format!("finished but {} was not created", launch.display()),
        });
    }
    Ok(())
}

fn private_interpreter(ctx: &StageContext<'_>) -> Result<PathBuf> {
    let python = ctx
        .layout
        .interpreter_executable(&ctx.desired.interpreter_version);
    if !is_available(&python) {
        return Err(InstallError::Prerequisite(format!(
            "interpreter {} is not installed at {}",
            ctx.desired.interpreter_version,
            python.display()
        )));
    }
    Ok(python)
}

/// Source archives unpack to `rez-<version>/`; fall back to any single
/// top-level directory carrying the script.
fn find_install_script(extracted: &Path, version: &str) -> Option<PathBuf> {
    let expected = extracted.join(format!("rez-{version}")).join(INSTALL_SCRIPT);
    if expected.is_file() {
        return Some(expected);
    }

    fs::read_dir(extracted)
        .ok()?
        .flatten()
        .map(|entry| entry.path().join(INSTALL_SCRIPT))
        .find(|candidate| candidate.is_file())
}
