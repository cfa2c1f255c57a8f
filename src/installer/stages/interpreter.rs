use std::path::Path;

use tracing::info;

use super::{Stage, StageContext, StageResult, ensure_dir};
use crate::installer::error::{InstallError, Result};
use crate::installer::process::Invocation;
use crate::model::toolchain::Slot;

/// Private CPython, installed as a NuGet package into the interpreter tree.
#[derive(Debug, Default)]
pub struct InterpreterStage;

impl Stage for InterpreterStage {
    fn slot(&self) -> Slot {
        Slot::Interpreter
    }

    fn install(&self, ctx: &mut StageContext<'_>) -> StageResult {
        if !ctx.needs(Slot::Interpreter) {
            return ctx.skipped(Slot::Interpreter);
        }

        let version = ctx.desired.interpreter_version.clone();
        let executable = ctx.layout.interpreter_executable(&version);

        // The manifest is only a cache of what is on disk.
        if executable.is_file() {
            info!(
                version,
                path = %executable.display(),
                "interpreter already on disk, recording it"
            );
            return ctx.backfilled(Slot::Interpreter);
        }

        let outcome = install_with_nuget(ctx, &version, &executable);
        ctx.finish(Slot::Interpreter, outcome)
    }
}

fn install_with_nuget(ctx: &mut StageContext<'_>, version: &str, executable: &Path) -> Result<()> {
    let nuget = ctx.fetcher.fetch(&ctx.sources.interpreter_installer_url)?;
    let target = ctx.layout.interpreter_root();
    ensure_dir(&target)?;

    info!(version, target = %target.display(), "installing interpreter");
    let invocation = Invocation::new(nuget)
        .arg("install")
        .arg("python")
        .arg("-OutputDirectory")
        .arg(target.as_os_str())
        .arg("-Version")
        .arg(version);
    ctx.runner.run(&invocation)?;

    if !executable.is_file() {
        return Err(InstallError::Process {
            program: invocation.program_name(),
            reason: format!("finished but {} is missing", executable.display()),
        });
    }
    Ok(())
}
