use tracing::{info, warn};

use super::{Stage, StageContext, StageResult};
use crate::installer::error::{InstallError, Result};
use crate::installer::process::{Invocation, is_available};
use crate::model::toolchain::Slot;

/// Extra pip packages installed into the runtime's environment.
///
/// The set is recorded only when every entry installed; a partial run stays
/// visible to the next gate check and the whole set is retried.
#[derive(Debug, Default)]
pub struct AuxiliaryStage;

impl Stage for AuxiliaryStage {
    fn slot(&self) -> Slot {
        Slot::AuxiliaryLibraries
    }

    fn install(&self, ctx: &mut StageContext<'_>) -> StageResult {
        if !ctx.needs(Slot::AuxiliaryLibraries) {
            return ctx.skipped(Slot::AuxiliaryLibraries);
        }

        let outcome = install_each(ctx);
        ctx.finish(Slot::AuxiliaryLibraries, outcome)
    }
}

fn install_each(ctx: &mut StageContext<'_>) -> Result<()> {
    let pip = ctx.layout.package_installer();
    let requested = &ctx.desired.auxiliary_libraries;
    if !requested.is_empty() && !is_available(&pip) {
        return Err(InstallError::Prerequisite(format!(
            "package installer {} does not exist",
            pip.display()
        )));
    }

    let mut failed = Vec::new();
    for package in requested {
        info!(package, "installing package");
        let invocation = Invocation::new(&pip).arg("install").arg(package);
        match ctx.runner.run(&invocation) {
            Ok(()) => info!(package, "installed package"),
            Err(err) => {
                warn!(package, error = %err, "package failed, continuing");
                failed.push(package.as_str());
            }
        }
    }

    if failed.is_empty() {
        return Ok(());
    }
    Err(InstallError::Process {
        program: pip.display().to_string(),
        reason: format!(
            "{} of {} packages failed: {}",
            failed.len(),
            requested.len(),
            failed.join(", ")
        ),
    })
}
