use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, info};

use super::{Stage, StageContext, StageResult};
use crate::installer::error::{InstallError, Result};
use crate::model::toolchain::Slot;

/// Graphviz binaries, dropped into the runtime's launch directory so the
/// runtime finds them on the same `PATH` entry.
#[derive(Debug, Default)]
pub struct RendererStage;

impl Stage for RendererStage {
    fn slot(&self) -> Slot {
        Slot::Renderer
    }

    fn install(&self, ctx: &mut StageContext<'_>) -> StageResult {
        if !ctx.needs(Slot::Renderer) {
            return ctx.skipped(Slot::Renderer);
        }

        let outcome = install_binaries(ctx);
        ctx.finish(Slot::Renderer, outcome)
    }
}

fn install_binaries(ctx: &mut StageContext<'_>) -> Result<()> {
    let version = ctx.desired.renderer_version.clone();
    let target = ctx.layout.launch_path();
    if !target.is_dir() {
        return Err(InstallError::Prerequisite(format!(
            "runtime launch directory {} does not exist",
            target.display()
        )));
    }

    let archive = ctx.fetcher.fetch(&ctx.sources.renderer_archive(&version))?;
    let extracted = ctx.fetcher.extract_archive(&archive)?;
    let bin = extracted.join(ctx.sources.renderer_bin(&version));
    if !bin.is_dir() {
        return Err(InstallError::archive(
            &archive,
            format!("expected directory {}", ctx.sources.renderer_bin(&version)),
        ));
    }

    info!(%version, target = %target.display(), "installing renderer binaries");
    let entries = fs::read_dir(&bin).map_err(|err| InstallError::io(&bin, err))?;
    let mut moved = 0usize;
    for entry in entries {
        let entry = entry.map_err(|err| InstallError::io(&bin, err))?;
        let destination = target.join(entry.file_name());
        move_entry(&entry.path(), &destination)
            .map_err(|err| InstallError::io(&destination, err))?;
        moved += 1;
    }
    debug!(moved, "renderer binaries moved");
    Ok(())
}

/// Moves `src` to `dst`, replacing `dst`. Falls back to copying when the
/// scratch directory lives on another filesystem.
fn move_entry(src: &Path, dst: &Path) -> io::Result<()> {
    if dst.is_dir() {
        fs::remove_dir_all(dst)?;
    } else if dst.exists() {
        fs::remove_file(dst)?;
    }

    if fs::rename(src, dst).is_ok() {
        return Ok(());
    }
    copy_recursive(src, dst)
}

fn copy_recursive(src: &Path, dst: &Path) -> io::Result<()> {
    if !src.is_dir() {
        fs::copy(src, dst)?;
        return Ok(());
    }

    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        copy_recursive(&entry.path(), &dst.join(entry.file_name()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn move_entry_replaces_existing_file_and_dir() {
        let dir = TempDir::new().expect("tempdir");
        let src_file = dir.path().join("dot.exe");
        let src_dir = dir.path().join("config6");
        fs::write(&src_file, "new").expect("write");
        fs::create_dir_all(&src_dir).expect("mkdir");
        fs::write(src_dir.join("a"), "a").expect("write");

        let target = dir.path().join("target");
        fs::create_dir_all(target.join("config6")).expect("mkdir");
        fs::write(target.join("config6/stale"), "old").expect("write");
        fs::write(target.join("dot.exe"), "old").expect("write");

        move_entry(&src_file, &target.join("dot.exe")).expect("move file");
        move_entry(&src_dir, &target.join("config6")).expect("move dir");

        assert_eq!(fs::read_to_string(target.join("dot.exe")).expect("read"), "new");
        assert!(target.join("config6/a").is_file());
        assert!(!target.join("config6/stale").exists());
    }

    #[test]
    fn copy_recursive_copies_nested_trees() {
        let dir = TempDir::new().expect("tempdir");
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("nested")).expect("mkdir");
        fs::write(src.join("nested/lib.dll"), "lib").expect("write");

        let dst = dir.path().join("dst");
        copy_recursive(&src, &dst).expect("copy");
        assert_eq!(fs::read_to_string(dst.join("nested/lib.dll")).expect("read"), "lib");
    }
}
