use std::path::{Path, PathBuf};

use crate::model::toolchain::BundleId;

const MANIFEST_FILE: &str = "rez_installed.json";

#[cfg(windows)]
const SCRIPTS_DIR: &str = "Scripts";
#[cfg(not(windows))]
const SCRIPTS_DIR: &str = "bin";

#[cfg(windows)]
const PIP_EXECUTABLE: &str = "pip.exe";
#[cfg(not(windows))]
const PIP_EXECUTABLE: &str = "pip";

/// Fixed directory layout of an install root.
///
/// ```text
/// <root>/
///   rez_installed.json
///   source/python/python.<version>/tools/...      interpreter tree
///   source/rez/<bundle>/<Scripts|bin>/rez         launch path
/// ```
#[derive(Debug, Clone)]
pub struct InstallLayout {
    root: PathBuf,
    bundle: BundleId,
}

impl InstallLayout {
    pub fn new(root: impl Into<PathBuf>, bundle: BundleId) -> Self {
        Self {
            root: root.into(),
            bundle,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bundle(&self) -> &BundleId {
        &self.bundle
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn interpreter_root(&self) -> PathBuf {
        self.root.join("source").join("python")
    }

    /// Executable produced by `nuget install python -Version <version>`.
    pub fn interpreter_executable(&self, version: &str) -> PathBuf {
        let tools = self
            .interpreter_root()
            .join(format!("python.{version}"))
            .join("tools");
        if cfg!(windows) {
            tools.join("python.exe")
        } else {
            tools.join("bin").join("python3")
        }
    }

    pub fn runtime_root(&self) -> PathBuf {
        self.root.join("source").join("rez").join(self.bundle.as_str())
    }

    pub fn scripts_dir(&self) -> PathBuf {
        self.runtime_root().join(SCRIPTS_DIR)
    }

    pub fn package_installer(&self) -> PathBuf {
        self.scripts_dir().join(PIP_EXECUTABLE)
    }

    /// Directory callers put on `PATH` to reach the runtime's commands.
    pub fn launch_path(&self) -> PathBuf {
        self.scripts_dir().join("rez")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_tree_is_nested_under_bundle() {
        let layout = InstallLayout::new("/opt/rez", BundleId::new("3.13.11", "3.3.0"));
        assert_eq!(
            layout.runtime_root(),
            PathBuf::from("/opt/rez/source/rez/3.13.11-3.3.0")
        );
        assert!(layout.launch_path().starts_with(layout.runtime_root()));
        assert_eq!(layout.manifest_path(), PathBuf::from("/opt/rez/rez_installed.json"));
    }

    #[test]
    fn interpreter_path_is_versioned() {
        let layout = InstallLayout::new("/opt/rez", BundleId::new("3.13.11", "3.3.0"));
        let exe = layout.interpreter_executable("3.13.11");
        assert!(exe.starts_with("/opt/rez/source/python/python.3.13.11/tools"));
    }
}
