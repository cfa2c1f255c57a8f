use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::model::sources::Sources;
use crate::model::toolchain::DesiredConfiguration;

const DEFAULTS: &str = include_str!("../../config/default.toml");

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub toolchain: ToolchainConfig,
    pub install: InstallConfig,
    pub sources: SourcesConfig,
    pub environment: EnvironmentConfig,
}

#[derive(Debug, Deserialize)]
pub struct ToolchainConfig {
    pub interpreter_version: String,
    pub runtime_version: String,
    pub renderer_version: String,
    pub auxiliary_libraries: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct InstallConfig {
    #[serde(default)]
    pub root: Option<String>,
    pub studio_code: String,
    #[serde(default)]
    pub scratch_dir: Option<String>,
    pub fetch_timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct SourcesConfig {
    pub interpreter_installer_url: String,
    pub runtime_archive_url: String,
    pub renderer_archive_url: String,
    pub renderer_bin_subdir: String,
}

#[derive(Debug, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(default)]
    pub packages_path: Vec<String>,
}

impl AppConfig {
    /// Load configuration with layering: defaults → user config → `explicit`.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut layers = Vec::new();

        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "rez-bootstrap") {
            let config_path = proj_dirs.config_dir().join("config.toml");
            if config_path.exists() {
                layers.push(read_layer(&config_path)?);
            }
        }

        if let Some(path) = explicit {
            layers.push(read_layer(path)?);
        }

        Self::from_layers(&layers)
    }

    pub(crate) fn from_layers(layers: &[toml::Table]) -> Result<Self> {
        let mut merged: toml::Table =
            toml::from_str(DEFAULTS).context("built-in defaults are invalid")?;
        for layer in layers {
            merge(&mut merged, layer.clone());
        }

        let mut config: AppConfig = toml::Value::Table(merged)
            .try_into()
            .context("invalid configuration")?;

        if let Some(root) = config.install.root.take() {
            config.install.root = Some(expand_tilde(&root)?);
        }
        if let Some(scratch) = config.install.scratch_dir.take() {
            config.install.scratch_dir = Some(expand_tilde(&scratch)?);
        }

        Ok(config)
    }

    pub fn desired(&self) -> DesiredConfiguration {
        DesiredConfiguration::new(
            self.toolchain.interpreter_version.trim(),
            self.toolchain.runtime_version.trim(),
            self.toolchain.renderer_version.trim(),
            self.toolchain
                .auxiliary_libraries
                .iter()
                .map(|spec| spec.trim())
                .filter(|spec| !spec.is_empty()),
        )
    }

    pub fn sources(&self) -> Sources {
        Sources {
            interpreter_installer_url: self.sources.interpreter_installer_url.clone(),
            runtime_archive_url: self.sources.runtime_archive_url.clone(),
            renderer_archive_url: self.sources.renderer_archive_url.clone(),
            renderer_bin_subdir: self.sources.renderer_bin_subdir.clone(),
        }
    }

    pub fn install_root(&self) -> Result<PathBuf> {
        if let Some(root) = &self.install.root {
            return Ok(PathBuf::from(root));
        }

        directories::ProjectDirs::from("", &self.install.studio_code, "rez")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .ok_or_else(|| anyhow!("cannot determine a data directory; set install.root"))
    }

    pub fn scratch_dir(&self) -> Option<PathBuf> {
        self.install.scratch_dir.as_ref().map(PathBuf::from)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.install.fetch_timeout_secs)
    }
}

fn read_layer(path: &Path) -> Result<toml::Table> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("{} is not valid TOML", path.display()))
}

/// Overlays `overlay` onto `base`, recursing into tables so partial files
/// only replace the keys they name.
fn merge(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

fn expand_tilde(path: &str) -> Result<String> {
    if !path.starts_with('~') {
        return Ok(path.to_string());
    }
    let base = directories::BaseDirs::new().ok_or_else(|| anyhow!("cannot determine home directory"))?;
    Ok(path.replacen('~', &base.home_dir().to_string_lossy(), 1))
}
