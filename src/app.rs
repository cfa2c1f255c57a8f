use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::installer::fetcher::{HttpTransport, Transport};
use crate::installer::process::{ProcessRunner, SystemRunner};
use crate::installer::stages::StageStatus;
use crate::installer::{Orchestrator, RunReport};
use crate::model::config::AppConfig;
use crate::model::layout::InstallLayout;
use crate::msg::Msg;

/// Syntax used when printing environment assignments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Shell {
    Sh,
    Powershell,
    Cmd,
}

impl Shell {
    pub fn native() -> Self {
        if cfg!(windows) {
            Shell::Powershell
        } else {
            Shell::Sh
        }
    }

    fn separator(self) -> &'static str {
        match self {
            Shell::Sh => ":",
            Shell::Powershell | Shell::Cmd => ";",
        }
    }

    fn set(self, name: &str, value: &str) -> String {
        match self {
            Shell::Sh => format!("export {name}=\"{value}\""),
            Shell::Powershell => format!("$env:{name} = \"{value}\""),
            Shell::Cmd => format!("set \"{name}={value}\""),
        }
    }

    fn prepend_path(self, dir: &Path) -> String {
        let dir = dir.display();
        match self {
            Shell::Sh => format!("export PATH=\"{dir}:$PATH\""),
            Shell::Powershell => format!("$env:PATH = \"{dir};\" + $env:PATH"),
            Shell::Cmd => format!("set \"PATH={dir};%PATH%\""),
        }
    }
}

pub struct App {
    config: AppConfig,
    root: PathBuf,
    last_percent: Option<u8>,
    report: Option<RunReport>,
}

impl App {
    pub fn new(config: AppConfig) -> Result<Self> {
        let root = config.install_root()?;
        Ok(Self {
            config,
            root,
            last_percent: None,
            report: None,
        })
    }

    /// Orchestrator wired to the network and the real process table.
    pub fn orchestrator(&self) -> Result<Orchestrator> {
        let transport =
            HttpTransport::new(self.config.fetch_timeout()).context("failed to build HTTP client")?;
        Ok(self.orchestrator_with(Box::new(transport), Box::new(SystemRunner)))
    }

    pub fn orchestrator_with(
        &self,
        transport: Box<dyn Transport>,
        runner: Box<dyn ProcessRunner>,
    ) -> Orchestrator {
        let orchestrator = Orchestrator::new(
            self.config.desired(),
            &self.root,
            self.config.sources(),
            transport,
            runner,
        );
        match self.config.scratch_dir() {
            Some(dir) => orchestrator.with_scratch_dir(dir),
            None => orchestrator,
        }
    }

    /// Handles one worker message and returns the lines to print for it.
    pub fn update(&mut self, msg: Msg) -> Vec<String> {
        match msg {
            Msg::Progress { percent, label } => {
                if self.last_percent == Some(percent) {
                    return Vec::new();
                }
                self.last_percent = Some(percent);
                vec![format!("[{percent:>3}%] {label}")]
            }
            Msg::Finished(report) => {
                let lines = report_lines(&report);
                self.report = Some(report);
                lines
            }
        }
    }

    pub fn finished(&self) -> Option<&RunReport> {
        self.report.as_ref()
    }

    pub fn status_lines(&self, orchestrator: &Orchestrator) -> Vec<String> {
        let layout = orchestrator.layout();
        let mut lines = vec![format!(
            "bundle {} at {}",
            layout.bundle(),
            layout.root().display()
        )];

        for state in orchestrator.slot_states() {
            let recorded = state
                .recorded
                .as_ref()
                .map_or_else(|| "-".to_string(), ToString::to_string);
            let verdict = if state.needs_install { "install needed" } else { "ok" };
            lines.push(format!(
                "  {:<22} requested {}, recorded {} ({verdict})",
                state.slot.label(),
                state.requested,
                recorded
            ));
        }

        let installed = if orchestrator.check_if_installed() { "yes" } else { "no" };
        lines.push(format!("installed: {installed}"));
        lines
    }

    /// Assignments that put the runtime's commands on `PATH`.
    pub fn env_lines(&self, shell: Shell) -> Vec<String> {
        let layout = InstallLayout::new(&self.root, self.config.desired().bundle_id());
        let mut lines = vec![shell.prepend_path(&layout.launch_path())];

        let packages = &self.config.environment.packages_path;
        if !packages.is_empty() {
            lines.push(shell.set("REZ_PACKAGES_PATH", &packages.join(shell.separator())));
        }
        lines
    }
}

fn report_lines(report: &RunReport) -> Vec<String> {
    let mut lines = Vec::with_capacity(report.results.len() + 1);
    for result in &report.results {
        let outcome = match (&result.status, &result.installed) {
            (StageStatus::Failed(err), _) => format!("FAILED ({})", err.kind()),
            (StageStatus::Skipped, Some(value)) => format!("up to date ({value})"),
            (StageStatus::Installed, Some(value)) => format!("installed {value}"),
            (StageStatus::Skipped, None) => "up to date".to_string(),
            (StageStatus::Installed, None) => "installed".to_string(),
        };
        match &result.persist_error {
            Some(err) => lines.push(format!(
                "  {:<22} {outcome} (manifest not saved: {err})",
                result.slot.label()
            )),
            None => lines.push(format!("  {:<22} {outcome}", result.slot.label())),
        }
    }
    if report.scratch_released > 0 {
        lines.push(format!("removed {} scratch directories", report.scratch_released));
    }
    lines.push(report.summary());
    lines
}
