use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::debug;

use crate::installer::error::{InstallError, Result};

const OUTPUT_TAIL_CHARS: usize = 800;

/// One external tool call: a program and its full argument vector.
/// Arguments are never joined into a shell string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .unwrap_or(self.program.as_os_str())
            .to_string_lossy()
            .into_owned()
    }

    fn failure(&self, reason: String) -> InstallError {
        InstallError::Process {
            program: self.program.display().to_string(),
            reason,
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Runs external tools to completion.
pub trait ProcessRunner: Send {
    /// Blocks until the child exits. Exit code 0 is success; anything else,
    /// including failing to spawn, is a `Process` error.
    fn run(&self, invocation: &Invocation) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<()> {
        debug!(command = %invocation, "spawning");
        let output = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| invocation.failure(format!("failed to spawn: {err}")))?;

        if output.status.success() {
            debug!(program = %invocation.program_name(), "exited successfully");
            return Ok(());
        }

        let stream = if output.stderr.is_empty() {
            &output.stdout
        } else {
            &output.stderr
        };
        Err(invocation.failure(format!(
            "exited with {}: {}",
            output.status,
            tail(&String::from_utf8_lossy(stream))
        )))
    }
}

fn tail(text: &str) -> String {
    let trimmed = text.trim_end();
    let count = trimmed.chars().count();
    if count <= OUTPUT_TAIL_CHARS {
        return trimmed.to_string();
    }
    let skipped: String = trimmed.chars().skip(count - OUTPUT_TAIL_CHARS).collect();
    format!("...{skipped}")
}

/// True when `program` points at an existing file.
pub fn is_available(program: &Path) -> bool {
    program.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_keeps_arguments_separate() {
        let invocation = Invocation::new("/opt/pip")
            .arg("install")
            .arg("Qt.py==1.4.8; rm -rf /");
        assert_eq!(invocation.args.len(), 2);
        assert_eq!(invocation.program_name(), "pip");
    }

    #[test]
    fn missing_program_fails_to_spawn() {
        let invocation = Invocation::new("/nonexistent/definitely-not-here").arg("--version");
        let err = SystemRunner.run(&invocation).expect_err("spawn must fail");
        assert_eq!(err.kind(), "process");
        assert!(err.to_string().contains("failed to spawn"));
    }

    #[test]
    fn tail_keeps_the_end() {
        let long = "x".repeat(OUTPUT_TAIL_CHARS) + "END";
        let cut = tail(&long);
        assert!(cut.starts_with("..."));
        assert!(cut.ends_with("END"));
    }
}
