//! In-memory doubles for the network and process boundaries.

use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use flate2::Compression;
use flate2::write::GzEncoder;

use crate::installer::error::{InstallError, Result};
use crate::installer::fetcher::{ScratchRegistry, Transport};
use crate::installer::process::{Invocation, ProcessRunner};
use crate::model::layout::InstallLayout;
use crate::model::sources::Sources;
use crate::model::toolchain::DesiredConfiguration;

pub fn test_sources() -> Sources {
    Sources {
        interpreter_installer_url: "https://fake.invalid/nuget.exe".into(),
        runtime_archive_url: "https://fake.invalid/rez/{version}.tar.gz".into(),
        renderer_archive_url: "https://fake.invalid/graphviz/{version}/Graphviz-{version}-win64.zip"
            .into(),
        renderer_bin_subdir: "Graphviz-{version}-win64/bin".into(),
    }
}

pub fn scratch_in(base: &Path) -> ScratchRegistry {
    let mut scratch = ScratchRegistry::default();
    scratch.set_base(base.to_path_buf());
    scratch
}

pub fn tar_gz(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for &(path, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder
            .append_data(&mut header, path, data)
            .expect("append tar entry");
    }
    builder
        .into_inner()
        .and_then(|gz| gz.finish())
        .expect("finish tar.gz")
}

pub fn zip_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for &(path, data) in entries {
        writer
            .start_file(path, zip::write::SimpleFileOptions::default())
            .expect("start zip entry");
        writer.write_all(data).expect("write zip entry");
    }
    writer.finish().expect("finish zip").into_inner()
}

/// Serves fixed bytes per URL; unknown URLs answer 404. Clones share state,
/// so a test keeps a handle after boxing one into the fetcher.
#[derive(Debug, Clone, Default)]
pub struct FakeTransport {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl FakeTransport {
    pub fn serve(self, url: &str, bytes: Vec<u8>) -> Self {
        self.files
            .lock()
            .expect("files lock")
            .insert(url.to_string(), bytes);
        self
    }

    /// Serves everything a full install of `desired` downloads.
    pub fn for_toolchain(sources: &Sources, desired: &DesiredConfiguration) -> Self {
        let runtime = &desired.runtime_version;
        let renderer = &desired.renderer_version;
        let install_py = format!("rez-{runtime}/install.py");
        let dot = format!("{}/dot.exe", sources.renderer_bin(renderer));
        let gvc = format!("{}/gvc.dll", sources.renderer_bin(renderer));

        Self::default()
            .serve(&sources.interpreter_installer_url, b"MZ nuget".to_vec())
            .serve(
                &sources.runtime_archive(runtime),
                tar_gz(&[(install_py.as_str(), b"# rez installer")]),
            )
            .serve(
                &sources.renderer_archive(renderer),
                zip_archive(&[(dot.as_str(), b"dot"), (gvc.as_str(), b"gvc")]),
            )
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }
}

impl Transport for FakeTransport {
    fn download(&self, url: &str, dest: &mut dyn Write) -> Result<u64> {
        self.calls.lock().expect("calls lock").push(url.to_string());
        let files = self.files.lock().expect("files lock");
        let Some(bytes) = files.get(url) else {
            return Err(InstallError::Network {
                url: url.to_string(),
                reason: "HTTP status 404 Not Found".into(),
            });
        };
        dest.write_all(bytes).map_err(|err| InstallError::Network {
            url: url.to_string(),
            reason: err.to_string(),
        })?;
        Ok(bytes.len() as u64)
    }
}

/// Records invocations and imitates what the real tools leave on disk:
/// the NuGet fetcher creates the interpreter, `install.py` creates the
/// runtime's launch directory and package installer.
#[derive(Debug, Clone)]
pub struct FakeRunner {
    layout: InstallLayout,
    calls: Arc<Mutex<Vec<Invocation>>>,
    failing: Arc<Mutex<Vec<String>>>,
    leaves_nothing: bool,
}

impl FakeRunner {
    pub fn new(layout: InstallLayout) -> Self {
        Self {
            layout,
            calls: Arc::default(),
            failing: Arc::default(),
            leaves_nothing: false,
        }
    }

    /// Every invocation exits 0 but creates nothing on disk.
    pub fn leaving_nothing(mut self) -> Self {
        self.leaves_nothing = true;
        self
    }

    /// Any invocation mentioning `needle` exits with status 1.
    pub fn fail_when(self, needle: &str) -> Self {
        self.failing
            .lock()
            .expect("failing lock")
            .push(needle.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn simulate(&self, invocation: &Invocation) -> std::io::Result<()> {
        if self.leaves_nothing {
            return Ok(());
        }
        let args: Vec<String> = invocation
            .args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();

        if invocation.program_name() == "nuget.exe" {
            if let Some(version) = args.iter().skip_while(|a| *a != "-Version").nth(1) {
                let exe = self.layout.interpreter_executable(version);
                fs::create_dir_all(exe.parent().expect("exe parent"))?;
                fs::write(exe, "python")?;
            }
        } else if args.first().is_some_and(|a| a.ends_with("install.py")) {
            fs::create_dir_all(self.layout.launch_path())?;
            fs::write(self.layout.package_installer(), "pip")?;
        }
        Ok(())
    }
}

impl ProcessRunner for FakeRunner {
    fn run(&self, invocation: &Invocation) -> Result<()> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(invocation.clone());

        let rendered = invocation.to_string();
        let fails = self
            .failing
            .lock()
            .expect("failing lock")
            .iter()
            .any(|needle| rendered.contains(needle.as_str()));
        if fails {
            return Err(InstallError::Process {
                program: invocation.program.display().to_string(),
                reason: "exited with exit status: 1".into(),
            });
        }

        self.simulate(invocation).map_err(|err| InstallError::Process {
            program: invocation.program.display().to_string(),
            reason: err.to_string(),
        })
    }
}
