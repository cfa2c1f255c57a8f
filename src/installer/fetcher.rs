use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use flate2::read::GzDecoder;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::installer::error::{InstallError, Result};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZIP_MAGIC: [u8; 4] = *b"PK\x03\x04";
const ZIP_EMPTY_MAGIC: [u8; 4] = *b"PK\x05\x06";

/// Moves bytes from a URL into a writer.
pub trait Transport: Send {
    fn download(&self, url: &str, dest: &mut dyn Write) -> Result<u64>;
}

/// Blocking HTTP transport.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn download(&self, url: &str, dest: &mut dyn Write) -> Result<u64> {
        let network = |reason: String| InstallError::Network {
            url: url.to_string(),
            reason,
        };

        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|err| network(describe_reqwest_error(&err)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(network(format!("HTTP status {status}")));
        }

        response
            .copy_to(dest)
            .map_err(|err| network(describe_reqwest_error(&err)))
    }
}

fn describe_reqwest_error(err: &reqwest::Error) -> String {
    let kind = if err.is_timeout() {
        "timeout"
    } else if err.is_connect() {
        "connection failed"
    } else if err.is_body() || err.is_decode() {
        "interrupted body"
    } else {
        "request failed"
    };
    format!("{kind}: {err}")
}

/// Scratch directories created during one run. Each entry is a
/// `TempDir` guard, so dropping the registry removes whatever is left.
#[derive(Debug, Default)]
pub struct ScratchRegistry {
    base: Option<PathBuf>,
    entries: Vec<TempDir>,
}

impl ScratchRegistry {
    pub fn create_dir(&mut self, prefix: &str) -> Result<PathBuf> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(prefix);
        let dir = match &self.base {
            Some(base) => {
                fs::create_dir_all(base).map_err(|err| InstallError::io(base, err))?;
                builder.tempdir_in(base)
            }
            None => builder.tempdir(),
        }
        .map_err(|err| {
            InstallError::io(self.base.as_deref().unwrap_or(Path::new("<temp>")), err)
        })?;

        let path = dir.path().to_path_buf();
        debug!(path = %path.display(), "scratch directory created");
        self.entries.push(dir);
        Ok(path)
    }

    pub fn set_base(&mut self, base: PathBuf) {
        self.base = Some(base);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every registered path. Returns how many were released.
    pub fn release(&mut self) -> usize {
        let count = self.entries.len();
        for dir in self.entries.drain(..) {
            let path = dir.path().to_path_buf();
            match dir.close() {
                Ok(()) => info!(path = %path.display(), "removed scratch directory"),
                Err(err) => warn!(path = %path.display(), error = %err, "failed to remove scratch directory"),
            }
        }
        count
    }
}

impl Drop for ScratchRegistry {
    fn drop(&mut self) {
        if !self.is_empty() {
            self.release();
        }
    }
}

/// Downloads and unpacks remote artifacts into scratch space.
pub struct Fetcher {
    transport: Box<dyn Transport>,
    scratch: ScratchRegistry,
}

impl Fetcher {
    pub fn new(transport: Box<dyn Transport>, scratch: ScratchRegistry) -> Self {
        Self { transport, scratch }
    }

    pub fn fetch(&mut self, url: &str) -> Result<PathBuf> {
        let dir = self.scratch.create_dir("rez-download-")?;
        let target = dir.join(file_name_for(url));

        info!(url, path = %target.display(), "downloading");
        let file = File::create(&target).map_err(|err| InstallError::io(&target, err))?;
        let mut writer = BufWriter::new(file);
        let bytes = self.transport.download(url, &mut writer)?;
        writer
            .flush()
            .map_err(|err| InstallError::io(&target, err))?;

        debug!(url, bytes, "download complete");
        Ok(target)
    }

    pub fn extract_archive(&mut self, archive: &Path) -> Result<PathBuf> {
        let format = ArchiveFormat::sniff(archive)?;
        let dir = self.scratch.create_dir("rez-extract-")?;
        let file = File::open(archive).map_err(|err| InstallError::io(archive, err))?;

        match format {
            ArchiveFormat::TarGz => unpack_tar_gz(file, &dir, archive)?,
            ArchiveFormat::Zip => zip::ZipArchive::new(file)
                .and_then(|mut zip| zip.extract(&dir))
                .map_err(|err| InstallError::archive(archive, err))?,
        }

        info!(archive = %archive.display(), dir = %dir.display(), ?format, "extracted");
        Ok(dir)
    }

    /// Directory new scratch paths are created in (default: system temp).
    pub fn set_scratch_base(&mut self, base: PathBuf) {
        self.scratch.set_base(base);
    }

    pub fn scratch_len(&self) -> usize {
        self.scratch.len()
    }

    pub fn release_scratch(&mut self) -> usize {
        self.scratch.release()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveFormat {
    TarGz,
    Zip,
}

impl ArchiveFormat {
    fn sniff(path: &Path) -> Result<Self> {
        let mut magic = [0u8; 4];
        let read = File::open(path)
            .and_then(|mut file| file.read(&mut magic))
            .map_err(|err| InstallError::io(path, err))?;

        if read >= 2 && magic[..2] == GZIP_MAGIC {
            Ok(Self::TarGz)
        } else if read == 4 && (magic == ZIP_MAGIC || magic == ZIP_EMPTY_MAGIC) {
            Ok(Self::Zip)
        } else {
            Err(InstallError::archive(path, "unsupported archive format"))
        }
    }
}

/// Unpacks entry by entry so that a path escaping `dir` fails the whole
/// archive instead of being skipped.
fn unpack_tar_gz(file: File, dir: &Path, archive: &Path) -> Result<()> {
    let mut tar = tar::Archive::new(GzDecoder::new(file));
    let entries = tar
        .entries()
        .map_err(|err| InstallError::archive(archive, err))?;

    for entry in entries {
        let mut entry = entry.map_err(|err| InstallError::archive(archive, err))?;
        let unpacked = entry
            .unpack_in(dir)
            .map_err(|err| InstallError::archive(archive, err))?;
        if !unpacked {
            let name = entry
                .path()
                .map(|path| path.display().to_string())
                .unwrap_or_default();
            return Err(InstallError::archive(
                archive,
                format!("entry escapes extraction directory: {name}"),
            ));
        }
    }
    Ok(())
}

fn file_name_for(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty() && !segment.contains('\\') && *segment != "..")
        .unwrap_or("download")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installer::testing::{FakeTransport, scratch_in, tar_gz, zip_archive};
    use flate2::Compression;
    use flate2::write::GzEncoder;

    fn fetcher(transport: FakeTransport, base: &Path) -> Fetcher {
        Fetcher::new(Box::new(transport), scratch_in(base))
    }

    #[test]
    fn file_name_comes_from_last_segment() {
        assert_eq!(file_name_for("https://x.invalid/a/rez-3.3.0.tar.gz?raw=1"), "rez-3.3.0.tar.gz");
        assert_eq!(file_name_for("https://x.invalid/"), "download");
    }

    #[test]
    fn fetch_writes_into_scratch() {
        let base = TempDir::new().expect("tempdir");
        let transport = FakeTransport::default().serve("https://x.invalid/nuget.exe", b"MZ".to_vec());
        let mut fetcher = fetcher(transport, base.path());

        let path = fetcher.fetch("https://x.invalid/nuget.exe").expect("fetch");
        assert_eq!(fs::read(&path).expect("read"), b"MZ");
        assert!(path.starts_with(base.path()));
        assert_eq!(fetcher.scratch_len(), 1);

        assert_eq!(fetcher.release_scratch(), 1);
        assert!(!path.exists());
    }

    #[test]
    fn missing_url_is_network_error() {
        let base = TempDir::new().expect("tempdir");
        let mut fetcher = fetcher(FakeTransport::default(), base.path());

        let err = fetcher.fetch("https://x.invalid/missing.zip").expect_err("404");
        assert_eq!(err.kind(), "network");
    }

    #[test]
    fn extracts_tar_gz_and_zip() {
        let base = TempDir::new().expect("tempdir");
        let transport = FakeTransport::default()
            .serve("https://x.invalid/a.tar.gz", tar_gz(&[("rez-3.3.0/install.py", b"print()")]))
            .serve("https://x.invalid/b.zip", zip_archive(&[("G/bin/dot.exe", b"dot")]));
        let mut fetcher = fetcher(transport, base.path());

        let archive = fetcher.fetch("https://x.invalid/a.tar.gz").expect("fetch");
        let dir = fetcher.extract_archive(&archive).expect("extract tar");
        assert!(dir.join("rez-3.3.0/install.py").is_file());

        let archive = fetcher.fetch("https://x.invalid/b.zip").expect("fetch");
        let dir = fetcher.extract_archive(&archive).expect("extract zip");
        assert_eq!(fs::read(dir.join("G/bin/dot.exe")).expect("read"), b"dot");

        assert_eq!(fetcher.release_scratch(), 4);
        assert_eq!(fs::read_dir(base.path()).expect("list").count(), 0);
    }

    #[test]
    fn garbage_is_archive_error() {
        let base = TempDir::new().expect("tempdir");
        let transport = FakeTransport::default()
            .serve("https://x.invalid/bad.zip", b"definitely not an archive".to_vec())
            .serve(
                "https://x.invalid/cut.tar.gz",
                // gzip header followed by a deflate block of reserved type
                vec![0x1f, 0x8b, 0x08, 0, 0, 0, 0, 0, 0, 0xff, 0xff, 0xff, 0xff, 0xff],
            );
        let mut fetcher = fetcher(transport, base.path());

        let bad = fetcher.fetch("https://x.invalid/bad.zip").expect("fetch");
        assert_eq!(fetcher.extract_archive(&bad).expect_err("garbage").kind(), "archive");

        let cut = fetcher.fetch("https://x.invalid/cut.tar.gz").expect("fetch");
        assert_eq!(fetcher.extract_archive(&cut).expect_err("truncated").kind(), "archive");
    }

    #[test]
    fn tar_entry_outside_extraction_dir_is_rejected() {
        let mut header = tar::Header::new_gnu();
        let name = b"../evil.txt";
        header.as_gnu_mut().expect("gnu header").name[..name.len()].copy_from_slice(name);
        header.set_size(4);
        header.set_mode(0o644);
        header.set_cksum();
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        builder.append(&header, &b"evil"[..]).expect("append");
        let bytes = builder
            .into_inner()
            .and_then(|gz| gz.finish())
            .expect("finish");

        let base = TempDir::new().expect("tempdir");
        let transport = FakeTransport::default().serve("https://x.invalid/evil.tar.gz", bytes);
        let mut fetcher = fetcher(transport, base.path());

        let archive = fetcher.fetch("https://x.invalid/evil.tar.gz").expect("fetch");
        let err = fetcher.extract_archive(&archive).expect_err("escaping entry");
        assert_eq!(err.kind(), "archive");
        assert!(err.to_string().contains("escapes"));
        assert!(!base.path().join("evil.txt").exists());
    }

    #[test]
    fn dropping_registry_removes_leftovers() {
        let base = TempDir::new().expect("tempdir");
        let path = {
            let mut scratch = scratch_in(base.path());
            scratch.create_dir("rez-test-").expect("create")
        };
        assert!(!path.exists());
    }
}
