use thiserror::Error;

/// Failure modes of the installer core. Variants carry their context as
/// text so results can be cloned into reports and across threads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstallError {
    #[error("network error fetching {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("archive error in {path}: {reason}")]
    Archive { path: String, reason: String },

    #[error("process `{program}` failed: {reason}")]
    Process { program: String, reason: String },

    #[error("manifest {path}: {reason}")]
    Manifest { path: String, reason: String },

    #[error("missing prerequisite: {0}")]
    Prerequisite(String),

    #[error("filesystem error at {path}: {reason}")]
    Io { path: String, reason: String },
}

impl InstallError {
    pub fn io(path: &std::path::Path, err: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    }

    pub fn archive(path: &std::path::Path, reason: impl ToString) -> Self {
        Self::Archive {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn manifest(path: &std::path::Path, reason: impl ToString) -> Self {
        Self::Manifest {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    /// Short machine-friendly name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network { .. } => "network",
            Self::Archive { .. } => "archive",
            Self::Process { .. } => "process",
            Self::Manifest { .. } => "manifest",
            Self::Prerequisite(_) => "prerequisite",
            Self::Io { .. } => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, InstallError>;
