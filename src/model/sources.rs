/// Download locations for the fetched components. `{version}` is replaced
/// with the requested version of the slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sources {
    pub interpreter_installer_url: String,
    pub runtime_archive_url: String,
    pub renderer_archive_url: String,
    /// Directory inside the extracted renderer archive that holds its binaries.
    pub renderer_bin_subdir: String,
}

impl Sources {
    pub fn runtime_archive(&self, version: &str) -> String {
        expand(&self.runtime_archive_url, version)
    }

    pub fn renderer_archive(&self, version: &str) -> String {
        expand(&self.renderer_archive_url, version)
    }

    pub fn renderer_bin(&self, version: &str) -> String {
        expand(&self.renderer_bin_subdir, version)
    }
}

fn expand(template: &str, version: &str) -> String {
    template.replace("{version}", version)
}
