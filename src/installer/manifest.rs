use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{ErrorKind, Write as _};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::installer::error::{InstallError, Result};
use crate::model::toolchain::{BundleId, Slot, SlotValue};

const MANIFEST_TMP_SUFFIX: &str = "json.tmp";

/// Last successfully installed values for one bundle. Every field is
/// optional: a partial record is what an interrupted or failed run leaves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renderer_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auxiliary_library_set: Option<BTreeSet<String>>,
    /// Field name -> UNIX seconds of the last successful write.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub installed_at: BTreeMap<String, u64>,
}

impl ManifestRecord {
    pub fn get(&self, slot: Slot) -> Option<SlotValue> {
        match slot {
            Slot::AuxiliaryLibraries => self.auxiliary_library_set.clone().map(SlotValue::Set),
            Slot::Interpreter => self.interpreter_version.clone().map(SlotValue::Version),
            Slot::Runtime => self.runtime_version.clone().map(SlotValue::Version),
            Slot::Renderer => self.renderer_version.clone().map(SlotValue::Version),
        }
    }

    fn set(&mut self, slot: Slot, value: SlotValue, at_secs: u64) {
        match (slot, value) {
            (Slot::AuxiliaryLibraries, SlotValue::Set(set)) => {
                self.auxiliary_library_set = Some(set);
            }
            (Slot::Interpreter, SlotValue::Version(version)) => {
                self.interpreter_version = Some(version);
            }
            (Slot::Runtime, SlotValue::Version(version)) => self.runtime_version = Some(version),
            (Slot::Renderer, SlotValue::Version(version)) => self.renderer_version = Some(version),
            (slot, value) => {
                warn!(%slot, %value, "manifest: value shape does not match slot, ignored");
                return;
            }
        }
        self.installed_at.insert(slot.field().to_string(), at_secs);
    }
}

/// JSON manifest shared by every bundle installed under one root.
///
/// The store caches the record of its own bundle. Reads fail open: anything
/// unreadable is reported as "nothing installed".
#[derive(Debug)]
pub struct ManifestStore {
    path: PathBuf,
    bundle: BundleId,
    current: Option<ManifestRecord>,
}

impl ManifestStore {
    pub fn open(path: impl Into<PathBuf>, bundle: BundleId) -> Self {
        let mut store = Self {
            path: path.into(),
            bundle,
            current: None,
        };
        store.current = store.load(&store.bundle);
        store
    }

    /// Cached record of this store's bundle.
    pub fn current(&self) -> Option<&ManifestRecord> {
        self.current.as_ref()
    }

    /// Reads the record of `bundle` from disk.
    pub fn load(&self, bundle: &BundleId) -> Option<ManifestRecord> {
        let document = match read_document(&self.path) {
            Ok(Some(document)) => document,
            Ok(None) => {
                debug!(path = %self.path.display(), "manifest: no document yet");
                return None;
            }
            Err(err) => {
                warn!(error = %err, "manifest: unreadable, treating as nothing installed");
                return None;
            }
        };

        let entry = document.get(bundle.as_str())?.clone();
        match serde_json::from_value::<ManifestRecord>(entry) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    bundle = %bundle,
                    error = %err,
                    "manifest: malformed bundle entry, treating as nothing installed"
                );
                None
            }
        }
    }

    /// Records `value` for `slot` and persists the document.
    ///
    /// The cached record is updated before persisting, so it stays current
    /// for the rest of the run even if the write fails.
    pub fn write(&mut self, slot: Slot, value: SlotValue) -> Result<()> {
        let record = self.current.get_or_insert_with(ManifestRecord::default);
        record.set(slot, value, now_secs());
        let fields = match serde_json::to_value(&*record) {
            Ok(Value::Object(fields)) => fields,
            Ok(_) => Map::new(),
            Err(err) => return Err(InstallError::manifest(&self.path, err)),
        };

        let mut document = match read_document(&self.path) {
            Ok(document) => document.unwrap_or_default(),
            Err(err) => {
                warn!(error = %err, "manifest: replacing unreadable document");
                Map::new()
            }
        };

        // Keep keys this version does not know about.
        let mut entry = match document.remove(self.bundle.as_str()) {
            Some(Value::Object(existing)) => existing,
            _ => Map::new(),
        };
        entry.extend(fields);
        document.insert(self.bundle.as_str().to_string(), Value::Object(entry));

        save_document(&self.path, &document)?;
        info!(bundle = %self.bundle, field = slot.field(), "manifest updated");
        Ok(())
    }
}

fn read_document(path: &Path) -> Result<Option<Map<String, Value>>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(InstallError::manifest(path, err)),
    };

    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(document)) => Ok(Some(document)),
        Ok(_) => Err(InstallError::manifest(path, "top level is not an object")),
        Err(err) => Err(InstallError::manifest(path, err)),
    }
}

fn save_document(path: &Path, document: &Map<String, Value>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| InstallError::manifest(path, err))?;
    }

    let mut body = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut body, formatter);
    document
        .serialize(&mut serializer)
        .map_err(|err| InstallError::manifest(path, err))?;

    let tmp_path = path.with_extension(MANIFEST_TMP_SUFFIX);
    let mut file = fs::File::create(&tmp_path).map_err(|err| InstallError::manifest(&tmp_path, err))?;
    file.write_all(&body)
        .and_then(|()| file.sync_all())
        .map_err(|err| InstallError::manifest(&tmp_path, err))?;
    drop(file);

    fs::rename(&tmp_path, path).map_err(|err| {
        let _ = fs::remove_file(&tmp_path);
        InstallError::manifest(path, err)
    })
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
