use std::collections::BTreeSet;
use std::fmt;

/// The four component slots managed by the installer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Slot {
    Interpreter,
    Runtime,
    Renderer,
    AuxiliaryLibraries,
}

impl Slot {
    pub const ALL: [Slot; 4] = [
        Slot::Interpreter,
        Slot::Runtime,
        Slot::Renderer,
        Slot::AuxiliaryLibraries,
    ];

    /// Field name used for this slot inside a manifest record.
    pub fn field(self) -> &'static str {
        match self {
            Slot::Interpreter => "interpreter_version",
            Slot::Runtime => "runtime_version",
            Slot::Renderer => "renderer_version",
            Slot::AuxiliaryLibraries => "auxiliary_library_set",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Slot::Interpreter => "interpreter",
            Slot::Runtime => "runtime",
            Slot::Renderer => "renderer",
            Slot::AuxiliaryLibraries => "auxiliary libraries",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Value recorded for a slot: a version string, or the library set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotValue {
    Version(String),
    Set(BTreeSet<String>),
}

impl fmt::Display for SlotValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotValue::Version(version) => f.write_str(version),
            SlotValue::Set(set) if set.is_empty() => f.write_str("(none)"),
            SlotValue::Set(set) => {
                let joined: Vec<&str> = set.iter().map(String::as_str).collect();
                f.write_str(&joined.join(", "))
            }
        }
    }
}

/// Key of one side-by-side install: `"{interpreter}-{runtime}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BundleId(pub String);

impl BundleId {
    pub fn new(interpreter_version: &str, runtime_version: &str) -> Self {
        Self(format!("{interpreter_version}-{runtime_version}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the host asks to have installed. Fixed for one orchestration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredConfiguration {
    pub interpreter_version: String,
    pub runtime_version: String,
    pub renderer_version: String,
    pub auxiliary_libraries: BTreeSet<String>,
}

impl DesiredConfiguration {
    pub fn new(
        interpreter_version: impl Into<String>,
        runtime_version: impl Into<String>,
        renderer_version: impl Into<String>,
        auxiliary_libraries: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            interpreter_version: interpreter_version.into(),
            runtime_version: runtime_version.into(),
            renderer_version: renderer_version.into(),
            auxiliary_libraries: auxiliary_libraries.into_iter().map(Into::into).collect(),
        }
    }

    pub fn bundle_id(&self) -> BundleId {
        BundleId::new(&self.interpreter_version, &self.runtime_version)
    }

    pub fn requested(&self, slot: Slot) -> SlotValue {
        match slot {
            Slot::Interpreter => SlotValue::Version(self.interpreter_version.clone()),
            Slot::Runtime => SlotValue::Version(self.runtime_version.clone()),
            Slot::Renderer => SlotValue::Version(self.renderer_version.clone()),
            Slot::AuxiliaryLibraries => SlotValue::Set(self.auxiliary_libraries.clone()),
        }
    }
}
