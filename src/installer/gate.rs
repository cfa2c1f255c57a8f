use crate::installer::manifest::ManifestRecord;
use crate::model::toolchain::{Slot, SlotValue};

/// Whether `slot` needs (re)installing to reach `requested`.
///
/// Library sets compare as sets; since both sides are already
/// deduplicated and ordered, plain equality is set equality.
pub fn should_install(slot: Slot, requested: &SlotValue, current: Option<&ManifestRecord>) -> bool {
    let Some(record) = current else {
        return true;
    };

    record.get(slot).as_ref() != Some(requested)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn set(items: &[&str]) -> SlotValue {
        SlotValue::Set(items.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>())
    }

    fn record() -> ManifestRecord {
        ManifestRecord {
            interpreter_version: Some("3.13.11".into()),
            runtime_version: Some("3.3.0".into()),
            renderer_version: Some("14.1.1".into()),
            auxiliary_library_set: Some(["A==1", "B==2"].map(String::from).into()),
            ..ManifestRecord::default()
        }
    }

    #[test]
    fn absent_record_always_installs() {
        for slot in Slot::ALL {
            assert!(should_install(slot, &SlotValue::Version("x".into()), None));
        }
    }

    #[test]
    fn library_order_is_irrelevant() {
        let record = record();
        assert!(!should_install(Slot::AuxiliaryLibraries, &set(&["B==2", "A==1"]), Some(&record)));
        assert!(should_install(Slot::AuxiliaryLibraries, &set(&["A==1"]), Some(&record)));
    }

    #[test]
    fn scalar_slots_are_independent() {
        let record = record();
        assert!(should_install(Slot::Renderer, &SlotValue::Version("15.0.0".into()), Some(&record)));
        assert!(!should_install(Slot::Runtime, &SlotValue::Version("3.3.0".into()), Some(&record)));
        assert!(!should_install(
            Slot::Interpreter,
            &SlotValue::Version("3.13.11".into()),
            Some(&record)
        ));
    }

    #[test]
    fn missing_field_in_partial_record_installs() {
        let partial = ManifestRecord {
            interpreter_version: Some("3.13.11".into()),
            ..ManifestRecord::default()
        };
        assert!(should_install(Slot::Runtime, &SlotValue::Version("3.3.0".into()), Some(&partial)));
        assert!(should_install(Slot::AuxiliaryLibraries, &set(&[]), Some(&partial)));
    }
}
