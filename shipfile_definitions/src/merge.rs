//! Append-slice merge semantics shared by multi-document state parsing,
//! `bases:` layering, and environment value layering (spec.md 4.2).
//!
//! Sequences concatenate, maps deep-merge key by key, and anything else
//! (scalars, or a type mismatch between the two sides) is later-wins: the
//! overlay value replaces the base value outright.

use serde_yaml::{Mapping, Value};

/// Merge `overlay` into `base` in place, overlay taking precedence.
pub fn merge_mapping(base: &mut Mapping, overlay: &Mapping) {
    for (k, v) in overlay {
        match base.get_mut(k) {
            Some(existing) => merge_value_in_place(existing, v),
            None => { base.insert(k.clone(), v.clone()); }
        }
    }
}

fn merge_value_in_place(base: &mut Value, overlay: &Value) {
    match (base.clone(), overlay) {
        (Value::Mapping(mut bm), Value::Mapping(om)) => {
            merge_mapping(&mut bm, om);
            *base = Value::Mapping(bm);
        }
        (Value::Sequence(mut bs), Value::Sequence(os)) => {
            bs.extend(os.iter().cloned());
            *base = Value::Sequence(bs);
        }
        (_, other) => {
            *base = other.clone();
        }
    }
}

/// Merge two already-parsed top level documents (used for multi-document
/// state files, which concatenate/deep-merge into one logical document).
pub fn merge_documents(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(mut bm), Value::Mapping(om)) => {
            merge_mapping(&mut bm, &om);
            Value::Mapping(bm)
        }
        (Value::Sequence(mut bs), Value::Sequence(os)) => {
            bs.extend(os);
            Value::Sequence(bs)
        }
        (_, overlay) => overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> Value { serde_yaml::from_str(s).unwrap() }

    #[test]
    fn sequences_concatenate() {
        let base = yaml("releases:\n- name: a\n");
        let overlay = yaml("releases:\n- name: b\n");
        let merged = merge_documents(base, overlay);
        let releases = merged.as_mapping().unwrap()
            .get(&Value::String("releases".into())).unwrap()
            .as_sequence().unwrap();
        assert_eq!(releases.len(), 2);
    }

    #[test]
    fn maps_deep_merge() {
        let base = yaml("helmDefaults:\n  wait: true\n  timeout: 30\n");
        let overlay = yaml("helmDefaults:\n  timeout: 60\n");
        let merged = merge_documents(base, overlay);
        let defaults = merged.as_mapping().unwrap()
            .get(&Value::String("helmDefaults".into())).unwrap()
            .as_mapping().unwrap();
        assert_eq!(defaults[&Value::String("wait".into())], Value::Bool(true));
        assert_eq!(defaults[&Value::String("timeout".into())], Value::Number(60.into()));
    }

    #[test]
    fn scalars_are_later_wins() {
        let base = yaml("name: base\n");
        let overlay = yaml("name: overlay\n");
        let merged = merge_documents(base, overlay);
        assert_eq!(
            merged.as_mapping().unwrap().get(&Value::String("name".into())).unwrap().as_str(),
            Some("overlay")
        );
    }
}
