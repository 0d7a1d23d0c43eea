//! Property-based tests for model reference types.

use proptest::prelude::*;

use super::types::{ObjectRef, SubjectRef};

fn type_name() -> impl Strategy<Value = String> {
    "[a-z][a-z_]{0,9}"
}

fn id() -> impl Strategy<Value = String> {
    "[a-z0-9][a-z0-9_-]{0,14}"
}

proptest! {
    #[test]
    fn object_ref_roundtrips(object_type in type_name(), object_id in id()) {
        let input = format!("{object_type}:{object_id}");
        let parsed = ObjectRef::parse(&input).unwrap();
        prop_assert_eq!(parsed.to_string(), input);
    }

    #[test]
    fn subject_ref_roundtrips_all_forms(
        subject_type in type_name(),
        subject_id in id(),
        relation in type_name(),
    ) {
        for input in [
            format!("{subject_type}:{subject_id}"),
            format!("{subject_type}:{subject_id}#{relation}"),
            format!("{subject_type}:*"),
        ] {
            let parsed = SubjectRef::parse(&input).unwrap();
            prop_assert_eq!(parsed.to_string(), input);
        }
    }

    #[test]
    fn bare_words_are_not_subjects(word in "[a-z]{1,12}") {
        prop_assert!(SubjectRef::parse(&word).is_err());
    }

    #[test]
    fn wildcard_ids_are_not_objects(object_type in type_name()) {
        let s = format!("{}:*", object_type);
        prop_assert!(ObjectRef::parse(&s).is_err());
    }
}
