use proptest::prelude::*;
use sync_fs::RelPath;

proptest! {
    #[test]
    fn test_normalization_invariants(s in "[a-z./\\\\]{0,24}") {
        if let Ok(path) = RelPath::new(&s) {
            let as_str = path.as_str();

            // No backslashes, no empty components, no dot components
            prop_assert!(!as_str.contains('\\'));
            prop_assert!(!as_str.starts_with('/'));
            prop_assert!(!as_str.ends_with('/'));
            prop_assert!(as_str.split('/').all(|c| !c.is_empty() && c != "." && c != ".."));

            // Normalizing twice changes nothing
            let again = RelPath::new(as_str).unwrap();
            prop_assert_eq!(&path, &again);
        }
    }

    #[test]
    fn test_join_then_parent(a in "[a-z]{1,8}(/[a-z]{1,8}){0,3}", b in "[a-z]{1,8}") {
        let base = RelPath::new(&a).unwrap();
        let joined = base.join(&b).unwrap();

        prop_assert_eq!(joined.parent(), Some(base.clone()));
        prop_assert_eq!(joined.depth(), base.depth() + 1);
        prop_assert!(joined.is_inside(&base));
        prop_assert_eq!(joined.file_name(), b.as_str());
    }

    #[test]
    fn test_serde_round_trip(a in "[a-z]{1,8}(/[a-z]{1,8}){0,3}") {
        let path = RelPath::new(&a).unwrap();
        let json = serde_json::to_string(&path).unwrap();
        let back: RelPath = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(path, back);
    }
}
