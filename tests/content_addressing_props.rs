#![allow(clippy::unwrap_used, clippy::expect_used)]

use proptest::prelude::*;
use stockroom_lib::items::{matches_search, Item};
use stockroom_lib::object_keys::validate_object_key;
use stockroom_lib::uploads::{content_hash, file_extension, object_path};

fn item(name: String, description: String, category: String) -> Item {
    Item {
        id: 1,
        name,
        description,
        quantity: 1,
        category,
        images: vec![],
        location: None,
        created_at: None,
    }
}

proptest! {
    #[test]
    fn object_path_depends_only_on_bytes_and_extension(
        bytes in proptest::collection::vec(any::<u8>(), 0..256),
        stem_a in "[a-z]{1,12}",
        stem_b in "[a-z]{1,12}",
        ext in "(png|jpg|gif|webp)",
    ) {
        let hash = content_hash(&bytes);
        let a = object_path("public", &hash, &file_extension(&format!("{stem_a}.{ext}")));
        let b = object_path("public", &hash, &file_extension(&format!("{stem_b}.{}", ext.to_uppercase())));
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(hash.len(), 64);
        prop_assert!(validate_object_key(&a).is_ok());
    }

    #[test]
    fn search_matches_any_substring_of_any_field_in_any_case(
        name in "[A-Za-z ]{1,20}",
        description in "[A-Za-z ]{0,20}",
        category in "[A-Za-z]{1,10}",
        start in 0usize..10,
        len in 1usize..5,
    ) {
        let item = item(name.clone(), description, category);
        let chars: Vec<char> = name.chars().collect();
        let start = start.min(chars.len() - 1);
        let end = (start + len).min(chars.len());
        let needle: String = chars[start..end].iter().collect();
        prop_assume!(!needle.trim().is_empty());
        prop_assert!(matches_search(&item, &needle.to_uppercase()));
        prop_assert!(matches_search(&item, &needle.to_lowercase()));
    }

    #[test]
    fn search_rejects_terms_absent_from_every_field(
        name in "[a-m]{1,10}",
        description in "[a-m]{0,10}",
        category in "[a-m]{1,10}",
        needle in "[n-z]{1,5}",
    ) {
        let item = item(name, description, category);
        prop_assert!(!matches_search(&item, &needle));
    }
}
