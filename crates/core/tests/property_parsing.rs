use proptest::prelude::*;
use tabrag_core::{parse_amount, slugify};

proptest! {
    #[test]
    fn slugs_are_ascii_snake_case(input in "\\PC{0,40}") {
        let slug = slugify(&input);
        prop_assert!(!slug.is_empty());
        prop_assert!(slug.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_'));
        prop_assert!(!slug.starts_with('_') && !slug.ends_with('_'));
        prop_assert!(!slug.contains("__"));
    }

    #[test]
    fn slugify_is_idempotent(input in "\\PC{0,40}") {
        let once = slugify(&input);
        prop_assert_eq!(slugify(&once), once);
    }

    #[test]
    fn dotted_thousands_with_comma_cents_parse(value in 1_000u64..1_000_000_000, cents in 0u64..100) {
        let rendered = format!("$ {},{:02}", group(value, '.'), cents);
        let parsed = parse_amount(&rendered).unwrap();
        let expected = value as f64 + cents as f64 / 100.0;
        prop_assert!((parsed - expected).abs() < 1e-4);
    }

    #[test]
    fn comma_thousands_with_dot_cents_parse(value in 1_000u64..1_000_000_000, cents in 0u64..100) {
        let rendered = format!("USD {}.{:02}", group(value, ','), cents);
        let parsed = parse_amount(&rendered).unwrap();
        let expected = value as f64 + cents as f64 / 100.0;
        prop_assert!((parsed - expected).abs() < 1e-4);
    }

    #[test]
    fn plain_integers_parse(value in 0u64..1_000_000_000) {
        prop_assert_eq!(parse_amount(&value.to_string()), Some(value as f64));
    }
}

fn group(value: u64, sep: char) -> String {
    let digits = value.to_string();
    let mut out = String::new();
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            out.push(sep);
        }
        out.push(ch);
    }
    out
}
