//! Include/exclude precedence over generated records and filters.

use proptest::prelude::*;
use tgbox_core::{CAttrs, FileRecord};
use tgbox_filter::{compile, FilterError};

fn record(id: u64, name: &str, size: u64) -> FileRecord {
    FileRecord {
        id,
        file_name: name.into(),
        file_path: "/home/user/docs".into(),
        size,
        upload_time: 1_645_568_542,
        mime: Some("text/plain".into()),
        duration: None,
        cattrs: CAttrs::new(),
        file_salt: "00ff".into(),
        imported: false,
        fingerprint: None,
    }
}

#[test]
fn report_versus_report_draft() {
    let filter = compile(["file_name=report", "+e", "file_name=report_draft"]).unwrap();
    assert!(!filter.matches_record(&record(1, "report_draft.pdf", 10)));
    assert!(filter.matches_record(&record(2, "report_final.pdf", 10)));
}

#[test]
fn time_bounds_are_inclusive() {
    let filter = compile(["min_time=1645500000", "max_time=1645600000"]).unwrap();
    assert!(filter.matches_record(&record(1, "a", 1)));

    let filter = compile(["+e", "min_time=1645568543"]).unwrap();
    assert!(filter.matches_record(&record(1, "a", 1)));

    let filter = compile(["+e", "min_time=1645568542"]).unwrap();
    assert!(!filter.matches_record(&record(1, "a", 1)));
}

#[test]
fn errors_are_distinct() {
    assert!(matches!(
        compile(["+i", "oops"]),
        Err(FilterError::MalformedFilter(t)) if t == "oops"
    ));
    assert!(matches!(
        compile(["+e", "size=1"]),
        Err(FilterError::UnknownFilter(k)) if k == "size"
    ));
}

fn name_strategy() -> impl Strategy<Value = String> {
    "[a-z]{1,6}(_[a-z]{1,6})?\\.(pdf|txt)"
}

proptest! {
    /// A record matching an exclude value is rejected whatever the include side says.
    #[test]
    fn exclude_always_wins(
        name in name_strategy(),
        size in 0u64..10_000,
        cut in 0usize..4,
    ) {
        let fragment: String = name.chars().take(cut + 1).collect();
        let include = format!("file_name={fragment}");
        let exclude = format!("file_name={fragment}");
        let filter = compile([include.as_str(), "+e", exclude.as_str()]).unwrap();
        prop_assert!(!filter.matches_record(&record(1, &name, size)));
    }

    /// With no exclude side, a substring of the name always includes it.
    #[test]
    fn include_substring_matches(name in name_strategy(), start in 0usize..3) {
        let fragment: String = name.chars().skip(start).take(3).collect();
        let token = format!("file_name={fragment}");
        let filter = compile([token.as_str()]).unwrap();
        prop_assert!(filter.matches_record(&record(1, &name, 1)));
    }

    /// Size bounds partition records exactly at the boundary.
    #[test]
    fn size_bound_is_inclusive(size in 0u64..1_000_000, bound in 0u64..1_000_000) {
        let token = format!("min_size={bound}");
        let filter = compile([token.as_str()]).unwrap();
        prop_assert_eq!(filter.matches_record(&record(1, "f.txt", size)), size >= bound);
    }
}
