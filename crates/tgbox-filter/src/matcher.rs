//! Record predicate for a compiled [`SearchFilter`].
//!
//! Include fields are ANDed, values inside one field are ORed, and any
//! matching exclude field rejects the record. Encrypted records only expose
//! `id`, `size`, `upload_time` and `file_salt`: an include constraint on any
//! other field fails for them, an exclude constraint on one never fires.

use tgbox_core::{BoxFile, EncryptedRecord, FileRecord};

use crate::filter::{normalize_scope, FilterSet, SearchFilter};

/// Field view shared by both record variants.
struct View<'a> {
    id: u64,
    size: u64,
    upload_time: i64,
    file_salt: &'a str,
    plain: Option<&'a FileRecord>,
}

impl<'a> From<&'a BoxFile> for View<'a> {
    fn from(file: &'a BoxFile) -> Self {
        match file {
            BoxFile::Encrypted(EncryptedRecord {
                id,
                size,
                upload_time,
                file_salt,
            }) => View {
                id: *id,
                size: *size,
                upload_time: *upload_time,
                file_salt,
                plain: None,
            },
            BoxFile::Decrypted(r) => View {
                id: r.id,
                size: r.size,
                upload_time: r.upload_time,
                file_salt: &r.file_salt,
                plain: Some(r),
            },
        }
    }
}

impl SearchFilter {
    /// Evaluate the filter against one record.
    ///
    /// `scope_aware` is false for backends without a path index; their scope
    /// constraints are skipped rather than failed.
    pub fn matches(&self, file: &BoxFile, scope_aware: bool) -> bool {
        let view = View::from(file);
        set_matches(&self.include, &view, scope_aware, true)
            && !set_matches(&self.exclude, &view, scope_aware, false)
    }

    pub fn matches_record(&self, record: &FileRecord) -> bool {
        self.matches(&BoxFile::Decrypted(record.clone()), true)
    }
}

/// Include mode (`all = true`): every populated field is satisfied.
/// Exclude mode (`all = false`): at least one populated field is satisfied.
fn set_matches(set: &FilterSet, view: &View<'_>, scope_aware: bool, all: bool) -> bool {
    let mut checks: Vec<Option<bool>> = Vec::with_capacity(16);

    // Fields readable without the key.
    checks.push(field(&set.id, |id| view.id == *id));
    if set.id_bounds_active() {
        checks.push(field(&set.min_id, |min| view.id >= *min));
        checks.push(field(&set.max_id, |max| view.id <= *max));
    }
    checks.push(field(&set.min_size, |min| view.size >= *min));
    checks.push(field(&set.max_size, |max| view.size <= *max));
    checks.push(field(&set.min_time, |min| view.upload_time >= *min));
    checks.push(field(&set.max_time, |max| view.upload_time <= *max));
    checks.push(field(&set.file_salt, |p| p.equals(view.file_salt)));

    // Fields behind the record key.
    let locked = |populated: bool| populated.then_some(all.then_some(false)).flatten();
    match view.plain {
        Some(r) => {
            checks.push(field(&set.file_name, |p| p.contained_in(&r.file_name)));
            checks.push(field(&set.file_path, |p| p.contained_in(&r.file_path)));
            checks.push(field(&set.mime, |p| {
                r.mime.as_deref().is_some_and(|m| p.contained_in(m))
            }));
            checks.push(field(&set.imported, |v| r.imported == *v));
            checks.push(field(&set.cattrs, |p| {
                p.fields.iter().all(|(key, value)| {
                    r.cattrs.get(key).is_some_and(|have| value.matches(have))
                })
            }));
            if scope_aware {
                checks.push(field(&set.scope, |s| {
                    in_scope(&r.file_path, s, set.non_recursive_scope)
                }));
            }
        }
        None => {
            checks.push(locked(!set.file_name.is_empty()));
            checks.push(locked(!set.file_path.is_empty()));
            checks.push(locked(!set.mime.is_empty()));
            checks.push(locked(!set.imported.is_empty()));
            checks.push(locked(!set.cattrs.is_empty()));
            if scope_aware {
                checks.push(locked(!set.scope.is_empty()));
            }
        }
    }

    let mut populated = checks.into_iter().flatten();
    if all {
        populated.all(|ok| ok)
    } else {
        populated.any(|ok| ok)
    }
}

/// `None` when the field has no values, otherwise whether any value matches.
fn field<T>(values: &[T], pred: impl Fn(&T) -> bool) -> Option<bool> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().any(pred))
    }
}

/// Recursive scope: the directory itself or anything below it.
/// Non-recursive: the directory itself only.
pub fn in_scope(file_path: &str, scope: &str, non_recursive: bool) -> bool {
    let dir = normalize_scope(file_path);
    let scope = normalize_scope(scope);
    if dir == scope {
        return true;
    }
    if non_recursive {
        return false;
    }
    if scope == "/" {
        return dir.starts_with('/');
    }
    dir.strip_prefix(scope)
        .is_some_and(|rest| rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile;
    use tgbox_core::CAttrs;

    fn record(id: u64, name: &str, path: &str, size: u64) -> FileRecord {
        FileRecord {
            id,
            file_name: name.into(),
            file_path: path.into(),
            size,
            upload_time: 1_700_000_000,
            mime: Some("application/pdf".into()),
            duration: None,
            cattrs: CAttrs::new(),
            file_salt: format!("{id:02x}"),
            imported: false,
            fingerprint: None,
        }
    }

    fn encrypted(id: u64, size: u64) -> BoxFile {
        BoxFile::Encrypted(EncryptedRecord {
            id,
            size,
            upload_time: 1_700_000_000,
            file_salt: format!("{id:02x}"),
        })
    }

    #[test]
    fn empty_filter_matches_everything() {
        let f = SearchFilter::new();
        assert!(f.matches_record(&record(1, "a", "/", 1)));
        assert!(f.matches(&encrypted(2, 2), true));
    }

    #[test]
    fn exclude_overrides_include() {
        let f = compile(["file_name=report", "+e", "file_name=report_draft"]).unwrap();
        assert!(!f.matches_record(&record(1, "report_draft.pdf", "/docs", 10)));
        assert!(f.matches_record(&record(2, "report_final.pdf", "/docs", 10)));
        assert!(!f.matches_record(&record(3, "notes.txt", "/docs", 10)));
    }

    #[test]
    fn and_across_fields_or_within() {
        let f = compile(["file_name=a", "file_name=b", "min_size=100"]).unwrap();
        assert!(f.matches_record(&record(1, "b.txt", "/", 100)));
        assert!(!f.matches_record(&record(2, "b.txt", "/", 99)));
        assert!(!f.matches_record(&record(3, "c.txt", "/", 500)));
    }

    #[test]
    fn bounds_are_inclusive() {
        let f = compile(["min_id=2", "max_id=4"]).unwrap();
        let ids: Vec<u64> = (1..=5)
            .filter(|id| f.matches_record(&record(*id, "x", "/", 1)))
            .collect();
        assert_eq!(ids, vec![2, 3, 4]);
    }

    #[test]
    fn scope_drops_id_bounds() {
        let f = compile(["scope=/docs", "min_id=100"]).unwrap();
        assert!(f.matches_record(&record(1, "x", "/docs/sub", 1)));
    }

    #[test]
    fn scope_recursive_and_direct() {
        let rec = compile(["scope=/home/user"]).unwrap();
        let direct = compile(["scope=/home/user/", "non_recursive_scope=true"]).unwrap();

        let child = record(1, "a", "/home/user", 1);
        let nested = record(2, "b", "/home/user/music", 1);
        let sibling = record(3, "c", "/home/username", 1);

        assert!(rec.matches_record(&child));
        assert!(rec.matches_record(&nested));
        assert!(!rec.matches_record(&sibling));

        assert!(direct.matches_record(&child));
        assert!(!direct.matches_record(&nested));
    }

    #[test]
    fn scope_ignored_without_scope_support() {
        let f = compile(["scope=/elsewhere"]).unwrap();
        let file = BoxFile::Decrypted(record(1, "a", "/docs", 1));
        assert!(!f.matches(&file, true));
        assert!(f.matches(&file, false));
    }

    #[test]
    fn encrypted_records_fail_locked_includes() {
        let f = compile(["file_name=a"]).unwrap();
        assert!(!f.matches(&encrypted(1, 10), true));

        let f = compile(["min_size=5"]).unwrap();
        assert!(f.matches(&encrypted(1, 10), true));
    }

    #[test]
    fn encrypted_records_escape_locked_excludes() {
        let f = compile(["+e", "file_name=a"]).unwrap();
        assert!(f.matches(&encrypted(1, 10), true));

        let f = compile(["+e", "max_size=20"]).unwrap();
        assert!(!f.matches(&encrypted(1, 10), true));
    }

    #[test]
    fn regex_mode_searches() {
        let f = compile(["re=true", "file_name=^rep.*\\.pdf$"]).unwrap();
        assert!(f.matches_record(&record(1, "report.pdf", "/", 1)));
        assert!(!f.matches_record(&record(2, "my report.pdf", "/", 1)));
    }

    #[test]
    fn file_salt_is_exact() {
        let f = compile(["file_salt=0a"]).unwrap();
        assert!(f.matches_record(&record(10, "x", "/", 1)));
        let f = compile(["file_salt=0"]).unwrap();
        assert!(!f.matches_record(&record(10, "x", "/", 1)));
    }

    #[test]
    fn cattrs_require_every_key() {
        let mut r = record(1, "x", "/", 1);
        r.cattrs.insert("comment".into(), b"hi".to_vec());
        r.cattrs.insert("tag".into(), b"work".to_vec());

        assert!(compile(["cattrs=comment: hi"]).unwrap().matches_record(&r));
        assert!(compile(["cattrs=comment: hi | tag: work"]).unwrap().matches_record(&r));
        assert!(!compile(["cattrs=comment: hi | tag: home"]).unwrap().matches_record(&r));
        assert!(!compile(["cattrs=missing: x"]).unwrap().matches_record(&r));
    }

    #[test]
    fn imported_flag() {
        let mut r = record(1, "x", "/", 1);
        assert!(!compile(["imported=true"]).unwrap().matches_record(&r));
        r.imported = true;
        assert!(compile(["imported=yes"]).unwrap().matches_record(&r));
    }

    #[test]
    fn in_scope_root() {
        assert!(in_scope("/a/b", "/", false));
        assert!(in_scope("/", "/", true));
        assert!(!in_scope("/a", "/", true));
    }
}
