//! Token grammar → [`SearchFilter`].

use regex_lite::Regex;
use thiserror::Error;
use tracing::debug;

use tgbox_core::cattrs::parse_cattrs_arg;
use tgbox_core::CAttrs;

use crate::filter::{CAttrValue, CAttrsPattern, FilterSet, SearchFilter, TextPattern};
use crate::units::{parse_size, parse_time};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    /// Token is neither a mode marker nor `key=value`
    #[error("malformed filter token `{0}`: expected key=value")]
    MalformedFilter(String),

    #[error("unknown filter key `{0}`")]
    UnknownFilter(String),

    #[error("invalid value for `{key}`: `{value}`")]
    InvalidValue { key: String, value: String },

    #[error("invalid regular expression for `{key}`: {reason}")]
    InvalidRegex { key: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Include,
    Exclude,
}

/// Raw values gathered before `re` is known for each mode.
#[derive(Default)]
struct RawSet {
    set: FilterSet,
    file_name: Vec<String>,
    file_path: Vec<String>,
    mime: Vec<String>,
    file_salt: Vec<String>,
    cattrs: Vec<CAttrs>,
}

/// Compile a flat token list into a filter.
///
/// `re=true` turns every string value of its mode into a regex, whether it
/// appears before or after those values.
pub fn compile<I, S>(tokens: I) -> Result<SearchFilter, FilterError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut include = RawSet::default();
    let mut exclude = RawSet::default();
    let mut mode = Mode::Include;

    for token in tokens {
        let token = token.as_ref();
        match token {
            "+i" | "++include" => {
                mode = Mode::Include;
                continue;
            }
            "+e" | "++exclude" => {
                mode = Mode::Exclude;
                continue;
            }
            _ => {}
        }

        let (key, value) = token
            .split_once('=')
            .ok_or_else(|| FilterError::MalformedFilter(token.to_string()))?;
        let raw = match mode {
            Mode::Include => &mut include,
            Mode::Exclude => &mut exclude,
        };
        push_value(raw, key.trim(), value)?;
    }

    let filter = SearchFilter {
        include: finish(include)?,
        exclude: finish(exclude)?,
    };
    debug!(?filter, "compiled search filter");
    Ok(filter)
}

fn push_value(raw: &mut RawSet, key: &str, value: &str) -> Result<(), FilterError> {
    let invalid = || FilterError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    };
    let set = &mut raw.set;

    match key {
        "id" => set.id.push(value.trim().parse().map_err(|_| invalid())?),
        "min_id" => set.min_id.push(value.trim().parse().map_err(|_| invalid())?),
        "max_id" => set.max_id.push(value.trim().parse().map_err(|_| invalid())?),
        "min_size" => set.min_size.push(parse_size(value).ok_or_else(invalid)?),
        "max_size" => set.max_size.push(parse_size(value).ok_or_else(invalid)?),
        "min_time" => set.min_time.push(parse_time(value).ok_or_else(invalid)?),
        "max_time" => set.max_time.push(parse_time(value).ok_or_else(invalid)?),
        "file_name" => raw.file_name.push(value.to_string()),
        "file_path" => raw.file_path.push(value.to_string()),
        "mime" => raw.mime.push(value.to_string()),
        "file_salt" => raw.file_salt.push(value.to_string()),
        "scope" => set.scope.push(value.to_string()),
        "cattrs" => raw.cattrs.push(parse_cattrs_arg(value).map_err(|_| invalid())?),
        "imported" => set.imported.push(parse_bool(value).ok_or_else(invalid)?),
        "non_recursive_scope" => set.non_recursive_scope = parse_bool(value).ok_or_else(invalid)?,
        "re" => set.re = parse_bool(value).ok_or_else(invalid)?,
        _ => return Err(FilterError::UnknownFilter(key.to_string())),
    }
    Ok(())
}

fn finish(raw: RawSet) -> Result<FilterSet, FilterError> {
    let RawSet {
        mut set,
        file_name,
        file_path,
        mime,
        file_salt,
        cattrs,
    } = raw;
    let re = set.re;

    set.file_name = patterns("file_name", file_name, re)?;
    set.file_path = patterns("file_path", file_path, re)?;
    set.mime = patterns("mime", mime, re)?;
    set.file_salt = patterns("file_salt", file_salt, re)?;
    set.cattrs = cattrs
        .into_iter()
        .map(|map| cattrs_pattern(map, re))
        .collect::<Result<_, _>>()?;
    Ok(set)
}

fn patterns(key: &str, values: Vec<String>, re: bool) -> Result<Vec<TextPattern>, FilterError> {
    values
        .into_iter()
        .map(|v| {
            if re {
                compile_regex(key, &v).map(TextPattern::Regex)
            } else {
                Ok(TextPattern::Plain(v))
            }
        })
        .collect()
}

fn cattrs_pattern(map: CAttrs, re: bool) -> Result<CAttrsPattern, FilterError> {
    let mut pattern = CAttrsPattern::default();
    for (key, value) in map {
        let value = if re {
            let text = String::from_utf8_lossy(&value).into_owned();
            CAttrValue::Regex(compile_regex("cattrs", &text)?)
        } else {
            CAttrValue::Bytes(value)
        };
        pattern.fields.insert(key, value);
    }
    Ok(pattern)
}

fn compile_regex(key: &str, pattern: &str) -> Result<Regex, FilterError> {
    Regex::new(pattern).map_err(|e| FilterError::InvalidRegex {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Some(true),
        "false" | "0" | "no" | "n" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_defaults_to_include() {
        let f = compile(["file_name=report"]).unwrap();
        assert_eq!(f.include.file_name.len(), 1);
        assert!(f.exclude.is_empty());
    }

    #[test]
    fn markers_switch_mode() {
        let f = compile([
            "file_name=a",
            "+e",
            "file_name=b",
            "++include",
            "mime=text",
            "++exclude",
            "min_size=1KB",
        ])
        .unwrap();
        assert_eq!(f.include.file_name.len(), 1);
        assert_eq!(f.include.mime.len(), 1);
        assert_eq!(f.exclude.file_name.len(), 1);
        assert_eq!(f.exclude.min_size, vec![1000]);
    }

    #[test]
    fn repeated_keys_accumulate() {
        let f = compile(["id=1", "id=5", "id=9"]).unwrap();
        assert_eq!(f.include.id, vec![1, 5, 9]);
    }

    #[test]
    fn missing_equals_is_malformed() {
        assert_eq!(
            compile(["file_name"]).unwrap_err(),
            FilterError::MalformedFilter("file_name".into())
        );
    }

    #[test]
    fn unknown_key_is_reported_by_name() {
        assert_eq!(
            compile(["colour=red"]).unwrap_err(),
            FilterError::UnknownFilter("colour".into())
        );
    }

    #[test]
    fn bad_values_are_invalid() {
        assert!(matches!(
            compile(["min_id=ten"]),
            Err(FilterError::InvalidValue { .. })
        ));
        assert!(matches!(
            compile(["min_size=huge"]),
            Err(FilterError::InvalidValue { .. })
        ));
        assert!(matches!(
            compile(["imported=maybe"]),
            Err(FilterError::InvalidValue { .. })
        ));
    }

    #[test]
    fn re_applies_to_values_before_and_after() {
        let f = compile(["file_name=^rep", "re=true", "mime=^image/"]).unwrap();
        assert!(matches!(f.include.file_name[0], TextPattern::Regex(_)));
        assert!(matches!(f.include.mime[0], TextPattern::Regex(_)));
    }

    #[test]
    fn re_is_per_mode() {
        let f = compile(["re=1", "file_name=a.c", "+e", "file_name=a.c"]).unwrap();
        assert!(matches!(f.include.file_name[0], TextPattern::Regex(_)));
        assert!(matches!(f.exclude.file_name[0], TextPattern::Plain(_)));
    }

    #[test]
    fn invalid_regex_is_reported() {
        assert!(matches!(
            compile(["re=true", "file_name=(unclosed"]),
            Err(FilterError::InvalidRegex { .. })
        ));
    }

    #[test]
    fn cattrs_shorthand_and_hex() {
        let f = compile(["cattrs=comment: hi | tag: x", "cattrs=ff0000017a000001aa"]).unwrap();
        assert_eq!(f.include.cattrs.len(), 2);
        assert_eq!(f.include.cattrs[0].fields.len(), 2);
        assert!(f.include.cattrs[1].fields.contains_key("z"));
    }

    #[test]
    fn scope_drops_id_range() {
        let f = compile(["min_id=5", "max_id=10"]).unwrap();
        assert_eq!(f.id_range(), (Some(5), Some(10)));

        let f = compile(["min_id=5", "max_id=10", "scope=/home"]).unwrap();
        assert_eq!(f.id_range(), (None, None));
    }

    #[test]
    fn value_may_contain_equals() {
        let f = compile(["file_name=a=b"]).unwrap();
        assert_eq!(f.include.file_name[0].as_str(), "a=b");
    }
}
