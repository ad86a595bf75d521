use regex_lite::Regex;
use std::collections::BTreeMap;

/// A string constraint: substring/exact text, or a regex when `re` is set.
#[derive(Debug, Clone)]
pub enum TextPattern {
    Plain(String),
    Regex(Regex),
}

impl TextPattern {
    /// Substring (or regex search) match.
    pub fn contained_in(&self, haystack: &str) -> bool {
        match self {
            TextPattern::Plain(p) => haystack.contains(p.as_str()),
            TextPattern::Regex(r) => r.is_match(haystack),
        }
    }

    /// Whole-value (or regex search) match.
    pub fn equals(&self, value: &str) -> bool {
        match self {
            TextPattern::Plain(p) => p == value,
            TextPattern::Regex(r) => r.is_match(value),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TextPattern::Plain(p) => p,
            TextPattern::Regex(r) => r.as_str(),
        }
    }
}

/// One `cattrs=` value: every key must be present with a matching value.
#[derive(Debug, Clone, Default)]
pub struct CAttrsPattern {
    pub fields: BTreeMap<String, CAttrValue>,
}

#[derive(Debug, Clone)]
pub enum CAttrValue {
    Bytes(Vec<u8>),
    Regex(Regex),
}

impl CAttrValue {
    pub fn matches(&self, value: &[u8]) -> bool {
        match self {
            CAttrValue::Bytes(b) => b.as_slice() == value,
            CAttrValue::Regex(r) => r.is_match(&String::from_utf8_lossy(value)),
        }
    }
}

/// Constraints of one mode (include or exclude).
///
/// Every `Vec` is a list of alternatives: the field is satisfied when any
/// one of its values matches.
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    pub id: Vec<u64>,
    pub min_id: Vec<u64>,
    pub max_id: Vec<u64>,
    pub min_size: Vec<u64>,
    pub max_size: Vec<u64>,
    pub min_time: Vec<i64>,
    pub max_time: Vec<i64>,
    pub file_name: Vec<TextPattern>,
    pub file_path: Vec<TextPattern>,
    pub mime: Vec<TextPattern>,
    pub file_salt: Vec<TextPattern>,
    pub scope: Vec<String>,
    pub cattrs: Vec<CAttrsPattern>,
    pub imported: Vec<bool>,
    /// Scope matches direct children only
    pub non_recursive_scope: bool,
    /// String values are regular expressions
    pub re: bool,
}

impl FilterSet {
    /// True when no constraint is populated (flags alone do not count).
    pub fn is_empty(&self) -> bool {
        self.id.is_empty()
            && self.min_id.is_empty()
            && self.max_id.is_empty()
            && self.min_size.is_empty()
            && self.max_size.is_empty()
            && self.min_time.is_empty()
            && self.max_time.is_empty()
            && self.file_name.is_empty()
            && self.file_path.is_empty()
            && self.mime.is_empty()
            && self.file_salt.is_empty()
            && self.scope.is_empty()
            && self.cattrs.is_empty()
            && self.imported.is_empty()
    }

    /// Id bounds are ignored whenever a scope is set: a scope search walks
    /// the path tree, not the id order.
    pub fn id_bounds_active(&self) -> bool {
        self.scope.is_empty()
    }
}

/// Compiled include/exclude filter.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub include: FilterSet,
    pub exclude: FilterSet,
}

impl SearchFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id range a backend may prune its scan to, `(lowest, highest)`.
    ///
    /// Only include bounds narrow the scan; values inside one field are
    /// alternatives, so the widest bound wins.
    pub fn id_range(&self) -> (Option<u64>, Option<u64>) {
        if !self.include.id_bounds_active() {
            return (None, None);
        }
        (
            self.include.min_id.iter().copied().min(),
            self.include.max_id.iter().copied().max(),
        )
    }

    /// Scopes requested for inclusion, with trailing slashes removed.
    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.include.scope.iter().map(|s| normalize_scope(s))
    }
}

/// `/home/user/` → `/home/user`; the root stays `/`.
pub fn normalize_scope(scope: &str) -> &str {
    let trimmed = scope.trim_end_matches('/');
    if trimmed.is_empty() && scope.starts_with('/') {
        "/"
    } else {
        trimmed
    }
}
