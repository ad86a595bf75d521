//! Reassembly of split uploads for display.
//!
//! A file uploaded in parts is stored as records named `{base}.part{N}`
//! carrying `__mp_part`, `__mp_total` and `__mp_previous`. When a search
//! yields one part, the [`Coalescer`] fetches its siblings and emits a
//! single [`MultipartGroup`]; sibling ids are remembered so later hits on
//! the same file are suppressed.

use std::collections::HashSet;

use tgbox_core::{BoxFile, FileRecord};
use tgbox_filter::{FilterSet, SearchFilter, TextPattern};
use tgbox_storage::{BoxResult, RecordSource};

use crate::search::{SearchCursor, SearchOptions};

/// One item of coalesced search output.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchItem {
    Single(BoxFile),
    Multipart(MultipartGroup),
}

impl SearchItem {
    pub fn size(&self) -> u64 {
        match self {
            SearchItem::Single(file) => file.size(),
            SearchItem::Multipart(group) => group.total_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultipartGroup {
    pub base_name: String,
    pub file_path: String,
    /// Ordered by part index
    pub parts: Vec<FileRecord>,
    pub total_size: u64,
    /// Every part from 1 to `__mp_total` was found
    pub complete: bool,
}

pub struct Coalescer<'a, S: RecordSource + ?Sized> {
    source: &'a S,
    page_size: usize,
    raw_parts: bool,
    skip: HashSet<u64>,
    total_size: u64,
}

impl<'a, S: RecordSource + ?Sized> Coalescer<'a, S> {
    pub fn new(source: &'a S, page_size: usize) -> Self {
        Self {
            source,
            page_size,
            raw_parts: false,
            skip: HashSet::new(),
            total_size: 0,
        }
    }

    /// Yield parts as plain records instead of grouping them.
    pub fn raw_parts(mut self, raw: bool) -> Self {
        self.raw_parts = raw;
        self
    }

    /// Sum of sizes over every item returned so far.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Turn one search hit into an output item, or `None` when the hit
    /// belongs to a group already emitted.
    pub async fn push(&mut self, file: BoxFile) -> BoxResult<Option<SearchItem>> {
        if self.skip.contains(&file.id()) {
            return Ok(None);
        }
        let item = match self.group_of(&file).await? {
            Some(group) => SearchItem::Multipart(group),
            None => SearchItem::Single(file),
        };
        self.total_size += item.size();
        Ok(Some(item))
    }

    async fn group_of(&mut self, file: &BoxFile) -> BoxResult<Option<MultipartGroup>> {
        if self.raw_parts {
            return Ok(None);
        }
        let Some(record) = file.as_decrypted() else {
            return Ok(None);
        };
        let (Some(info), Some(base)) = (record.multipart(), record.multipart_base_name()) else {
            return Ok(None);
        };
        let base = base.to_string();
        let dir = record.file_path.clone();

        let mut filter = SearchFilter::new();
        filter.include = FilterSet {
            file_name: vec![TextPattern::Plain(format!("{base}.part"))],
            scope: vec![dir.clone()],
            non_recursive_scope: true,
            ..FilterSet::default()
        };
        let options = SearchOptions {
            reverse: false,
            page_size: self.page_size,
        };
        let mut parts: Vec<FileRecord> = SearchCursor::new(self.source, filter, options)
            .collect_all()
            .await?
            .into_iter()
            .filter_map(BoxFile::into_decrypted)
            .filter(|r| r.file_path == dir && r.multipart_base_name() == Some(base.as_str()))
            .collect();

        // the hit itself is always part of its group, even if a racing
        // delete hid it from the re-query
        if !parts.iter().any(|r| r.id == record.id) {
            parts.push(record.clone());
        }
        // duplicates of a part index are dropped from the group but still
        // belong to it, so later hits on them stay suppressed
        self.skip.extend(parts.iter().map(|r| r.id));
        parts.sort_by_key(|r| (r.multipart().map(|m| m.part).unwrap_or(0), r.id));
        parts.dedup_by_key(|r| r.multipart().map(|m| m.part));

        let complete = parts.len() == info.total as usize
            && parts
                .iter()
                .zip(1u32..)
                .all(|(r, n)| r.multipart().map(|m| m.part) == Some(n));
        let total_size = parts.iter().map(|r| r.size).sum();

        tracing::debug!(
            base = %base,
            path = %dir,
            parts = parts.len(),
            expected = info.total,
            "coalesced multipart file"
        );

        Ok(Some(MultipartGroup {
            base_name: base,
            file_path: dir,
            parts,
            total_size,
            complete,
        }))
    }
}
