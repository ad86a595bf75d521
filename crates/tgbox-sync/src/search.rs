//! Lazy search over a box.
//!
//! A [`SearchCursor`] walks record ids a page at a time, fetches each record
//! and yields the ones the filter accepts. `next()` returns `Ok(None)` once
//! the walk is exhausted.

use std::collections::VecDeque;

use tgbox_core::BoxFile;
use tgbox_filter::SearchFilter;
use tgbox_storage::{BoxResult, IdQuery, RecordSource};

/// Ids fetched per backend call when none is configured
pub const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Copy)]
pub struct SearchOptions {
    /// Highest id first
    pub reverse: bool,
    pub page_size: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            reverse: false,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

pub struct SearchCursor<'a, S: RecordSource + ?Sized> {
    source: &'a S,
    filter: SearchFilter,
    query: IdQuery,
    pending: VecDeque<u64>,
    exhausted: bool,
    scanned: u64,
}

impl<'a, S: RecordSource + ?Sized> SearchCursor<'a, S> {
    pub fn new(source: &'a S, filter: SearchFilter, options: SearchOptions) -> Self {
        let (min_id, max_id) = filter.id_range();
        let query = IdQuery {
            after: None,
            limit: options.page_size.max(1),
            reverse: options.reverse,
            min_id,
            max_id,
            scopes: filter.scopes().map(str::to_string).collect(),
            non_recursive_scope: filter.include.non_recursive_scope,
        };
        Self {
            source,
            filter,
            query,
            pending: VecDeque::new(),
            exhausted: false,
            scanned: 0,
        }
    }

    pub fn filter(&self) -> &SearchFilter {
        &self.filter
    }

    /// Records examined so far, matching or not.
    pub fn scanned(&self) -> u64 {
        self.scanned
    }

    /// Next matching record, or `None` at the end of the box.
    pub async fn next(&mut self) -> BoxResult<Option<BoxFile>> {
        let scope_aware = self.source.supports_scope();
        loop {
            let Some(id) = self.next_id().await? else {
                return Ok(None);
            };
            self.scanned += 1;
            // a record deleted between listing and fetching is just skipped
            let Some(file) = self.source.get_file(id).await? else {
                continue;
            };
            if self.filter.matches(&file, scope_aware) {
                return Ok(Some(file));
            }
        }
    }

    /// Up to `n` matches; shorter only at the end of the box.
    pub async fn next_page(&mut self, n: usize) -> BoxResult<Vec<BoxFile>> {
        let mut page = Vec::with_capacity(n);
        while page.len() < n {
            match self.next().await? {
                Some(file) => page.push(file),
                None => break,
            }
        }
        Ok(page)
    }

    /// Drain every remaining match.
    pub async fn collect_all(mut self) -> BoxResult<Vec<BoxFile>> {
        let mut all = Vec::new();
        while let Some(file) = self.next().await? {
            all.push(file);
        }
        Ok(all)
    }

    async fn next_id(&mut self) -> BoxResult<Option<u64>> {
        if self.pending.is_empty() && !self.exhausted {
            let ids = self.source.file_ids(&self.query).await?;
            if ids.len() < self.query.limit {
                self.exhausted = true;
            }
            if let Some(last) = ids.last() {
                self.query.after = Some(*last);
            }
            self.pending.extend(ids);
        }
        Ok(self.pending.pop_front())
    }
}
