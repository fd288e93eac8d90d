// Resumable polling over a `ChangesLog`.

use tracing::trace;

use super::{Change, ChangesLog};
use crate::store::StoreError;

/// Cursor-driven reader of the changes feed.
///
/// `filter(since)` is inclusive, so the change sitting exactly at the
/// cursor comes back on the next poll. Because timestamps are unique
/// that change is the one already delivered, and the feed drops it:
/// each change is handed out once per feed.
pub struct ChangesFeed<'a, L: ChangesLog + ?Sized> {
    log: &'a L,
    cursor: String,
    page_size: usize,
    cursor_seen: bool,
}

impl<'a, L: ChangesLog + ?Sized> ChangesFeed<'a, L> {
    /// Read the whole feed from the beginning.
    pub fn from_start(log: &'a L, page_size: usize) -> Self {
        Self {
            log,
            cursor: String::new(),
            page_size,
            cursor_seen: false,
        }
    }

    /// Continue after a change the consumer already processed.
    pub fn resume(log: &'a L, cursor: impl Into<String>, page_size: usize) -> Self {
        let cursor = cursor.into();
        let cursor_seen = !cursor.is_empty();
        Self {
            log,
            cursor,
            page_size,
            cursor_seen,
        }
    }

    /// Timestamp of the last change handed out, to be saved between runs.
    pub fn cursor(&self) -> &str {
        &self.cursor
    }

    /// Next batch of unseen changes; empty once the consumer is caught up.
    pub fn next_page(&mut self) -> Result<Vec<Change>, StoreError> {
        if self.page_size == 0 {
            return Ok(Vec::new());
        }

        let limit = self.page_size.saturating_add(usize::from(self.cursor_seen));
        let mut page = self.log.filter(&self.cursor, limit)?;

        if self.cursor_seen
            && page
                .first()
                .is_some_and(|change| change.timestamp == self.cursor)
        {
            page.remove(0);
        }
        page.truncate(self.page_size);

        if let Some(last) = page.last() {
            self.cursor = last.timestamp.clone();
            self.cursor_seen = true;
        }

        trace!(cursor = %self.cursor, delivered = page.len(), "feed advanced");
        Ok(page)
    }

    /// Every remaining change, page by page.
    pub fn drain(&mut self) -> Result<Vec<Change>, StoreError> {
        let mut all = Vec::new();
        loop {
            let page = self.next_page()?;
            if page.is_empty() {
                return Ok(all);
            }
            all.extend(page);
        }
    }
}
