//! Stop conditions for sites whose pagination never says "that was the last page".
//!
//! Each scraper owns its own page loop; these are the small guards they pick from.

use std::collections::HashSet;

/// Item ids seen so far in one category walk.
///
/// Some sites wrap page N+1 back to page 1 instead of returning an empty
/// page; an id reappearing is the only signal.
#[derive(Debug, Default)]
pub struct SeenIds {
    seen: HashSet<String>,
}

impl SeenIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the first item of a fresh page was already collected
    pub fn wrapped_around(&self, first_id: &str) -> bool {
        self.seen.contains(first_id)
    }

    pub fn extend<'a>(&mut self, ids: impl IntoIterator<Item = &'a str>) {
        self.seen.extend(ids.into_iter().map(str::to_string));
    }
}

/// Detects a site serving the same page over and over past its end.
#[derive(Debug)]
pub struct RepeatGuard<T> {
    previous: Option<Vec<T>>,
}

impl<T: PartialEq> RepeatGuard<T> {
    pub fn new() -> Self {
        Self { previous: None }
    }

    /// Returns true when `page` equals the previous page; otherwise remembers it
    pub fn is_repeat(&mut self, page: Vec<T>) -> bool {
        if self.previous.as_ref() == Some(&page) {
            return true;
        }
        self.previous = Some(page);
        false
    }
}

impl<T: PartialEq> Default for RepeatGuard<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Gives up after `limit` consecutive empty pages.
#[derive(Debug)]
pub struct EmptyStreak {
    limit: usize,
    run: usize,
}

impl EmptyStreak {
    pub fn new(limit: usize) -> Self {
        Self { limit, run: 0 }
    }

    /// Record a page's item count; true means stop paginating
    pub fn observe(&mut self, items: usize) -> bool {
        if items == 0 {
            self.run += 1;
        } else {
            self.run = 0;
        }
        self.run >= self.limit
    }
}

/// Page cap taking a caller's `--max-pages` override into account
pub fn page_cap(default_cap: usize, requested: Option<usize>) -> usize {
    match requested {
        Some(0) | None => default_cap,
        Some(n) => n.min(default_cap),
    }
}
