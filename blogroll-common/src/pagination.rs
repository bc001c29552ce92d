//! Fixed-size pages over an ordered collection.

use serde::Serialize;
use std::num::NonZeroU64;

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub struct Paginator {
    per_page: NonZeroU64,
}

/// The slice of a collection one page covers.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub struct PageWindow {
    pub number: u64,
    pub num_pages: u64,
    pub per_page: u64,
    pub count: u64,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub number: u64,
    pub num_pages: u64,
    pub count: u64,
    pub has_next: bool,
    pub has_previous: bool,
    pub next_page_number: Option<u64>,
    pub previous_page_number: Option<u64>,
    /// 1-based position of the first item, 0 for an empty collection.
    pub start_index: u64,
}

impl Paginator {
    /// Zero is rejected during const evaluation when used for a constant.
    #[must_use]
    pub const fn new(per_page: u64) -> Self {
        let Some(per_page) = NonZeroU64::new(per_page) else {
            panic!("a page holds at least one item");
        };
        Self { per_page }
    }

    /// Resolves the requested page against `count` items.
    ///
    /// Anything that is not an integer selects the first page, numbers out
    /// of range are clamped to the nearest existing page. An empty
    /// collection still has one (empty) page.
    #[must_use]
    pub fn locate(self, count: u64, requested: Option<&str>) -> PageWindow {
        let per_page = self.per_page.get();
        let num_pages = count.div_ceil(per_page).max(1);

        let number = requested
            .and_then(requested_number)
            .map_or(1, |n| n.clamp(1, i128::from(num_pages)));
        let number = u64::try_from(number).unwrap_or(num_pages);

        PageWindow {
            number,
            num_pages,
            per_page,
            count,
        }
    }
}

/// Parses a page number, saturating integers too long for `i128`.
fn requested_number(raw: &str) -> Option<i128> {
    let raw = raw.trim();
    if let Ok(number) = raw.parse::<i128>() {
        return Some(number);
    }

    let (saturated, digits) = match raw.strip_prefix('-') {
        Some(digits) => (i128::MIN, digits),
        None => (i128::MAX, raw.strip_prefix('+').unwrap_or(raw)),
    };
    (!digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())).then_some(saturated)
}

impl PageWindow {
    #[must_use]
    pub fn offset(self) -> u64 {
        (self.number - 1) * self.per_page
    }

    #[must_use]
    pub fn limit(self) -> u64 {
        self.per_page
    }

    #[must_use]
    pub fn into_page<T>(self, items: Vec<T>) -> Page<T> {
        let has_next = self.number < self.num_pages;
        let has_previous = self.number > 1;
        let start_index = if self.count == 0 { 0 } else { self.offset() + 1 };

        Page {
            items,
            number: self.number,
            num_pages: self.num_pages,
            count: self.count,
            has_next,
            has_previous,
            next_page_number: has_next.then_some(self.number + 1),
            previous_page_number: has_previous.then_some(self.number - 1),
            start_index,
        }
    }
}
