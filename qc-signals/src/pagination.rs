//! Page windows over the signal list
//!
//! A client asks for a page and optionally a page size; the window actually
//! served is fitted to the row count so an out-of-range page lands on the
//! nearest real one instead of coming back empty.

use serde::Serialize;

/// Rows per page when the client does not say
pub const DEFAULT_PAGE_SIZE: i64 = 50;
/// Largest page a client may ask for
pub const MAX_PAGE_SIZE: i64 = 200;

/// Page as requested, before the row count is known
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// 1-indexed; anything below 1 means the first page
    pub page: i64,
    pub page_size: i64,
}

impl PageRequest {
    pub fn new(page: Option<i64>, page_size: Option<i64>) -> Self {
        Self {
            page: page.unwrap_or(1),
            page_size: page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// A bare page number at the default size
impl From<i64> for PageRequest {
    fn from(page: i64) -> Self {
        Self::new(Some(page), None)
    }
}

/// Page actually served
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageWindow {
    pub page: i64,
    pub page_size: i64,
    pub total: i64,
    pub total_pages: i64,
}

impl PageWindow {
    /// Fit a request to `total` rows, clamping the page into `[1, total_pages]`
    ///
    /// # Examples
    /// ```
    /// use qc_signals::pagination::{PageRequest, PageWindow};
    ///
    /// // 120 signals at the default size: 50 + 50 + 20
    /// let window = PageWindow::fit(120, PageRequest::from(2));
    /// assert_eq!(window.total_pages, 3);
    /// assert_eq!(window.offset(), 50);
    /// assert!(window.has_next());
    ///
    /// // Past the end lands on the last page
    /// let window = PageWindow::fit(120, PageRequest::new(Some(99), Some(25)));
    /// assert_eq!(window.page, 5);
    /// assert_eq!(window.offset(), 100);
    /// assert!(!window.has_next());
    /// ```
    pub fn fit(total: i64, request: PageRequest) -> Self {
        let total = total.max(0);
        let page_size = request.page_size.clamp(1, MAX_PAGE_SIZE);
        let total_pages = (total + page_size - 1) / page_size;
        let page = request.page.clamp(1, total_pages.max(1));

        Self {
            page,
            page_size,
            total,
            total_pages,
        }
    }

    /// Rows to skip for this window's `LIMIT/OFFSET`
    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.page_size
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_below_one_is_first_page() {
        let window = PageWindow::fit(75, PageRequest::from(0));
        assert_eq!(window.page, 1);
        assert_eq!(window.total_pages, 2);
        assert_eq!(window.offset(), 0);
        assert!(window.has_next());
    }

    #[test]
    fn test_empty_list_serves_page_one_of_zero() {
        let window = PageWindow::fit(0, PageRequest::default());
        assert_eq!(window.page, 1);
        assert_eq!(window.total_pages, 0);
        assert_eq!(window.offset(), 0);
        assert!(!window.has_next());
    }

    #[test]
    fn test_exact_boundary_has_no_next_page() {
        let window = PageWindow::fit(100, PageRequest::from(2));
        assert_eq!(window.total_pages, 2);
        assert_eq!(window.offset(), 50);
        assert!(!window.has_next());
    }

    #[test]
    fn test_page_size_is_bounded() {
        assert_eq!(PageRequest::new(None, Some(0)).page_size, 1);
        assert_eq!(PageRequest::new(None, Some(10_000)).page_size, MAX_PAGE_SIZE);

        // Hand-built requests are bounded too
        let window = PageWindow::fit(
            450,
            PageRequest {
                page: 2,
                page_size: 1_000,
            },
        );
        assert_eq!(window.page_size, MAX_PAGE_SIZE);
        assert_eq!(window.total_pages, 3);
        assert_eq!(window.offset(), 200);
    }
}
