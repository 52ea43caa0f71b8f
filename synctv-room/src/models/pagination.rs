//! Pagination for listings

use serde::{Deserialize, Serialize};

/// Default page size for list queries
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Maximum allowed page size
pub const MAX_PAGE_SIZE: usize = 100;

/// Minimum page number (1-indexed)
pub const MIN_PAGE: usize = 1;

/// Pagination parameters for list queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageParams {
    /// Page number (1-indexed)
    pub page: usize,
    /// Number of items per page
    pub page_size: usize,
}

impl PageParams {
    /// Create pagination parameters, clamping into the valid range
    ///
    /// # Examples
    /// ```
    /// use synctv_room::models::PageParams;
    ///
    /// let params = PageParams::new(Some(0), Some(500));
    /// assert_eq!(params.page, 1);
    /// assert_eq!(params.page_size, 100);
    /// ```
    #[must_use]
    pub fn new(page: Option<usize>, page_size: Option<usize>) -> Self {
        let page = page.unwrap_or(MIN_PAGE).max(MIN_PAGE);
        let page_size = page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);

        Self { page, page_size }
    }

    #[must_use]
    pub const fn offset(&self) -> usize {
        (self.page - 1) * self.page_size
    }

    #[must_use]
    pub const fn limit(&self) -> usize {
        self.page_size
    }
}

impl Default for PageParams {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// One window of a listing plus the size of the whole (filtered) listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

impl<T> Page<T> {
    #[must_use]
    pub const fn new(items: Vec<T>, total: usize, params: PageParams) -> Self {
        Self {
            items,
            total,
            page: params.page,
            page_size: params.page_size,
        }
    }

    #[must_use]
    pub const fn total_pages(&self) -> usize {
        self.total.div_ceil(self.page_size)
    }
}
