//! Page requests and responses for list operations.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Maximum allowed page size.
pub const MAX_PAGE_SIZE: usize = 100;

/// Default page size.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// A 0-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page_num: usize,
    pub page_size: usize,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page_num: 0,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    /// Validate and clamp: a page size of 0 is rejected, anything above
    /// [`MAX_PAGE_SIZE`] is clamped.
    pub fn new(page_num: usize, page_size: usize) -> Result<Self> {
        if page_size == 0 {
            return Err(EngineError::validation("page_size must be at least 1"));
        }
        Ok(Self {
            page_num,
            page_size: page_size.min(MAX_PAGE_SIZE),
        })
    }

    pub fn offset(&self) -> usize {
        self.page_num.saturating_mul(self.page_size)
    }

    pub fn limit(&self) -> usize {
        self.page_size
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page_num: usize,
    pub page_size: usize,
    /// Total number of items across all pages.
    pub total: usize,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: usize, request: PageRequest) -> Self {
        Self {
            items,
            page_num: request.page_num,
            page_size: request.page_size,
            total,
        }
    }

    pub fn has_more(&self) -> bool {
        (self.page_num + 1).saturating_mul(self.page_size) < self.total
    }
}
