//! Wire types shared between the kubefleet API server and its clients

use serde::{Deserialize, Serialize};

/// Page used when a request does not name one
pub const DEFAULT_PAGE: u32 = 1;

/// Page size used when a request does not name one
pub const DEFAULT_PAGE_SIZE: u32 = 500;

/// Page selection for list endpoints (1-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page() -> u32 {
    DEFAULT_PAGE
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Pagination {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self { page, page_size }
    }

    /// Slice bounds of this page within a listing of `total` items.
    ///
    /// Both ends are clamped to `[0, total]`, so an out-of-range page
    /// yields an empty slice rather than an error. Page 0 is always empty.
    pub fn bounds(&self, total: usize) -> (usize, usize) {
        let page = u64::from(self.page);
        let size = u64::from(self.page_size);
        let total_u64 = total as u64;

        let offset = (page.saturating_sub(1) * size).min(total_u64);
        let end = (page * size).min(total_u64);

        (offset as usize, end as usize)
    }

    /// Borrow the items of this page out of a full listing
    pub fn slice<'a, T>(&self, items: &'a [T]) -> &'a [T] {
        let (start, end) = self.bounds(items.len());
        &items[start..end]
    }
}

/// One page of a listing plus the size of the whole listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub list: Vec<T>,
    pub count: usize,
    pub page: u32,
    pub page_size: u32,
}

impl<T> Page<T> {
    pub fn new(list: Vec<T>, count: usize, pagination: Pagination) -> Self {
        Self {
            list,
            count,
            page: pagination.page,
            page_size: pagination.page_size,
        }
    }
}

/// Health of a registered cluster, recomputed on every list or reconcile
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum HealthStatus {
    #[default]
    Unknown,
    Normal,
    Abnormal,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Unknown => write!(f, "Unknown"),
            HealthStatus::Normal => write!(f, "Normal"),
            HealthStatus::Abnormal => write!(f, "Abnormal"),
        }
    }
}
