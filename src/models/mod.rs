//! Data models for the design-to-code backend.
//!
//! Field names serialize in camelCase to match the editor's JSON contract.

mod annotation;
mod asset;
mod design;
mod dsl;
mod requirement;
mod task;

pub use annotation::*;
pub use asset::*;
pub use design::*;
pub use dsl::*;
pub use requirement::*;
pub use task::*;

use serde::Serialize;

/// One page of a listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T: Serialize> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Normalize 1-based page parameters, returning `(page, page_size, offset)`.
pub fn page_bounds(page: Option<i64>, page_size: Option<i64>) -> (i64, i64, i64) {
    let page = page.unwrap_or(1).max(1);
    let page_size = page_size
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    (page, page_size, (page - 1) * page_size)
}
