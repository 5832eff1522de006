use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub const DEFAULT_PAGE: u64 = 1;
pub const DEFAULT_TAKE: u64 = 10;
/// Largest page size served; larger requests are clamped
pub const MAX_TAKE: u64 = 1000;
/// Offsets are bound as signed 64-bit integers by the database drivers
const MAX_SKIP: u64 = i64::MAX.unsigned_abs();

/// Page metadata attached to multi-record responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
    pub current_page: u64,
    pub total_pages: u64,
    pub total_records: u64,
    pub next_page: Option<u64>,
    pub take: u64,
}

/// Zero and `None` both mean "use the default"
fn or_default(value: Option<u64>, default: u64) -> u64 {
    value.filter(|v| *v > 0).unwrap_or(default)
}

/// Resolve `(page, take)` with defaults applied and `take` clamped to [`MAX_TAKE`]
#[must_use]
pub fn resolve(page: Option<u64>, take: Option<u64>) -> (u64, u64) {
    (
        or_default(page, DEFAULT_PAGE),
        or_default(take, DEFAULT_TAKE).min(MAX_TAKE),
    )
}

/// Offset and limit for a page request.
///
/// # Arguments
///
/// * `page` - 1-based page number, defaults to [`DEFAULT_PAGE`].
/// * `take` - Page size, defaults to [`DEFAULT_TAKE`], at most [`MAX_TAKE`].
///
/// # Returns
///
/// `(skip, take)` where `skip = (page - 1) * take`, capped at `i64::MAX`.
#[must_use]
pub fn skip_take(page: Option<u64>, take: Option<u64>) -> (u64, u64) {
    let (page, take) = resolve(page, take);
    ((page - 1).saturating_mul(take).min(MAX_SKIP), take)
}

/// Build the metadata for a page of `total_records` rows
#[must_use]
pub fn build_meta(page: Option<u64>, take: Option<u64>, total_records: u64) -> PaginationMeta {
    let (current_page, take) = resolve(page, take);
    let total_pages = total_records.div_ceil(take);
    let next_page = (current_page < total_pages).then(|| current_page + 1);

    PaginationMeta {
        current_page,
        total_pages,
        total_records,
        next_page,
        take,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_take_defaults() {
        assert_eq!(skip_take(None, None), (0, DEFAULT_TAKE));
        assert_eq!(skip_take(Some(0), Some(0)), (0, DEFAULT_TAKE));
    }

    #[test]
    fn test_skip_take_pages() {
        assert_eq!(skip_take(Some(1), Some(25)), (0, 25));
        assert_eq!(skip_take(Some(3), Some(10)), (20, 10));
    }

    #[test]
    fn test_skip_take_stays_bindable() {
        let (skip, take) = skip_take(Some(u64::MAX), Some(u64::MAX));
        assert_eq!(take, MAX_TAKE);
        assert_eq!(skip, i64::MAX.unsigned_abs());
        assert!(i64::try_from(skip).is_ok());

        let (skip, _) = skip_take(Some(u64::MAX / 5), Some(10));
        assert!(i64::try_from(skip).is_ok());
    }

    #[test]
    fn test_meta_reports_clamped_take() {
        let meta = build_meta(Some(1), Some(u64::MAX), 2500);
        assert_eq!(meta.take, MAX_TAKE);
        assert_eq!(meta.total_pages, 3);
        assert_eq!(meta.next_page, Some(2));
    }

    #[test]
    fn test_meta_middle_page() {
        let meta = build_meta(Some(2), Some(10), 25);
        assert_eq!(
            meta,
            PaginationMeta {
                current_page: 2,
                total_pages: 3,
                total_records: 25,
                next_page: Some(3),
                take: 10,
            }
        );
    }

    #[test]
    fn test_meta_last_page() {
        let meta = build_meta(Some(3), Some(10), 25);
        assert_eq!(meta.total_pages, 3);
        assert_eq!(meta.next_page, None);
    }

    #[test]
    fn test_meta_no_records() {
        let meta = build_meta(None, None, 0);
        assert_eq!(meta.total_pages, 0);
        assert_eq!(meta.next_page, None);
        assert_eq!(meta.current_page, 1);
    }

    #[test]
    fn test_meta_serializes_camel_case() {
        let json = serde_json::to_value(build_meta(Some(1), Some(10), 11)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "currentPage": 1,
                "totalPages": 2,
                "totalRecords": 11,
                "nextPage": 2,
                "take": 10
            })
        );
    }
}
