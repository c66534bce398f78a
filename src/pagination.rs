// 📑 Pagination - order by snapshot date (newest first), then slice
//
// Ties keep the store's insertion order. The store is responsible for making
// order-then-slice consistent with concurrent writes; nothing here locks.

use crate::error::{AnalyticsError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_LIMIT: usize = 100;
pub const MAX_PAGE_LIMIT: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Page {
    pub limit: usize,
    pub offset: usize,
}

impl Default for Page {
    fn default() -> Self {
        Page {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

/// Bounds applied to caller-supplied windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for PageLimits {
    fn default() -> Self {
        PageLimits {
            default_limit: DEFAULT_PAGE_LIMIT,
            max_limit: MAX_PAGE_LIMIT,
        }
    }
}

impl Page {
    /// Validate a window; `limit <= 0` and `offset < 0` are rejected
    pub fn new(limit: i64, offset: i64) -> Result<Page> {
        if limit <= 0 {
            return Err(AnalyticsError::invalid_filter(format!(
                "limit must be positive, got {}",
                limit
            )));
        }
        if offset < 0 {
            return Err(AnalyticsError::invalid_filter(format!(
                "offset must not be negative, got {}",
                offset
            )));
        }
        Ok(Page {
            limit: limit as usize,
            offset: offset as usize,
        })
    }

    /// Window from optional request parameters, defaulted and capped by `limits`
    pub fn from_params(limit: Option<i64>, offset: Option<i64>, limits: &PageLimits) -> Result<Page> {
        let page = Page::new(
            limit.unwrap_or(limits.default_limit as i64),
            offset.unwrap_or(0),
        )?;
        if page.limit > limits.max_limit {
            return Err(AnalyticsError::invalid_filter(format!(
                "limit must be at most {}, got {}",
                limits.max_limit, page.limit
            )));
        }
        Ok(page)
    }

    /// Skip `offset`, keep at most `limit`. Past the end yields nothing.
    pub fn slice<T>(&self, items: Vec<T>) -> Vec<T> {
        items.into_iter().skip(self.offset).take(self.limit).collect()
    }
}

/// Stable sort, newest snapshot first, missing dates last
pub fn order_by_snapshot_desc<T, F>(items: &mut [T], snapshot: F)
where
    F: Fn(&T) -> Option<NaiveDate>,
{
    items.sort_by(|a, b| snapshot(b).cmp(&snapshot(a)));
}

/// Order then slice; `None` returns the whole ordered set
pub fn paginate<T, F>(mut items: Vec<T>, snapshot: F, page: Option<&Page>) -> Vec<T>
where
    F: Fn(&T) -> Option<NaiveDate>,
{
    order_by_snapshot_desc(&mut items, snapshot);
    match page {
        Some(page) => page.slice(items),
        None => items,
    }
}

/// SQL equivalent of `order_by_snapshot_desc` (rowid = insertion order)
pub fn order_clause(snapshot_column: &str) -> String {
    format!("ORDER BY {} DESC, rowid ASC", snapshot_column)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn test_rejects_bad_windows() {
        assert!(Page::new(0, 0).is_err());
        assert!(Page::new(-5, 0).is_err());
        assert!(Page::new(10, -1).is_err());
        assert!(Page::new(10, 0).is_ok());
    }

    #[test]
    fn test_from_params_defaults_and_caps() {
        let limits = PageLimits::default();
        assert_eq!(Page::from_params(None, None, &limits).unwrap(), Page::default());
        assert!(Page::from_params(Some(1001), None, &limits).is_err());
        assert_eq!(
            Page::from_params(Some(1000), Some(20), &limits).unwrap(),
            Page { limit: 1000, offset: 20 }
        );
    }

    #[test]
    fn test_orders_newest_first_with_stable_ties() {
        let items = vec![(1, day(1)), (2, day(31)), (3, day(15)), (4, day(31))];
        let page = Page { limit: 10, offset: 0 };

        let ordered = paginate(items, |(_, d)| Some(*d), Some(&page));
        let ids: Vec<i32> = ordered.iter().map(|(id, _)| *id).collect();

        assert_eq!(ids, vec![2, 4, 3, 1]);
    }

    #[test]
    fn test_offset_past_end_is_empty() {
        let items = vec![day(1), day(2)];
        let page = Page { limit: 5, offset: 10 };
        assert!(paginate(items, |d| Some(*d), Some(&page)).is_empty());
    }

    #[test]
    fn test_missing_dates_sort_last() {
        let items = vec![None, Some(day(3)), Some(day(9))];
        let ordered = paginate(items, |d| *d, None);
        assert_eq!(ordered, vec![Some(day(9)), Some(day(3)), None]);
    }

    proptest! {
        #[test]
        fn prop_same_window_same_result(
            days in prop::collection::vec(1u32..28, 0..40),
            limit in 1i64..15,
            offset in 0i64..50,
        ) {
            let items: Vec<(usize, NaiveDate)> = days.iter().enumerate().map(|(i, d)| (i, day(*d))).collect();
            let page = Page::new(limit, offset).unwrap();

            let first = paginate(items.clone(), |(_, d)| Some(*d), Some(&page));
            let second = paginate(items.clone(), |(_, d)| Some(*d), Some(&page));

            prop_assert_eq!(&first, &second);
            prop_assert!(first.len() <= page.limit);
            if page.offset >= items.len() {
                prop_assert!(first.is_empty());
            }
            for pair in first.windows(2) {
                prop_assert!(pair[0].1 >= pair[1].1);
                if pair[0].1 == pair[1].1 {
                    prop_assert!(pair[0].0 < pair[1].0);
                }
            }
        }
    }
}
