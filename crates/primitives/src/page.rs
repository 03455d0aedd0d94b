//! Pagination contract shared with document-style stores.

use serde::{Deserialize, Serialize};

/// Invalid `(page, num)` combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid pagination: page={page}, num={num}")]
pub struct InvalidPagination {
    pub page: i64,
    pub num: i64,
}

/// Validated pagination request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pagination {
    /// Everything.
    #[default]
    Unrestricted,
    /// The first `limit` items.
    Limit(usize),
    /// Page `page` (zero based) of `per_page` items.
    Page { page: usize, per_page: usize },
}

impl Pagination {
    /// Interpret the raw `(page, num)` pair:
    ///
    /// - `page >= 0 && num > 0`: paged
    /// - `page <= -1 && num > 0`: limit only
    /// - `page <= -1 && num <= 0`: unrestricted
    /// - `page > -1 && num <= 0`: error
    pub fn from_raw(page: i64, num: i64) -> Result<Self, InvalidPagination> {
        match (page, num) {
            (p, n) if p >= 0 && n > 0 => Ok(Self::Page {
                page: p as usize,
                per_page: n as usize,
            }),
            (p, n) if p < 0 && n > 0 => Ok(Self::Limit(n as usize)),
            (p, _) if p < 0 => Ok(Self::Unrestricted),
            (page, num) => Err(InvalidPagination { page, num }),
        }
    }

    /// Apply to an already ordered sequence.
    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        match *self {
            Self::Unrestricted => items,
            Self::Limit(n) => items.into_iter().take(n).collect(),
            Self::Page { page, per_page } => items
                .into_iter()
                .skip(page.saturating_mul(per_page))
                .take(per_page)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn test_from_raw() {
        assert_eq!(
            Pagination::from_raw(0, 10).unwrap(),
            Pagination::Page { page: 0, per_page: 10 }
        );
        assert_eq!(Pagination::from_raw(-1, 5).unwrap(), Pagination::Limit(5));
        assert_eq!(Pagination::from_raw(-1, 0).unwrap(), Pagination::Unrestricted);
        assert_eq!(Pagination::from_raw(-7, -3).unwrap(), Pagination::Unrestricted);
        assert_matches!(
            Pagination::from_raw(2, 0),
            Err(InvalidPagination { page: 2, num: 0 })
        );
    }

    #[test]
    fn test_apply() {
        let items: Vec<u32> = (0..10).collect();
        assert_eq!(Pagination::Limit(3).apply(items.clone()), vec![0, 1, 2]);
        assert_eq!(
            Pagination::Page { page: 2, per_page: 4 }.apply(items.clone()),
            vec![8, 9]
        );
        assert_eq!(Pagination::Unrestricted.apply(items.clone()).len(), 10);
        assert!(Pagination::Page { page: 5, per_page: 4 }.apply(items).is_empty());
    }
}
