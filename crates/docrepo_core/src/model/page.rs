//! Paging and sorting request/response shapes.

use serde::{Deserialize, Serialize};

/// Page size used when a caller leaves it unset.
pub const DEFAULT_PAGE_SIZE: i64 = 20;

/// Page request. `page_num` is 1-based; `page_size <= 0` means no limit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pager {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub page_size: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub page_num: i64,
    /// Continuation token for feed-style paging; plain paging ignores it.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub page_token: String,
}

impl Pager {
    pub fn new(page_size: i64, page_num: i64) -> Self {
        Self {
            page_size,
            page_num,
            page_token: String::new(),
        }
    }

    /// Fills an unset page size with [`DEFAULT_PAGE_SIZE`].
    pub fn initial_default_val(&mut self) {
        if self.page_size == 0 {
            self.page_size = DEFAULT_PAGE_SIZE;
        }
    }

    /// `(limit, skip)` for this page; `None` limit when unbounded.
    pub fn limit_and_skip(&self) -> (Option<u64>, u64) {
        if self.page_size <= 0 {
            return (None, 0);
        }
        let size = self.page_size as u64;
        let skip = if self.page_num > 0 {
            size.saturating_mul((self.page_num - 1) as u64)
        } else {
            0
        };
        (Some(size), skip)
    }
}

fn is_zero(value: &i64) -> bool {
    *value == 0
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortPair {
    pub field: String,
    pub descending: bool,
}

impl SortPair {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }
}

/// Ordered sort keys parsed from `"field[ desc], field2[ desc]"`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortSpec {
    pairs: Vec<SortPair>,
}

impl SortSpec {
    /// Parses the textual form. Blank segments are ignored; any direction
    /// word other than `desc` means ascending.
    pub fn parse(order_by: &str) -> Self {
        let pairs = order_by
            .split(',')
            .filter_map(|segment| {
                let mut words = segment.split_whitespace();
                let field = words.next()?;
                let descending = words.next().is_some_and(|word| word == "desc");
                Some(SortPair {
                    field: field.to_string(),
                    descending,
                })
            })
            .collect();
        Self { pairs }
    }

    pub fn from_pairs(pairs: Vec<SortPair>) -> Self {
        Self { pairs }
    }

    pub fn pairs(&self) -> &[SortPair] {
        &self.pairs
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl From<&str> for SortSpec {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

/// One page of rows plus the total count of matching records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagedResult<T> {
    pub rows: Vec<T>,
    pub total_count: u64,
}
