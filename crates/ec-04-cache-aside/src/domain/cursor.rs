//! Keyset (cursor) pagination.
//!
//! A listing sorted by `(value, id)` is paged with an opaque cursor naming the
//! last (or first) record of the current page. The next page holds the
//! records strictly past that position:
//!
//! ```text
//! value OP cursor.value  OR  (value = cursor.value AND id OP cursor.id)
//! ```
//!
//! | Sort | Page | OP |
//! |------|------|----|
//! | ascending | forward | `>` |
//! | ascending | backward | `<` |
//! | descending | forward | `<` |
//! | descending | backward | `>` |
//!
//! The tie-break on `id` uses the same operator as the sort field, and the
//! listing must be ordered by `id` in the same direction as the sort field.
//! Mixing directions makes pages overlap or skip records.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;

pub const DEFAULT_PAGE_LIMIT: usize = 20;
pub const MAX_PAGE_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Ascending,
    #[default]
    Descending,
}

impl SortDirection {
    pub fn reverse(self) -> Self {
        match self {
            Self::Ascending => Self::Descending,
            Self::Descending => Self::Ascending,
        }
    }

    /// Parse `field` / `-field` sort syntax.
    pub fn parse_field(spec: &str) -> (&str, Self) {
        match spec.strip_prefix('-') {
            Some(field) => (field, Self::Descending),
            None => (spec, Self::Ascending),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageDirection {
    Forward,
    Backward,
}

/// Comparison used by both halves of the keyset predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    GreaterThan,
    LessThan,
}

impl Comparison {
    pub fn for_travel(sort: SortDirection, page: PageDirection) -> Self {
        match travel(sort, page) {
            SortDirection::Ascending => Self::GreaterThan,
            SortDirection::Descending => Self::LessThan,
        }
    }

    fn admits(self, ord: Ordering) -> bool {
        match self {
            Self::GreaterThan => ord == Ordering::Greater,
            Self::LessThan => ord == Ordering::Less,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CursorError {
    #[error("cursor is not valid hex")]
    Encoding,

    #[error("cursor payload is invalid: {0}")]
    Payload(String),
}

/// Position of a record in a `(value, id)` ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor<V> {
    pub value: V,
    pub id: String,
}

impl<V> Cursor<V> {
    pub fn new(value: V, id: impl Into<String>) -> Self {
        Self {
            value,
            id: id.into(),
        }
    }
}

impl<V: Serialize + DeserializeOwned> Cursor<V> {
    /// Opaque token for clients.
    pub fn encode(&self) -> Result<String, CursorError> {
        serde_json::to_vec(self)
            .map(hex::encode)
            .map_err(|e| CursorError::Payload(e.to_string()))
    }

    pub fn decode(token: &str) -> Result<Self, CursorError> {
        let raw = hex::decode(token).map_err(|_| CursorError::Encoding)?;
        serde_json::from_slice(&raw).map_err(|e| CursorError::Payload(e.to_string()))
    }
}

impl<V: Ord> Cursor<V> {
    /// Whether the record at `(value, id)` lies past this cursor.
    pub fn admits(&self, value: &V, id: &str, sort: SortDirection, page: PageDirection) -> bool {
        let ord = (value, id).cmp(&(&self.value, self.id.as_str()));
        Comparison::for_travel(sort, page).admits(ord)
    }
}

/// One page and the cursors around it.
#[derive(Debug, Clone, PartialEq)]
pub struct KeysetPage<T, V> {
    pub items: Vec<T>,
    pub next: Option<Cursor<V>>,
    pub prev: Option<Cursor<V>>,
}

impl<T, V> KeysetPage<T, V> {
    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }

    pub fn has_prev(&self) -> bool {
        self.prev.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct KeysetQuery<V> {
    sort: SortDirection,
    limit: usize,
    cursor: Option<(PageDirection, Cursor<V>)>,
}

impl<V: Ord + Clone> KeysetQuery<V> {
    /// `limit` is clamped to `1..=100`.
    pub fn new(sort: SortDirection, limit: usize) -> Self {
        Self {
            sort,
            limit: limit.clamp(1, MAX_PAGE_LIMIT),
            cursor: None,
        }
    }

    pub fn after(mut self, cursor: Cursor<V>) -> Self {
        self.cursor = Some((PageDirection::Forward, cursor));
        self
    }

    pub fn before(mut self, cursor: Cursor<V>) -> Self {
        self.cursor = Some((PageDirection::Backward, cursor));
        self
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn sort(&self) -> SortDirection {
        self.sort
    }

    fn page_direction(&self) -> PageDirection {
        self.cursor
            .as_ref()
            .map_or(PageDirection::Forward, |(direction, _)| *direction)
    }

    /// Run the query over an in-memory source. `key` yields each record's
    /// sort value and id.
    pub fn apply<T, F>(&self, records: &[T], key: F) -> KeysetPage<T, V>
    where
        T: Clone,
        F: Fn(&T) -> (V, String),
    {
        let page = self.page_direction();
        let order = travel(self.sort, page);

        let mut candidates: Vec<(V, String, &T)> = records
            .iter()
            .map(|record| {
                let (value, id) = key(record);
                (value, id, record)
            })
            .filter(|(value, id, _)| match &self.cursor {
                Some((_, cursor)) => cursor.admits(value, id, self.sort, page),
                None => true,
            })
            .collect();
        candidates.sort_by(|a, b| {
            let ord = (&a.0, &a.1).cmp(&(&b.0, &b.1));
            match order {
                SortDirection::Ascending => ord,
                SortDirection::Descending => ord.reverse(),
            }
        });

        // One extra row tells whether more records exist in this direction.
        let more = candidates.len() > self.limit;
        candidates.truncate(self.limit);
        if page == PageDirection::Backward {
            candidates.reverse();
        }

        let first = candidates.first().map(|(v, id, _)| Cursor::new(v.clone(), id.clone()));
        let last = candidates.last().map(|(v, id, _)| Cursor::new(v.clone(), id.clone()));
        let (next, prev) = match (&self.cursor, page) {
            (None, _) => (last.filter(|_| more), None),
            (Some(_), PageDirection::Forward) => (last.filter(|_| more), first),
            (Some(_), PageDirection::Backward) => (last, first.filter(|_| more)),
        };

        KeysetPage {
            items: candidates.into_iter().map(|(_, _, record)| record.clone()).collect(),
            next,
            prev,
        }
    }
}

impl<V: Ord + Clone> Default for KeysetQuery<V> {
    fn default() -> Self {
        Self::new(SortDirection::default(), DEFAULT_PAGE_LIMIT)
    }
}

fn travel(sort: SortDirection, page: PageDirection) -> SortDirection {
    match page {
        PageDirection::Forward => sort,
        PageDirection::Backward => sort.reverse(),
    }
}
