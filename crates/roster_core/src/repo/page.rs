//! Paging and sorting primitives for member list queries.
//!
//! # Invariants
//! - Page numbers are zero-based; page size is at least 1.
//! - Sort properties map to fixed column names; no caller text reaches SQL.
//! - Every generated `ORDER BY` ends on `m.id` so slices are deterministic.

use super::error::RepoResult;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageRequestError {
    ZeroSize,
}

impl Display for PageRequestError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZeroSize => write!(f, "page size must be at least 1"),
        }
    }
}

impl Error for PageRequestError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Sortable member attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberProperty {
    Id,
    Username,
    Age,
}

impl MemberProperty {
    fn column(self) -> &'static str {
        match self {
            Self::Id => "m.id",
            Self::Username => "m.username",
            Self::Age => "m.age",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Order {
    pub property: MemberProperty,
    pub direction: Direction,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Sort {
    orders: Vec<Order>,
}

impl Sort {
    pub fn unsorted() -> Self {
        Self::default()
    }

    pub fn by(direction: Direction, property: MemberProperty) -> Self {
        Self::unsorted().and(direction, property)
    }

    pub fn and(mut self, direction: Direction, property: MemberProperty) -> Self {
        self.orders.push(Order {
            property,
            direction,
        });
        self
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub fn is_sorted(&self) -> bool {
        !self.orders.is_empty()
    }

    pub(crate) fn order_by_sql(&self) -> String {
        let mut terms: Vec<String> = self
            .orders
            .iter()
            .map(|order| format!("{} {}", order.property.column(), order.direction.sql()))
            .collect();
        if !self
            .orders
            .iter()
            .any(|order| order.property == MemberProperty::Id)
        {
            terms.push("m.id ASC".to_string());
        }
        format!(" ORDER BY {}", terms.join(", "))
    }
}

/// Zero-based page coordinates plus ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    page: u32,
    size: u32,
    sort: Sort,
}

impl PageRequest {
    pub fn of(page: u32, size: u32) -> Result<Self, PageRequestError> {
        Self::of_sorted(page, size, Sort::unsorted())
    }

    pub fn of_sorted(page: u32, size: u32, sort: Sort) -> Result<Self, PageRequestError> {
        if size == 0 {
            return Err(PageRequestError::ZeroSize);
        }
        Ok(Self { page, size, sort })
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn sort(&self) -> &Sort {
        &self.sort
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page) * u64::from(self.size)
    }

    pub fn next(&self) -> Self {
        Self {
            page: self.page.saturating_add(1),
            ..self.clone()
        }
    }

    pub(crate) fn limit_offset_sql(&self) -> String {
        format!(" LIMIT {} OFFSET {}", self.size, self.offset())
    }
}

/// One slice of a result set plus the total match count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub content: Vec<T>,
    pub number: u32,
    pub size: u32,
    pub total_elements: u64,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> u64 {
        self.total_elements.div_ceil(u64::from(self.size))
    }

    pub fn number_of_elements(&self) -> usize {
        self.content.len()
    }

    pub fn is_first(&self) -> bool {
        self.number == 0
    }

    pub fn has_previous(&self) -> bool {
        self.number > 0
    }

    pub fn has_next(&self) -> bool {
        u64::from(self.number) + 1 < self.total_pages()
    }

    pub fn is_last(&self) -> bool {
        !self.has_next()
    }

    /// Converts the content, keeping the paging metadata.
    pub fn map<U, F>(self, f: F) -> Page<U>
    where
        F: FnMut(T) -> U,
    {
        Page {
            content: self.content.into_iter().map(f).collect(),
            number: self.number,
            size: self.size,
            total_elements: self.total_elements,
        }
    }
}

/// Builds a page, running `count` only when the slice alone cannot tell the total.
///
/// A short slice already fixes the total (`offset + len`) unless it is empty
/// past the first page, where the requested page may lie beyond the end.
pub(crate) fn assemble_page<T, F>(
    content: Vec<T>,
    request: &PageRequest,
    count: F,
) -> RepoResult<Page<T>>
where
    F: FnOnce() -> RepoResult<u64>,
{
    let len = content.len() as u64;
    let size = u64::from(request.size);
    let short_slice = len < size && (request.offset() == 0 || len > 0);

    let total_elements = if short_slice {
        request.offset() + len
    } else {
        count()?
    };

    Ok(Page {
        content,
        number: request.page,
        size: request.size,
        total_elements,
    })
}
