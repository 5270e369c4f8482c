//! Client-side pagination and name filtering.
//!
//! The Management API returns complete, unpaginated lists. Listings fetch the
//! whole collection, filter it by name (plain substring or regex), then slice
//! `[(page - 1) * page_size, page * page_size)`.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::config::PaginationConfig;
use crate::error::ApiError;

/// Upper bound on compiled filter regex size
const MAX_REGEX_SIZE: usize = 1 << 20;

/// Longest accepted filter expression
const MAX_FILTER_LENGTH: usize = 256;

/// Page selection and optional name filter parsed from the query string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// 1-based page number
    pub page: usize,
    pub page_size: usize,
    pub name: Option<String>,
    pub use_regex: bool,
}

impl PageRequest {
    pub fn new(page: usize, page_size: usize) -> Self {
        Self {
            page,
            page_size,
            name: None,
            use_regex: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>, use_regex: bool) -> Self {
        self.name = Some(name.into());
        self.use_regex = use_regex;
        self
    }

    /// Parse `page`, `pageSize` (or `page_size`), `name` and `useRegex`.
    pub fn from_query(
        params: &HashMap<String, String>,
        config: &PaginationConfig,
    ) -> Result<Self, ApiError> {
        let page = match params.get("page") {
            Some(raw) => parse_positive(raw, "page")?,
            None => 1,
        };

        let page_size = match params.get("pageSize").or_else(|| params.get("page_size")) {
            Some(raw) => parse_positive(raw, "pageSize")?,
            None => config.default_page_size,
        };
        if page_size > config.max_page_size {
            return Err(ApiError::validation(format!(
                "pageSize must be between 1 and {}",
                config.max_page_size
            )));
        }

        let use_regex = match params.get("useRegex").or_else(|| params.get("use_regex")) {
            Some(raw) => parse_bool(raw, "useRegex")?,
            None => false,
        };

        let name = params
            .get("name")
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());

        let request = Self {
            page,
            page_size,
            name,
            use_regex,
        };
        // Surface bad expressions as validation errors before any upstream call
        request.name_filter()?;
        Ok(request)
    }

    /// Compile the name filter, if any
    pub fn name_filter(&self) -> Result<Option<NameFilter>, ApiError> {
        let Some(name) = &self.name else {
            return Ok(None);
        };
        if name.len() > MAX_FILTER_LENGTH {
            return Err(ApiError::validation(format!(
                "name filter must be at most {} characters",
                MAX_FILTER_LENGTH
            )));
        }
        if self.use_regex {
            let regex = RegexBuilder::new(name)
                .size_limit(MAX_REGEX_SIZE)
                .build()
                .map_err(|e| ApiError::validation(format!("invalid name regex: {}", e)))?;
            Ok(Some(NameFilter::Regex(regex)))
        } else {
            Ok(Some(NameFilter::Substring(name.to_lowercase())))
        }
    }
}

fn parse_positive(raw: &str, field: &str) -> Result<usize, ApiError> {
    match raw.trim().parse::<usize>() {
        Ok(value) if value >= 1 => Ok(value),
        _ => Err(ApiError::validation(format!(
            "{} must be a positive integer",
            field
        ))),
    }
}

fn parse_bool(raw: &str, field: &str) -> Result<bool, ApiError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        _ => Err(ApiError::validation(format!("{} must be true or false", field))),
    }
}

/// Name filter: case-insensitive substring, or regex search
#[derive(Debug, Clone)]
pub enum NameFilter {
    /// Lower-cased needle
    Substring(String),
    Regex(Regex),
}

impl NameFilter {
    pub fn matches(&self, value: &str) -> bool {
        match self {
            NameFilter::Substring(needle) => value.to_lowercase().contains(needle.as_str()),
            NameFilter::Regex(regex) => regex.is_match(value),
        }
    }
}

/// One page of a filtered collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub page_size: usize,
    pub total_items: usize,
    pub total_pages: usize,
    pub has_next: bool,
    pub has_previous: bool,
}

impl<T> Page<T> {
    /// Slice an already-filtered collection. A page past the end is empty.
    pub fn from_items(items: Vec<T>, page: usize, page_size: usize) -> Self {
        let page = page.max(1);
        let page_size = page_size.max(1);
        let total_items = items.len();
        let total_pages = total_items.div_ceil(page_size);

        let start = (page - 1).saturating_mul(page_size).min(total_items);
        let end = start.saturating_add(page_size).min(total_items);
        let items: Vec<T> = items.into_iter().skip(start).take(end - start).collect();

        Self {
            items,
            page,
            page_size,
            total_items,
            total_pages,
            has_next: page < total_pages,
            has_previous: page > 1,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            page_size: self.page_size,
            total_items: self.total_items,
            total_pages: self.total_pages,
            has_next: self.has_next,
            has_previous: self.has_previous,
        }
    }
}

/// Filter `items` by the field `field_of` returns, then slice the requested page.
/// Items without the field never match a name filter.
pub fn paginate<T>(
    items: Vec<T>,
    request: &PageRequest,
    field_of: impl Fn(&T) -> Option<&str>,
) -> Result<Page<T>, ApiError> {
    paginate_matching(items, request, |item, filter| {
        field_of(item).is_some_and(|v| filter.matches(v))
    })
}

/// Like [`paginate`], with a custom predicate deciding whether an item matches the filter
pub fn paginate_matching<T>(
    items: Vec<T>,
    request: &PageRequest,
    matches: impl Fn(&T, &NameFilter) -> bool,
) -> Result<Page<T>, ApiError> {
    let filtered = match request.name_filter()? {
        Some(filter) => items
            .into_iter()
            .filter(|item| matches(item, &filter))
            .collect(),
        None => items,
    };
    Ok(Page::from_items(filtered, request.page, request.page_size))
}

/// String field of a Management API JSON object
pub fn json_str<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    value.get(field).and_then(Value::as_str)
}
