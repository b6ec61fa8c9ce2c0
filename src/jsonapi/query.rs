//! Collection query parameters: paging, sorting, filtering and search

use crate::error::{ApiError, Result};
use crate::resource::ResourceDescriptor;

pub const SEARCH_FILTER: &str = "search";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageDefaults {
    pub default_size: usize,
    pub max_size: usize,
}

impl Default for PageDefaults {
    fn default() -> Self {
        Self {
            default_size: 25,
            max_size: 100,
        }
    }
}

/// One-based page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub number: usize,
    pub size: usize,
}

impl PageRequest {
    /// Items before this page; `None` when it does not fit in a `usize`
    pub fn checked_offset(&self) -> Option<usize> {
        self.number.checked_sub(1)?.checked_mul(self.size)
    }

    pub fn offset(&self) -> usize {
        self.checked_offset().unwrap_or(usize::MAX)
    }

    /// Number of the last page holding `total` items, at least 1
    pub fn last(&self, total: u64) -> usize {
        let total = usize::try_from(total).unwrap_or(usize::MAX);
        total.div_ceil(self.size).max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortField {
    pub field: String,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub page: PageRequest,
    pub sort: Vec<SortField>,
    /// `filter[name]` pairs other than `filter[search]`
    pub filters: Vec<(String, String)>,
    pub search: Option<String>,
    /// Parameters other than paging, kept for pagination links
    passthrough: Vec<(String, String)>,
}

impl ListQuery {
    /// Parse and check query parameters against a resource.
    ///
    /// `extra_filters` names filters a service handles itself in addition to
    /// attributes and relationships of the resource.
    pub fn parse(
        params: &[(String, String)],
        descriptor: &ResourceDescriptor,
        defaults: PageDefaults,
        extra_filters: &[&str],
    ) -> Result<Self> {
        let mut page = PageRequest {
            number: 1,
            size: defaults.default_size,
        };
        let mut sort = Vec::new();
        let mut filters = Vec::new();
        let mut search = None;
        let mut passthrough = Vec::new();

        for (key, value) in params {
            match key.as_str() {
                "page[number]" => page.number = parse_positive(key, value)?,
                "page[size]" => page.size = parse_positive(key, value)?.min(defaults.max_size),
                "sort" => {
                    sort = parse_sort(value, descriptor)?;
                    passthrough.push((key.clone(), value.clone()));
                }
                "include" => passthrough.push((key.clone(), value.clone())),
                _ => {
                    let Some(name) = key
                        .strip_prefix("filter[")
                        .and_then(|rest| rest.strip_suffix(']'))
                    else {
                        return Err(ApiError::invalid_parameter(
                            key.as_str(),
                            format!("unknown query parameter '{key}'"),
                        ));
                    };

                    if name == SEARCH_FILTER {
                        let term = value.trim();
                        if !term.is_empty() {
                            search = Some(term.to_string());
                        }
                    } else if descriptor.has_attribute(name)
                        || descriptor.relationship(name).is_some()
                        || extra_filters.contains(&name)
                    {
                        filters.push((name.to_string(), value.clone()));
                    } else {
                        return Err(ApiError::invalid_parameter(
                            key.as_str(),
                            format!("{} cannot be filtered by '{name}'", descriptor.type_name),
                        ));
                    }
                    passthrough.push((key.clone(), value.clone()));
                }
            }
        }

        if page.checked_offset().is_none() {
            return Err(ApiError::invalid_parameter(
                "page[number]",
                format!("page[number] {} is out of range for page[size] {}", page.number, page.size),
            ));
        }

        Ok(Self {
            page,
            sort,
            filters,
            search,
            passthrough,
        })
    }

    pub fn filter(&self, name: &str) -> Option<&str> {
        self.filters
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// URL of page `number` of this query under `base`
    pub fn page_url(&self, base: &str, number: usize) -> String {
        let mut url = format!(
            "{base}?page[number]={number}&page[size]={}",
            self.page.size
        );
        for (key, value) in &self.passthrough {
            url.push('&');
            url.push_str(key);
            url.push('=');
            url.push_str(&encode_component(value));
        }
        url
    }
}

fn parse_positive(key: &str, value: &str) -> Result<usize> {
    match value.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ApiError::invalid_parameter(
            key,
            format!("{key} must be a positive integer"),
        )),
    }
}

fn parse_sort(value: &str, descriptor: &ResourceDescriptor) -> Result<Vec<SortField>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .map(|field| {
            let (name, descending) = match field.strip_prefix('-') {
                Some(name) => (name, true),
                None => (field, false),
            };
            if descriptor.sortable.contains(&name) {
                Ok(SortField {
                    field: name.to_string(),
                    descending,
                })
            } else {
                Err(ApiError::invalid_parameter(
                    "sort",
                    format!("{} cannot be sorted by '{name}'", descriptor.type_name),
                ))
            }
        })
        .collect()
}

fn encode_component(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b',' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
