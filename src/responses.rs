//! Shared response envelopes

use serde::{Deserialize, Serialize};

/// The paged list envelope every list endpoint returns
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListEnvelope<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total_items: i64,
    pub total_pages: i64,
}

impl<T> ListEnvelope<T> {
    /// Build an envelope; `total_pages` is derived
    pub fn new(items: Vec<T>, page: u32, per_page: u32, total_items: i64) -> Self {
        let total_pages = if total_items == 0 {
            0
        } else {
            (total_items + per_page as i64 - 1) / per_page as i64
        };
        Self {
            items,
            page,
            per_page,
            total_items,
            total_pages,
        }
    }
}

/// Common `page` / `perPage` query parameters.
///
/// Kept as strings so the struct survives `#[serde(flatten)]` inside
/// other query types (urlencoded deserialization cannot flatten
/// integers); accessors parse and clamp.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageParams {
    #[serde(default)]
    pub page: Option<String>,
    #[serde(default, rename = "perPage")]
    pub per_page: Option<String>,
}

impl PageParams {
    /// Default page size
    pub const DEFAULT_PER_PAGE: u32 = 50;
    /// Page size ceiling
    pub const MAX_PER_PAGE: u32 = 500;

    /// Effective page (1-based); unparseable input reads as page 1
    pub fn page(&self) -> u32 {
        self.page
            .as_deref()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1)
            .max(1)
    }

    /// Effective page size, clamped to 1–500
    pub fn per_page(&self) -> u32 {
        self.per_page
            .as_deref()
            .and_then(|v| v.parse().ok())
            .unwrap_or(Self::DEFAULT_PER_PAGE)
            .clamp(1, Self::MAX_PER_PAGE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_math() {
        let env = ListEnvelope::new(vec![1, 2, 3], 1, 50, 3);
        assert_eq!(env.total_pages, 1);

        let env = ListEnvelope::new(Vec::<i32>::new(), 1, 50, 0);
        assert_eq!(env.total_pages, 0);

        let env = ListEnvelope::new(vec![0; 50], 2, 50, 101);
        assert_eq!(env.total_pages, 3);
    }

    #[test]
    fn envelope_field_names() {
        let env = ListEnvelope::new(vec![1], 1, 50, 1);
        let json = serde_json::to_value(&env).unwrap();
        assert!(json.get("items").is_some());
        assert!(json.get("perPage").is_some());
        assert!(json.get("totalItems").is_some());
        assert!(json.get("totalPages").is_some());
    }

    #[test]
    fn page_param_clamps() {
        let p = PageParams::default();
        assert_eq!(p.page(), 1);
        assert_eq!(p.per_page(), 50);

        let p = PageParams {
            page: Some("0".into()),
            per_page: Some("0".into()),
        };
        assert_eq!(p.page(), 1);
        assert_eq!(p.per_page(), 1);

        let p = PageParams {
            page: Some("7".into()),
            per_page: Some("9999".into()),
        };
        assert_eq!(p.page(), 7);
        assert_eq!(p.per_page(), 500);

        let p = PageParams {
            page: Some("not-a-number".into()),
            per_page: Some("abc".into()),
        };
        assert_eq!(p.page(), 1);
        assert_eq!(p.per_page(), 50);
    }
}
