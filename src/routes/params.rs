use serde::Deserialize;
use utoipa::ToSchema;

use crate::models::Category;

/// Normalized paging window. Query structs carry `page`/`per_page` as
/// top-level fields because serde_urlencoded cannot deserialize numbers
/// inside a `#[serde(flatten)]`ed struct.
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl Pagination {
    pub fn normalize(&self) -> (i64, i64, i64) {
        let page = self.page.unwrap_or(1).max(1);
        let per_page = self.per_page.unwrap_or(20).clamp(1, 100);
        let offset = (page - 1) * per_page;
        (page, per_page, offset)
    }
}

#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProductSortBy {
    CreatedAt,
    Price,
    Name,
    Rating,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProductQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub q: Option<String>,
    pub category: Option<Category>,
    pub featured: Option<bool>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub sort_by: Option<ProductSortBy>,
    pub sort_order: Option<SortOrder>,
}

impl ProductQuery {
    pub fn pagination(&self) -> Pagination {
        Pagination {
            page: self.page,
            per_page: self.per_page,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct OrderListQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub status: Option<String>,
    pub sort_order: Option<SortOrder>,
}

impl OrderListQuery {
    pub fn pagination(&self) -> Pagination {
        Pagination {
            page: self.page,
            per_page: self.per_page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::http::Uri;

    #[test]
    fn normalize_defaults_and_clamps() {
        let defaults = Pagination {
            page: None,
            per_page: None,
        };
        assert_eq!(defaults.normalize(), (1, 20, 0));

        let clamped = Pagination {
            page: Some(0),
            per_page: Some(1000),
        };
        assert_eq!(clamped.normalize(), (1, 100, 0));

        let third = Pagination {
            page: Some(3),
            per_page: Some(10),
        };
        assert_eq!(third.normalize(), (3, 10, 20));
    }

    #[test]
    fn order_list_query_parses_paging_from_the_uri() {
        let uri: Uri = "/api/orders?page=2&per_page=10&status=pending&sort_order=asc"
            .parse()
            .unwrap();
        let Query(query) = Query::<OrderListQuery>::try_from_uri(&uri).unwrap();
        assert_eq!(query.page, Some(2));
        assert_eq!(query.per_page, Some(10));
        assert_eq!(query.status.as_deref(), Some("pending"));
        assert!(matches!(query.sort_order, Some(SortOrder::Asc)));
        assert_eq!(query.pagination().normalize(), (2, 10, 10));
    }

    #[test]
    fn product_query_parses_paging_and_filters_from_the_uri() {
        let uri: Uri =
            "/api/products?page=3&per_page=5&min_price=1000&category=books&sort_by=price"
                .parse()
                .unwrap();
        let Query(query) = Query::<ProductQuery>::try_from_uri(&uri).unwrap();
        assert_eq!(query.page, Some(3));
        assert_eq!(query.per_page, Some(5));
        assert_eq!(query.min_price, Some(1000));
        assert!(matches!(query.category, Some(Category::Books)));
        assert!(matches!(query.sort_by, Some(ProductSortBy::Price)));
    }

    #[test]
    fn bare_uris_leave_paging_unset() {
        let uri: Uri = "/api/products".parse().unwrap();
        let Query(query) = Query::<ProductQuery>::try_from_uri(&uri).unwrap();
        assert_eq!(query.page, None);
        assert_eq!(query.per_page, None);
    }
}
