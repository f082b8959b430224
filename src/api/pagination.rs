use std::collections::HashMap;

use aide::OperationInput;
use axum::async_trait;
use axum::extract::{FromRequestParts, OriginalUri, Query};
use axum::http::request::Parts;
use schemars::JsonSchema;
use serde::Serialize;
use serde_json::json;

use crate::error::{ServiceError, ServiceResult};

pub const DEFAULT_PAGE_SIZE: u64 = 10;
pub const MAX_PAGE_SIZE: u64 = 100;

/// Page requested with the `page` and `page_size` query parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Pagination {
    pub page: u64,
    pub page_size: u64,
    path: String,
    query: Vec<(String, String)>,
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
pub struct Paginated<T> {
    pub count: u64,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
}

fn invalid_page() -> ServiceError {
    ServiceError::NotFoundWith("Invalid page.".to_owned(), json!({}))
}

impl Pagination {
    pub fn new(path: &str, query: Vec<(String, String)>) -> ServiceResult<Self> {
        let value = |name: &str| {
            query
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.trim().to_owned())
        };

        let page = match value("page") {
            None => 1,
            Some(page) => match page.parse::<u64>() {
                Ok(page) if page > 0 => page,
                _ => return Err(invalid_page()),
            },
        };
        let page_size = value("page_size")
            .and_then(|size| size.parse::<u64>().ok())
            .filter(|size| *size > 0)
            .map(|size| size.min(MAX_PAGE_SIZE))
            .unwrap_or(DEFAULT_PAGE_SIZE);

        // the offset has to fit into a postgres bigint
        let offset = (page - 1).checked_mul(page_size);
        if offset.map_or(true, |offset| i64::try_from(offset).is_err()) {
            return Err(invalid_page());
        }

        Ok(Self {
            page,
            page_size,
            path: path.to_owned(),
            query,
        })
    }

    pub fn limit(&self) -> u64 {
        self.page_size
    }

    pub fn offset(&self) -> u64 {
        (self.page - 1) * self.page_size
    }

    fn link(&self, page: u64) -> String {
        let mut pairs: Vec<(String, String)> = self
            .query
            .iter()
            .filter(|(key, _)| key != "page")
            .cloned()
            .collect();
        if page > 1 {
            pairs.push(("page".to_owned(), page.to_string()));
        }
        if pairs.is_empty() {
            return self.path.to_owned();
        }

        let mut url = match reqwest::Url::parse("http://localhost/") {
            Ok(url) => url,
            Err(_) => return self.path.to_owned(),
        };
        url.query_pairs_mut().extend_pairs(pairs);
        format!("{}?{}", self.path, url.query().unwrap_or_default())
    }

    /// Wraps one page of results. Pages past the last one are rejected, an empty
    /// first page is not.
    pub fn page<T>(&self, count: u64, results: Vec<T>) -> ServiceResult<Paginated<T>> {
        let pages = count.div_ceil(self.page_size).max(1);
        if self.page > pages {
            return Err(invalid_page());
        }

        Ok(Paginated {
            count,
            next: (self.page < pages).then(|| self.link(self.page + 1)),
            previous: (self.page > 1).then(|| self.link(self.page - 1)),
            results,
        })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Pagination
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // nested routers see a shortened uri
        let uri = match parts.extensions.get::<OriginalUri>() {
            Some(OriginalUri(uri)) => uri.clone(),
            None => parts.uri.clone(),
        };

        let mut query: Vec<(String, String)> =
            Query::<HashMap<String, String>>::try_from_uri(&uri)
                .map(|Query(query)| query.into_iter().collect())
                .unwrap_or_default();
        query.sort();

        Pagination::new(uri.path(), query)
    }
}

impl OperationInput for Pagination {}

#[cfg(test)]
mod tests {
    use super::*;

    fn pagination(query: &[(&str, &str)]) -> ServiceResult<Pagination> {
        Pagination::new(
            "/api/orders",
            query
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_defaults_and_limits() {
        let p = pagination(&[]).unwrap();
        assert_eq!((p.page, p.limit(), p.offset()), (1, 10, 0));

        let p = pagination(&[("page", "3"), ("page_size", "500")]).unwrap();
        assert_eq!((p.page, p.limit(), p.offset()), (3, 100, 200));

        let p = pagination(&[("page_size", "abc")]).unwrap();
        assert_eq!(p.limit(), 10);

        assert!(pagination(&[("page", "0")]).is_err());
        assert!(pagination(&[("page", "x")]).is_err());
    }

    #[test]
    fn test_page_offset_overflow() {
        let error = pagination(&[("page", "9223372036854775807")]).unwrap_err();
        assert!(matches!(error, ServiceError::NotFoundWith(ref m, _) if m == "Invalid page."));

        assert!(pagination(&[("page", "18446744073709551615"), ("page_size", "1")]).is_err());

        // the largest page whose offset still fits
        let last = (i64::MAX as u64 / DEFAULT_PAGE_SIZE + 1).to_string();
        let p = pagination(&[("page", last.as_str())]).unwrap();
        assert!(i64::try_from(p.offset()).is_ok());
    }

    #[test]
    fn test_links() {
        let p = pagination(&[("page", "2"), ("status", "HA")]).unwrap();
        let page = p.page(25, vec![1, 2, 3]).unwrap();
        assert_eq!(page.count, 25);
        assert_eq!(page.next.as_deref(), Some("/api/orders?status=HA&page=3"));
        assert_eq!(page.previous.as_deref(), Some("/api/orders?status=HA"));

        let p = pagination(&[("page", "3")]).unwrap();
        let page = p.page(25, vec![1]).unwrap();
        assert_eq!(page.next, None);
        assert_eq!(page.previous.as_deref(), Some("/api/orders?page=2"));
    }

    #[test]
    fn test_page_out_of_range() {
        let p = pagination(&[]).unwrap();
        assert!(p.page::<u8>(0, vec![]).is_ok());

        let p = pagination(&[("page", "4")]).unwrap();
        assert!(p.page::<u8>(25, vec![]).is_err());
    }
}
